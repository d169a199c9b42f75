//! Connection registry: every open connection and the room it has joined.
//!
//! Not synchronized on its own; the engine keeps it behind the same lock as
//! the room table so membership and slots always change together.

use std::collections::HashMap;

use crate::peer::{ConnId, Peer};

/// A registered connection.
#[derive(Debug)]
struct Member<P> {
    peer: P,
    room: Option<String>,
}

/// Maps each open connection to its handle and current room code.
#[derive(Debug)]
pub struct ConnectionRegistry<P> {
    members: HashMap<ConnId, Member<P>>,
}

impl<P> Default for ConnectionRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> ConnectionRegistry<P> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            members: HashMap::new(),
        }
    }

    /// Returns the room code `id` has joined, if any.
    #[must_use]
    pub fn lookup_room(&self, id: ConnId) -> Option<&str> {
        self.members.get(&id).and_then(|m| m.room.as_deref())
    }

    /// Records that `id` has joined `code`. Unknown ids are ignored.
    pub fn set_room(&mut self, id: ConnId, code: &str) {
        if let Some(member) = self.members.get_mut(&id) {
            member.room = Some(code.to_string());
        }
    }

    /// Clears the membership of `id`, leaving it registered.
    pub fn clear_room(&mut self, id: ConnId) {
        if let Some(member) = self.members.get_mut(&id) {
            member.room = None;
        }
    }

    /// Returns the handle registered under `id`.
    #[must_use]
    pub fn peer(&self, id: ConnId) -> Option<&P> {
        self.members.get(&id).map(|m| &m.peer)
    }

    /// Erases `id`, returning the room it was in.
    pub fn remove(&mut self, id: ConnId) -> Option<String> {
        self.members.remove(&id).and_then(|m| m.room)
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ConnId) -> bool {
        self.members.contains_key(&id)
    }

    /// Number of open connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Every registered connection with the room it has joined, if any.
    pub fn memberships(&self) -> impl Iterator<Item = (ConnId, Option<&str>)> {
        self.members.iter().map(|(id, m)| (*id, m.room.as_deref()))
    }
}

impl<P: Peer> ConnectionRegistry<P> {
    /// Adds a connection with no room membership.
    ///
    /// Registering an id twice replaces the handle and drops the membership.
    pub fn register(&mut self, peer: P) {
        self.members.insert(peer.id(), Member { peer, room: None });
    }
}
