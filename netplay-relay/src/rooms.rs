//! Room table and the two-slot pairing state machine.
//!
//! A room is created by the first `connect` carrying its code (WAITING), is
//! completed by the second (PAIRED), and is removed as soon as either
//! occupant leaves. An empty room is never stored: absence from the table is
//! the EMPTY state.
//!
//! Like the registry, the table is plain data; the engine serializes access.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::peer::ConnId;

/// Number of slots in a room.
pub const SLOTS: usize = 2;

/// Reasons a join request is refused. State is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// Both slots of the room are already taken.
    #[error("room {0} is full")]
    RoomFull(String),
    /// The connection is already a member of a room.
    #[error("already joined room {0}")]
    AlreadyInRoom(String),
}

/// Result of a successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A new room was created with the joiner in slot 0.
    Waiting,
    /// The joiner took slot 1 and the room is complete.
    Paired {
        /// Occupant of slot 0.
        first: ConnId,
        /// Occupant of slot 1 (the joiner).
        second: ConnId,
    },
}

/// What was left behind when a connection left its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// The leaver was alone; the room is gone.
    Alone,
    /// The leaver had a partner; the room is gone and the partner must be told.
    Partnered(ConnId),
    /// The leaver did not occupy the named room.
    NotMember,
}

/// One pairing context.
#[derive(Debug, Clone)]
pub struct Room {
    code: String,
    slots: [Option<ConnId>; SLOTS],
    created_at: Instant,
}

impl Room {
    fn new(code: &str, first: ConnId, created_at: Instant) -> Self {
        Self {
            code: code.to_string(),
            slots: [Some(first), None],
            created_at,
        }
    }

    /// The room code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Slot index occupied by `id`.
    #[must_use]
    pub fn slot_of(&self, id: ConnId) -> Option<usize> {
        self.slots.iter().position(|slot| *slot == Some(id))
    }

    /// The occupant of the other slot from `id`, if `id` is a member.
    #[must_use]
    pub fn partner_of(&self, id: ConnId) -> Option<ConnId> {
        let slot = self.slot_of(id)?;
        self.slots[1 - slot]
    }

    /// Whether both slots are occupied.
    #[must_use]
    pub fn is_paired(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Occupied slots in slot order.
    pub fn occupants(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.slots.iter().flatten().copied()
    }

    /// When the room was created.
    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }
}

/// Maps room codes to rooms.
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: HashMap<String, Room>,
}

impl RoomTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `id` into the room `code`, creating the room if absent.
    ///
    /// # Errors
    ///
    /// Returns [`JoinError::RoomFull`] if both slots are taken, or
    /// [`JoinError::AlreadyInRoom`] if `id` already occupies this room.
    pub fn join(&mut self, code: &str, id: ConnId) -> Result<JoinOutcome, JoinError> {
        self.join_at(code, id, Instant::now())
    }

    fn join_at(&mut self, code: &str, id: ConnId, now: Instant) -> Result<JoinOutcome, JoinError> {
        let Some(room) = self.rooms.get_mut(code) else {
            self.rooms.insert(code.to_string(), Room::new(code, id, now));
            return Ok(JoinOutcome::Waiting);
        };

        if room.slot_of(id).is_some() {
            return Err(JoinError::AlreadyInRoom(code.to_string()));
        }

        match room.slots {
            [Some(first), None] => {
                room.slots[1] = Some(id);
                Ok(JoinOutcome::Paired { first, second: id })
            }
            _ => Err(JoinError::RoomFull(code.to_string())),
        }
    }

    /// Removes `id` from room `code`. The room itself is always removed.
    pub fn leave(&mut self, code: &str, id: ConnId) -> Departure {
        let Some(room) = self.rooms.get(code) else {
            return Departure::NotMember;
        };
        if room.slot_of(id).is_none() {
            return Departure::NotMember;
        }
        let partner = room.partner_of(id);
        self.rooms.remove(code);
        partner.map_or(Departure::Alone, Departure::Partnered)
    }

    /// Removes rooms still waiting for a partner after `max_idle`.
    ///
    /// Returns the code and lone occupant of each removed room.
    pub fn expire_waiting(&mut self, max_idle: Duration, now: Instant) -> Vec<(String, ConnId)> {
        let mut expired = Vec::new();
        self.rooms.retain(|code, room| {
            let stale = !room.is_paired() && now.duration_since(room.created_at) >= max_idle;
            if stale && let Some(occupant) = room.occupants().next() {
                expired.push((code.clone(), occupant));
            }
            !stale
        });
        expired
    }

    /// All live rooms, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    /// Looks up a room by code.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<&Room> {
        self.rooms.get(code)
    }

    /// Whether a room with `code` exists.
    #[must_use]
    pub fn contains(&self, code: &str) -> bool {
        self.rooms.contains_key(code)
    }

    /// Number of live rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether the table holds no rooms.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
