//! Pairing and relay engine.
//!
//! Owns the connection registry and the room table behind a single
//! [`RwLock`]. Every operation decides under the lock which notices must go
//! out; the peers captured in a notice are the ones seen at decision time.
//! Writes are non-blocking queue pushes. Pairing notices are queued before
//! the write lock is released, so a partner's first relay can never overtake
//! them; all other notices are queued after release.
//!
//! Relays take the read lock; joins, disconnects and sweeps take the write
//! lock. A peer whose queue refuses a frame is evicted as if it had
//! disconnected.

use std::sync::Arc;
use std::time::Duration;

use netplay_proto::envelope::{self, EnvelopeError, Inbound, PART_NOTIFICATION, Role};
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::peer::{ConnId, Peer};
use crate::registry::ConnectionRegistry;
use crate::rooms::{Departure, JoinError, JoinOutcome, RoomTable};

/// Shortest interval between two idle-room sweeps.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Something to write to a peer once the lock is released.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Notice {
    /// Pairing completed; tells the recipient its own role.
    Joined(Role),
    /// The recipient's partner disconnected.
    Part,
    /// The recipient's join request was refused.
    Rejected(JoinError),
    /// The recipient's waiting room timed out.
    Expired(String),
    /// A frame from the partner, forwarded verbatim.
    Relay(Vec<u8>),
}

impl Notice {
    fn encode(self) -> Result<Vec<u8>, EnvelopeError> {
        match self {
            Self::Joined(role) => envelope::join_notification(role),
            Self::Part => Ok(PART_NOTIFICATION.to_vec()),
            Self::Rejected(err) => envelope::error_notification(&err.to_string()),
            Self::Expired(code) => envelope::error_notification(&format!("room {code} expired")),
            Self::Relay(frame) => Ok(frame),
        }
    }
}

/// Registry and room table, always mutated together.
struct Tables<P> {
    registry: ConnectionRegistry<P>,
    rooms: RoomTable,
}

impl<P: Peer> Tables<P> {
    fn join(&mut self, id: ConnId, code: &str) -> Vec<(P, Notice)> {
        let Some(peer) = self.registry.peer(id).cloned() else {
            tracing::warn!(conn = %id, room = %code, "join from unregistered connection");
            return Vec::new();
        };

        if let Some(current) = self.registry.lookup_room(id) {
            let err = JoinError::AlreadyInRoom(current.to_string());
            tracing::warn!(conn = %id, room = %code, error = %err, "join rejected");
            return vec![(peer, Notice::Rejected(err))];
        }

        match self.rooms.join(code, id) {
            Ok(JoinOutcome::Waiting) => {
                self.registry.set_room(id, code);
                tracing::info!(conn = %id, room = %code, "room created, waiting for partner");
                Vec::new()
            }
            Ok(JoinOutcome::Paired { first, second }) => {
                self.registry.set_room(id, code);
                tracing::info!(room = %code, first = %first, second = %second, "room paired");
                let mut notices = Vec::with_capacity(2);
                if let Some(first_peer) = self.registry.peer(first) {
                    notices.push((first_peer.clone(), Notice::Joined(Role::from_slot(0))));
                }
                notices.push((peer, Notice::Joined(Role::from_slot(1))));
                notices
            }
            Err(err) => {
                tracing::warn!(conn = %id, room = %code, error = %err, "join rejected");
                vec![(peer, Notice::Rejected(err))]
            }
        }
    }

    fn relay_target(&self, id: ConnId) -> Option<P> {
        let code = self.registry.lookup_room(id)?;
        let partner = self.rooms.get(code)?.partner_of(id)?;
        self.registry.peer(partner).cloned()
    }

    fn disconnect(&mut self, id: ConnId) -> Vec<(P, Notice)> {
        let Some(code) = self.registry.remove(id) else {
            return Vec::new();
        };

        match self.rooms.leave(&code, id) {
            Departure::Partnered(partner) => {
                self.registry.clear_room(partner);
                tracing::info!(conn = %id, room = %code, partner = %partner, "peer left paired room");
                self.registry
                    .peer(partner)
                    .map(|p| (p.clone(), Notice::Part))
                    .into_iter()
                    .collect()
            }
            Departure::Alone => {
                tracing::info!(conn = %id, room = %code, "last peer left, room removed");
                Vec::new()
            }
            Departure::NotMember => {
                tracing::warn!(conn = %id, room = %code, "membership pointed at a room without this peer");
                Vec::new()
            }
        }
    }

    fn expire(&mut self, max_idle: Duration, now: Instant) -> Vec<(P, Notice)> {
        self.rooms
            .expire_waiting(max_idle, now)
            .into_iter()
            .filter_map(|(code, occupant)| {
                self.registry.clear_room(occupant);
                tracing::info!(conn = %occupant, room = %code, "waiting room expired");
                self.registry
                    .peer(occupant)
                    .map(|p| (p.clone(), Notice::Expired(code)))
            })
            .collect()
    }
}

#[cfg(test)]
impl<P> Tables<P> {
    /// Panics unless every membership points at a room holding that member
    /// and every occupant is registered with that room's code.
    fn assert_consistent(&self) {
        for (id, code) in self.registry.memberships() {
            if let Some(code) = code {
                let room = self.rooms.get(code);
                assert!(
                    room.is_some_and(|r| r.slot_of(id).is_some()),
                    "{id} claims room {code} but is not seated there"
                );
            }
        }
        for room in self.rooms.iter() {
            for occupant in room.occupants() {
                assert_eq!(
                    self.registry.lookup_room(occupant),
                    Some(room.code()),
                    "{occupant} seated in {} without matching membership",
                    room.code()
                );
            }
        }
    }
}

/// Pairs connections into two-slot rooms and relays frames between partners.
pub struct PairingEngine<P> {
    tables: RwLock<Tables<P>>,
}

impl<P: Peer> Default for PairingEngine<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Peer> PairingEngine<P> {
    /// Creates an engine with empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables {
                registry: ConnectionRegistry::new(),
                rooms: RoomTable::new(),
            }),
        }
    }

    /// Registers a newly accepted connection with no room membership.
    pub fn connect(&self, peer: P) {
        let id = peer.id();
        self.tables.write().registry.register(peer);
        tracing::debug!(conn = %id, "connection registered");
    }

    /// Handles one inbound frame from `id`.
    ///
    /// `connect` envelopes join or create a room; anything else is forwarded
    /// byte-for-byte to the partner. Malformed frames are logged and dropped.
    pub fn handle_message(&self, id: ConnId, frame: Vec<u8>) {
        match envelope::parse(&frame) {
            Ok(Inbound::Join { code }) => self.join(id, &code),
            Ok(Inbound::Relay { kind }) => self.relay(id, &kind, frame),
            Err(e) => {
                tracing::warn!(conn = %id, error = %e, "discarding undecodable frame");
            }
        }
    }

    /// Places `id` into room `code`, notifying both peers if this completes
    /// the pair, or only `id` if the join is refused.
    pub fn join(&self, id: ConnId, code: &str) {
        let unreachable = {
            let mut tables = self.tables.write();
            let notices = tables.join(id, code);
            send_all(notices)
        };
        self.evict(unreachable);
    }

    /// Forwards `frame` from `id` to its partner, if it has one.
    pub fn relay(&self, id: ConnId, kind: &str, frame: Vec<u8>) {
        let target = self.tables.read().relay_target(id);
        match target {
            Some(peer) => {
                tracing::trace!(from = %id, to = %peer.id(), kind = %kind, len = frame.len(), "relaying");
                self.deliver(vec![(peer, Notice::Relay(frame))]);
            }
            None => {
                tracing::debug!(conn = %id, kind = %kind, "no partner, frame dropped");
            }
        }
    }

    /// Handles the transport reporting that `id` is gone.
    ///
    /// A partner, if present, is told `part` and released; the room is removed
    /// either way. Connections that never joined are simply forgotten.
    pub fn disconnect(&self, id: ConnId) {
        let notices = self.tables.write().disconnect(id);
        tracing::debug!(conn = %id, "connection unregistered");
        self.deliver(notices);
    }

    /// Removes rooms that have waited longer than `max_idle` for a partner,
    /// returning how many were removed.
    pub fn sweep_idle_rooms(&self, max_idle: Duration) -> usize {
        let notices = self.tables.write().expire(max_idle, Instant::now());
        let count = notices.len();
        self.deliver(notices);
        count
    }

    /// Queues notices outside the lock, then evicts whoever refused one.
    fn deliver(&self, notices: Vec<(P, Notice)>) {
        let unreachable = send_all(notices);
        self.evict(unreachable);
    }

    /// Unregisters connections whose queue is full or closed. Their partners
    /// get `part`, which may in turn evict them.
    fn evict(&self, mut unreachable: Vec<ConnId>) {
        while let Some(id) = unreachable.pop() {
            let notices = self.tables.write().disconnect(id);
            tracing::info!(conn = %id, "unreachable peer evicted");
            unreachable.extend(send_all(notices));
        }
    }

    /// Number of live rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.tables.read().rooms.len()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.tables.read().registry.len()
    }

    /// Whether a room with `code` currently exists.
    #[must_use]
    pub fn has_room(&self, code: &str) -> bool {
        self.tables.read().rooms.contains(code)
    }

    /// Room code `id` has joined, if any.
    #[must_use]
    pub fn room_of(&self, id: ConnId) -> Option<String> {
        self.tables.read().registry.lookup_room(id).map(str::to_string)
    }
}

/// Spawns a task that periodically expires rooms waiting longer than
/// `max_idle`. Runs until aborted.
pub fn spawn_room_sweeper<P: Peer>(
    engine: Arc<PairingEngine<P>>,
    max_idle: Duration,
) -> tokio::task::JoinHandle<()> {
    let period = (max_idle / 2).max(MIN_SWEEP_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let removed = engine.sweep_idle_rooms(max_idle);
            if removed > 0 {
                tracing::info!(removed, "expired idle rooms");
            }
        }
    })
}

/// Queues notices on their peers, returning the ones that refused a frame.
fn send_all<P: Peer>(notices: Vec<(P, Notice)>) -> Vec<ConnId> {
    let mut unreachable = Vec::new();
    for (peer, notice) in notices {
        match notice.encode() {
            Ok(frame) => {
                if !peer.write(frame) {
                    tracing::debug!(conn = %peer.id(), "peer refused delivery");
                    unreachable.push(peer.id());
                }
            }
            Err(e) => {
                tracing::error!(conn = %peer.id(), error = %e, "failed to encode notification");
            }
        }
    }
    unreachable
}
