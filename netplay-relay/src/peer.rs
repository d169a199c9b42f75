//! Connection identity and the write capability the engine holds.
//!
//! The engine never sees sockets. Each accepted connection is represented by
//! a [`Peer`] handle that can be cloned into the tables and written to without
//! blocking; the transport owns the actual socket.

use std::fmt;
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

/// Frames a connection may have queued before it is considered stalled.
pub const DEFAULT_OUTBOUND_QUEUE: usize = 2048;

/// Identity of one open connection, minted when it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(Uuid);

impl ConnId {
    /// Mints a fresh, time-ordered id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A handle to a remote peer.
///
/// `write` must not block: the engine may call it while holding its table
/// lock and expects it to hand the frame off to a writer.
pub trait Peer: Clone + Send + Sync + 'static {
    /// Identity used as the registry key.
    fn id(&self) -> ConnId;

    /// Queues a frame for delivery. Returns `false` if the peer is gone or
    /// cannot take more frames; the caller should then drop it.
    fn write(&self, frame: Vec<u8>) -> bool;
}

/// Channel-backed [`Peer`] used by the WebSocket transport.
///
/// Frames are drained by the connection's writer task. The queue is bounded;
/// a write that finds it full fires the overflow signal so the transport can
/// close the socket.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: ConnId,
    tx: mpsc::Sender<Vec<u8>>,
    overflow: Arc<Notify>,
}

impl PeerHandle {
    /// Creates a handle with a fresh id and an outbound queue holding at most
    /// `capacity` frames, returning the receiving half.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnId::new(),
            tx,
            overflow: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    /// Signal fired once a write finds the queue full.
    #[must_use]
    pub fn overflow(&self) -> Arc<Notify> {
        Arc::clone(&self.overflow)
    }
}

impl Peer for PeerHandle {
    fn id(&self) -> ConnId {
        self.id
    }

    fn write(&self, frame: Vec<u8>) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(conn = %self.id, "outbound queue full, dropping peer");
                self.overflow.notify_one();
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}
