//! JSON message envelope exchanged between browser clients and the relay.
//!
//! Every WebSocket frame carries one [`GameMessage`]. The relay only looks at
//! the `type` tag: `"connect"` asks to join (or create) a room whose code is
//! carried in `data`, anything else is relayed to the partner untouched.
//! Inbound frames are narrowed into [`Inbound`] at the boundary so the engine
//! never branches on raw strings.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::{Deserialize, Serialize};

/// Message kind a client sends to join or create a room.
pub const KIND_CONNECT: &str = "connect";

/// Message kind the relay sends to announce a completed pairing.
pub const KIND_JOIN: &str = "join";

/// Message kind the relay sends when a request is refused.
pub const KIND_ERROR: &str = "error";

/// Bare notification written to a peer whose partner has left.
///
/// Sent as-is, without an envelope around it.
pub const PART_NOTIFICATION: &[u8] = b"part";

/// Errors produced while narrowing an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The frame is not a JSON envelope, or `data` is not valid base64.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A `connect` request whose room code is empty or not UTF-8.
    #[error("invalid room code in connect request")]
    InvalidRoomCode,
}

/// The wire envelope.
///
/// `data` is carried as a standard base64 string; `null` and a missing field
/// both decode as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameMessage {
    /// Message tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload bytes: the room code for `connect`, opaque otherwise.
    #[serde(default, with = "base64_bytes")]
    pub data: Vec<u8>,
    /// Free-text auxiliary field, only used for diagnostics.
    #[serde(default)]
    pub msg: String,
}

impl GameMessage {
    /// Builds an envelope with empty `msg`.
    #[must_use]
    pub fn new(kind: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: kind.into(),
            data: data.into(),
            msg: String::new(),
        }
    }

    /// Serializes the envelope to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// An inbound frame after narrowing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Join the room identified by `code`, creating it if absent.
    Join {
        /// Caller-chosen room code.
        code: String,
    },
    /// Anything else: forward the original frame to the partner.
    Relay {
        /// The envelope tag, kept for logging only.
        kind: String,
    },
}

/// Narrows a raw frame into an [`Inbound`] request.
///
/// Relay frames are not re-encoded: callers forward the bytes they passed in.
///
/// # Errors
///
/// Returns [`EnvelopeError::Malformed`] for undecodable frames and
/// [`EnvelopeError::InvalidRoomCode`] for a `connect` without a usable code.
pub fn parse(bytes: &[u8]) -> Result<Inbound, EnvelopeError> {
    let message: GameMessage = serde_json::from_slice(bytes)?;
    if message.kind != KIND_CONNECT {
        return Ok(Inbound::Relay { kind: message.kind });
    }
    let code = String::from_utf8(message.data).map_err(|_| EnvelopeError::InvalidRoomCode)?;
    if code.is_empty() {
        return Err(EnvelopeError::InvalidRoomCode);
    }
    Ok(Inbound::Join { code })
}

/// A player number told to a peer once its room is paired.
///
/// Derived from the slot index: slot 0 is player 1, slot 1 is player 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Role(u8);

impl Role {
    /// Role of the connection occupying `slot`.
    #[must_use]
    pub const fn from_slot(slot: usize) -> Self {
        if slot == 0 { Self(1) } else { Self(2) }
    }

    /// Numeric value (1 or 2).
    #[must_use]
    pub const fn number(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Builds the `join` notification telling a peer its own role.
///
/// # Errors
///
/// Returns [`EnvelopeError::Malformed`] if serialization fails.
pub fn join_notification(role: Role) -> Result<Vec<u8>, EnvelopeError> {
    GameMessage::new(KIND_JOIN, role.to_string()).to_bytes()
}

/// Builds an `error` notification carrying a human-readable reason in `msg`.
///
/// # Errors
///
/// Returns [`EnvelopeError::Malformed`] if serialization fails.
pub fn error_notification(reason: &str) -> Result<Vec<u8>, EnvelopeError> {
    GameMessage {
        kind: KIND_ERROR.to_string(),
        data: Vec::new(),
        msg: reason.to_string(),
    }
    .to_bytes()
}

mod base64_bytes {
    use super::{B64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&B64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let Some(encoded) = Option::<String>::deserialize(deserializer)? else {
            return Ok(Vec::new());
        };
        B64.decode(encoded.as_bytes()).map_err(serde::de::Error::custom)
    }
}
