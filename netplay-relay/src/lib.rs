//! Netplay relay server library.
//!
//! Pairs two WebSocket clients into a room identified by a shared code and
//! relays their messages until one side disconnects. Also serves the game
//! catalog used by the browser client. Exposed for use in tests and
//! embedding.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod peer;
pub mod registry;
pub mod relay;
pub mod rooms;
