//! Shared protocol definitions for the netplay wire format.

pub mod envelope;
