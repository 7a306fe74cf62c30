//! Shared domain logic for the line chat relay.
//!
//! This crate holds the pieces the server and the client agree on:
//! - `reply` - the automatic reply engine applied to every inbound line
//! - [`DEFAULT_PORT`] - the TCP port the relay uses out of the box

pub mod reply;

/// Default TCP port the relay listens on.
///
/// Binaries expose this as a configurable option (`--port` flag or the
/// `RELAY_PORT` environment variable); it is never hardcoded elsewhere.
pub const DEFAULT_PORT: u16 = 4789;
