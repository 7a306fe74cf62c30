//! Relay daemon - connection management and broadcast for the line chat relay.
//!
//! This crate provides the core infrastructure for the relay server:
//! - `session` - one connected client's line channel and close lifecycle
//! - `registry` - thread-safe set of live sessions with broadcast-to-all
//! - `server` - TCP listener, accept loop, and per-session receive tasks
//! - `event` - notices surfaced to whatever presentation layer is attached
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   RelayServer   │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │  receive loop   │────▶│ SessionRegistry │
//! │  (per session)  │     │                 │
//! └───────┬─────────┘     └────────┬────────┘
//!         │ reply                  │ broadcast_all
//!         ▼                        ▼
//! ┌─────────────────────────────────────────┐
//! │          connected clients              │
//! └─────────────────────────────────────────┘
//! ```
//!
//! All fallible operations in production code return `Result`; per-session
//! failures are contained in that session's task and converted into a close
//! plus registry removal, never a crash.

pub mod event;
pub mod registry;
pub mod server;
pub mod session;
