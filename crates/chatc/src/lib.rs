//! Encrypted group chat client: session bootstrap, envelope routing and a
//! local JSON API.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// CLI parsing and TOML configuration.
pub mod config;
/// WebSocket connection manager and command loop.
pub mod connection;
/// Error types for sending, key exchange, transport and lookup.
pub mod error;
/// Chat event bus for front ends.
pub mod events;
/// Own-address lookup over HTTP.
pub mod geo;
/// Pre-shared key handling and session key bootstrap.
pub mod key_exchange;
/// Line-delimited JSON API over TCP/Unix sockets.
pub mod local_api;
/// Online-peer list and own-address display.
pub mod presence;
/// Fixed-delay reconnect schedule.
pub mod reconnect;
/// Inbound envelope dispatch.
pub mod router;
/// Session state owned by the connection task.
pub mod session;
/// In-memory message store.
pub mod store;
