//! Ingest Stream Adapters
//!
//! WebSocket implementation of the ingest ports.
//!
//! - `client`: connector and per-session channel
//! - `codec`: interpretation of ingester replies and close frames

/// WebSocket connector and channel.
pub mod client;

/// Ingester reply decoding.
pub mod codec;

pub use client::{WebSocketChannel, WebSocketConnector};
