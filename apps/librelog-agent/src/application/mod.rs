//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the services that keep a session alive and move
//! samples through it, plus the port interfaces they drive.

/// Port interfaces for external systems (login, ingest stream, producer).
pub mod ports;

/// Application services for session lifecycle and delivery.
pub mod services;
