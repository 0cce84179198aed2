//! Domain Layer - Core ingestion types and business rules.
//!
//! This layer has no I/O. It defines what a sample is, how the outbound
//! queue sheds load, and which session transitions are legal.

/// Telemetry samples and their wire encoding.
pub mod sample;

/// Bounded outbound queue with drop-oldest backpressure.
pub mod queue;

/// Session state machine and token type.
pub mod session;
