//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SessionManager`: Owns the ingest session state machine
//! - `DeliveryPipeline`: Samples on an interval and drains the outbound queue
//! - `Supervisor`: Runs both and converts their outcome into an exit status

/// Exponential backoff between session attempts.
pub mod backoff;

/// Producer and drain loops around the shared outbound queue.
pub mod pipeline;

/// Session lifecycle: authenticate, connect, recover.
pub mod session_manager;

/// Task lifetime, shutdown drain, and terminal error reporting.
pub mod supervisor;

pub use backoff::{ReconnectConfig, ReconnectPolicy};
pub use pipeline::{DeliveryPipeline, PipelineConfig, QueueSnapshot, SharedQueue};
pub use session_manager::{
    ActiveSession, SessionEnd, SessionError, SessionManager, SessionManagerConfig, SessionStatus,
};
pub use supervisor::{ShutdownReport, Supervisor, SupervisorConfig, SupervisorError};
