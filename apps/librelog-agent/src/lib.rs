#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::enum_glob_use
    )
)]

//! LibreLog Agent - Resilient Metrics Ingestion Client
//!
//! Exchanges account credentials for a session token, keeps one WebSocket
//! session open to the LibreLog ingester, and streams periodic host samples
//! through a bounded queue with acknowledgement tracking.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core ingestion types and rules
//!   - `sample`: Metric samples and their wire encoding
//!   - `queue`: Bounded drop-oldest outbound queue
//!   - `session`: Session state machine, credentials, tokens
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Login, ingest stream, and sample source interfaces
//!   - `services`: Session manager, delivery pipeline, supervisor
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `auth`: HTTP login exchange
//!   - `ingest`: WebSocket connector and reply codec
//!   - `sampler`: Host memory sampling
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                   ┌──────────────┐   ┌──────────────┐
//! MemorySampler ──► │ SharedQueue  │──►│ drain loop   │──► ActiveSession ──► ingester
//!   (interval)      │ (drop oldest)│   │ (send + ack) │        ▲
//!                   └──────────────┘   └──────────────┘        │
//!                                                      SessionManager
//!                                              (login ─► connect ─► recover)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core ingestion types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::queue::{OutboundQueue, PushOutcome, QueueStats};
pub use domain::sample::{Sample, SampleError};
pub use domain::session::{Credentials, CredentialsError, SessionState, SessionToken};

// Ports
pub use application::ports::{
    Ack, CredentialExchange, IngestChannel, IngestConnector, IngestError, ProducerError,
    SampleSource,
};

// Services
pub use application::services::{
    DeliveryPipeline, PipelineConfig, ReconnectConfig, ReconnectPolicy, SessionManager,
    SessionManagerConfig, SessionStatus, SharedQueue, ShutdownReport, Supervisor,
    SupervisorConfig, SupervisorError,
};

// Infrastructure config
pub use infrastructure::config::{
    AgentConfig, ConfigError, EndpointSettings, ReconnectSettings, SamplingSettings,
    ServerSettings,
};

// Adapters
pub use infrastructure::auth::HttpCredentialExchanger;
pub use infrastructure::ingest::{WebSocketChannel, WebSocketConnector};
pub use infrastructure::sampler::MemorySampler;

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
