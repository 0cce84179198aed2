//! Port Interfaces
//!
//! Defines the interfaces (ports) the application services drive. These
//! are the contracts that infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `CredentialExchange`: login call that turns credentials into a token
//! - `IngestConnector`: opens an authenticated stream to the ingester
//! - `IngestChannel`: one open stream; sends a frame and awaits its ack
//!
//! ## Driver Ports (Inbound)
//!
//! - `SampleSource`: the external metric producer

use async_trait::async_trait;

use crate::domain::sample::{Sample, SampleError};
use crate::domain::session::{Credentials, SessionToken};

// =============================================================================
// Errors
// =============================================================================

/// Failures from the network-facing ports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    /// Credentials were rejected by the login endpoint.
    #[error("authentication rejected: {0}")]
    Authentication(String),

    /// The ingester refused the session token.
    #[error("session token rejected by ingester")]
    TokenRejected,

    /// Connection, send, or receive failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with something that could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl IngestError {
    /// Whether the failure concerns identity rather than the network.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::TokenRejected)
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::TokenRejected => "token_rejected",
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
        }
    }
}

/// Failure to take one sample. Always recoverable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProducerError {
    /// The metric could not be read right now.
    #[error("metric unavailable: {0}")]
    Unavailable(String),

    /// The reading could not form a valid sample.
    #[error("invalid sample: {0}")]
    Invalid(#[from] SampleError),
}

// =============================================================================
// Acknowledgement
// =============================================================================

/// Ingester reply to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// The message was stored.
    Accepted,
    /// The ingester received the message but refused it.
    Rejected(String),
}

// =============================================================================
// Ports
// =============================================================================

/// One-shot exchange of account credentials for a session token.
///
/// Implementations perform exactly one request per call and never retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialExchange: Send + Sync {
    /// Exchange credentials for a token.
    async fn exchange(&self, credentials: &Credentials) -> Result<SessionToken, IngestError>;
}

/// Opens authenticated ingest streams.
#[async_trait]
pub trait IngestConnector: Send + Sync {
    /// Open a stream authorized by `token`.
    async fn connect(&self, token: &SessionToken) -> Result<Box<dyn IngestChannel>, IngestError>;
}

/// An open ingest stream.
///
/// Callers never issue a second `send` before the first resolves.
#[async_trait]
pub trait IngestChannel: Send {
    /// Write one text frame and wait for the ingester's reply.
    async fn send(&mut self, frame: String) -> Result<Ack, IngestError>;

    /// Close the stream. Errors are ignored.
    async fn close(&mut self);
}

/// Producer of samples, pulled once per interval.
///
/// The sequence is infinite and not restartable.
pub trait SampleSource: Send {
    /// Take the next sample.
    fn next_sample(&mut self) -> Result<Sample, ProducerError>;
}

impl<F> SampleSource for F
where
    F: FnMut() -> Result<Sample, ProducerError> + Send,
{
    fn next_sample(&mut self) -> Result<Sample, ProducerError> {
        self()
    }
}
