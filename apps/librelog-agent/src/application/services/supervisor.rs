//! Supervisor
//!
//! Runs the session manager and the delivery pipeline as two tasks and turns
//! their outcome into one result for the binary.
//!
//! Shutdown sequence:
//!
//! 1. `shutdown` fires: production stops, the pipeline drains over the live
//!    session
//! 2. drain bounded by `shutdown_timeout`; past it, `terminate` forces the
//!    pipeline out and the in-flight sample is requeued
//! 3. `terminate` stops the session manager, which closes the session

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use super::pipeline::{DeliveryPipeline, SharedQueue};
use super::session_manager::{SessionError, SessionManager};

/// Time given to a forced pipeline to unwind before it is aborted.
const TERMINATE_GRACE: Duration = Duration::from_secs(1);

// =============================================================================
// Errors
// =============================================================================

/// Summarized terminal failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    /// Credentials or tokens kept being rejected.
    #[error("authentication failed after {attempts} attempts: {reason}")]
    AuthenticationFailed {
        /// Consecutive authentication failures.
        attempts: u32,
        /// Last failure reported.
        reason: String,
    },

    /// The reconnect policy was exhausted.
    #[error("ingester unreachable after {attempts} reconnect attempts: {reason}")]
    RetriesExhausted {
        /// Reconnect attempts made.
        attempts: u32,
        /// Last failure reported.
        reason: String,
    },

    /// A task panicked or stopped on its own.
    #[error("internal fault: {0}")]
    Fault(String),
}

impl SupervisorError {
    /// Process exit code for this failure.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::AuthenticationFailed { .. } => 2,
            Self::RetriesExhausted { .. } | Self::Fault(_) => 1,
        }
    }
}

impl From<SessionError> for SupervisorError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AuthenticationFailed { attempts, reason } => {
                Self::AuthenticationFailed { attempts, reason }
            }
            SessionError::RetriesExhausted { attempts, reason } => {
                Self::RetriesExhausted { attempts, reason }
            }
        }
    }
}

impl From<JoinError> for SupervisorError {
    fn from(err: JoinError) -> Self {
        Self::Fault(err.to_string())
    }
}

// =============================================================================
// Configuration and Report
// =============================================================================

/// Supervisor settings.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Upper bound on the shutdown drain.
    pub shutdown_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Delivery totals at clean shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Samples acknowledged by the ingester.
    pub delivered: u64,
    /// Samples the ingester refused.
    pub rejected: u64,
    /// Samples evicted under backpressure.
    pub dropped: u64,
    /// Samples still queued when the process stopped.
    pub undelivered: usize,
    /// Whether the drain finished within the timeout.
    pub drained: bool,
}

// =============================================================================
// Supervisor
// =============================================================================

enum Exit {
    Shutdown,
    Manager(Result<Result<(), SessionError>, JoinError>),
    Pipeline(Result<(), JoinError>),
}

/// Owns the lifetime of the session manager and delivery pipeline.
pub struct Supervisor {
    config: SupervisorConfig,
    manager: SessionManager,
    pipeline: DeliveryPipeline,
}

impl Supervisor {
    /// Create a supervisor over the two components.
    #[must_use]
    pub const fn new(
        config: SupervisorConfig,
        manager: SessionManager,
        pipeline: DeliveryPipeline,
    ) -> Self {
        Self {
            config,
            manager,
            pipeline,
        }
    }

    /// Run both components until `shutdown` or a fatal failure.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError`] if the session manager gives up or a task
    /// stops unexpectedly.
    pub async fn run(self, shutdown: CancellationToken) -> Result<ShutdownReport, SupervisorError> {
        let Self {
            config,
            manager,
            pipeline,
        } = self;

        let queue = pipeline.queue();
        let status_rx = manager.subscribe();
        let stop = shutdown.child_token();
        let terminate = CancellationToken::new();

        let mut manager_task = tokio::spawn(manager.run(terminate.clone()));
        let mut pipeline_task =
            tokio::spawn(pipeline.run(status_rx, stop.clone(), terminate.clone()));

        tracing::info!("Supervisor started");

        let exit = tokio::select! {
            biased;
            () = stop.cancelled() => Exit::Shutdown,
            result = &mut manager_task => Exit::Manager(result),
            result = &mut pipeline_task => Exit::Pipeline(result),
        };

        match exit {
            Exit::Shutdown => {
                tracing::info!(
                    timeout_secs = config.shutdown_timeout.as_secs(),
                    "Shutdown requested, draining outbound queue"
                );
                let drained = drain(&mut pipeline_task, config.shutdown_timeout, &terminate).await;

                terminate.cancel();
                // A failure that raced the shutdown signal still decides the exit status.
                if let Err(err) = manager_task
                    .await
                    .map_err(SupervisorError::from)
                    .and_then(|result| result.map_err(SupervisorError::from))
                {
                    tracing::error!(
                        error = %err,
                        undelivered = queue.snapshot().len,
                        "Session manager failed during shutdown"
                    );
                    return Err(err);
                }

                let report = report(&queue, drained);
                tracing::info!(
                    delivered = report.delivered,
                    rejected = report.rejected,
                    dropped = report.dropped,
                    undelivered = report.undelivered,
                    drained = report.drained,
                    "Supervisor stopped"
                );
                Ok(report)
            }
            Exit::Manager(result) => {
                stop.cancel();
                terminate.cancel();
                let _ = pipeline_task.await;

                let err = match result {
                    Ok(Err(err)) => SupervisorError::from(err),
                    Ok(Ok(())) => SupervisorError::Fault("session manager stopped unexpectedly".into()),
                    Err(err) => SupervisorError::from(err),
                };
                tracing::error!(
                    error = %err,
                    undelivered = queue.snapshot().len,
                    "Supervisor stopping after fatal error"
                );
                Err(err)
            }
            Exit::Pipeline(result) => {
                stop.cancel();
                terminate.cancel();
                let _ = manager_task.await;

                let err = match result {
                    Ok(()) => SupervisorError::Fault("delivery pipeline stopped unexpectedly".into()),
                    Err(err) => SupervisorError::from(err),
                };
                tracing::error!(error = %err, "Supervisor stopping after fatal error");
                Err(err)
            }
        }
    }
}

/// Wait for the pipeline to drain, forcing it out past `timeout`.
async fn drain(
    pipeline_task: &mut JoinHandle<()>,
    timeout: Duration,
    terminate: &CancellationToken,
) -> bool {
    match tokio::time::timeout(timeout, &mut *pipeline_task).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            tracing::error!(error = %err, "Delivery pipeline failed while draining");
            false
        }
        Err(_) => {
            tracing::warn!("Shutdown drain timed out, forcing termination");
            terminate.cancel();
            if tokio::time::timeout(TERMINATE_GRACE, &mut *pipeline_task)
                .await
                .is_err()
            {
                pipeline_task.abort();
            }
            false
        }
    }
}

fn report(queue: &Arc<SharedQueue>, drained: bool) -> ShutdownReport {
    let snapshot = queue.snapshot();
    ShutdownReport {
        delivered: snapshot.stats.delivered,
        rejected: snapshot.stats.rejected,
        dropped: snapshot.stats.dropped,
        undelivered: snapshot.len,
        drained: drained && snapshot.len == 0,
    }
}
