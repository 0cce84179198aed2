//! LibreLog Agent Binary
//!
//! Samples host memory and streams it to the LibreLog ingester.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin librelog-agent
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `LIBRELOG_ACCOUNT_NUMBER`: Account number used to log in
//! - `LIBRELOG_PASSWORD`: Account password
//!
//! ## Optional
//! - `LIBRELOG_API_URL`: Login API base URL (default: <http://127.0.0.1:8080>)
//! - `LIBRELOG_INGEST_URL`: Ingest WebSocket URL (default: <ws://127.0.0.1:9000/ingest>)
//! - `LIBRELOG_METRIC_SET`: Metric set name (default: ram)
//! - `LIBRELOG_SAMPLE_INTERVAL_MS`: Sampling interval (default: 1000)
//! - `LIBRELOG_QUEUE_CAPACITY`: Outbound queue capacity (default: 1024)
//! - `LIBRELOG_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log level (default: info)
//!
//! # Exit Status
//!
//! - `0`: shut down on SIGINT/SIGTERM after draining
//! - `1`: invalid configuration, reconnects exhausted, or internal fault
//! - `2`: authentication rejected until the retry limit

use std::process::ExitCode;
use std::sync::Arc;

use librelog_agent::infrastructure::health::{HealthServer, HealthServerState};
use librelog_agent::infrastructure::telemetry;
use librelog_agent::{
    AgentConfig, DeliveryPipeline, HttpCredentialExchanger, MemorySampler, PipelineConfig,
    ReconnectConfig, SessionManager, SessionManagerConfig, SharedQueue, ShutdownReport, Supervisor,
    SupervisorConfig, SupervisorError, WebSocketConnector, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let telemetry_guard = telemetry::init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        span_export = telemetry_guard.exporting(),
        "Starting LibreLog agent"
    );

    // Initialize Prometheus metrics
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder unavailable, metrics disabled");
    }

    let config = match AgentConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    log_config(&config);

    match run(config).await {
        Ok(report) => {
            tracing::info!(
                delivered = report.delivered,
                undelivered = report.undelivered,
                "LibreLog agent stopped"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, exit_code = e.exit_code(), "LibreLog agent failed");
            ExitCode::from(e.exit_code())
        }
    }
}

/// Wire the components and run until shutdown or a fatal error.
async fn run(config: AgentConfig) -> Result<ShutdownReport, SupervisorError> {
    let shutdown_token = CancellationToken::new();

    let exchanger = HttpCredentialExchanger::new(
        &config.endpoints.api_url,
        config.endpoints.request_timeout,
    )
    .map_err(|e| SupervisorError::Fault(e.to_string()))?;
    let connector = WebSocketConnector::new(
        config.endpoints.ingest_url.clone(),
        config.endpoints.ack_timeout,
    );

    let manager = SessionManager::new(
        SessionManagerConfig {
            reconnect: ReconnectConfig::from_settings(&config.reconnect),
            max_auth_attempts: config.reconnect.max_auth_attempts,
        },
        config.credentials.clone(),
        Arc::new(exchanger),
        Arc::new(connector),
    );

    let queue = Arc::new(SharedQueue::new(config.sampling.queue_capacity));
    let pipeline = DeliveryPipeline::new(
        PipelineConfig {
            sample_interval: config.sampling.interval,
        },
        Arc::clone(&queue),
        Box::new(MemorySampler::new(config.sampling.metric_set.clone())),
    );

    // Spawn health server
    if config.server.health_enabled() {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            manager.subscribe(),
            Arc::clone(&queue),
        ));
        let health_server = HealthServer::new(
            config.server.health_port,
            health_state,
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    let supervisor = Supervisor::new(
        SupervisorConfig {
            shutdown_timeout: config.server.shutdown_timeout,
        },
        manager,
        pipeline,
    );

    tokio::spawn(await_shutdown(shutdown_token.clone()));

    tracing::info!("LibreLog agent ready");

    let outcome = supervisor.run(shutdown_token.clone()).await;

    // Stops the health server after a fatal error as well.
    shutdown_token.cancel();
    outcome
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &AgentConfig) {
    let mut ingest_url = config.endpoints.ingest_url.clone();
    ingest_url.set_query(None);

    tracing::info!(
        account = config.credentials.account(),
        api_url = %config.endpoints.api_url,
        ingest_url = %ingest_url,
        metric_set = %config.sampling.metric_set,
        interval_ms = config.sampling.interval.as_millis(),
        queue_capacity = config.sampling.queue_capacity.get(),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        delay_initial_ms = config.reconnect.delay_initial.as_millis(),
        delay_max_secs = config.reconnect.delay_max.as_secs(),
        max_attempts = config.reconnect.max_attempts,
        max_auth_attempts = config.reconnect.max_auth_attempts,
        "Reconnect policy"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = shutdown_token.cancelled() => return,
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
