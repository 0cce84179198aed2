//! Agent Configuration Settings
//!
//! Configuration types for the agent, loaded from `LIBRELOG_*` environment
//! variables. Unparseable optional values fall back to their defaults;
//! required values and URLs are validated.

use std::num::NonZeroUsize;
use std::time::Duration;

use url::Url;

use crate::domain::session::{Credentials, CredentialsError};

const ACCOUNT_NUMBER: &str = "LIBRELOG_ACCOUNT_NUMBER";
const PASSWORD: &str = "LIBRELOG_PASSWORD";
const API_URL: &str = "LIBRELOG_API_URL";
const INGEST_URL: &str = "LIBRELOG_INGEST_URL";
const QUEUE_CAPACITY: &str = "LIBRELOG_QUEUE_CAPACITY";
const SAMPLE_INTERVAL_MS: &str = "LIBRELOG_SAMPLE_INTERVAL_MS";
const METRIC_SET: &str = "LIBRELOG_METRIC_SET";
const DELAY_INITIAL_MS: &str = "LIBRELOG_RECONNECT_DELAY_INITIAL_MS";
const DELAY_MAX_SECS: &str = "LIBRELOG_RECONNECT_DELAY_MAX_SECS";
const DELAY_MULTIPLIER: &str = "LIBRELOG_RECONNECT_DELAY_MULTIPLIER";
const JITTER: &str = "LIBRELOG_RECONNECT_JITTER";

/// Default login API base URL.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
/// Default streaming ingest URL.
pub const DEFAULT_INGEST_URL: &str = "ws://127.0.0.1:9000/ingest";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Login and ingest endpoints.
#[derive(Debug, Clone)]
pub struct EndpointSettings {
    /// Base URL of the login API (`http` or `https`).
    pub api_url: Url,
    /// Streaming ingest URL (`ws` or `wss`).
    pub ingest_url: Url,
    /// Timeout for the login request.
    pub request_timeout: Duration,
    /// Time to wait for the ingester to answer a message.
    pub ack_timeout: Duration,
}

/// Sample production and buffering.
#[derive(Debug, Clone)]
pub struct SamplingSettings {
    /// Metric set name sent as `log_set`.
    pub metric_set: String,
    /// Time between samples.
    pub interval: Duration,
    /// Outbound queue capacity.
    pub queue_capacity: NonZeroUsize,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            metric_set: "ram".to_string(),
            interval: Duration::from_secs(1),
            queue_capacity: NonZeroUsize::new(1024).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// Reconnection and authentication retry settings.
#[derive(Debug, Clone)]
pub struct ReconnectSettings {
    /// Initial reconnection delay.
    pub delay_initial: Duration,
    /// Maximum reconnection delay.
    pub delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub delay_multiplier: f64,
    /// Jitter as a fraction of the delay.
    pub jitter_factor: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
    /// Consecutive authentication failures before giving up (0 = unlimited).
    pub max_auth_attempts: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            delay_initial: Duration::from_millis(500),
            delay_max: Duration::from_secs(30),
            delay_multiplier: 2.0,
            jitter_factor: 0.1,
            max_attempts: 0, // Unlimited
            max_auth_attempts: 3,
        }
    }
}

impl ReconnectSettings {
    /// Reject curves that would not back off.
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.delay_multiplier.is_finite() || self.delay_multiplier < 1.0 {
            return Err(ConfigError::OutOfRange {
                key: DELAY_MULTIPLIER.to_string(),
                value: self.delay_multiplier.to_string(),
                expected: "finite and >= 1.0",
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::OutOfRange {
                key: JITTER.to_string(),
                value: self.jitter_factor.to_string(),
                expected: "0.0..=1.0",
            });
        }
        if self.delay_initial > self.delay_max {
            return Err(ConfigError::OutOfRange {
                key: DELAY_INITIAL_MS.to_string(),
                value: self.delay_initial.as_millis().to_string(),
                expected: "at most the maximum delay",
            });
        }
        Ok(())
    }
}

/// Server port and shutdown settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
    /// Upper bound on the shutdown drain.
    pub shutdown_timeout: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            health_port: 8083,
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerSettings {
    /// Whether the health server should run.
    #[must_use]
    pub const fn health_enabled(&self) -> bool {
        self.health_port != 0
    }
}

/// Complete agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Account credentials (`Debug` redacts the password).
    pub credentials: Credentials,
    /// Login and ingest endpoints.
    pub endpoints: EndpointSettings,
    /// Sample production and buffering.
    pub sampling: SamplingSettings,
    /// Reconnection and authentication retry settings.
    pub reconnect: ReconnectSettings,
    /// Server port and shutdown settings.
    pub server: ServerSettings,
}

impl AgentConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// empty, or if a value fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`AgentConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let account = env.required(ACCOUNT_NUMBER)?;
        let password = env.required(PASSWORD)?;
        let credentials = Credentials::new(account, password).map_err(|err| match err {
            CredentialsError::EmptyAccount => ConfigError::EmptyValue(ACCOUNT_NUMBER.to_string()),
            CredentialsError::EmptySecret => ConfigError::EmptyValue(PASSWORD.to_string()),
        })?;

        let endpoints = EndpointSettings {
            api_url: env.url(API_URL, DEFAULT_API_URL, &["http", "https"])?,
            ingest_url: env.url(INGEST_URL, DEFAULT_INGEST_URL, &["ws", "wss"])?,
            request_timeout: env
                .duration_secs("LIBRELOG_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT),
            ack_timeout: env.duration_secs("LIBRELOG_ACK_TIMEOUT_SECS", DEFAULT_ACK_TIMEOUT),
        };

        let sampling_defaults = SamplingSettings::default();
        let interval = env.duration_millis(SAMPLE_INTERVAL_MS, sampling_defaults.interval);
        if interval.is_zero() {
            return Err(ConfigError::ZeroValue(SAMPLE_INTERVAL_MS.to_string()));
        }
        let queue_capacity = NonZeroUsize::new(
            env.parse(QUEUE_CAPACITY, sampling_defaults.queue_capacity.get()),
        )
        .ok_or_else(|| ConfigError::ZeroValue(QUEUE_CAPACITY.to_string()))?;
        let metric_set = match env.get(METRIC_SET) {
            Some(value) if value.trim().is_empty() => {
                return Err(ConfigError::EmptyValue(METRIC_SET.to_string()));
            }
            Some(value) => value.trim().to_string(),
            None => sampling_defaults.metric_set,
        };
        let sampling = SamplingSettings {
            metric_set,
            interval,
            queue_capacity,
        };

        let reconnect_defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            delay_initial: env.duration_millis(DELAY_INITIAL_MS, reconnect_defaults.delay_initial),
            delay_max: env.duration_secs(DELAY_MAX_SECS, reconnect_defaults.delay_max),
            delay_multiplier: env.parse(DELAY_MULTIPLIER, reconnect_defaults.delay_multiplier),
            jitter_factor: env.parse(JITTER, reconnect_defaults.jitter_factor),
            max_attempts: env.parse(
                "LIBRELOG_MAX_RECONNECT_ATTEMPTS",
                reconnect_defaults.max_attempts,
            ),
            max_auth_attempts: env.parse(
                "LIBRELOG_MAX_AUTH_ATTEMPTS",
                reconnect_defaults.max_auth_attempts,
            ),
        };
        reconnect.validate()?;

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            health_port: env.parse("LIBRELOG_HEALTH_PORT", server_defaults.health_port),
            shutdown_timeout: env.duration_secs(
                "LIBRELOG_SHUTDOWN_TIMEOUT_SECS",
                server_defaults.shutdown_timeout,
            ),
        };

        Ok(Self {
            credentials,
            endpoints,
            sampling,
            reconnect,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable is not a valid URL.
    #[error("environment variable {key} is not a valid URL: {source}")]
    InvalidUrl {
        /// Variable name.
        key: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },
    /// URL uses a scheme the agent cannot speak.
    #[error("environment variable {key} has unsupported scheme {scheme:?} (expected {expected})")]
    UnsupportedScheme {
        /// Variable name.
        key: String,
        /// Scheme found.
        scheme: String,
        /// Accepted schemes.
        expected: String,
    },
    /// Environment variable must be greater than zero.
    #[error("environment variable {0} must be greater than zero")]
    ZeroValue(String),
    /// Environment variable is outside its accepted range.
    #[error("environment variable {key}={value} is out of range (expected {expected})")]
    OutOfRange {
        /// Variable name.
        key: String,
        /// Value found.
        value: String,
        /// Accepted range.
        expected: &'static str,
    },
}

/// Lookup wrapper with the typed parse helpers.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
        if value.is_empty() {
            return Err(ConfigError::EmptyValue(key.to_string()));
        }
        Ok(value)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn url(&self, key: &str, default: &str, schemes: &[&str]) -> Result<Url, ConfigError> {
        let raw = self
            .get(key)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default.to_string());
        let url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl {
            key: key.to_string(),
            source,
        })?;

        if !schemes.contains(&url.scheme()) {
            return Err(ConfigError::UnsupportedScheme {
                key: key.to_string(),
                scheme: url.scheme().to_string(),
                expected: schemes.join("/"),
            });
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AgentConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        AgentConfig::from_lookup(|key| vars.get(key).cloned())
    }

    const CREDS: [(&str, &str); 2] = [(ACCOUNT_NUMBER, "acct-1"), (PASSWORD, "pw")];

    #[test]
    fn defaults_apply_with_only_credentials() {
        let config = config_from(&CREDS).unwrap();

        assert_eq!(config.credentials.account(), "acct-1");
        assert_eq!(config.endpoints.api_url.as_str(), "http://127.0.0.1:8080/");
        assert_eq!(config.endpoints.ingest_url.as_str(), "ws://127.0.0.1:9000/ingest");
        assert_eq!(config.endpoints.ack_timeout, Duration::from_secs(10));
        assert_eq!(config.sampling.metric_set, "ram");
        assert_eq!(config.sampling.interval, Duration::from_secs(1));
        assert_eq!(config.sampling.queue_capacity.get(), 1024);
        assert_eq!(config.reconnect.max_auth_attempts, 3);
        assert_eq!(config.reconnect.max_attempts, 0);
        assert_eq!(config.server.health_port, 8083);
        assert!(config.server.health_enabled());
    }

    #[test]
    fn overrides_are_read() {
        let config = config_from(&[
            CREDS[0],
            CREDS[1],
            (INGEST_URL, "wss://ingest.example.com/ingest"),
            (METRIC_SET, "mem"),
            (SAMPLE_INTERVAL_MS, "250"),
            (QUEUE_CAPACITY, "8"),
            (DELAY_MULTIPLIER, "1.5"),
            ("LIBRELOG_MAX_RECONNECT_ATTEMPTS", "12"),
            ("LIBRELOG_HEALTH_PORT", "0"),
        ])
        .unwrap();

        assert_eq!(config.endpoints.ingest_url.scheme(), "wss");
        assert_eq!(config.sampling.metric_set, "mem");
        assert_eq!(config.sampling.interval, Duration::from_millis(250));
        assert_eq!(config.sampling.queue_capacity.get(), 8);
        assert!((config.reconnect.delay_multiplier - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.reconnect.max_attempts, 12);
        assert!(!config.server.health_enabled());
    }

    #[test]
    fn unparseable_optional_values_fall_back() {
        let config = config_from(&[
            CREDS[0],
            CREDS[1],
            (QUEUE_CAPACITY, "lots"),
            ("LIBRELOG_ACK_TIMEOUT_SECS", "-3"),
        ])
        .unwrap();

        assert_eq!(config.sampling.queue_capacity.get(), 1024);
        assert_eq!(config.endpoints.ack_timeout, Duration::from_secs(10));
    }

    #[test]
    fn missing_credentials() {
        assert!(matches!(
            config_from(&[CREDS[1]]),
            Err(ConfigError::MissingEnvVar(key)) if key == ACCOUNT_NUMBER
        ));
        assert!(matches!(
            config_from(&[CREDS[0], (PASSWORD, "")]),
            Err(ConfigError::EmptyValue(key)) if key == PASSWORD
        ));
    }

    #[test]
    fn url_validation() {
        assert!(matches!(
            config_from(&[CREDS[0], CREDS[1], (INGEST_URL, "http://127.0.0.1/ingest")]),
            Err(ConfigError::UnsupportedScheme { key, .. }) if key == INGEST_URL
        ));
        assert!(matches!(
            config_from(&[CREDS[0], CREDS[1], (API_URL, "not a url")]),
            Err(ConfigError::InvalidUrl { key, .. }) if key == API_URL
        ));
    }

    #[test]
    fn zero_values_rejected() {
        assert!(matches!(
            config_from(&[CREDS[0], CREDS[1], (QUEUE_CAPACITY, "0")]),
            Err(ConfigError::ZeroValue(key)) if key == QUEUE_CAPACITY
        ));
        assert!(matches!(
            config_from(&[CREDS[0], CREDS[1], (SAMPLE_INTERVAL_MS, "0")]),
            Err(ConfigError::ZeroValue(key)) if key == SAMPLE_INTERVAL_MS
        ));
    }

    #[test]
    fn backoff_curve_must_grow() {
        for multiplier in ["0", "-2", "0.5", "NaN", "inf"] {
            assert!(
                matches!(
                    config_from(&[CREDS[0], CREDS[1], (DELAY_MULTIPLIER, multiplier)]),
                    Err(ConfigError::OutOfRange { key, .. }) if key == DELAY_MULTIPLIER
                ),
                "multiplier {multiplier} accepted"
            );
        }
        assert!(matches!(
            config_from(&[
                CREDS[0],
                CREDS[1],
                (DELAY_INITIAL_MS, "60000"),
                (DELAY_MAX_SECS, "30"),
            ]),
            Err(ConfigError::OutOfRange { key, .. }) if key == DELAY_INITIAL_MS
        ));
        assert!(config_from(&[CREDS[0], CREDS[1], (DELAY_MULTIPLIER, "1")]).is_ok());
    }

    #[test]
    fn jitter_must_be_a_fraction() {
        for jitter in ["NaN", "inf", "-0.1", "1.5"] {
            assert!(
                matches!(
                    config_from(&[CREDS[0], CREDS[1], (JITTER, jitter)]),
                    Err(ConfigError::OutOfRange { key, .. }) if key == JITTER
                ),
                "jitter {jitter} accepted"
            );
        }
        let config = config_from(&[CREDS[0], CREDS[1], (JITTER, "0")]).unwrap();
        assert_eq!(config.reconnect.jitter_factor, 0.0);
    }

    #[test]
    fn blank_metric_set_rejected() {
        for value in ["", "   "] {
            assert!(matches!(
                config_from(&[CREDS[0], CREDS[1], (METRIC_SET, value)]),
                Err(ConfigError::EmptyValue(key)) if key == METRIC_SET
            ));
        }
    }

    #[test]
    fn debug_redacts_password() {
        let config = config_from(&[CREDS[0], (PASSWORD, "super_secret")]).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("super_secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
