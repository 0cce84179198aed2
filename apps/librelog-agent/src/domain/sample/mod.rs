//! Telemetry Samples
//!
//! A sample is one timestamped observation of a metric set: a name such as
//! `ram` plus a mapping of field names to numeric values. Samples are
//! immutable once built and travel from the producer into the outbound queue
//! by value.
//!
//! # Wire Format
//!
//! Each sample is sent as one JSON text frame:
//!
//! ```json
//! {"log_set":"ram","data":{"perc":42.0}}
//! ```
//!
//! Field keys are emitted in lexicographic order so identical samples always
//! encode to identical bytes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

// =============================================================================
// Errors
// =============================================================================

/// Reasons a sample cannot be constructed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SampleError {
    /// The metric set name was empty or whitespace.
    #[error("metric set name cannot be empty")]
    EmptyMetricSet,

    /// The sample carried no fields.
    #[error("sample for metric set {0} has no fields")]
    EmptyPayload(String),

    /// A field value was NaN or infinite.
    #[error("field {field} has non-finite value {value}")]
    NonFiniteValue {
        /// Offending field name.
        field: String,
        /// Offending value.
        value: f64,
    },
}

// =============================================================================
// Sample
// =============================================================================

/// One timestamped metric observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    metric_set: String,
    timestamp: DateTime<Utc>,
    data: BTreeMap<String, f64>,
}

impl Sample {
    /// Build a sample stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`SampleError`] if the metric set name is empty, the payload is
    /// empty, or any value is not finite.
    pub fn new(
        metric_set: impl Into<String>,
        data: BTreeMap<String, f64>,
    ) -> Result<Self, SampleError> {
        Self::with_timestamp(metric_set, Utc::now(), data)
    }

    /// Build a sample with an explicit timestamp.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Sample::new`].
    pub fn with_timestamp(
        metric_set: impl Into<String>,
        timestamp: DateTime<Utc>,
        data: BTreeMap<String, f64>,
    ) -> Result<Self, SampleError> {
        let metric_set = metric_set.into();

        if metric_set.trim().is_empty() {
            return Err(SampleError::EmptyMetricSet);
        }
        if data.is_empty() {
            return Err(SampleError::EmptyPayload(metric_set));
        }
        if let Some((field, value)) = data.iter().find(|(_, v)| !v.is_finite()) {
            return Err(SampleError::NonFiniteValue {
                field: field.clone(),
                value: *value,
            });
        }

        Ok(Self {
            metric_set,
            timestamp,
            data,
        })
    }

    /// Convenience constructor for a single-field sample.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Sample::new`].
    pub fn single(
        metric_set: impl Into<String>,
        field: impl Into<String>,
        value: f64,
    ) -> Result<Self, SampleError> {
        Self::new(metric_set, BTreeMap::from([(field.into(), value)]))
    }

    /// Metric set name.
    #[must_use]
    pub fn metric_set(&self) -> &str {
        &self.metric_set
    }

    /// Time the observation was taken.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Field values in key order.
    #[must_use]
    pub const fn data(&self) -> &BTreeMap<String, f64> {
        &self.data
    }

    /// Borrow this sample as its wire message.
    #[must_use]
    pub fn to_wire(&self) -> WireMessage<'_> {
        WireMessage {
            log_set: &self.metric_set,
            data: &self.data,
        }
    }
}

// =============================================================================
// Wire Message
// =============================================================================

/// Client-to-ingester message for one sample.
#[derive(Debug, Serialize)]
pub struct WireMessage<'a> {
    /// Metric set the sample belongs to.
    pub log_set: &'a str,
    /// Field values.
    pub data: &'a BTreeMap<String, f64>,
}

impl WireMessage<'_> {
    /// Encode as a UTF-8 JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
