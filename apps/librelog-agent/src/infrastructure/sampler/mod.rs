//! Host Memory Sampler
//!
//! Produces one `{<metric_set>: {perc: used/total*100}}` sample per pull.
//! Inside a container with a memory limit the cgroup figures are used.

use std::fmt;

use sysinfo::System;

use crate::application::ports::{ProducerError, SampleSource};
use crate::domain::sample::Sample;

/// Field carrying the memory usage percentage.
pub const PERCENT_FIELD: &str = "perc";

/// Used and total memory in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryReading {
    /// Bytes in use.
    pub used: u64,
    /// Bytes available in total.
    pub total: u64,
}

impl MemoryReading {
    /// Usage as a percentage of total.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if total memory is reported as zero.
    pub fn percent(self) -> Result<f64, ProducerError> {
        if self.total == 0 {
            return Err(ProducerError::Unavailable("total memory reported as zero".into()));
        }
        #[allow(clippy::cast_precision_loss)]
        let percent = self.used as f64 / self.total as f64 * 100.0;
        Ok(percent)
    }
}

/// Sample source backed by `sysinfo`.
pub struct MemorySampler {
    metric_set: String,
    system: System,
}

impl MemorySampler {
    /// Create a sampler emitting under `metric_set`.
    #[must_use]
    pub fn new(metric_set: impl Into<String>) -> Self {
        Self {
            metric_set: metric_set.into(),
            system: System::new(),
        }
    }

    fn read(&mut self) -> MemoryReading {
        self.system.refresh_memory();
        match self.system.cgroup_limits() {
            Some(cgroup) => MemoryReading {
                used: cgroup.rss,
                total: cgroup.total_memory,
            },
            None => MemoryReading {
                used: self.system.used_memory(),
                total: self.system.total_memory(),
            },
        }
    }
}

impl fmt::Debug for MemorySampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySampler")
            .field("metric_set", &self.metric_set)
            .finish_non_exhaustive()
    }
}

impl SampleSource for MemorySampler {
    fn next_sample(&mut self) -> Result<Sample, ProducerError> {
        let percent = self.read().percent()?;
        Ok(Sample::single(&self.metric_set, PERCENT_FIELD, percent)?)
    }
}
