//! Configuration structures for the rover kernel.
//!
//! Supports TOML deserialization with defaults matching the rover
//! board (100 ms tick on a 120 MHz core clock, 50-entry queue).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Default tick period of the time base.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(100);

/// Default core clock driving the tick hardware (Hz).
pub const DEFAULT_CLOCK_HZ: u64 = 120_000_000;

/// Default number of task queue slots.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// Top-level kernel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Time base tick configuration.
    pub tick: TickConfig,

    /// Task queue configuration.
    pub queue: QueueConfig,

    /// Dispatch event log configuration.
    pub event_log: EventLogConfig,

    /// Dispatch metrics configuration.
    pub metrics: MetricsConfig,

    /// Tasks enqueued once the kernel has started.
    pub startup_tasks: Vec<StartupTask>,
}

/// Tick source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Period between ticks; the time base advances by this much per tick.
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Core clock frequency used to check the period against the reload register.
    pub clock_hz: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_TICK_PERIOD,
            clock_hz: DEFAULT_CLOCK_HZ,
        }
    }
}

/// Task queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of entries the queue can hold before a `Reset`.
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Dispatch event log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    /// Record every dispatched or skipped entry.
    pub enabled: bool,

    /// Number of records retained in the ring.
    pub capacity: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 64,
        }
    }
}

/// Dispatch metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Size of the callback latency ring buffer.
    pub histogram_size: usize,

    /// Callbacks running longer than this are counted and logged as slow.
    #[serde(with = "humantime_serde")]
    pub slow_callback: Duration,

    /// Percentiles to report (e.g., [50, 90, 99]).
    pub percentiles: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            histogram_size: 1024,
            slow_callback: Duration::from_millis(5),
            percentiles: vec![50.0, 90.0, 99.0],
        }
    }
}

/// A task pushed by the control loop right after start-up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupTask {
    /// Target module ID.
    pub module: u8,

    /// Service requested from the module.
    pub service: u16,

    /// Delay from start-up until the task becomes due.
    #[serde(with = "humantime_serde", default)]
    pub delay: Duration,

    /// Raw payload bytes, copied verbatim into the entry.
    #[serde(default)]
    pub args: Vec<u8>,
}

impl KernelConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check values that cannot be caught by deserialization alone.
    ///
    /// Tick period limits are enforced by the time base itself; this only
    /// rejects sizes that would leave the kernel without storage.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.capacity == 0 {
            return Err(ConfigError::Invalid("queue.capacity must be at least 1".into()));
        }
        if self.metrics.histogram_size == 0 {
            return Err(ConfigError::Invalid(
                "metrics.histogram_size must be at least 1".into(),
            ));
        }
        if self.event_log.enabled && self.event_log.capacity == 0 {
            warn!("event_log.capacity is 0, a single record slot will be used");
        }
        if self.startup_tasks.len() > self.queue.capacity {
            warn!(
                tasks = self.startup_tasks.len(),
                capacity = self.queue.capacity,
                "More startup tasks than queue slots, excess tasks will be rejected"
            );
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Semantically invalid value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
