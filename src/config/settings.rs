//! Scheduler and logging settings
//!
//! These settings are shared by the whole processor tree. Worker processes
//! receive the scheduler settings with their assignment, so a child always
//! runs with the same timeouts and policy as its parent.
//!
//! # Main Types
//!
//! - [`SchedulerConfig`] - Lifecycle timeouts, failure policy, clock tracking
//! - [`SetupFailurePolicy`] - What a parent does when a sub-unit fails setup
//! - [`LoggingConfig`] - Subscriber filter and optional log file

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default readiness timeout in milliseconds
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 5000;

/// Default stop timeout in milliseconds
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 2000;

/// Default close timeout in milliseconds
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 2000;

/// Default idle poll interval of the local driver in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1;

/// Behaviour of a parent unit when one of its sub-units fails setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupFailurePolicy {
    /// The parent's own setup fails (default)
    #[default]
    FailParent,
    /// The failed sub-unit is closed and the parent carries on without it
    ContinueDegraded,
}

/// Processor tree settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long `setup()` waits for a worker to signal ready
    pub ready_timeout_ms: u64,

    /// How long `stop()` waits before escalating
    pub stop_timeout_ms: u64,

    /// How long `close()` waits before killing or abandoning a worker
    pub close_timeout_ms: u64,

    /// Sleep of the local driver after a round without progress
    pub poll_interval_ms: u64,

    /// Sub-unit setup failure handling
    pub setup_failure: SetupFailurePolicy,

    /// Aggregate node clocks into the run's clock registry
    pub track_clocks: bool,

    /// Attach wall-clock timestamps to clock reports
    pub clock_timestamps: bool,

    /// Level filter applied inside workers (`error`, `warn`, `info`, `debug`, `trace`)
    pub log_level: String,

    /// Program started for process-isolated groups; the current executable when unset
    pub worker_program: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: DEFAULT_READY_TIMEOUT_MS,
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT_MS,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            setup_failure: SetupFailurePolicy::default(),
            track_clocks: true,
            clock_timestamps: false,
            log_level: "info".to_string(),
            worker_program: None,
        }
    }
}

impl SchedulerConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Level filter for worker subscribers, `info` when unparsable
    pub fn level_filter(&self) -> tracing_subscriber::filter::LevelFilter {
        self.log_level.parse().unwrap_or_else(|_| {
            tracing::warn!("Unknown log level '{}', using info", self.log_level);
            tracing_subscriber::filter::LevelFilter::INFO
        })
    }
}

/// Subscriber settings for the host program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is not set
    pub filter: String,

    /// Also write logs to this file (non-blocking)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,liveflow=debug".to_string(),
            file: None,
        }
    }
}
