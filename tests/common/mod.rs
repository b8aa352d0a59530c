//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use liveflow::SchedulerConfig;
use std::time::Duration;

/// Generous upper bound for a whole test graph to finish
pub fn test_timeout() -> Duration {
    Duration::from_secs(20)
}

/// Scheduler settings with short lifecycle timeouts
pub fn fast_config() -> SchedulerConfig {
    SchedulerConfig {
        ready_timeout_ms: 10_000,
        stop_timeout_ms: 2_000,
        close_timeout_ms: 5_000,
        log_level: "debug".to_string(),
        ..Default::default()
    }
}

/// Settings whose readiness wait gives up quickly
pub fn impatient_config() -> SchedulerConfig {
    SchedulerConfig {
        ready_timeout_ms: 300,
        ..fast_config()
    }
}
