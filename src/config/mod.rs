//! Configuration module for liveflow
//!
//! A single [`FlowConfig`] file carries the scheduler settings and the host
//! program's logging setup. Both TOML and JSON are accepted; the format is
//! picked from the file extension.
//!
//! # Config Location
//!
//! The default config file lives in the platform-appropriate location:
//! - **Linux**: `~/.config/dev.hxyulin.liveflow/liveflow.toml`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.liveflow/liveflow.toml`
//! - **Windows**: `%APPDATA%\dev.hxyulin.liveflow\liveflow.toml`
//!
//! # Example
//!
//! ```toml
//! [scheduler]
//! ready_timeout_ms = 10000
//! setup_failure = "continue_degraded"
//!
//! [logging]
//! filter = "info"
//! ```

pub mod settings;

pub use settings::*;

use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "dev.hxyulin.liveflow";

/// Default config filename
pub const CONFIG_FILE: &str = "liveflow.toml";

// ==================== Config Directory ====================

/// Get the platform config directory for liveflow
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Ensure the config directory exists
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir()
        .ok_or_else(|| FlowError::Config("Could not determine config directory".to_string()))?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            FlowError::Config(format!("Failed to create config directory: {}", e))
        })?;
    }

    Ok(dir)
}

// ==================== Flow Config ====================

/// Serialized file format, chosen by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Toml,
    Json,
}

impl Format {
    fn of(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(Format::Toml),
            Some("json") => Ok(Format::Json),
            other => Err(FlowError::Config(format!(
                "Unsupported config extension {:?} for {}",
                other,
                path.display()
            ))),
        }
    }
}

/// Complete liveflow configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Processor tree settings
    pub scheduler: SchedulerConfig,

    /// Host logging settings
    pub logging: LoggingConfig,
}

impl FlowConfig {
    /// Default config file path
    pub fn default_path() -> Option<PathBuf> {
        config_dir().map(|p| p.join(CONFIG_FILE))
    }

    /// Load configuration from a `.toml` or `.json` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let format = Format::of(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| FlowError::Config(format!("Failed to read config: {}", e)))?;

        match format {
            Format::Toml => toml::from_str(&content)
                .map_err(|e| FlowError::Config(format!("Failed to parse config: {}", e))),
            Format::Json => serde_json::from_str(&content)
                .map_err(|e| FlowError::Config(format!("Failed to parse config: {}", e))),
        }
    }

    /// Load configuration, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            return Self::default();
        }
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save configuration, format chosen by extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = match Format::of(path)? {
            Format::Toml => toml::to_string_pretty(self)
                .map_err(|e| FlowError::Config(format!("Failed to serialize config: {}", e)))?,
            Format::Json => serde_json::to_string_pretty(self)
                .map_err(|e| FlowError::Config(format!("Failed to serialize config: {}", e)))?,
        };

        std::fs::write(path, content)
            .map_err(|e| FlowError::Config(format!("Failed to write config: {}", e)))
    }
}
