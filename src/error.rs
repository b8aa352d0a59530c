//! Error handling for liveflow
//!
//! This module defines the top-level error type and a Result alias for use
//! throughout the crate. Graph configuration errors live in
//! `pipeline::error` and convert into `FlowError::Pipeline`.

use crate::pipeline::error::PipelineError;
use std::time::Duration;
use thiserror::Error;

/// Main error type for liveflow operations
#[derive(Error, Debug)]
pub enum FlowError {
    /// Graph configuration errors
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// A worker did not signal ready in time
    #[error("{unit} did not become ready within {timeout:?}")]
    ReadinessTimeout { unit: String, timeout: Duration },

    /// A worker or one of its sub-units failed during setup
    #[error("Setup of {unit} failed: {reason}")]
    SetupFailed { unit: String, reason: String },

    /// A context-bound object was used from the wrong context
    #[error("Ownership violation: {0}")]
    OwnershipViolation(String),

    /// A lifecycle operation was called in the wrong state
    #[error("Cannot {operation} {unit} while {state}")]
    InvalidState {
        unit: String,
        state: String,
        operation: &'static str,
    },

    /// Errors related to worker threads and processes
    #[error("Worker error: {0}")]
    Worker(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<FlowError>,
    },
}

impl FlowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        FlowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context wrappers
    pub fn root(&self) -> &FlowError {
        match self {
            FlowError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias for liveflow operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, PipelineError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| FlowError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| FlowError::from(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FlowError::Worker("pipe closed".to_string());
        assert_eq!(err.to_string(), "Worker error: pipe closed");
    }

    #[test]
    fn test_error_with_context() {
        let err = FlowError::Config("bad value".to_string());
        let with_ctx = err.with_context("Failed to load");
        assert!(with_ctx.to_string().contains("Failed to load"));
        assert!(matches!(with_ctx.root(), FlowError::Config(_)));
    }

    #[test]
    fn test_readiness_timeout_message() {
        let err = FlowError::ReadinessTimeout {
            unit: "thread:dsp".to_string(),
            timeout: Duration::from_millis(250),
        };
        assert!(err.to_string().contains("thread:dsp"));
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_pipeline_error_context() {
        let result: std::result::Result<(), PipelineError> =
            Err(PipelineError::UnknownClass("Nope".to_string()));
        let err = result.context("Rebuilding graph").unwrap_err();
        assert!(err.to_string().starts_with("Rebuilding graph"));
        assert!(matches!(err.root(), FlowError::Pipeline(_)));
    }
}
