//! Graph configuration error types.
//!
//! Everything in here is raised synchronously by the call that caused it:
//! bad port references, duplicate edges, invalid port types, unknown classes.

use thiserror::Error;

/// Errors raised while building, mutating or (de)serializing a graph.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Node '{node}' has no output port '{port}' (available: {available})")]
    UnknownOutputPort {
        node: String,
        port: String,
        available: String,
    },

    #[error("Node '{node}' has no input port '{port}' (available: {available})")]
    UnknownInputPort {
        node: String,
        port: String,
        available: String,
    },

    #[error("Connection already exists: {0}")]
    DuplicateConnection(String),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Port type '{port_type}' is invalid: {reason}")]
    InvalidPortType { port_type: String, reason: String },

    #[error("Duplicate port key '{key}' in {collection}")]
    DuplicatePortKey { key: String, collection: String },

    #[error("Duplicate node identifier '{0}'")]
    DuplicateNodeId(String),

    #[error("Node class '{0}' is not registered")]
    UnknownClass(String),

    #[error("Node class '{0}' is already registered")]
    DuplicateClass(String),

    #[error("Invalid settings for '{class}': {message}")]
    InvalidSettings { class: String, message: String },

    #[error("Node {node} error: {message}")]
    Node { node: String, message: String },

    #[error("Graph description error: {0}")]
    Description(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// Shorthand for errors reported by node business logic.
    pub fn node(node: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Node {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Shorthand for settings that a node class cannot be built from.
    pub fn settings(class: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::InvalidSettings {
            class: class.into(),
            message: message.into(),
        }
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
