//! Directed edges between node ports.

use crate::pipeline::id::NodeId;
use std::fmt;

/// One edge: `emit_node.emit_port → recv_node.recv_port`.
///
/// `counter` disambiguates otherwise identical edges. Equality compares all
/// five fields; [`Connection::is_similar`] ignores the counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    pub emit_node: NodeId,
    pub recv_node: NodeId,
    pub emit_port: String,
    pub recv_port: String,
    pub counter: u32,
}

impl Connection {
    pub fn new(
        emit_node: NodeId,
        emit_port: impl Into<String>,
        recv_node: NodeId,
        recv_port: impl Into<String>,
        counter: u32,
    ) -> Self {
        Self {
            emit_node,
            recv_node,
            emit_port: emit_port.into(),
            recv_port: recv_port.into(),
            counter,
        }
    }

    /// Same endpoints, counter ignored.
    pub fn is_similar(&self, other: &Connection) -> bool {
        self.emit_node == other.emit_node
            && self.recv_node == other.recv_node
            && self.emit_port == other.emit_port
            && self.recv_port == other.recv_port
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{} #{}",
            self.emit_node, self.emit_port, self.recv_node, self.recv_port, self.counter
        )
    }
}
