//! Graph model for placement-aware dataflow pipelines.
//!
//! Nodes declare typed ports and an execution placement; connections join an
//! output port of one node to an input port of another. The graph itself is
//! passive: running it is the job of the `processor` tree.
//!
//! # Architecture
//!
//! ```text
//! [Counter] ──data──► [Square] ──data──► [Collect]
//!   local              thread:dsp         process:io
//! ```
//!
//! # Design
//!
//! - **Arena storage** — `Graph` holds nodes in a `Vec`, `NodeId` is the index.
//! - **Symmetric edges** — each `Connection` lives on both of its endpoints.
//! - **Structural port types** — compatibility is decided from example values.
//! - **Logical clocks** — every value carries the tick it belongs to.

pub mod bridge;
pub mod clock;
pub mod connection;
pub mod description;
pub mod error;
pub mod graph;
pub mod id;
pub mod node;
pub mod nodes;
pub mod placement;
pub mod port;
pub mod registry;

pub use bridge::{BridgeKind, BridgeMessage, BridgeReceiver, BridgeSender, RemoteOutlet};
pub use clock::{Clock, ClockRegistry, ClockReporter, ClockSample, ClockState};
pub use connection::Connection;
pub use description::{ConnectionDescription, GraphDescription, NodeDescription};
pub use error::{PipelineError, PipelineResult};
pub use graph::{string_id, Graph, NodeEntry};
pub use id::NodeId;
pub use node::{lock_node, Emit, Inputs, Node, NodeClass, SharedNode};
pub use placement::{ExecContext, Level, Placement};
pub use port::{AnyValue, Flag, Integer, Number, NumberList, Port, PortType, Ports, Text};
pub use registry::NodeRegistry;
