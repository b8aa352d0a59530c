//! # liveflow: placement-aware dataflow pipelines
//!
//! A dataflow engine for streaming sensor and data-processing graphs. Nodes
//! with typed ports are connected into a directed graph; each node declares
//! where it runs, cooperatively in the caller's process, on a dedicated
//! thread, or inside a separate worker process. The engine brings the whole
//! graph up and down coherently across those boundaries.
//!
//! ## Architecture
//!
//! - **Pipeline**: ports, connections, the graph arena, discovery, clocks,
//!   placements and bridges
//! - **Processor**: the hierarchical execution tree (process, thread and local
//!   levels) and its lifecycle
//! - **Worker**: the host side of process isolation
//! - **Logging**: log propagation from workers back to the caller
//!
//! ## Configuration
//!
//! Scheduler and logging settings live in `liveflow.toml` in the
//! platform-appropriate config directory under `dev.hxyulin.liveflow`.
//!
//! ## Example
//!
//! ```ignore
//! use liveflow::pipeline::nodes::{builtin_registry, Collect, Counter, Square};
//! use liveflow::pipeline::{Graph, Placement};
//! use liveflow::{Runner, SchedulerConfig};
//!
//! fn main() -> liveflow::Result<()> {
//!     liveflow::worker::enter_if_requested(&builtin_registry()?);
//!
//!     let mut graph = Graph::new();
//!     let a = graph.add_node("A", Counter::new(0, 10), Placement::Local)?;
//!     let b = graph.add_node("B", Square::new(), Placement::thread("dsp"))?;
//!     let c = graph.add_node("C", Collect::to_file("out.jsonl"), Placement::process("io"))?;
//!     graph.add_input(b, a, "data", "data")?;
//!     graph.add_input(c, b, "data", "data")?;
//!
//!     let mut runner = Runner::new(&graph, SchedulerConfig::default())?;
//!     runner.run(None)?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod processor;
pub mod worker;

// Re-export commonly used types
pub use config::{FlowConfig, LoggingConfig, SchedulerConfig, SetupFailurePolicy};
pub use error::{FlowError, Result, ResultExt};
pub use logging::{LogLine, LogSink};
pub use pipeline::{Graph, GraphDescription, NodeId, NodeRegistry, Placement};
pub use processor::{ExecutionUnit, Runner, UnitState};
