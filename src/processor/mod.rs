//! Hierarchical, placement-aware execution of a graph.
//!
//! The processor tree is built top-down from node placements:
//!
//! ```text
//! Runner ── group_factory(Process)
//!            ├── Processor<ProcessIsolation> "process:io"   (worker process)
//!            │     └── group_factory(Thread) ── … ── LocalUnit
//!            ├── Processor<ThreadIsolation>  "thread:dsp"   (worker thread)
//!            │     └── LocalUnit
//!            └── LocalUnit "local"                          (driver thread)
//! ```
//!
//! Every unit goes through the same lifecycle, `setup → start → join/stop →
//! close`. Isolated units run the shared [`entry::child_entrypoint`] in their
//! worker, which builds and drives the next level down.

pub mod entry;
pub mod events;
pub mod isolation;
pub mod local;
pub mod process;
pub mod protocol;
pub mod runner;
pub mod thread;
pub mod wiring;

pub use isolation::{Isolation, Processor};
pub use local::{LocalUnit, NodeRuntime};
pub use process::ProcessIsolation;
pub use runner::Runner;
pub use thread::ThreadIsolation;

use crate::config::{SchedulerConfig, SetupFailurePolicy};
use crate::error::Result;
use crate::logging::LogSink;
use crate::pipeline::clock::ClockReporter;
use crate::pipeline::description::GraphDescription;
use crate::pipeline::graph::NodeEntry;
use crate::pipeline::node::SharedNode;
use crate::pipeline::placement::{Level, Placement};
use crate::processor::protocol::ParentFrame;
use crate::processor::wiring::Wiring;
use crossbeam_channel::{Receiver, Sender};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lifecycle state of an execution unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Idle,
    Readying,
    Ready,
    Running,
    Stopping,
    Closing,
    Closed,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitState::Idle => "idle",
            UnitState::Readying => "readying",
            UnitState::Ready => "ready",
            UnitState::Running => "running",
            UnitState::Stopping => "stopping",
            UnitState::Closing => "closing",
            UnitState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A node of the tree: something that can be set up, run and torn down.
#[cfg_attr(test, mockall::automock)]
pub trait ExecutionUnit: Send {
    fn label(&self) -> String;

    fn state(&self) -> UnitState;

    /// Bring the unit and everything below it to `Ready`.
    fn setup(&mut self) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// Wait for natural completion; `true` once finished.
    fn join(&mut self, timeout: Duration) -> bool;

    /// Request a stop and wait at most `timeout` for it.
    fn stop(&mut self, timeout: Duration);

    /// Release everything. The unit can be set up again afterwards.
    fn close(&mut self, timeout: Duration);

    fn is_finished(&self) -> bool;

    /// Whether a stuck worker can be terminated rather than abandoned.
    fn can_force_stop(&self) -> bool;
}

/// A node handed to the processor tree.
#[derive(Clone)]
pub struct PlacedNode {
    /// String identifier, `"{name} [{class}]"`.
    pub key: String,
    pub placement: Placement,
    pub handle: SharedNode,
}

impl PlacedNode {
    pub fn from_entry(entry: &NodeEntry) -> Self {
        Self {
            key: entry.string_id(),
            placement: entry.placement().clone(),
            handle: Arc::clone(entry.handle()),
        }
    }
}

impl fmt::Debug for PlacedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.key, self.placement)
    }
}

/// Pipe endpoints towards one worker process.
#[derive(Debug, Clone)]
pub struct ProcessLink {
    pub tx: Sender<ParentFrame>,
    pub rx: Receiver<ParentFrame>,
}

impl ProcessLink {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }
}

impl Default for ProcessLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a unit needs from the run it belongs to. Passed down the tree
/// explicitly.
pub struct RunContext {
    pub config: SchedulerConfig,
    pub wiring: Arc<Wiring>,
    pub clocks: ClockReporter,
    /// Parent sink for lines drained from worker log channels.
    pub log_sink: Arc<LogSink>,
    /// Whole graph, sent to worker processes with their assignment.
    pub description: Option<GraphDescription>,
    pub process_links: HashMap<String, ProcessLink>,
}

impl RunContext {
    pub fn new(
        config: SchedulerConfig,
        wiring: Arc<Wiring>,
        clocks: ClockReporter,
        log_sink: Arc<LogSink>,
    ) -> Self {
        Self {
            config,
            wiring,
            clocks,
            log_sink,
            description: None,
            process_links: HashMap::new(),
        }
    }

    pub fn with_description(mut self, description: GraphDescription) -> Self {
        self.description = Some(description);
        self
    }

    pub fn with_process_links(mut self, links: HashMap<String, ProcessLink>) -> Self {
        self.process_links = links;
        self
    }
}

fn child_label(parent: &str, own: &str) -> String {
    if parent.is_empty() || parent == "root" {
        own.to_string()
    } else {
        format!("{}/{}", parent, own)
    }
}

/// Build the units of one tree level.
///
/// Items are stably sorted by their key at `level` and split into runs of
/// equal keys; each run becomes one isolated unit. Items without a key at
/// `level` are handed to the next level. At the terminal level everything
/// left ends up in a single [`LocalUnit`].
pub fn group_factory(
    level: Level,
    parent: &str,
    items: Vec<PlacedNode>,
    ctx: &Arc<RunContext>,
) -> Vec<Box<dyn ExecutionUnit>> {
    let Some(successor) = level.successor() else {
        if items.is_empty() {
            return Vec::new();
        }
        let label = child_label(parent, Level::Local.name());
        return vec![Box::new(LocalUnit::new(label, items, Arc::clone(ctx)))];
    };

    let mut keyed: Vec<(String, PlacedNode)> = Vec::new();
    let mut passed = Vec::new();
    for item in items {
        match item.placement.key_at(level).map(str::to_string) {
            Some(key) => keyed.push((key, item)),
            None => passed.push(item),
        }
    }
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    let mut groups: Vec<(String, Vec<PlacedNode>)> = Vec::new();
    for (key, item) in keyed {
        match groups.last_mut() {
            Some((last, run)) if *last == key => run.push(item),
            _ => groups.push((key, vec![item])),
        }
    }

    let mut units: Vec<Box<dyn ExecutionUnit>> = Vec::new();
    for (key, run) in groups {
        let label = child_label(parent, &format!("{}:{}", level.name(), key));
        tracing::debug!("Grouping {:?} into {}", run, label);
        match level {
            Level::Process => units.push(Box::new(Processor::<ProcessIsolation>::new(
                label,
                key,
                run,
                Arc::clone(ctx),
            ))),
            _ => units.push(Box::new(Processor::<ThreadIsolation>::new(
                label,
                key,
                run,
                Arc::clone(ctx),
            ))),
        }
    }

    units.extend(group_factory(successor, parent, passed, ctx));
    units
}

/// Set up every unit. Failures are logged; `policy` decides whether the first
/// one is returned or the failed unit is closed and dropped.
pub fn setup_units(
    units: &mut Vec<Box<dyn ExecutionUnit>>,
    policy: SetupFailurePolicy,
    close_timeout: Duration,
) -> Result<()> {
    let mut idx = 0;
    while idx < units.len() {
        match units[idx].setup() {
            Ok(()) => idx += 1,
            Err(e) => {
                let label = units[idx].label();
                tracing::error!("Setup of {} failed: {}", label, e);
                match policy {
                    SetupFailurePolicy::FailParent => return Err(e),
                    SetupFailurePolicy::ContinueDegraded => {
                        let mut failed = units.remove(idx);
                        failed.close(close_timeout);
                        tracing::warn!("Continuing without {}", label);
                    }
                }
            }
        }
    }
    Ok(())
}

pub fn start_units(units: &mut [Box<dyn ExecutionUnit>]) -> Result<()> {
    for unit in units.iter_mut() {
        unit.start()?;
    }
    Ok(())
}

/// Join every unit within one shared deadline.
pub fn join_units(units: &mut [Box<dyn ExecutionUnit>], timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    units.iter_mut().fold(true, |all, unit| {
        let remaining = deadline.saturating_duration_since(Instant::now());
        unit.join(remaining) && all
    })
}

pub fn stop_units(units: &mut [Box<dyn ExecutionUnit>], timeout: Duration) {
    for unit in units.iter_mut() {
        unit.stop(timeout);
    }
}

pub fn close_units(units: &mut [Box<dyn ExecutionUnit>], timeout: Duration) {
    for unit in units.iter_mut() {
        unit.close(timeout);
    }
}

pub fn all_finished(units: &[Box<dyn ExecutionUnit>]) -> bool {
    units.iter().all(|unit| unit.is_finished())
}
