//! Test-only node classes and log capture

use liveflow::pipeline::nodes::builtin_registry;
use liveflow::pipeline::{
    AnyValue, Emit, Inputs, Node, NodeClass, PipelineError, PipelineResult, Port, Ports,
};
use liveflow::{LogLine, LogSink, NodeRegistry};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Longest a `Stall` node ever blocks, so abandoned workers always wind down
const MAX_STALL: Duration = Duration::from_secs(30);

/// Passthrough node whose `ready()` blocks while a marker file exists.
/// A file works across worker processes, unlike a shared flag.
pub struct Stall {
    marker: PathBuf,
}

impl Stall {
    pub fn new(marker: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl Node for Stall {
    fn class(&self) -> &'static str {
        Self::CLASS
    }

    fn ports_in(&self) -> Ports {
        Self::class_ports_in()
    }

    fn ports_out(&self) -> Ports {
        Self::class_ports_out()
    }

    fn settings(&self) -> Value {
        json!({ "marker": self.marker })
    }

    fn ready(&mut self) -> PipelineResult<()> {
        let started = Instant::now();
        while self.marker.exists() && started.elapsed() < MAX_STALL {
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }

    fn process(&mut self, _ctr: u64, inputs: &Inputs, out: &mut Emit) -> PipelineResult<()> {
        if let Some(value) = inputs.get("data") {
            out.send("data", value.clone());
        }
        Ok(())
    }
}

impl NodeClass for Stall {
    const CLASS: &'static str = "Stall";

    fn class_ports_in() -> Ports {
        Ports::new(vec![Port::new("Data", &AnyValue)])
    }

    fn class_ports_out() -> Ports {
        Ports::new(vec![Port::new("Data", &AnyValue)])
    }

    fn from_settings(settings: &Value) -> PipelineResult<Self> {
        let marker = settings
            .get("marker")
            .and_then(Value::as_str)
            .ok_or_else(|| PipelineError::settings(Self::CLASS, "missing 'marker'"))?;
        Ok(Self::new(marker))
    }
}

/// Node that always fails its setup.
#[derive(Default)]
pub struct Broken;

impl Node for Broken {
    fn class(&self) -> &'static str {
        Self::CLASS
    }

    fn ports_in(&self) -> Ports {
        Self::class_ports_in()
    }

    fn ports_out(&self) -> Ports {
        Self::class_ports_out()
    }

    fn ready(&mut self) -> PipelineResult<()> {
        Err(PipelineError::node(Self::CLASS, "refusing to start"))
    }
}

impl NodeClass for Broken {
    const CLASS: &'static str = "Broken";

    fn class_ports_in() -> Ports {
        Ports::new(vec![Port::new("Data", &AnyValue).optional()])
    }

    fn class_ports_out() -> Ports {
        Ports::empty()
    }

    fn from_settings(_settings: &Value) -> PipelineResult<Self> {
        Ok(Broken)
    }
}

/// Source that emits nothing and counts its `ready()` and `close()` calls.
/// Only usable in-process.
pub struct Tracker {
    readied: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl Tracker {
    pub fn new() -> Self {
        Self {
            readied: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Handles on the `(ready, close)` call counts
    pub fn counts(&self) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        (Arc::clone(&self.readied), Arc::clone(&self.closed))
    }
}

impl Node for Tracker {
    fn class(&self) -> &'static str {
        "Tracker"
    }

    fn ports_in(&self) -> Ports {
        Ports::empty()
    }

    fn ports_out(&self) -> Ports {
        Ports::empty()
    }

    fn ready(&mut self) -> PipelineResult<()> {
        self.readied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Built-in classes plus the test-only ones
pub fn test_registry() -> NodeRegistry {
    let mut registry = builtin_registry().unwrap();
    registry
        .register::<Stall>()
        .unwrap()
        .register::<Broken>()
        .unwrap();
    registry
}

/// A sink remembering every line it receives
pub fn capture_sink() -> (Arc<LogSink>, Arc<Mutex<Vec<LogLine>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let store = Arc::clone(&lines);
    let sink = Arc::new(LogSink::with_callback(Arc::new(move |line: &LogLine| {
        store.lock().unwrap().push(line.clone());
    })));
    (sink, lines)
}

/// Create the marker file that makes `Stall` nodes block
pub fn arm(marker: &Path) {
    std::fs::write(marker, b"stall").unwrap();
}

pub fn disarm(marker: &Path) {
    let _ = std::fs::remove_file(marker);
}
