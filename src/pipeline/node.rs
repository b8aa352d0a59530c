//! Node abstraction for the pipeline.
//!
//! Two layers:
//! - **`Node` trait** — the object-safe business-logic contract the scheduler
//!   drives. Sources implement `produce`, everything else implements `process`.
//! - **`NodeClass` trait** — the class-level half: a stable class name, the
//!   declared port collections and construction from serialized settings.
//!   `NodeRegistry` only accepts types implementing it.
//!
//! Nodes are shared between the graph and the execution units of an
//! in-process run through `SharedNode`.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::port::Ports;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

/// Values received for one clock tick, keyed by input port.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    values: BTreeMap<String, Value>,
    required: Vec<String>,
}

impl Inputs {
    /// `required` lists the input keys a tick needs before it is processed.
    pub fn new(values: BTreeMap<String, Value>, required: Vec<String>) -> Self {
        Self { values, required }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Every required input has a value.
    pub fn has_required(&self) -> bool {
        self.required.iter().all(|k| self.values.contains_key(k))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

/// Output buffer for one invocation. The scheduler validates port keys and
/// values against the node's output ports before delivery.
#[derive(Debug, Default)]
pub struct Emit {
    values: Vec<(String, Value)>,
}

impl Emit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, port: impl Into<String>, value: Value) {
        self.values.push((port.into(), value));
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn take(&mut self) -> Vec<(String, Value)> {
        std::mem::take(&mut self.values)
    }
}

/// Business-logic contract driven by the local scheduler.
pub trait Node: Send {
    /// Class name. Together with the instance name it forms the node's
    /// string identifier `"{name} [{class}]"`.
    fn class(&self) -> &'static str;

    fn ports_in(&self) -> Ports;

    fn ports_out(&self) -> Ports;

    /// Serializable settings, enough for `NodeClass::from_settings` to rebuild
    /// an equivalent node.
    fn settings(&self) -> Value {
        Value::Object(Default::default())
    }

    /// Called once during setup, before the unit signals ready.
    fn ready(&mut self) -> PipelineResult<()> {
        Ok(())
    }

    /// Source step: emit at most one unit of output.
    /// Returns `false` once the source is exhausted.
    fn produce(&mut self, _out: &mut Emit) -> PipelineResult<bool> {
        Ok(false)
    }

    fn should_process(&self, inputs: &Inputs) -> bool {
        inputs.has_required()
    }

    /// Consume the inputs of tick `ctr` and emit its outputs.
    fn process(&mut self, _ctr: u64, _inputs: &Inputs, _out: &mut Emit) -> PipelineResult<()> {
        Ok(())
    }

    /// The node will not be invoked again in this run.
    fn stop(&mut self) {}

    /// Release resources. Called from the unit's `close()`.
    fn close(&mut self) {}
}

/// Class-level half of a node type.
pub trait NodeClass: Node + Sized + 'static {
    const CLASS: &'static str;

    fn class_ports_in() -> Ports;

    fn class_ports_out() -> Ports;

    fn from_settings(settings: &Value) -> PipelineResult<Self>;
}

/// A node shared between the graph and the units executing it.
pub type SharedNode = Arc<Mutex<Box<dyn Node>>>;

pub fn share(node: Box<dyn Node>) -> SharedNode {
    Arc::new(Mutex::new(node))
}

/// Lock a shared node. A node that panicked keeps its last state.
pub fn lock_node(node: &SharedNode) -> MutexGuard<'_, Box<dyn Node>> {
    node.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Lock a shared node, giving up after `timeout`.
pub fn lock_node_within(node: &SharedNode, timeout: Duration) -> Option<MutexGuard<'_, Box<dyn Node>>> {
    let deadline = Instant::now() + timeout;
    loop {
        match node.try_lock() {
            Ok(guard) => return Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(TryLockError::WouldBlock) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inputs_required() {
        let mut values = BTreeMap::new();
        values.insert("left".to_string(), json!(1));
        let inputs = Inputs::new(values.clone(), vec!["left".into(), "right".into()]);
        assert!(!inputs.has_required());

        values.insert("right".to_string(), json!(2));
        let inputs = Inputs::new(values, vec!["left".into(), "right".into()]);
        assert!(inputs.has_required());
        assert_eq!(inputs.get("right"), Some(&json!(2)));
    }

    #[test]
    fn test_inputs_without_requirements() {
        let inputs = Inputs::new(BTreeMap::new(), Vec::new());
        assert!(inputs.has_required());
        assert!(inputs.is_empty());
    }

    #[test]
    fn test_emit_take() {
        let mut out = Emit::new();
        out.send("data", json!(4));
        out.send("data", json!(9));
        assert_eq!(out.len(), 2);
        let taken = out.take();
        assert_eq!(taken[1], ("data".to_string(), json!(9)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_lock_within_gives_up_on_a_held_node() {
        let node = share(Box::new(crate::pipeline::nodes::Square::new()));
        let held = lock_node(&node);
        assert!(lock_node_within(&node, Duration::from_millis(10)).is_none());
        drop(held);
        assert!(lock_node_within(&node, Duration::from_millis(10)).is_some());
    }
}
