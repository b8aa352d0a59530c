//! Sink node that keeps everything it receives.
//!
//! Values land in a shared in-memory buffer and, when a path is configured,
//! are appended to a file as JSON lines. The file survives process isolation;
//! the buffer is only visible to callers in the same process.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{Emit, Inputs, Node, NodeClass};
use crate::pipeline::nodes::parse_settings;
use crate::pipeline::port::{AnyValue, Port, Ports};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs::{File, OpenOptions};
use std::io::{LineWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Handle to the values collected by a `Collect` node.
#[derive(Debug, Clone, Default)]
pub struct CollectBuffer(Arc<Mutex<Vec<Value>>>);

impl CollectBuffer {
    pub fn values(&self) -> Vec<Value> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn push(&self, value: Value) {
        self.lock().push(value);
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Value>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct CollectSettings {
    path: Option<PathBuf>,
}

pub struct Collect {
    path: Option<PathBuf>,
    buffer: CollectBuffer,
    writer: Option<LineWriter<File>>,
}

impl Collect {
    pub fn new() -> Self {
        Self {
            path: None,
            buffer: CollectBuffer::default(),
            writer: None,
        }
    }

    /// Also append every value to `path`, one JSON document per line.
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new()
        }
    }

    pub fn buffer(&self) -> CollectBuffer {
        self.buffer.clone()
    }

    /// Read back a file written by a `Collect` node.
    pub fn read_file(path: impl AsRef<Path>) -> PipelineResult<Vec<Value>> {
        let content = std::fs::read_to_string(path)?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }

    fn flush(&mut self) {
        if let Some(writer) = &mut self.writer {
            if let Err(e) = writer.flush() {
                tracing::warn!("Collect: failed to flush {:?}: {}", self.path, e);
            }
        }
    }
}

impl Default for Collect {
    fn default() -> Self {
        Self::new()
    }
}

impl Node for Collect {
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
        json!({ "path": self.path })
    }

    fn ready(&mut self) -> PipelineResult<()> {
        self.buffer.clear();
        if let Some(path) = &self.path {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(path)
                .map_err(|e| {
                    PipelineError::node(Self::CLASS, format!("cannot open {:?}: {}", path, e))
                })?;
            self.writer = Some(LineWriter::new(file));
        }
        Ok(())
    }

    fn process(&mut self, _ctr: u64, inputs: &Inputs, _out: &mut Emit) -> PipelineResult<()> {
        let Some(value) = inputs.get("data") else {
            return Ok(());
        };
        if let Some(writer) = &mut self.writer {
            writeln!(writer, "{}", value)?;
        }
        self.buffer.push(value.clone());
        Ok(())
    }

    fn stop(&mut self) {
        self.flush();
    }

    fn close(&mut self) {
        self.flush();
        self.writer = None;
    }
}

impl NodeClass for Collect {
    const CLASS: &'static str = "Collect";

    fn class_ports_in() -> Ports {
        Ports::new(vec![Port::new("Data", &AnyValue)])
    }

    fn class_ports_out() -> Ports {
        Ports::empty()
    }

    fn from_settings(settings: &Value) -> PipelineResult<Self> {
        let s: CollectSettings = parse_settings(Self::CLASS, settings)?;
        Ok(match s.path {
            Some(path) => Self::to_file(path),
            None => Self::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn feed(node: &mut Collect, value: Value) {
        let mut values = BTreeMap::new();
        values.insert("data".to_string(), value);
        node.process(0, &Inputs::new(values, vec![]), &mut Emit::new())
            .unwrap();
    }

    #[test]
    fn test_collects_into_buffer() {
        let mut node = Collect::new();
        let buffer = node.buffer();
        node.ready().unwrap();
        feed(&mut node, json!(1));
        feed(&mut node, json!("two"));
        assert_eq!(buffer.values(), vec![json!(1), json!("two")]);
    }

    #[test]
    fn test_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut node = Collect::to_file(&path);
        node.ready().unwrap();
        feed(&mut node, json!(4));
        feed(&mut node, json!([1, 2]));
        node.close();
        assert_eq!(
            Collect::read_file(&path).unwrap(),
            vec![json!(4), json!([1, 2])]
        );
    }

    #[test]
    fn test_ready_resets_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut node = Collect::to_file(&path);
        node.ready().unwrap();
        feed(&mut node, json!(1));
        node.close();
        node.ready().unwrap();
        node.close();
        assert!(Collect::read_file(&path).unwrap().is_empty());
        assert!(node.buffer().is_empty());
    }

    #[test]
    fn test_settings_carry_path() {
        let node = Collect::from_settings(&json!({ "path": "/tmp/x.jsonl" })).unwrap();
        assert_eq!(node.settings(), json!({ "path": "/tmp/x.jsonl" }));
        assert_eq!(Collect::new().settings(), json!({ "path": null }));
    }
}
