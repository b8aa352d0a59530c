//! Integer source node.
//!
//! Emits `start, start + 1, …, start + count - 1` on its `data` port, one
//! value per step, then reports exhaustion.

use crate::pipeline::error::PipelineResult;
use crate::pipeline::node::{Emit, Node, NodeClass};
use crate::pipeline::nodes::parse_settings;
use crate::pipeline::port::{Integer, Port, Ports};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct CounterSettings {
    start: i64,
    count: u64,
}

pub struct Counter {
    start: i64,
    count: u64,
    emitted: u64,
}

impl Counter {
    pub fn new(start: i64, count: u64) -> Self {
        Self {
            start,
            count,
            emitted: 0,
        }
    }

    /// Values emitted so far in the current run.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

impl Node for Counter {
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
        json!({ "start": self.start, "count": self.count })
    }

    fn ready(&mut self) -> PipelineResult<()> {
        self.emitted = 0;
        Ok(())
    }

    fn produce(&mut self, out: &mut Emit) -> PipelineResult<bool> {
        if self.emitted < self.count {
            out.send("data", json!(self.start + self.emitted as i64));
            self.emitted += 1;
        }
        Ok(self.emitted < self.count)
    }
}

impl NodeClass for Counter {
    const CLASS: &'static str = "Counter";

    fn class_ports_in() -> Ports {
        Ports::empty()
    }

    fn class_ports_out() -> Ports {
        Ports::new(vec![Port::new("Data", &Integer)])
    }

    fn from_settings(settings: &Value) -> PipelineResult<Self> {
        let s: CounterSettings = parse_settings(Self::CLASS, settings)?;
        Ok(Self::new(s.start, s.count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_then_exhausts() {
        let mut node = Counter::new(5, 3);
        node.ready().unwrap();
        let mut values = Vec::new();
        loop {
            let mut out = Emit::new();
            let more = node.produce(&mut out).unwrap();
            values.extend(out.take().into_iter().map(|(_, v)| v));
            if !more {
                break;
            }
        }
        assert_eq!(values, vec![json!(5), json!(6), json!(7)]);
    }

    #[test]
    fn test_empty_counter_emits_nothing() {
        let mut node = Counter::new(0, 0);
        let mut out = Emit::new();
        assert!(!node.produce(&mut out).unwrap());
        assert!(out.is_empty());
    }

    #[test]
    fn test_settings_round_trip() {
        let node = Counter::from_settings(&json!({ "start": -2, "count": 4 })).unwrap();
        assert_eq!(node.settings(), json!({ "start": -2, "count": 4 }));
        assert!(Counter::from_settings(&json!({ "count": "many" })).is_err());
    }
}
