//! Merge node: adds two number streams tick by tick.
//!
//! `right` is optional: when it is not connected, `left` passes through
//! unchanged. Once connected, a tick waits for both sides.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{Emit, Inputs, Node, NodeClass};
use crate::pipeline::nodes::numeric;
use crate::pipeline::port::{Number, Port, Ports};
use serde_json::{json, Value};

#[derive(Debug, Default)]
pub struct Merge;

impl Merge {
    pub fn new() -> Self {
        Merge
    }
}

impl Node for Merge {
    fn class(&self) -> &'static str {
        Self::CLASS
    }

    fn ports_in(&self) -> Ports {
        Self::class_ports_in()
    }

    fn ports_out(&self) -> Ports {
        Self::class_ports_out()
    }

    fn process(&mut self, _ctr: u64, inputs: &Inputs, out: &mut Emit) -> PipelineResult<()> {
        let Some(left) = inputs.get("left") else {
            return Ok(());
        };
        let right = inputs.get("right").cloned().unwrap_or(json!(0));
        let sum = numeric(left, &right, i64::checked_add, |a, b| a + b).ok_or_else(|| {
            PipelineError::node(Self::CLASS, format!("cannot add {} and {}", left, right))
        })?;
        out.send("sum", sum);
        Ok(())
    }
}

impl NodeClass for Merge {
    const CLASS: &'static str = "Merge";

    fn class_ports_in() -> Ports {
        Ports::new(vec![
            Port::new("Left", &Number),
            Port::new("Right", &Number).optional(),
        ])
    }

    fn class_ports_out() -> Ports {
        Ports::new(vec![Port::new("Sum", &Number)])
    }

    fn from_settings(_settings: &Value) -> PipelineResult<Self> {
        Ok(Merge)
    }
}
