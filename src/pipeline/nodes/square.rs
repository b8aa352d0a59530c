//! Square node: squares each incoming number.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{Emit, Inputs, Node, NodeClass};
use crate::pipeline::nodes::numeric;
use crate::pipeline::port::{Number, Port, Ports};
use serde_json::Value;

#[derive(Debug, Default)]
pub struct Square;

impl Square {
    pub fn new() -> Self {
        Square
    }
}

impl Node for Square {
    fn class(&self) -> &'static str {
        Self::CLASS
    }

    fn ports_in(&self) -> Ports {
        Self::class_ports_in()
    }

    fn ports_out(&self) -> Ports {
        Self::class_ports_out()
    }

    fn process(&mut self, ctr: u64, inputs: &Inputs, out: &mut Emit) -> PipelineResult<()> {
        let Some(value) = inputs.get("data") else {
            return Ok(());
        };
        let squared = numeric(value, value, i64::checked_mul, |a, b| a * b).ok_or_else(|| {
            PipelineError::node(Self::CLASS, format!("tick {}: {} is not a number", ctr, value))
        })?;
        out.send("data", squared);
        Ok(())
    }
}

impl NodeClass for Square {
    const CLASS: &'static str = "Square";

    fn class_ports_in() -> Ports {
        Ports::new(vec![Port::new("Data", &Number)])
    }

    fn class_ports_out() -> Ports {
        Ports::new(vec![Port::new("Data", &Number)])
    }

    fn from_settings(_settings: &Value) -> PipelineResult<Self> {
        Ok(Square)
    }
}
