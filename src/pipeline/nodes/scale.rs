//! Scale node: multiplies each incoming number by a fixed factor.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::node::{Emit, Inputs, Node, NodeClass};
use crate::pipeline::nodes::parse_settings;
use crate::pipeline::port::{Number, Port, Ports};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct ScaleSettings {
    factor: f64,
}

impl Default for ScaleSettings {
    fn default() -> Self {
        Self { factor: 1.0 }
    }
}

pub struct Scale {
    factor: f64,
}

impl Scale {
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }
}

impl Node for Scale {
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
        json!({ "factor": self.factor })
    }

    fn process(&mut self, _ctr: u64, inputs: &Inputs, out: &mut Emit) -> PipelineResult<()> {
        if let Some(value) = inputs.get("data") {
            let x = value.as_f64().ok_or_else(|| {
                PipelineError::node(Self::CLASS, format!("{} is not a number", value))
            })?;
            out.send("data", json!(x * self.factor));
        }
        Ok(())
    }
}

impl NodeClass for Scale {
    const CLASS: &'static str = "Scale";

    fn class_ports_in() -> Ports {
        Ports::new(vec![Port::new("Data", &Number)])
    }

    fn class_ports_out() -> Ports {
        Ports::new(vec![Port::new("Data", &Number)])
    }

    fn from_settings(settings: &Value) -> PipelineResult<Self> {
        let s: ScaleSettings = parse_settings(Self::CLASS, settings)?;
        if !s.factor.is_finite() {
            return Err(PipelineError::settings(Self::CLASS, "factor must be finite"));
        }
        Ok(Self::new(s.factor))
    }
}
