//! Minimal serialized form of a graph.
//!
//! ```json
//! {
//!   "B [Square]": {
//!     "class": "Square",
//!     "settings": {},
//!     "placement": { "thread": "dsp" },
//!     "inputs": [
//!       { "emitting_node": "A [Counter]", "receiving_node": "B [Square]",
//!         "emitting_channel": "data", "receiving_channel": "data",
//!         "connection_counter": 0 }
//!     ]
//!   }
//! }
//! ```
//!
//! Reconstruction is two-pass: all nodes first, then all connections, so the
//! order of entries in the map does not matter.

use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::graph::Graph;
use crate::pipeline::id::NodeId;
use crate::pipeline::placement::Placement;
use crate::pipeline::registry::NodeRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// One serialized edge, stored on the receiving node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescription {
    pub emitting_node: String,
    pub receiving_node: String,
    pub emitting_channel: String,
    pub receiving_channel: String,
    #[serde(default)]
    pub connection_counter: u32,
}

/// One serialized node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescription {
    pub class: String,
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub inputs: Vec<ConnectionDescription>,
}

/// Node string identifier → node description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphDescription {
    pub nodes: BTreeMap<String, NodeDescription>,
}

impl GraphDescription {
    pub fn from_json(json: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> PipelineResult<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Split `"{name} [{class}]"` back into the instance name.
fn name_from_id<'a>(id: &'a str, class: &str) -> PipelineResult<&'a str> {
    id.strip_suffix(&format!(" [{}]", class)).ok_or_else(|| {
        PipelineError::Description(format!(
            "node id '{}' does not end with its class '[{}]'",
            id, class
        ))
    })
}

impl Graph {
    /// Serialize nodes, settings, placements and edges.
    pub fn to_description(&self) -> PipelineResult<GraphDescription> {
        let mut nodes = BTreeMap::new();
        for id in self.node_ids() {
            let entry = self.node(id)?;
            let inputs = entry
                .input_connections()
                .iter()
                .map(|conn| {
                    Ok(ConnectionDescription {
                        emitting_node: self.string_id(conn.emit_node)?,
                        receiving_node: entry.string_id(),
                        emitting_channel: conn.emit_port.clone(),
                        receiving_channel: conn.recv_port.clone(),
                        connection_counter: conn.counter,
                    })
                })
                .collect::<PipelineResult<Vec<_>>>()?;

            nodes.insert(
                entry.string_id(),
                NodeDescription {
                    class: entry.class().to_string(),
                    settings: self.settings(id)?,
                    placement: entry.placement().clone(),
                    inputs,
                },
            );
        }
        Ok(GraphDescription { nodes })
    }

    /// Rebuild a graph: every node first, then every connection.
    pub fn from_description(
        desc: &GraphDescription,
        registry: &NodeRegistry,
    ) -> PipelineResult<Graph> {
        let mut graph = Graph::new();
        let mut ids: HashMap<&str, NodeId> = HashMap::new();

        for (sid, node) in &desc.nodes {
            let name = name_from_id(sid, &node.class)?;
            let built = registry.build(&node.class, &node.settings)?;
            let id = graph.add_boxed_node(name, built, node.placement.clone())?;
            if graph.string_id(id)? != *sid {
                return Err(PipelineError::Description(format!(
                    "class '{}' rebuilt '{}' as '{}'",
                    node.class,
                    sid,
                    graph.string_id(id)?
                )));
            }
            ids.insert(sid.as_str(), id);
        }

        let lookup = |sid: &str| {
            ids.get(sid)
                .copied()
                .ok_or_else(|| PipelineError::UnknownNode(sid.to_string()))
        };

        for (sid, node) in &desc.nodes {
            let recv = lookup(sid)?;
            for input in &node.inputs {
                if input.receiving_node != *sid {
                    return Err(PipelineError::Description(format!(
                        "input of '{}' names '{}' as its receiver",
                        sid, input.receiving_node
                    )));
                }
                let emitter = lookup(&input.emitting_node)?;
                graph.add_input_with_counter(
                    recv,
                    emitter,
                    &input.emitting_channel,
                    &input.receiving_channel,
                    input.connection_counter,
                )?;
            }
        }

        tracing::debug!("Rebuilt graph with {} nodes", graph.len());
        Ok(graph)
    }
}
