//! Test data builders for creating graphs

use liveflow::pipeline::nodes::{Collect, Counter, Merge, Square};
use liveflow::{Graph, NodeId, Placement};
use serde_json::{json, Value};
use std::path::PathBuf;

/// Builder for the `Counter → Square → Collect` chain
pub struct ChainBuilder {
    count: u64,
    placements: [Placement; 3],
    output: Option<PathBuf>,
}

impl ChainBuilder {
    pub fn new(count: u64) -> Self {
        Self {
            count,
            placements: [Placement::Local, Placement::Local, Placement::Local],
            output: None,
        }
    }

    pub fn placements(mut self, placements: [Placement; 3]) -> Self {
        self.placements = placements;
        self
    }

    /// Have the sink append its values to `path`
    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    pub fn build(self) -> (Graph, [NodeId; 3]) {
        let [pa, pb, pc] = self.placements;
        let sink = match self.output {
            Some(path) => Collect::to_file(path),
            None => Collect::new(),
        };

        let mut graph = Graph::new();
        let a = graph.add_node("A", Counter::new(0, self.count), pa).unwrap();
        let b = graph.add_node("B", Square::new(), pb).unwrap();
        let c = graph.add_node("C", sink, pc).unwrap();
        graph.add_input(b, a, "data", "data").unwrap();
        graph.add_input(c, b, "data", "data").unwrap();
        (graph, [a, b, c])
    }
}

/// `Counter(L) + Counter(R) → Merge → Collect`, with the sink written to `output`.
/// Placements are given for `L`, `R` and `Merge`; the sink stays local.
pub fn fan_in(count: u64, placements: [Placement; 3], output: impl Into<PathBuf>) -> Graph {
    let [pl, pr, pm] = placements;
    let mut graph = Graph::new();
    let l = graph.add_node("L", Counter::new(0, count), pl).unwrap();
    let r = graph.add_node("R", Counter::new(0, count), pr).unwrap();
    let m = graph.add_node("M", Merge::new(), pm).unwrap();
    let c = graph
        .add_node("C", Collect::to_file(output), Placement::Local)
        .unwrap();
    graph.add_input(m, l, "data", "left").unwrap();
    graph.add_input(m, r, "data", "right").unwrap();
    graph.add_input(c, m, "sum", "data").unwrap();
    graph
}

/// `[0, 2, 4, …]`, what `fan_in` collects for `count` inputs
pub fn doubles(count: i64) -> Vec<Value> {
    (0..count).map(|i| json!(2 * i)).collect()
}

/// `[0, 1, 4, …]`, what the chain collects for `count` inputs
pub fn squares(count: i64) -> Vec<Value> {
    (0..count).map(|i| json!(i * i)).collect()
}

/// Every assignment of local, thread and process placement to three nodes.
/// Each isolated node gets its own group.
pub fn placement_combinations() -> Vec<[Placement; 3]> {
    let options = |node: &str| {
        vec![
            Placement::Local,
            Placement::thread(format!("t{}", node)),
            Placement::process(format!("p{}", node)),
        ]
    };

    let mut combos = Vec::new();
    for a in options("a") {
        for b in options("b") {
            for c in options("c") {
                combos.push([a.clone(), b.clone(), c]);
            }
        }
    }
    combos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_builder() {
        let (graph, [a, b, c]) = ChainBuilder::new(3).build();
        assert_eq!(graph.len(), 3);
        assert!(graph.provides_input_to(a, c).unwrap());
        assert!(graph.requires_input_of(c, b).unwrap());
    }

    #[test]
    fn test_fan_in_feeds_both_merge_inputs() {
        let graph = fan_in(2, [Placement::Local, Placement::Local, Placement::Local], "unused.jsonl");
        let m = graph.find("M [Merge]").unwrap();
        assert_eq!(graph.node(m).unwrap().input_connections().len(), 2);
        assert_eq!(doubles(3), vec![json!(0), json!(2), json!(4)]);
    }

    #[test]
    fn test_placement_combinations() {
        assert_eq!(placement_combinations().len(), 27);
    }
}
