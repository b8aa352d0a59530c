//! Root of the processor tree, owned by the caller.

use crate::config::SchedulerConfig;
use crate::error::{FlowError, Result};
use crate::logging::LogSink;
use crate::pipeline::bridge::RemoteOutlet;
use crate::pipeline::clock::ClockRegistry;
use crate::pipeline::description::GraphDescription;
use crate::pipeline::graph::Graph;
use crate::pipeline::placement::Level;
use crate::processor::protocol::ParentFrame;
use crate::processor::wiring::{Wiring, WiringPlan};
use crate::processor::{
    all_finished, close_units, group_factory, join_units, setup_units, start_units, stop_units,
    ExecutionUnit, PlacedNode, ProcessLink, RunContext, UnitState,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Runs one graph through the processor lifecycle.
///
/// The runner captures the graph's nodes, placements and edges when it is
/// created. Nodes placed in this process are driven through their shared
/// handles; process-placed nodes are rebuilt inside their worker from the
/// graph description.
///
/// ```ignore
/// let mut runner = Runner::new(&graph, SchedulerConfig::default())?;
/// let finished = runner.run(Some(Duration::from_secs(10)))?;
/// ```
pub struct Runner {
    items: Vec<PlacedNode>,
    description: GraphDescription,
    plan: WiringPlan,
    config: SchedulerConfig,
    log_sink: Arc<LogSink>,
    clocks: ClockRegistry,
    units: Vec<Box<dyn ExecutionUnit>>,
    state: UnitState,
}

impl Runner {
    /// Lines drained from workers are re-emitted through `tracing`.
    pub fn new(graph: &Graph, config: SchedulerConfig) -> Result<Self> {
        Self::with_log_sink(graph, config, Arc::new(LogSink::forward_to_tracing()))
    }

    /// Lines drained from workers go to `log_sink`.
    pub fn with_log_sink(
        graph: &Graph,
        config: SchedulerConfig,
        log_sink: Arc<LogSink>,
    ) -> Result<Self> {
        let description = graph.to_description()?;
        let plan = WiringPlan::from_description(&description)?;
        let items = graph
            .node_ids()
            .into_iter()
            .map(|id| Ok(PlacedNode::from_entry(graph.node(id)?)))
            .collect::<Result<Vec<_>>>()?;

        let mut clocks = ClockRegistry::new(config.clock_timestamps);
        if !config.track_clocks {
            clocks.set_passthrough();
        }

        Ok(Self {
            items,
            description,
            plan,
            config,
            log_sink,
            clocks,
            units: Vec::new(),
            state: UnitState::Idle,
        })
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The run's clock registry. Only readable from the thread that created
    /// the runner.
    pub fn clock_registry(&mut self) -> &mut ClockRegistry {
        &mut self.clocks
    }

    /// Labels of the top-level units, available after `setup()`.
    pub fn unit_labels(&self) -> Vec<String> {
        self.units.iter().map(|unit| unit.label()).collect()
    }

    fn invalid(&self, operation: &'static str) -> FlowError {
        FlowError::InvalidState {
            unit: "root".to_string(),
            state: self.state.to_string(),
            operation,
        }
    }

    fn context(&self) -> Result<Arc<RunContext>> {
        let links: HashMap<String, ProcessLink> = WiringPlan::process_groups(&self.description)
            .into_iter()
            .map(|group| (group, ProcessLink::new()))
            .collect();

        let wiring = Wiring::build(&self.plan, None, |dest| {
            let link = links.get(dest?)?;
            let tx = link.tx.clone();
            Some(Arc::new(move |connection, message| {
                tx.send(ParentFrame::Data {
                    connection,
                    message,
                })
                .is_ok()
            }) as RemoteOutlet)
        })?;

        Ok(Arc::new(
            RunContext::new(
                self.config.clone(),
                Arc::new(wiring),
                self.clocks.reporter(),
                Arc::clone(&self.log_sink),
            )
            .with_description(self.description.clone())
            .with_process_links(links),
        ))
    }

    /// Build the processor tree and bring every unit to ready.
    ///
    /// On failure the units built so far are kept; call `close()` before
    /// setting up again.
    pub fn setup(&mut self) -> Result<()> {
        if !matches!(self.state, UnitState::Idle | UnitState::Closed) {
            return Err(self.invalid("setup"));
        }
        self.clocks.clear()?;

        let ctx = self.context()?;
        self.units = group_factory(Level::Process, "root", self.items.clone(), &ctx);
        self.state = UnitState::Readying;
        tracing::info!(
            "Setting up {} node(s) in {} unit(s)",
            self.items.len(),
            self.units.len()
        );

        setup_units(
            &mut self.units,
            self.config.setup_failure,
            self.config.close_timeout(),
        )?;
        self.state = UnitState::Ready;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != UnitState::Ready {
            return Err(self.invalid("start"));
        }
        start_units(&mut self.units)?;
        self.state = UnitState::Running;
        Ok(())
    }

    /// Wait for every unit to finish naturally.
    pub fn join(&mut self, timeout: Duration) -> bool {
        join_units(&mut self.units, timeout)
    }

    pub fn stop(&mut self) {
        if self.state == UnitState::Running {
            self.state = UnitState::Stopping;
        }
        stop_units(&mut self.units, self.config.stop_timeout());
    }

    /// Tear the tree down. The runner can be set up again afterwards.
    pub fn close(&mut self) {
        if self.state == UnitState::Closed {
            return;
        }
        self.state = UnitState::Closing;
        close_units(&mut self.units, self.config.close_timeout());
        self.units.clear();
        self.state = UnitState::Closed;
        tracing::info!("Run closed");
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, UnitState::Running | UnitState::Stopping) && all_finished(&self.units)
    }

    /// Full lifecycle: setup, start, wait, stop if needed, close.
    /// Returns whether the graph finished on its own; `None` waits forever.
    pub fn run(&mut self, timeout: Option<Duration>) -> Result<bool> {
        if let Err(e) = self.setup() {
            self.close();
            return Err(e);
        }
        if let Err(e) = self.start() {
            self.close();
            return Err(e);
        }

        let finished = match timeout {
            Some(timeout) => self.join(timeout),
            None => {
                while !self.join(Duration::from_secs(1)) {}
                true
            }
        };
        if !finished {
            tracing::warn!("Graph did not finish within {:?}, stopping", timeout);
            self.stop();
        }
        self.close();
        Ok(finished)
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if !self.units.is_empty() {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::nodes::{Collect, Counter, Square};
    use crate::pipeline::placement::Placement;
    use serde_json::json;

    #[test]
    fn test_local_and_thread_run() {
        let mut g = Graph::new();
        let collect = Collect::new();
        let buffer = collect.buffer();
        let a = g.add_node("A", Counter::new(0, 5), Placement::Local).unwrap();
        let b = g.add_node("B", Square::new(), Placement::thread("dsp")).unwrap();
        let c = g.add_node("C", collect, Placement::Local).unwrap();
        g.add_input(b, a, "data", "data").unwrap();
        g.add_input(c, b, "data", "data").unwrap();

        let mut runner = Runner::new(&g, SchedulerConfig::default()).unwrap();
        assert!(runner.run(Some(Duration::from_secs(10))).unwrap());
        assert_eq!(
            buffer.values(),
            vec![json!(0), json!(1), json!(4), json!(9), json!(16)]
        );
        assert_eq!(runner.state(), UnitState::Closed);

        assert!(runner.clock_registry().all_at(5).unwrap());
        assert_eq!(runner.clock_registry().get("B [Square]").unwrap(), Some(5));
    }

    #[test]
    fn test_start_requires_setup() {
        let g = Graph::new();
        let mut runner = Runner::new(&g, SchedulerConfig::default()).unwrap();
        assert!(matches!(
            runner.start().unwrap_err(),
            FlowError::InvalidState { operation: "start", .. }
        ));
    }

    #[test]
    fn test_untracked_clocks() {
        let mut g = Graph::new();
        g.add_node("A", Counter::new(0, 3), Placement::Local).unwrap();
        let config = SchedulerConfig {
            track_clocks: false,
            ..Default::default()
        };
        let mut runner = Runner::new(&g, config).unwrap();
        assert!(runner.run(Some(Duration::from_secs(5))).unwrap());
        assert!(runner.clock_registry().read_state().unwrap().is_empty());
    }
}
