//! Terminal level of the processor tree: cooperative scheduling.
//!
//! A `LocalUnit` owns one [`NodeRuntime`] per node and drives them
//! round-robin from a single driver thread. Each runtime is a small state
//! machine whose `step()` reports whether it made progress; a round without
//! progress puts the driver to sleep for the poll interval.

use crate::error::{FlowError, Result};
use crate::pipeline::bridge::BridgeMessage;
use crate::pipeline::clock::{Clock, ClockReporter};
use crate::pipeline::node::{lock_node, lock_node_within, Emit, Inputs, SharedNode};
use crate::pipeline::port::Ports;
use crate::processor::wiring::{Endpoints, Inbound, Outbound};
use crate::processor::{ExecutionUnit, PlacedNode, RunContext, UnitState};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// ── Node runtime ──

struct InboundState {
    edge: Inbound,
    closed: bool,
}

/// Scheduler-side state of one node.
pub struct NodeRuntime {
    key: String,
    node: SharedNode,
    ports_out: Ports,
    /// Connected input keys. An optional port counts once it is connected.
    required: Vec<String>,
    inbound: Vec<InboundState>,
    outbound: Vec<Outbound>,
    received: BTreeMap<u64, BTreeMap<String, Value>>,
    clock: Clock,
    reporter: ClockReporter,
    finished: bool,
}

impl NodeRuntime {
    pub fn new(
        item: &PlacedNode,
        endpoints: Endpoints,
        reporter: ClockReporter,
        timed: bool,
    ) -> Self {
        let ports_out = lock_node(&item.handle).ports_out();

        let mut required: Vec<String> = endpoints
            .inbound
            .iter()
            .map(|edge| edge.port.clone())
            .collect();
        required.sort();
        required.dedup();

        Self {
            key: item.key.clone(),
            node: Arc::clone(&item.handle),
            ports_out,
            required,
            inbound: endpoints
                .inbound
                .into_iter()
                .map(|edge| InboundState {
                    edge,
                    closed: false,
                })
                .collect(),
            outbound: endpoints.outbound,
            received: BTreeMap::new(),
            clock: Clock::new(timed),
            reporter,
            finished: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn ctr(&self) -> u64 {
        self.clock.ctr()
    }

    pub fn is_source(&self) -> bool {
        self.inbound.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Announce the node to the clock registry at tick 0.
    pub fn announce(&self) {
        self.reporter.register(&self.key, self.clock.ctr());
    }

    /// One scheduling turn. Returns `true` if anything happened.
    pub fn step(&mut self) -> bool {
        if self.finished {
            return false;
        }
        if self.is_source() {
            return self.step_source();
        }

        let mut progress = self.drain_inbound();
        progress |= self.process_ready();

        if self.inbound.iter().all(|edge| edge.closed) {
            if !self.received.is_empty() {
                tracing::debug!(
                    "{}: dropping {} incomplete tick(s) at end of input",
                    self.key,
                    self.received.len()
                );
                self.received.clear();
            }
            self.finish();
            progress = true;
        }
        progress
    }

    fn step_source(&mut self) -> bool {
        let mut out = Emit::new();
        let more = match lock_node(&self.node).produce(&mut out) {
            Ok(more) => more,
            Err(e) => {
                tracing::error!("{}: produce failed: {}", self.key, e);
                false
            }
        };

        if !out.is_empty() {
            let ctr = self.clock.ctr();
            self.deliver(ctr, &mut out);
            self.clock.tick();
            self.reporter.register(&self.key, self.clock.ctr());
        }
        if !more {
            self.finish();
        }
        true
    }

    fn drain_inbound(&mut self) -> bool {
        let mut progress = false;
        for state in &mut self.inbound {
            for message in state.edge.rx.drain() {
                progress = true;
                match message {
                    BridgeMessage::Data { ctr, payload } => {
                        self.received
                            .entry(ctr)
                            .or_default()
                            .insert(state.edge.port.clone(), payload);
                    }
                    BridgeMessage::Closed => state.closed = true,
                }
            }
        }
        progress
    }

    /// Process every complete tick in ascending order. Incomplete ticks below
    /// a processed one are stale and dropped.
    fn process_ready(&mut self) -> bool {
        let mut progress = false;
        let ctrs: Vec<u64> = self.received.keys().copied().collect();
        for ctr in ctrs {
            let Some(values) = self.received.get(&ctr) else {
                continue;
            };
            let inputs = Inputs::new(values.clone(), self.required.clone());

            let mut out = Emit::new();
            {
                let mut node = lock_node(&self.node);
                if !node.should_process(&inputs) {
                    continue;
                }
                if let Err(e) = node.process(ctr, &inputs, &mut out) {
                    tracing::error!("{}: process failed at tick {}: {}", self.key, ctr, e);
                }
            }

            self.received = self.received.split_off(&(ctr + 1));
            self.deliver(ctr, &mut out);
            self.clock.advance_to(ctr + 1);
            self.reporter.register(&self.key, self.clock.ctr());
            progress = true;
        }
        progress
    }

    fn deliver(&self, ctr: u64, out: &mut Emit) {
        for (port, value) in out.take() {
            let Some(spec) = self.ports_out.get(&port) else {
                tracing::error!(
                    "{}: emitted on unknown output port '{}' (available: {})",
                    self.key,
                    port,
                    self.ports_out.describe()
                );
                continue;
            };
            if let Err(reason) = spec.check_value(&value) {
                tracing::warn!(
                    "{}: dropped value {} on '{}': {}",
                    self.key,
                    value,
                    port,
                    reason
                );
                continue;
            }
            for edge in self.outbound.iter().filter(|edge| edge.port == port) {
                let delivered = edge.tx.send(BridgeMessage::Data {
                    ctr,
                    payload: value.clone(),
                });
                if !delivered {
                    tracing::trace!("{}: receiver of #{} is gone", self.key, edge.connection);
                }
            }
        }
    }

    /// Close every outbound edge and tell the node it is done.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        for edge in &self.outbound {
            edge.tx.send(BridgeMessage::Closed);
        }
        lock_node(&self.node).stop();
        tracing::debug!("{} finished at tick {}", self.key, self.clock.ctr());
    }

    fn close(&mut self) {
        lock_node(&self.node).close();
    }
}

/// Round-robin driver loop. Returns the runtimes so they can be closed.
fn drive(mut runtimes: Vec<NodeRuntime>, stop: Arc<AtomicBool>, poll: Duration) -> Vec<NodeRuntime> {
    loop {
        if stop.load(Ordering::Acquire) {
            runtimes.iter_mut().for_each(NodeRuntime::finish);
            break;
        }

        let mut progress = false;
        for runtime in &mut runtimes {
            progress |= runtime.step();
        }

        if runtimes.iter().all(NodeRuntime::is_finished) {
            break;
        }
        if !progress {
            std::thread::sleep(poll);
        }
    }
    runtimes
}

// ── Local unit ──

/// Cooperative execution unit, the leaf of every processor tree.
pub struct LocalUnit {
    label: String,
    items: Vec<PlacedNode>,
    ctx: Arc<RunContext>,
    state: UnitState,
    runtimes: Vec<NodeRuntime>,
    stop: Arc<AtomicBool>,
    driver: Option<JoinHandle<Vec<NodeRuntime>>>,
    finished: bool,
}

impl LocalUnit {
    pub fn new(label: impl Into<String>, items: Vec<PlacedNode>, ctx: Arc<RunContext>) -> Self {
        Self {
            label: label.into(),
            items,
            ctx,
            state: UnitState::Idle,
            runtimes: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
            driver: None,
            finished: false,
        }
    }

    pub fn items(&self) -> &[PlacedNode] {
        &self.items
    }

    fn invalid(&self, operation: &'static str) -> FlowError {
        FlowError::InvalidState {
            unit: self.label.clone(),
            state: self.state.to_string(),
            operation,
        }
    }

    /// Ready one node. A node still locked by an abandoned unit is given up
    /// on after the readiness timeout.
    fn ready_node(&self, item: &PlacedNode) -> std::result::Result<(), String> {
        let Some(mut node) = lock_node_within(&item.handle, self.ctx.config.ready_timeout()) else {
            return Err("node is still held by an abandoned unit".to_string());
        };
        node.ready().map_err(|e| e.to_string())
    }

    /// Wait for the driver thread and take the runtimes back.
    fn reap(&mut self, timeout: Duration) -> bool {
        let Some(driver) = self.driver.take() else {
            return true;
        };

        let deadline = Instant::now() + timeout;
        while !driver.is_finished() {
            if Instant::now() >= deadline {
                self.driver = Some(driver);
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        match driver.join() {
            Ok(runtimes) => self.runtimes = runtimes,
            Err(_) => tracing::error!("{}: driver thread panicked", self.label),
        }
        self.finished = true;
        true
    }
}

impl ExecutionUnit for LocalUnit {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn state(&self) -> UnitState {
        self.state
    }

    fn setup(&mut self) -> Result<()> {
        if !matches!(self.state, UnitState::Idle | UnitState::Closed) {
            return Err(self.invalid("setup"));
        }
        self.state = UnitState::Readying;
        self.finished = false;
        self.stop.store(false, Ordering::Release);

        let mut runtimes: Vec<NodeRuntime> = Vec::with_capacity(self.items.len());
        for item in &self.items {
            if let Err(reason) = self.ready_node(item) {
                for runtime in &mut runtimes {
                    runtime.close();
                }
                self.state = UnitState::Closed;
                return Err(FlowError::SetupFailed {
                    unit: self.label.clone(),
                    reason: format!("{}: {}", item.key, reason),
                });
            }
            let runtime = NodeRuntime::new(
                item,
                self.ctx.wiring.endpoints(&item.key),
                self.ctx.clocks.clone(),
                self.ctx.config.clock_timestamps,
            );
            runtime.announce();
            runtimes.push(runtime);
        }

        tracing::debug!("{} ready with {} node(s)", self.label, runtimes.len());
        self.runtimes = runtimes;
        self.state = UnitState::Ready;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.state != UnitState::Ready {
            return Err(self.invalid("start"));
        }

        let runtimes = std::mem::take(&mut self.runtimes);
        let stop = Arc::clone(&self.stop);
        let poll = self.ctx.config.poll_interval();
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());

        let driver = std::thread::Builder::new()
            .name(format!("{}-driver", self.label))
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || drive(runtimes, stop, poll))
            })?;

        self.driver = Some(driver);
        self.state = UnitState::Running;
        Ok(())
    }

    fn join(&mut self, timeout: Duration) -> bool {
        self.reap(timeout)
    }

    fn stop(&mut self, timeout: Duration) {
        if self.state == UnitState::Running {
            self.state = UnitState::Stopping;
        }
        self.stop.store(true, Ordering::Release);
        if !self.reap(timeout) {
            tracing::warn!(
                "{} did not stop within {:?}; cooperative units cannot be forced",
                self.label,
                timeout
            );
        }
    }

    fn close(&mut self, timeout: Duration) {
        if self.state == UnitState::Closed {
            return;
        }
        self.state = UnitState::Closing;
        self.stop.store(true, Ordering::Release);

        if self.reap(timeout) {
            for runtime in &mut self.runtimes {
                runtime.close();
            }
        } else {
            tracing::warn!("Abandoning driver of {} after {:?}", self.label, timeout);
            self.driver = None;
        }

        self.runtimes.clear();
        self.state = UnitState::Closed;
        tracing::debug!("{} closed", self.label);
    }

    fn is_finished(&self) -> bool {
        self.finished || self.driver.as_ref().is_some_and(|d| d.is_finished())
    }

    fn can_force_stop(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::logging::LogSink;
    use crate::pipeline::clock::ClockRegistry;
    use crate::pipeline::graph::Graph;
    use crate::pipeline::nodes::{Collect, Counter, Merge, Square};
    use crate::pipeline::placement::Placement;
    use crate::processor::wiring::{Wiring, WiringPlan};
    use crate::pipeline::error::{PipelineError, PipelineResult};
    use crate::pipeline::node::Node;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    /// Counts `close()` calls.
    struct Closes(Arc<AtomicUsize>);

    impl Node for Closes {
        fn class(&self) -> &'static str {
            "Closes"
        }

        fn ports_in(&self) -> Ports {
            Ports::empty()
        }

        fn ports_out(&self) -> Ports {
            Ports::empty()
        }

        fn close(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Refuses;

    impl Node for Refuses {
        fn class(&self) -> &'static str {
            "Refuses"
        }

        fn ports_in(&self) -> Ports {
            Ports::empty()
        }

        fn ports_out(&self) -> Ports {
            Ports::empty()
        }

        fn ready(&mut self) -> PipelineResult<()> {
            Err(PipelineError::node("Refuses", "no"))
        }
    }

    fn context(graph: &Graph, clocks: ClockReporter) -> Arc<RunContext> {
        context_with(graph, clocks, SchedulerConfig::default())
    }

    fn context_with(graph: &Graph, clocks: ClockReporter, config: SchedulerConfig) -> Arc<RunContext> {
        let desc = graph.to_description().unwrap();
        let plan = WiringPlan::from_description(&desc).unwrap();
        let wiring = Wiring::build(&plan, None, |_| None).unwrap();
        Arc::new(RunContext::new(
            config,
            Arc::new(wiring),
            clocks,
            Arc::new(LogSink::new()),
        ))
    }

    fn items(graph: &Graph) -> Vec<PlacedNode> {
        graph
            .node_ids()
            .into_iter()
            .map(|id| PlacedNode::from_entry(graph.node(id).unwrap()))
            .collect()
    }

    #[test]
    fn test_square_chain() {
        let mut g = Graph::new();
        let collect = Collect::new();
        let buffer = collect.buffer();
        let a = g.add_node("A", Counter::new(0, 10), Placement::Local).unwrap();
        let b = g.add_node("B", Square::new(), Placement::Local).unwrap();
        let c = g.add_node("C", collect, Placement::Local).unwrap();
        g.add_input(b, a, "data", "data").unwrap();
        g.add_input(c, b, "data", "data").unwrap();

        let mut registry = ClockRegistry::new(false);
        let ctx = context(&g, registry.reporter());
        let mut unit = LocalUnit::new("local", items(&g), ctx);
        unit.setup().unwrap();
        unit.start().unwrap();
        assert!(unit.join(Duration::from_secs(5)));
        unit.close(Duration::from_secs(1));

        let expected: Vec<Value> = (0..10).map(|i: i64| json!(i * i)).collect();
        assert_eq!(buffer.values(), expected);
        assert_eq!(unit.state(), UnitState::Closed);
        assert!(registry.all_at(10).unwrap());
    }

    #[test]
    fn test_merge_waits_for_both_inputs() {
        let mut g = Graph::new();
        let collect = Collect::new();
        let buffer = collect.buffer();
        let a = g.add_node("A", Counter::new(0, 3), Placement::Local).unwrap();
        let b = g.add_node("B", Counter::new(10, 3), Placement::Local).unwrap();
        let m = g.add_node("M", Merge::new(), Placement::Local).unwrap();
        let c = g.add_node("C", collect, Placement::Local).unwrap();
        g.add_input(m, a, "data", "left").unwrap();
        g.add_input(m, b, "data", "right").unwrap();
        g.add_input(c, m, "sum", "data").unwrap();

        let ctx = context(&g, ClockReporter::disabled());
        let mut unit = LocalUnit::new("local", items(&g), ctx);
        unit.setup().unwrap();
        unit.start().unwrap();
        assert!(unit.join(Duration::from_secs(5)));
        unit.close(Duration::from_secs(1));

        assert_eq!(buffer.values(), vec![json!(10), json!(12), json!(14)]);
    }

    #[test]
    fn test_reusable_after_close() {
        let mut g = Graph::new();
        let collect = Collect::new();
        let buffer = collect.buffer();
        let a = g.add_node("A", Counter::new(1, 2), Placement::Local).unwrap();
        let c = g.add_node("C", collect, Placement::Local).unwrap();
        g.add_input(c, a, "data", "data").unwrap();

        let ctx = context(&g, ClockReporter::disabled());
        let mut unit = LocalUnit::new("local", items(&g), ctx);
        for _ in 0..2 {
            unit.setup().unwrap();
            unit.start().unwrap();
            assert!(unit.join(Duration::from_secs(5)));
            unit.close(Duration::from_secs(1));
            assert_eq!(buffer.values(), vec![json!(1), json!(2)]);
        }
    }

    #[test]
    fn test_start_before_setup_is_rejected() {
        let g = Graph::new();
        let ctx = context(&g, ClockReporter::disabled());
        let mut unit = LocalUnit::new("local", Vec::new(), ctx);
        assert!(matches!(
            unit.start().unwrap_err(),
            FlowError::InvalidState { operation: "start", .. }
        ));
        assert!(!unit.can_force_stop());
    }

    #[test]
    fn test_stop_closes_outputs() {
        let mut g = Graph::new();
        let collect = Collect::new();
        let buffer = collect.buffer();
        let a = g
            .add_node("A", Counter::new(0, u64::MAX), Placement::Local)
            .unwrap();
        let c = g.add_node("C", collect, Placement::Local).unwrap();
        g.add_input(c, a, "data", "data").unwrap();

        let ctx = context(&g, ClockReporter::disabled());
        let mut unit = LocalUnit::new("local", items(&g), ctx);
        unit.setup().unwrap();
        unit.start().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!unit.is_finished());

        unit.stop(Duration::from_secs(2));
        assert!(unit.is_finished());
        unit.close(Duration::from_secs(1));
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_connected_optional_input_is_required() {
        let mut g = Graph::new();
        let a = g.add_node("A", Counter::new(0, 1), Placement::Local).unwrap();
        let b = g.add_node("B", Counter::new(0, 1), Placement::Local).unwrap();
        let m = g.add_node("M", Merge::new(), Placement::Local).unwrap();
        g.add_input(m, a, "data", "left").unwrap();

        let runtime_of_m = |g: &Graph| {
            let ctx = context(g, ClockReporter::disabled());
            let item = PlacedNode::from_entry(g.node(m).unwrap());
            NodeRuntime::new(&item, ctx.wiring.endpoints(&item.key), ClockReporter::disabled(), false)
        };
        assert_eq!(runtime_of_m(&g).required, vec!["left".to_string()]);

        g.add_input(m, b, "data", "right").unwrap();
        assert_eq!(
            runtime_of_m(&g).required,
            vec!["left".to_string(), "right".to_string()]
        );
    }

    #[test]
    fn test_failed_setup_closes_readied_nodes() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut g = Graph::new();
        g.add_node("A", Closes(Arc::clone(&closes)), Placement::Local).unwrap();
        g.add_node("B", Refuses, Placement::Local).unwrap();

        let ctx = context(&g, ClockReporter::disabled());
        let mut unit = LocalUnit::new("local", items(&g), ctx);
        assert!(matches!(
            unit.setup().unwrap_err(),
            FlowError::SetupFailed { ref reason, .. } if reason.starts_with("B [Refuses]")
        ));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(unit.state(), UnitState::Closed);

        unit.close(Duration::from_secs(1));
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_setup_gives_up_on_a_held_node() {
        let mut g = Graph::new();
        g.add_node("A", Counter::new(0, 1), Placement::Local).unwrap();
        let config = SchedulerConfig {
            ready_timeout_ms: 20,
            ..SchedulerConfig::default()
        };
        let ctx = context_with(&g, ClockReporter::disabled(), config);
        let items = items(&g);
        let handle = Arc::clone(&items[0].handle);
        let mut unit = LocalUnit::new("local", items, ctx);

        let held = lock_node(&handle);
        assert!(matches!(
            unit.setup().unwrap_err(),
            FlowError::SetupFailed { ref reason, .. } if reason.contains("abandoned")
        ));
        drop(held);

        unit.setup().unwrap();
        assert_eq!(unit.state(), UnitState::Ready);
        unit.close(Duration::from_secs(1));
    }
}
