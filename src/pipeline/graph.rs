//! Graph model: an arena of nodes and the symmetric edge lists between them.
//!
//! Every connection is stored twice, in the receiver's `input_connections` and
//! in the emitter's `output_connections`. All mutations keep the two lists in
//! step. Removed nodes leave an empty slot so `NodeId`s stay stable.

use crate::pipeline::connection::Connection;
use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::id::NodeId;
use crate::pipeline::node::{lock_node, share, Node, SharedNode};
use crate::pipeline::placement::Placement;
use crate::pipeline::port::Ports;
use std::collections::{HashSet, VecDeque};

/// Format the string identifier of a node: `"{name} [{class}]"`.
pub fn string_id(name: &str, class: &str) -> String {
    format!("{} [{}]", name, class)
}

/// A node slot in the graph arena.
pub struct NodeEntry {
    name: String,
    class: &'static str,
    placement: Placement,
    ports_in: Ports,
    ports_out: Ports,
    input_connections: Vec<Connection>,
    output_connections: Vec<Connection>,
    handle: SharedNode,
}

impl NodeEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class(&self) -> &'static str {
        self.class
    }

    pub fn string_id(&self) -> String {
        string_id(&self.name, self.class)
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn ports_in(&self) -> &Ports {
        &self.ports_in
    }

    pub fn ports_out(&self) -> &Ports {
        &self.ports_out
    }

    pub fn input_connections(&self) -> &[Connection] {
        &self.input_connections
    }

    pub fn output_connections(&self) -> &[Connection] {
        &self.output_connections
    }

    pub fn handle(&self) -> &SharedNode {
        &self.handle
    }
}

impl std::fmt::Debug for NodeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeEntry")
            .field("name", &self.name)
            .field("class", &self.class)
            .field("placement", &self.placement)
            .field("inputs", &self.input_connections.len())
            .field("outputs", &self.output_connections.len())
            .finish()
    }
}

/// Directed graph of nodes.
#[derive(Default)]
pub struct Graph {
    nodes: Vec<Option<NodeEntry>>,
    /// Classes whose port collections have already been validated.
    validated: HashSet<&'static str>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Nodes ──

    pub fn add_node<N: Node + 'static>(
        &mut self,
        name: impl Into<String>,
        node: N,
        placement: Placement,
    ) -> PipelineResult<NodeId> {
        self.add_boxed_node(name, Box::new(node), placement)
    }

    pub fn add_boxed_node(
        &mut self,
        name: impl Into<String>,
        node: Box<dyn Node>,
        placement: Placement,
    ) -> PipelineResult<NodeId> {
        let name = name.into();
        let class = node.class();
        let ports_in = node.ports_in();
        let ports_out = node.ports_out();

        if !self.validated.contains(class) {
            ports_in.validate(&format!("{} inputs", class))?;
            ports_out.validate(&format!("{} outputs", class))?;
            self.validated.insert(class);
        }

        let sid = string_id(&name, class);
        if self.find(&sid).is_some() {
            return Err(PipelineError::DuplicateNodeId(sid));
        }

        let id = NodeId(self.nodes.len() as u32);
        tracing::debug!("Added node {} as {:?} ({})", sid, id, placement);
        self.nodes.push(Some(NodeEntry {
            name,
            class,
            placement,
            ports_in,
            ports_out,
            input_connections: Vec::new(),
            output_connections: Vec::new(),
            handle: share(node),
        }));
        Ok(id)
    }

    /// Remove a node together with every edge touching it.
    pub fn remove_node(&mut self, id: NodeId) -> PipelineResult<()> {
        self.remove_all_inputs(id)?;
        loop {
            let next = self.node(id)?.output_connections.first().cloned();
            let Some(conn) = next else { break };
            self.remove_input_by_connection(&conn)?;
        }
        let sid = self.string_id(id)?;
        self.nodes[id.index()] = None;
        tracing::debug!("Removed node {}", sid);
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> PipelineResult<&NodeEntry> {
        self.nodes
            .get(id.index())
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| PipelineError::UnknownNode(id.to_string()))
    }

    fn node_mut(&mut self, id: NodeId) -> PipelineResult<&mut NodeEntry> {
        self.nodes
            .get_mut(id.index())
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| PipelineError::UnknownNode(id.to_string()))
    }

    /// Ids of all live nodes, in insertion order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .map(|(idx, _)| NodeId(idx as u32))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look a node up by its string identifier.
    pub fn find(&self, string_id: &str) -> Option<NodeId> {
        self.nodes.iter().enumerate().find_map(|(idx, slot)| {
            slot.as_ref()
                .filter(|entry| entry.string_id() == string_id)
                .map(|_| NodeId(idx as u32))
        })
    }

    pub fn string_id(&self, id: NodeId) -> PipelineResult<String> {
        Ok(self.node(id)?.string_id())
    }

    pub fn handle(&self, id: NodeId) -> PipelineResult<SharedNode> {
        Ok(self.node(id)?.handle.clone())
    }

    // ── Edges ──

    /// Connect every input of `node` whose key matches an output key of `emitter`.
    pub fn connect_inputs_to(
        &mut self,
        node: NodeId,
        emitter: NodeId,
    ) -> PipelineResult<Vec<Connection>> {
        let emitter_outputs = self.node(emitter)?.ports_out.clone();
        let keys: Vec<String> = self
            .node(node)?
            .ports_in
            .iter()
            .filter(|port| emitter_outputs.contains(port.key()))
            .map(|port| port.key().to_string())
            .collect();

        keys.iter()
            .map(|key| self.add_input(node, emitter, key, key))
            .collect()
    }

    /// Add `emitter.emit_port → node.recv_port`.
    ///
    /// The counter is the number of similar connections already present,
    /// bumped past any counter still in use.
    pub fn add_input(
        &mut self,
        node: NodeId,
        emitter: NodeId,
        emit_port: &str,
        recv_port: &str,
    ) -> PipelineResult<Connection> {
        self.check_ports(node, emitter, emit_port, recv_port)?;

        let mut conn = Connection::new(emitter, emit_port, node, recv_port, 0);
        let inputs = &self.node(node)?.input_connections;
        conn.counter = inputs.iter().filter(|c| c.is_similar(&conn)).count() as u32;
        while inputs.contains(&conn) {
            conn.counter += 1;
        }

        self.push_connection(conn)
    }

    /// Add an edge with an explicit counter, as when rebuilding a graph from
    /// its description. Fails if the exact connection already exists.
    pub fn add_input_with_counter(
        &mut self,
        node: NodeId,
        emitter: NodeId,
        emit_port: &str,
        recv_port: &str,
        counter: u32,
    ) -> PipelineResult<Connection> {
        self.check_ports(node, emitter, emit_port, recv_port)?;
        let conn = Connection::new(emitter, emit_port, node, recv_port, counter);
        if self.node(node)?.input_connections.contains(&conn) {
            return Err(PipelineError::DuplicateConnection(self.describe(&conn)));
        }
        self.push_connection(conn)
    }

    fn check_ports(
        &self,
        node: NodeId,
        emitter: NodeId,
        emit_port: &str,
        recv_port: &str,
    ) -> PipelineResult<()> {
        let emit_entry = self.node(emitter)?;
        let recv_entry = self.node(node)?;

        let out = emit_entry
            .ports_out
            .get(emit_port)
            .ok_or_else(|| PipelineError::UnknownOutputPort {
                node: emit_entry.string_id(),
                port: emit_port.to_string(),
                available: emit_entry.ports_out.describe(),
            })?;
        let inp = recv_entry
            .ports_in
            .get(recv_port)
            .ok_or_else(|| PipelineError::UnknownInputPort {
                node: recv_entry.string_id(),
                port: recv_port.to_string(),
                available: recv_entry.ports_in.describe(),
            })?;

        if !out.can_input_to(inp) {
            tracing::warn!(
                "{}.{} ({}) may not be accepted by {}.{} ({})",
                emit_entry.string_id(),
                emit_port,
                out.kind().name(),
                recv_entry.string_id(),
                recv_port,
                inp.kind().name()
            );
        }
        Ok(())
    }

    fn push_connection(&mut self, conn: Connection) -> PipelineResult<Connection> {
        self.node_mut(conn.emit_node)?
            .output_connections
            .push(conn.clone());
        self.node_mut(conn.recv_node)?
            .input_connections
            .push(conn.clone());
        tracing::trace!("Connected {}", self.describe(&conn));
        Ok(conn)
    }

    /// Remove one connection; the emitter's side is removed first.
    pub fn remove_input_by_connection(&mut self, conn: &Connection) -> PipelineResult<()> {
        let recv_pos = self
            .node(conn.recv_node)?
            .input_connections
            .iter()
            .position(|c| c == conn)
            .ok_or_else(|| PipelineError::ConnectionNotFound(self.describe(conn)))?;

        let emitter = self.node_mut(conn.emit_node)?;
        if let Some(pos) = emitter.output_connections.iter().position(|c| c == conn) {
            emitter.output_connections.remove(pos);
        }
        self.node_mut(conn.recv_node)?
            .input_connections
            .remove(recv_pos);
        Ok(())
    }

    /// Remove every input connection of `node`, one at a time.
    pub fn remove_all_inputs(&mut self, node: NodeId) -> PipelineResult<()> {
        loop {
            let next = self.node(node)?.input_connections.first().cloned();
            let Some(conn) = next else { break };
            self.remove_input_by_connection(&conn)?;
        }
        Ok(())
    }

    /// Human readable form using string identifiers.
    pub fn describe(&self, conn: &Connection) -> String {
        let name = |id: NodeId| {
            self.string_id(id)
                .unwrap_or_else(|_| format!("{:?}", id))
        };
        format!(
            "{}.{} -> {}.{} #{}",
            name(conn.emit_node),
            conn.emit_port,
            name(conn.recv_node),
            conn.recv_port,
            conn.counter
        )
    }

    // ── Discovery ──

    /// Parents, children and the node itself, without duplicates.
    pub fn discover_neighbors(&self, id: NodeId) -> PipelineResult<Vec<NodeId>> {
        let entry = self.node(id)?;
        let mut out = Vec::new();
        let parents = entry.input_connections.iter().map(|c| c.emit_node);
        let children = entry.output_connections.iter().map(|c| c.recv_node);
        for n in parents.chain(children).chain(std::iter::once(id)) {
            if !out.contains(&n) {
                out.push(n);
            }
        }
        Ok(out)
    }

    /// The connected component containing `id`, ordered by the number of
    /// forward-reachable dependents and then by string identifier.
    pub fn discover_graph(&self, id: NodeId) -> PipelineResult<Vec<NodeId>> {
        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([id]);
        let mut component = Vec::new();
        self.node(id)?;
        seen[id.index()] = true;

        while let Some(current) = queue.pop_front() {
            component.push(current);
            for next in self.discover_neighbors(current)? {
                if !seen[next.index()] {
                    seen[next.index()] = true;
                    queue.push_back(next);
                }
            }
        }

        let mut keyed = component
            .into_iter()
            .map(|n| {
                Ok((
                    self.discover_output_deps(n)?.len(),
                    self.string_id(n)?,
                    n,
                ))
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        keyed.sort();
        Ok(keyed.into_iter().map(|(_, _, n)| n).collect())
    }

    /// Every node reachable downstream of `id`, including `id`.
    pub fn discover_output_deps(&self, id: NodeId) -> PipelineResult<Vec<NodeId>> {
        self.reach(id, |entry| {
            entry.output_connections.iter().map(|c| c.recv_node).collect()
        })
    }

    /// Every node reachable upstream of `id`, including `id`.
    pub fn discover_input_deps(&self, id: NodeId) -> PipelineResult<Vec<NodeId>> {
        self.reach(id, |entry| {
            entry.input_connections.iter().map(|c| c.emit_node).collect()
        })
    }

    fn reach(
        &self,
        id: NodeId,
        next: impl Fn(&NodeEntry) -> Vec<NodeId>,
    ) -> PipelineResult<Vec<NodeId>> {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![id];
        let mut out = Vec::new();

        while let Some(current) = stack.pop() {
            let idx = current.index();
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            out.push(current);
            stack.extend(next(self.node(current)?));
        }
        Ok(out)
    }

    /// `a` (transitively) consumes output of `b`. Reflexive.
    pub fn requires_input_of(&self, a: NodeId, b: NodeId) -> PipelineResult<bool> {
        Ok(self.discover_input_deps(a)?.contains(&b))
    }

    /// `a` (transitively) feeds `b`. Reflexive.
    pub fn provides_input_to(&self, a: NodeId, b: NodeId) -> PipelineResult<bool> {
        Ok(self.discover_output_deps(a)?.contains(&b))
    }

    /// Settings of a node, read through its shared handle.
    pub fn settings(&self, id: NodeId) -> PipelineResult<serde_json::Value> {
        let entry = self.node(id)?;
        Ok(lock_node(&entry.handle).settings())
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.nodes.iter().flatten())
            .finish()
    }
}
