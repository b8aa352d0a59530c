//! Bridge construction for one process of a run.
//!
//! The [`WiringPlan`] numbers every connection of the graph in a canonical
//! order (receiving node id, then input order) computed from the graph
//! description. Parent and worker processes derive the same plan from the
//! same description, so a connection index in a `Data` frame means the same
//! edge on both sides of a pipe.

use crate::error::{FlowError, Result};
use crate::pipeline::bridge::{
    local_bridge, BridgeKind, BridgeMessage, BridgeReceiver, BridgeSender, RemoteOutlet,
};
use crate::pipeline::description::GraphDescription;
use crate::pipeline::placement::ExecContext;
use crossbeam_channel::Sender;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

/// One numbered edge of the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedConnection {
    pub index: usize,
    pub emitter: String,
    pub emit_port: String,
    pub emit_ctx: ExecContext,
    pub receiver: String,
    pub recv_port: String,
    pub recv_ctx: ExecContext,
}

impl PlannedConnection {
    pub fn kind(&self) -> BridgeKind {
        BridgeKind::between(&self.emit_ctx, &self.recv_ctx)
    }
}

/// Canonical connection table of a graph.
#[derive(Debug, Clone, Default)]
pub struct WiringPlan {
    connections: Vec<PlannedConnection>,
}

impl WiringPlan {
    pub fn from_description(desc: &GraphDescription) -> Result<Self> {
        let context_of = |sid: &str| {
            desc.nodes
                .get(sid)
                .map(|node| node.placement.context())
                .ok_or_else(|| FlowError::Worker(format!("unknown node '{}' in wiring", sid)))
        };

        let mut connections = Vec::new();
        for (sid, node) in &desc.nodes {
            let recv_ctx = node.placement.context();
            for input in &node.inputs {
                connections.push(PlannedConnection {
                    index: connections.len(),
                    emitter: input.emitting_node.clone(),
                    emit_port: input.emitting_channel.clone(),
                    emit_ctx: context_of(&input.emitting_node)?,
                    receiver: sid.clone(),
                    recv_port: input.receiving_channel.clone(),
                    recv_ctx: recv_ctx.clone(),
                });
            }
        }
        Ok(Self { connections })
    }

    pub fn connections(&self) -> &[PlannedConnection] {
        &self.connections
    }

    /// Process groups that host at least one node of the plan's graph.
    pub fn process_groups(desc: &GraphDescription) -> BTreeSet<String> {
        desc.nodes
            .values()
            .filter_map(|node| node.placement.context().process)
            .collect()
    }
}

/// Incoming edge of a node.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub connection: usize,
    pub port: String,
    pub rx: BridgeReceiver,
}

/// Outgoing edge of a node.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub connection: usize,
    pub port: String,
    pub tx: BridgeSender,
}

/// All bridge ends of one node.
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    pub inbound: Vec<Inbound>,
    pub outbound: Vec<Outbound>,
}

/// Where a `Data` frame for a given connection goes next.
#[derive(Clone)]
enum Route {
    /// A receiver in this process.
    Local(Sender<BridgeMessage>),
    /// Another worker process, reached through its pipe.
    Forward(RemoteOutlet),
}

/// Delivers frames arriving from other processes.
#[derive(Default)]
pub struct Router {
    routes: HashMap<usize, Route>,
}

impl Router {
    /// Returns `false` if the connection is unknown here or its receiver is gone.
    pub fn route(&self, connection: usize, message: BridgeMessage) -> bool {
        match self.routes.get(&connection) {
            Some(Route::Local(tx)) => tx.send(message).is_ok(),
            Some(Route::Forward(outlet)) => outlet(connection, message),
            None => {
                tracing::warn!("No route for connection #{}", connection);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Bridges of one process: per-node endpoints plus the frame router.
pub struct Wiring {
    endpoints: Mutex<BTreeMap<String, Endpoints>>,
    router: Router,
}

impl Wiring {
    /// Build the bridges living in process `here` (`None` for the caller's
    /// process). `outlet_for(dest)` returns the outlet towards the process
    /// hosting `dest`; worker processes always answer with their parent pipe.
    pub fn build(
        plan: &WiringPlan,
        here: Option<&str>,
        outlet_for: impl Fn(Option<&str>) -> Option<RemoteOutlet>,
    ) -> Result<Self> {
        let mut endpoints: BTreeMap<String, Endpoints> = BTreeMap::new();
        let mut routes = HashMap::new();

        let outlet = |dest: Option<&str>| {
            outlet_for(dest).ok_or_else(|| {
                FlowError::Worker(format!("no pipe towards process {:?}", dest))
            })
        };

        for conn in plan.connections() {
            let emit_here = conn.emit_ctx.process.as_deref() == here;
            let recv_here = conn.recv_ctx.process.as_deref() == here;

            match (emit_here, recv_here) {
                (true, true) => {
                    let (tx, rx) = local_bridge(conn.kind());
                    endpoints
                        .entry(conn.emitter.clone())
                        .or_default()
                        .outbound
                        .push(Outbound {
                            connection: conn.index,
                            port: conn.emit_port.clone(),
                            tx,
                        });
                    endpoints
                        .entry(conn.receiver.clone())
                        .or_default()
                        .inbound
                        .push(Inbound {
                            connection: conn.index,
                            port: conn.recv_port.clone(),
                            rx,
                        });
                }
                (true, false) => {
                    let tx = BridgeSender::Remote {
                        connection: conn.index,
                        outlet: outlet(conn.recv_ctx.process.as_deref())?,
                    };
                    endpoints
                        .entry(conn.emitter.clone())
                        .or_default()
                        .outbound
                        .push(Outbound {
                            connection: conn.index,
                            port: conn.emit_port.clone(),
                            tx,
                        });
                }
                (false, true) => {
                    let (tx, rx) = crossbeam_channel::unbounded();
                    routes.insert(conn.index, Route::Local(tx));
                    endpoints
                        .entry(conn.receiver.clone())
                        .or_default()
                        .inbound
                        .push(Inbound {
                            connection: conn.index,
                            port: conn.recv_port.clone(),
                            rx: BridgeReceiver::Channel(rx),
                        });
                }
                (false, false) => {
                    // Worker to worker traffic passes through the root.
                    if here.is_none() {
                        routes.insert(
                            conn.index,
                            Route::Forward(outlet(conn.recv_ctx.process.as_deref())?),
                        );
                    }
                }
            }
        }

        Ok(Self {
            endpoints: Mutex::new(endpoints),
            router: Router { routes },
        })
    }

    /// Endpoints of the node with string identifier `node`. Empty when the
    /// node has no edges in this process.
    pub fn endpoints(&self, node: &str) -> Endpoints {
        self.lock().get(node).cloned().unwrap_or_default()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Endpoints>> {
        self.endpoints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
