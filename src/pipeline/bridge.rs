//! Data hand-off between connected nodes.
//!
//! Which bridge an edge gets depends only on the isolation contexts of its two
//! ends:
//!
//! - **Direct** — same context. A shared queue, no wake-up; the cooperative
//!   driver sees the value on its next turn.
//! - **Channel** — same process, different thread. A crossbeam channel.
//! - **Remote** — different process. Frames over the worker pipes; the
//!   receiving process feeds a local channel from its router.
//!
//! Every payload carries the emitter's clock value, and each bridge preserves
//! send order, so a receiver sees one source's values in emission order.

use crate::pipeline::placement::ExecContext;
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

/// What travels over a bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeMessage {
    Data { ctr: u64, payload: Value },
    /// The emitter will send nothing more on this edge.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeKind {
    Direct,
    Channel,
    Remote,
}

impl BridgeKind {
    pub fn between(emitter: &ExecContext, receiver: &ExecContext) -> Self {
        if emitter == receiver {
            BridgeKind::Direct
        } else if emitter.same_process(receiver) {
            BridgeKind::Channel
        } else {
            BridgeKind::Remote
        }
    }
}

/// Delivers a message for connection `index` to another process.
/// Returns `false` once the other side is gone.
pub type RemoteOutlet = Arc<dyn Fn(usize, BridgeMessage) -> bool + Send + Sync>;

pub type DirectQueue = Arc<Mutex<VecDeque<BridgeMessage>>>;

/// Emitting end of a bridge.
#[derive(Clone)]
pub enum BridgeSender {
    Direct(DirectQueue),
    Channel(Sender<BridgeMessage>),
    Remote {
        connection: usize,
        outlet: RemoteOutlet,
    },
}

impl BridgeSender {
    pub fn send(&self, message: BridgeMessage) -> bool {
        match self {
            BridgeSender::Direct(queue) => {
                queue
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push_back(message);
                true
            }
            BridgeSender::Channel(tx) => tx.send(message).is_ok(),
            BridgeSender::Remote { connection, outlet } => outlet(*connection, message),
        }
    }

    pub fn kind(&self) -> BridgeKind {
        match self {
            BridgeSender::Direct(_) => BridgeKind::Direct,
            BridgeSender::Channel(_) => BridgeKind::Channel,
            BridgeSender::Remote { .. } => BridgeKind::Remote,
        }
    }
}

impl fmt::Debug for BridgeSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeSender::Remote { connection, .. } => {
                write!(f, "BridgeSender::Remote(#{})", connection)
            }
            other => write!(f, "BridgeSender::{:?}", other.kind()),
        }
    }
}

/// Receiving end of a bridge, drained actively by the receiver.
#[derive(Debug, Clone)]
pub enum BridgeReceiver {
    Direct(DirectQueue),
    Channel(Receiver<BridgeMessage>),
}

impl BridgeReceiver {
    /// Everything currently buffered, in send order.
    pub fn drain(&self) -> Vec<BridgeMessage> {
        match self {
            BridgeReceiver::Direct(queue) => queue
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .drain(..)
                .collect(),
            BridgeReceiver::Channel(rx) => rx.try_iter().collect(),
        }
    }
}

/// A connected sender/receiver pair for an in-process edge.
pub fn local_bridge(kind: BridgeKind) -> (BridgeSender, BridgeReceiver) {
    match kind {
        BridgeKind::Direct => {
            let queue: DirectQueue = Arc::default();
            (
                BridgeSender::Direct(Arc::clone(&queue)),
                BridgeReceiver::Direct(queue),
            )
        }
        BridgeKind::Channel | BridgeKind::Remote => {
            let (tx, rx) = crossbeam_channel::unbounded();
            (BridgeSender::Channel(tx), BridgeReceiver::Channel(rx))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::placement::Placement;
    use serde_json::json;

    #[test]
    fn test_kind_from_contexts() {
        let local = Placement::Local.context();
        let thread = Placement::thread("t").context();
        let process = Placement::process("p").context();
        assert_eq!(BridgeKind::between(&local, &local), BridgeKind::Direct);
        assert_eq!(BridgeKind::between(&local, &thread), BridgeKind::Channel);
        assert_eq!(BridgeKind::between(&thread, &process), BridgeKind::Remote);
        assert_eq!(BridgeKind::between(&process, &process), BridgeKind::Direct);
    }

    #[test]
    fn test_bridges_preserve_order() {
        for kind in [BridgeKind::Direct, BridgeKind::Channel] {
            let (tx, rx) = local_bridge(kind);
            for ctr in 0..5 {
                assert!(tx.send(BridgeMessage::Data {
                    ctr,
                    payload: json!(ctr * 10),
                }));
            }
            tx.send(BridgeMessage::Closed);
            let got = rx.drain();
            assert_eq!(got.len(), 6);
            assert_eq!(
                got[2],
                BridgeMessage::Data {
                    ctr: 2,
                    payload: json!(20)
                }
            );
            assert_eq!(got[5], BridgeMessage::Closed);
            assert!(rx.drain().is_empty());
        }
    }

    #[test]
    fn test_remote_sender_uses_outlet() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let outlet: RemoteOutlet = Arc::new(move |connection, message| {
            sink.lock().unwrap().push((connection, message));
            true
        });
        let tx = BridgeSender::Remote {
            connection: 7,
            outlet,
        };
        assert!(tx.send(BridgeMessage::Closed));
        assert_eq!(seen.lock().unwrap()[0], (7, BridgeMessage::Closed));
    }

    #[test]
    fn test_message_wire_shape() {
        let json = serde_json::to_string(&BridgeMessage::Data {
            ctr: 3,
            payload: json!(9),
        })
        .unwrap();
        assert_eq!(json, r#"{"kind":"data","ctr":3,"payload":9}"#);
    }
}
