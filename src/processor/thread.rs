//! Thread isolation: the worker is a dedicated OS thread in this process.

use crate::error::Result;
use crate::logging::ForwardLayer;
use crate::pipeline::placement::Level;
use crate::processor::entry::{child_entrypoint, SharedLink};
use crate::processor::events::{SyncPrimitives, UnitEvents};
use crate::processor::isolation::{Isolation, WorkerJob};
use crate::processor::RunContext;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing_subscriber::layer::SubscriberExt;

/// Marks the worker finished however its body ends, panics included.
struct FinishOnDrop(Arc<UnitEvents>);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.update(|f| f.finished = true);
    }
}

pub struct ThreadIsolation;

impl Isolation for ThreadIsolation {
    type Worker = JoinHandle<()>;

    const LEVEL: Level = Level::Thread;

    const CAN_FORCE_STOP: bool = false;

    fn make_sync_primitives(_ctx: &RunContext, _key: &str) -> Result<SyncPrimitives> {
        Ok(SyncPrimitives::in_process())
    }

    fn make_worker(job: WorkerJob) -> Result<Self::Worker> {
        let WorkerJob {
            label,
            items,
            ctx,
            sync,
            log_tx,
            ..
        } = job;
        let next = Self::LEVEL.successor().unwrap_or(Level::Local);

        let handle = std::thread::Builder::new()
            .name(label.clone())
            .spawn(move || {
                let _finished = FinishOnDrop(Arc::clone(&sync.events));
                let subscriber = tracing_subscriber::registry()
                    .with(ctx.config.level_filter())
                    .with(ForwardLayer::new(log_tx, label.clone()));
                let dispatch = tracing::Dispatch::new(subscriber);

                tracing::dispatcher::with_default(&dispatch, || {
                    tracing::debug!("Worker thread {} started", label);
                    let link = SharedLink(Arc::clone(&sync.events));
                    child_entrypoint(next, &label, items, &ctx, &link);
                    tracing::debug!("Worker thread {} exiting", label);
                });
            })?;
        Ok(handle)
    }

    fn kill_worker(_worker: &mut Self::Worker) -> bool {
        false
    }

    fn reap_worker(worker: Self::Worker) {
        if worker.join().is_err() {
            tracing::error!("Worker thread panicked");
        }
    }
}
