//! Isolated execution units.
//!
//! Thread and process levels differ only in how they create their
//! synchronization primitives, log channel and worker, and in whether a stuck
//! worker can be killed. Those differences live behind [`Isolation`];
//! [`Processor`] implements the lifecycle once for both.

use crate::error::{FlowError, Result};
use crate::logging::{LogDrain, LogLine};
use crate::pipeline::placement::Level;
use crate::processor::events::{ControlSignal, SyncPrimitives};
use crate::processor::{ExecutionUnit, PlacedNode, RunContext, UnitState};
use crossbeam_channel::{Receiver, Sender};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Everything a new worker is handed.
pub struct WorkerJob {
    pub label: String,
    /// Grouping key of the unit (thread or process group name).
    pub key: String,
    pub items: Vec<PlacedNode>,
    pub ctx: Arc<RunContext>,
    pub sync: SyncPrimitives,
    pub log_tx: Sender<LogLine>,
}

/// Placement-specific behaviour of an isolated unit.
pub trait Isolation: Send + 'static {
    type Worker: Send;

    /// Tree level whose key selects this isolation.
    const LEVEL: Level;

    const CAN_FORCE_STOP: bool;

    fn make_sync_primitives(ctx: &RunContext, key: &str) -> Result<SyncPrimitives>;

    fn make_channel() -> (Sender<LogLine>, Receiver<LogLine>) {
        crossbeam_channel::unbounded()
    }

    fn make_worker(job: WorkerJob) -> Result<Self::Worker>;

    /// Terminate a worker; `false` when this isolation cannot.
    fn kill_worker(worker: &mut Self::Worker) -> bool;

    /// Release the handles of a worker that has exited.
    fn reap_worker(worker: Self::Worker);
}

/// Execution unit running its items in an isolated worker.
pub struct Processor<I: Isolation> {
    label: String,
    key: String,
    items: Vec<PlacedNode>,
    ctx: Arc<RunContext>,
    state: UnitState,
    sync: Option<SyncPrimitives>,
    worker: Option<I::Worker>,
    drain: Option<LogDrain>,
    _isolation: PhantomData<I>,
}

impl<I: Isolation> Processor<I> {
    pub fn new(
        label: impl Into<String>,
        key: impl Into<String>,
        items: Vec<PlacedNode>,
        ctx: Arc<RunContext>,
    ) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
            items,
            ctx,
            state: UnitState::Idle,
            sync: None,
            worker: None,
            drain: None,
            _isolation: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn invalid(&self, operation: &'static str) -> FlowError {
        FlowError::InvalidState {
            unit: self.label.clone(),
            state: self.state.to_string(),
            operation,
        }
    }

    fn signal(&self, signal: ControlSignal) {
        if let Some(sync) = &self.sync {
            sync.signal(signal);
        }
    }

    /// Kill the worker if possible, otherwise leave it behind with a warning.
    fn escalate(&mut self, reason: &str) {
        match self.worker.as_mut() {
            Some(worker) if I::CAN_FORCE_STOP => {
                if I::kill_worker(worker) {
                    tracing::warn!("Killed worker of {} ({})", self.label, reason);
                } else {
                    tracing::warn!("Failed to kill worker of {} ({})", self.label, reason);
                }
            }
            Some(_) => {
                tracing::warn!(
                    "Worker of {} cannot be forced to stop ({}); abandoning it",
                    self.label,
                    reason
                );
            }
            None => {}
        }
    }

    fn spawn(&mut self) -> Result<()> {
        let sync = I::make_sync_primitives(&self.ctx, &self.key)?;
        let (log_tx, log_rx) = I::make_channel();
        self.drain = Some(LogDrain::spawn(
            &self.label,
            log_rx,
            Arc::clone(&self.ctx.log_sink),
        )?);

        let worker = I::make_worker(WorkerJob {
            label: self.label.clone(),
            key: self.key.clone(),
            items: self.items.clone(),
            ctx: Arc::clone(&self.ctx),
            sync: sync.clone(),
            log_tx,
        })?;

        self.sync = Some(sync);
        self.worker = Some(worker);
        Ok(())
    }
}

impl<I: Isolation> ExecutionUnit for Processor<I> {
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

        if let Err(e) = self.spawn() {
            if let Some(mut drain) = self.drain.take() {
                drain.stop();
            }
            self.sync = None;
            self.state = UnitState::Closed;
            return Err(e);
        }

        let timeout = self.ctx.config.ready_timeout();
        let flags = match &self.sync {
            Some(sync) => sync.events.wait_until(timeout, |f| {
                f.ready || f.failure.is_some() || f.finished
            }),
            None => return Err(self.invalid("setup")),
        };

        if flags.ready {
            tracing::debug!("{} is ready", self.label);
            self.state = UnitState::Ready;
            return Ok(());
        }
        if let Some(reason) = flags.failure {
            return Err(FlowError::SetupFailed {
                unit: self.label.clone(),
                reason,
            });
        }
        if flags.finished {
            return Err(FlowError::SetupFailed {
                unit: self.label.clone(),
                reason: "worker exited before signalling ready".to_string(),
            });
        }

        self.escalate("readiness timeout");
        Err(FlowError::ReadinessTimeout {
            unit: self.label.clone(),
            timeout,
        })
    }

    fn start(&mut self) -> Result<()> {
        if self.state != UnitState::Ready {
            return Err(self.invalid("start"));
        }
        self.signal(ControlSignal::Start);
        self.state = UnitState::Running;
        Ok(())
    }

    fn join(&mut self, timeout: Duration) -> bool {
        match &self.sync {
            Some(sync) => sync.events.wait_until(timeout, |f| f.finished).finished,
            None => true,
        }
    }

    fn stop(&mut self, timeout: Duration) {
        let Some(sync) = self.sync.clone() else {
            return;
        };
        if self.state == UnitState::Running {
            self.state = UnitState::Stopping;
        }
        sync.signal(ControlSignal::Stop);
        let flags = sync.events.wait_until(timeout, |f| f.stopped || f.finished);
        if !(flags.stopped || flags.finished) {
            self.escalate("stop timeout");
        }
    }

    fn close(&mut self, timeout: Duration) {
        if self.state == UnitState::Closed {
            return;
        }
        self.state = UnitState::Closing;

        if let Some(sync) = self.sync.take() {
            sync.signal(ControlSignal::Stop);
            sync.signal(ControlSignal::Close);
            let mut finished = sync.events.wait_until(timeout, |f| f.finished).finished;
            if !finished && I::CAN_FORCE_STOP {
                self.escalate("close timeout");
                finished = sync.events.wait_until(timeout, |f| f.finished).finished;
            }

            match self.worker.take() {
                Some(worker) if finished => I::reap_worker(worker),
                Some(_) => tracing::warn!(
                    "Abandoning worker of {} after {:?}",
                    self.label,
                    timeout
                ),
                None => {}
            }
        }

        if let Some(mut drain) = self.drain.take() {
            drain.stop();
        }
        self.state = UnitState::Closed;
        tracing::debug!("{} closed", self.label);
    }

    fn is_finished(&self) -> bool {
        self.sync
            .as_ref()
            .is_some_and(|sync| sync.events.snapshot().finished)
    }

    fn can_force_stop(&self) -> bool {
        I::CAN_FORCE_STOP
    }
}
