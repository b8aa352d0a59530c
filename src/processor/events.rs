//! Lifecycle flags shared between a unit and its worker.
//!
//! A thread worker shares the very same `UnitEvents` with its parent. A
//! process worker has one on each side of the pipe; control frames and
//! status frames keep them in step.

use crate::processor::protocol::ParentFrame;
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Control signals travelling from a unit to its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignal {
    Start,
    Stop,
    Close,
}

/// Snapshot of the lifecycle flags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flags {
    /// Worker finished setup of all its sub-units.
    pub ready: bool,
    pub start: bool,
    pub stop: bool,
    /// Worker acknowledged the stop request.
    pub stopped: bool,
    pub close: bool,
    /// Worker has exited.
    pub finished: bool,
    /// Worker setup failed with this reason.
    pub failure: Option<String>,
}

impl Flags {
    pub fn apply(&mut self, signal: ControlSignal) {
        match signal {
            ControlSignal::Start => self.start = true,
            ControlSignal::Stop => self.stop = true,
            ControlSignal::Close => self.close = true,
        }
    }
}

/// Condition-variable guarded flags.
#[derive(Debug, Default)]
pub struct UnitEvents {
    flags: Mutex<Flags>,
    changed: Condvar,
}

impl UnitEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Flags> {
        self.flags
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mutate the flags and wake every waiter.
    pub fn update(&self, f: impl FnOnce(&mut Flags)) {
        let mut flags = self.lock();
        f(&mut flags);
        self.changed.notify_all();
    }

    pub fn snapshot(&self) -> Flags {
        self.lock().clone()
    }

    /// Block until `pred` holds or `timeout` elapses; returns the last snapshot.
    pub fn wait_until(&self, timeout: Duration, pred: impl Fn(&Flags) -> bool) -> Flags {
        let deadline = Instant::now() + timeout;
        let mut flags = self.lock();
        while !pred(&flags) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            flags = self
                .changed
                .wait_timeout(flags, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
        flags.clone()
    }

    /// Block until `pred` holds.
    pub fn wait(&self, pred: impl Fn(&Flags) -> bool) -> Flags {
        let mut flags = self.lock();
        while !pred(&flags) {
            flags = self
                .changed
                .wait(flags)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        flags.clone()
    }
}

/// The synchronization primitives of one unit/worker pair.
#[derive(Debug, Clone)]
pub struct SyncPrimitives {
    pub events: Arc<UnitEvents>,
    /// Frame queue to a worker process; `None` when the worker shares `events`.
    pipe: Option<Sender<ParentFrame>>,
}

impl SyncPrimitives {
    pub fn in_process() -> Self {
        Self {
            events: UnitEvents::new(),
            pipe: None,
        }
    }

    pub fn piped(pipe: Sender<ParentFrame>) -> Self {
        Self {
            events: UnitEvents::new(),
            pipe: Some(pipe),
        }
    }

    /// Raise a control signal locally and, for process workers, over the pipe.
    pub fn signal(&self, signal: ControlSignal) {
        self.events.update(|f| f.apply(signal));
        if let Some(pipe) = &self.pipe {
            if pipe.send(ParentFrame::Control(signal)).is_err() {
                tracing::trace!("worker pipe is gone, {:?} not forwarded", signal);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_until_times_out() {
        let events = UnitEvents::new();
        let start = Instant::now();
        let flags = events.wait_until(Duration::from_millis(30), |f| f.ready);
        assert!(!flags.ready);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_wait_wakes_on_update() {
        let events = UnitEvents::new();
        let remote = Arc::clone(&events);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            remote.update(|f| f.ready = true);
        });
        let flags = events.wait_until(Duration::from_secs(5), |f| f.ready);
        assert!(flags.ready);
        handle.join().unwrap();
    }

    #[test]
    fn test_piped_signal_sends_frame() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let prims = SyncPrimitives::piped(tx);
        prims.signal(ControlSignal::Stop);
        assert!(prims.events.snapshot().stop);
        assert!(matches!(
            rx.try_recv().unwrap(),
            ParentFrame::Control(ControlSignal::Stop)
        ));
    }

    #[test]
    fn test_signal_survives_a_gone_worker() {
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        let prims = SyncPrimitives::piped(tx);
        prims.signal(ControlSignal::Close);
        assert!(prims.events.snapshot().close);
    }
}
