//! Logical clocks and the per-run clock registry.
//!
//! Every node owns a `Clock`. Its counter starts at 0 and moves forward once
//! per unit of output, so a downstream node can tell which tick a value
//! belongs to. Clock values are reported through a multi-producer channel to
//! the `ClockRegistry` of the run, which aggregates the highest counter seen
//! per node.

use crate::error::{FlowError, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// A node's logical clock.
#[derive(Debug, Clone, Default)]
pub struct Clock {
    ctr: u64,
    times: Option<Vec<DateTime<Utc>>>,
}

impl Clock {
    /// `timed` keeps a wall-clock timestamp for every advance.
    pub fn new(timed: bool) -> Self {
        Self {
            ctr: 0,
            times: timed.then(Vec::new),
        }
    }

    pub fn ctr(&self) -> u64 {
        self.ctr
    }

    /// Advance by one; returns the new counter.
    pub fn tick(&mut self) -> u64 {
        self.ctr += 1;
        self.stamp();
        self.ctr
    }

    /// Move forward to `ctr`. Never moves backwards.
    pub fn advance_to(&mut self, ctr: u64) -> u64 {
        if ctr > self.ctr {
            self.ctr = ctr;
            self.stamp();
        }
        self.ctr
    }

    pub fn times(&self) -> Option<&[DateTime<Utc>]> {
        self.times.as_deref()
    }

    pub fn reset(&mut self) {
        self.ctr = 0;
        if let Some(times) = &mut self.times {
            times.clear();
        }
    }

    fn stamp(&mut self) {
        if let Some(times) = &mut self.times {
            times.push(Utc::now());
        }
    }
}

/// One clock report as it travels to the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockSample {
    pub name: String,
    pub ctr: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Producer side of a clock registry. Cheap to clone, safe to send anywhere.
#[derive(Debug, Clone)]
pub struct ClockReporter {
    tx: Option<Sender<ClockSample>>,
    passthrough: Arc<AtomicBool>,
    timestamps: bool,
}

impl ClockReporter {
    /// A reporter that discards everything.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            passthrough: Arc::new(AtomicBool::new(true)),
            timestamps: false,
        }
    }

    /// A reporter feeding an arbitrary channel, as used by worker processes.
    pub fn from_sender(tx: Sender<ClockSample>, timestamps: bool) -> Self {
        Self {
            tx: Some(tx),
            passthrough: Arc::new(AtomicBool::new(false)),
            timestamps,
        }
    }

    pub fn register(&self, name: &str, ctr: u64) {
        if self.passthrough.load(Ordering::Acquire) {
            return;
        }
        let timestamp = self.timestamps.then(Utc::now);
        self.forward(ClockSample {
            name: name.to_string(),
            ctr,
            timestamp,
        });
    }

    /// Re-register a sample produced elsewhere, keeping its timestamp.
    pub fn forward(&self, sample: ClockSample) {
        if self.passthrough.load(Ordering::Acquire) {
            return;
        }
        if let Some(tx) = &self.tx {
            if let Err(e) = tx.send(sample) {
                tracing::trace!("clock registry is gone, dropping sample of {}", e.0.name);
            }
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough.load(Ordering::Acquire)
    }
}

/// Aggregated view of one node's clock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClockState {
    /// Highest counter reported.
    pub max_ctr: u64,
    /// Number of reports received.
    pub reports: u64,
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// Per-run clock aggregation.
///
/// Reports can come from any thread, but the registry state is only readable
/// from the thread that constructed it.
#[derive(Debug)]
pub struct ClockRegistry {
    owner: ThreadId,
    tx: Option<Sender<ClockSample>>,
    rx: Receiver<ClockSample>,
    passthrough: Arc<AtomicBool>,
    timestamps: bool,
    state: BTreeMap<String, ClockState>,
}

impl ClockRegistry {
    pub fn new(timestamps: bool) -> Self {
        let (tx, rx) = unbounded();
        Self {
            owner: thread::current().id(),
            tx: Some(tx),
            rx,
            passthrough: Arc::new(AtomicBool::new(false)),
            timestamps,
            state: BTreeMap::new(),
        }
    }

    /// A producer handle for this registry.
    pub fn reporter(&self) -> ClockReporter {
        ClockReporter {
            tx: self.tx.clone(),
            passthrough: Arc::clone(&self.passthrough),
            timestamps: self.timestamps,
        }
    }

    pub fn register(&self, name: &str, ctr: u64) {
        self.reporter().register(name, ctr);
    }

    /// Stop collecting for good. Later reports are dropped by every reporter.
    pub fn set_passthrough(&mut self) {
        self.passthrough.store(true, Ordering::Release);
        self.tx = None;
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough.load(Ordering::Acquire)
    }

    fn check_owner(&self, operation: &str) -> Result<()> {
        if thread::current().id() != self.owner {
            return Err(FlowError::OwnershipViolation(format!(
                "clock registry {} called from {:?}, owned by {:?}",
                operation,
                thread::current().id(),
                self.owner
            )));
        }
        Ok(())
    }

    /// Drain pending reports and return the aggregated state.
    pub fn read_state(&mut self) -> Result<&BTreeMap<String, ClockState>> {
        self.check_owner("read_state")?;
        for sample in self.rx.try_iter() {
            let entry = self.state.entry(sample.name).or_default();
            entry.max_ctr = entry.max_ctr.max(sample.ctr);
            entry.reports += 1;
            if sample.timestamp.is_some() {
                entry.last_timestamp = sample.timestamp;
            }
        }
        Ok(&self.state)
    }

    /// Whether every known node has reported a counter of at least `ctr`.
    /// Vacuously true while no node has reported.
    pub fn all_at(&mut self, ctr: u64) -> Result<bool> {
        Ok(self.read_state()?.values().all(|s| s.max_ctr >= ctr))
    }

    pub fn get(&mut self, name: &str) -> Result<Option<u64>> {
        Ok(self.read_state()?.get(name).map(|s| s.max_ctr))
    }

    /// Forget everything seen so far, e.g. before a new run.
    pub fn clear(&mut self) -> Result<()> {
        self.check_owner("clear")?;
        self.rx.try_iter().for_each(drop);
        self.state.clear();
        Ok(())
    }
}
