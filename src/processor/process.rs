//! Process isolation: the worker is a re-executed host program.
//!
//! The child is started with [`WORKER_ENV`] set and speaks the frame protocol
//! of [`crate::processor::protocol`] over its stdin and stdout. Two threads
//! per worker move frames: the writer feeds the child from the group's
//! [`ProcessLink`](crate::processor::ProcessLink), the reader applies status
//! frames to the unit's events and routes data, clocks and logs.

use crate::error::{FlowError, Result};
use crate::logging::LogLine;
use crate::pipeline::placement::Level;
use crate::processor::events::{SyncPrimitives, UnitEvents};
use crate::processor::isolation::{Isolation, WorkerJob};
use crate::processor::protocol::{read_frame, write_frame, ChildFrame, ParentFrame, WORKER_ENV};
use crate::processor::RunContext;
use crossbeam_channel::{RecvTimeoutError, Sender};
use std::io::{BufReader, BufWriter};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// A running worker process and its pipe threads.
pub struct ProcessWorker {
    child: Child,
    threads: Vec<JoinHandle<()>>,
}

impl ProcessWorker {
    pub fn id(&self) -> u32 {
        self.child.id()
    }
}

pub struct ProcessIsolation;

impl Isolation for ProcessIsolation {
    type Worker = ProcessWorker;

    const LEVEL: Level = Level::Process;

    const CAN_FORCE_STOP: bool = true;

    fn make_sync_primitives(ctx: &RunContext, key: &str) -> Result<SyncPrimitives> {
        let link = ctx
            .process_links
            .get(key)
            .ok_or_else(|| FlowError::Worker(format!("no pipe for process group '{}'", key)))?;
        Ok(SyncPrimitives::piped(link.tx.clone()))
    }

    fn make_worker(job: WorkerJob) -> Result<Self::Worker> {
        let WorkerJob {
            label,
            key,
            ctx,
            sync,
            log_tx,
            ..
        } = job;

        let graph = ctx.description.clone().ok_or_else(|| {
            FlowError::Worker(format!("{}: no graph description to assign", label))
        })?;
        let link = ctx
            .process_links
            .get(&key)
            .cloned()
            .ok_or_else(|| FlowError::Worker(format!("no pipe for process group '{}'", key)))?;
        let program = match &ctx.config.worker_program {
            Some(program) => program.clone(),
            None => std::env::current_exe()?,
        };

        // Frames queued for a previous worker of this group are stale.
        link.rx.try_iter().for_each(drop);

        let mut child = Command::new(&program)
            .env(WORKER_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                FlowError::Worker(format!("{}: cannot start {}: {}", label, program.display(), e))
            })?;
        tracing::debug!("Started worker {} for {}", child.id(), label);

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(FlowError::Worker(format!("{}: worker pipes unavailable", label)));
        };

        let assign = ParentFrame::Assign {
            process: key,
            graph,
            config: ctx.config.clone(),
        };

        let writer = {
            let events = Arc::clone(&sync.events);
            let label = label.clone();
            std::thread::Builder::new()
                .name(format!("{}-tx", label))
                .spawn(move || write_loop(&label, stdin, assign, link.rx, &events))?
        };
        let reader = {
            let events = Arc::clone(&sync.events);
            let label = label.clone();
            std::thread::Builder::new()
                .name(format!("{}-rx", label))
                .spawn(move || read_loop(&label, stdout, &ctx, &events, &log_tx))?
        };

        Ok(ProcessWorker {
            child,
            threads: vec![writer, reader],
        })
    }

    fn kill_worker(worker: &mut Self::Worker) -> bool {
        match worker.child.kill() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to kill worker {}: {}", worker.child.id(), e);
                false
            }
        }
    }

    fn reap_worker(mut worker: Self::Worker) {
        match worker.child.wait() {
            Ok(status) => tracing::debug!("Worker {} exited with {}", worker.child.id(), status),
            Err(e) => tracing::warn!("Failed to wait for worker {}: {}", worker.child.id(), e),
        }
        for thread in worker.threads {
            if thread.join().is_err() {
                tracing::error!("Worker pipe thread panicked");
            }
        }
    }
}

fn write_loop(
    label: &str,
    stdin: ChildStdin,
    assign: ParentFrame,
    frames: crossbeam_channel::Receiver<ParentFrame>,
    events: &UnitEvents,
) {
    let mut out = BufWriter::new(stdin);
    if let Err(e) = write_frame(&mut out, &assign) {
        tracing::error!("{}: failed to send assignment: {}", label, e);
        return;
    }

    loop {
        match frames.recv_timeout(Duration::from_millis(50)) {
            Ok(frame) => {
                if let Err(e) = write_frame(&mut out, &frame) {
                    tracing::debug!("{}: worker pipe closed: {}", label, e);
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if events.snapshot().finished {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn read_loop(
    label: &str,
    stdout: ChildStdout,
    ctx: &RunContext,
    events: &UnitEvents,
    log_tx: &Sender<LogLine>,
) {
    let mut input = BufReader::new(stdout);
    loop {
        let frame = match read_frame::<_, ChildFrame>(&mut input) {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(FlowError::Serialization(e)) => {
                tracing::warn!("{}: skipping malformed frame: {}", label, e);
                continue;
            }
            Err(e) => {
                tracing::warn!("{}: worker pipe failed: {}", label, e);
                break;
            }
        };

        match frame {
            ChildFrame::Ready => events.update(|f| f.ready = true),
            ChildFrame::SetupFailed { reason } => events.update(|f| f.failure = Some(reason)),
            ChildFrame::Stopped => events.update(|f| f.stopped = true),
            ChildFrame::Log(line) => {
                if log_tx.send(line).is_err() {
                    tracing::trace!("{}: log drain is gone", label);
                }
            }
            ChildFrame::Clock(sample) => ctx.clocks.forward(sample),
            ChildFrame::Data {
                connection,
                message,
            } => {
                ctx.wiring.router().route(connection, message);
            }
            ChildFrame::Finished => {
                tracing::debug!("{}: worker finished", label);
                break;
            }
        }
    }

    events.update(|f| {
        if !f.ready && f.failure.is_none() {
            f.failure = Some("worker exited before signalling ready".to_string());
        }
        f.finished = true;
    });
}
