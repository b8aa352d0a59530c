//! Worker-process host.
//!
//! A program that runs graphs with process placements must call
//! [`enter_if_requested`] first thing in `main`: when the program was started
//! as a worker it serves its assignment and exits, otherwise it returns and
//! the program carries on normally.
//!
//! ```ignore
//! fn main() {
//!     let registry = liveflow::pipeline::nodes::builtin_registry().unwrap();
//!     liveflow::worker::enter_if_requested(&registry);
//!     // ...
//! }
//! ```

use crate::config::SchedulerConfig;
use crate::error::{FlowError, Result};
use crate::logging::{LogLine, LogSink, SinkLayer};
use crate::pipeline::bridge::RemoteOutlet;
use crate::pipeline::clock::{ClockReporter, ClockSample};
use crate::pipeline::graph::Graph;
use crate::pipeline::placement::Level;
use crate::pipeline::registry::NodeRegistry;
use crate::processor::entry::{child_entrypoint, ControlLink};
use crate::processor::events::UnitEvents;
use crate::processor::isolation::Isolation;
use crate::processor::protocol::{read_frame, write_frame, ChildFrame, ParentFrame, WORKER_ENV};
use crate::processor::wiring::{Wiring, WiringPlan};
use crate::processor::{PlacedNode, ProcessIsolation, RunContext};
use crossbeam_channel::{Receiver, Sender};
use std::io::{BufReader, BufWriter, Stdin};
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Whether this process was started as a liveflow worker.
pub fn is_worker() -> bool {
    std::env::var_os(WORKER_ENV).is_some()
}

/// Serve a worker assignment and exit when started as a worker; return
/// immediately otherwise.
pub fn enter_if_requested(registry: &NodeRegistry) {
    if !is_worker() {
        return;
    }
    let code = match serve(registry) {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!("Worker failed: {}", e);
            eprintln!("liveflow worker failed: {}", e);
            1
        }
    };
    std::process::exit(code);
}

/// Worker side of a process unit's handshake.
struct PipeLink {
    events: Arc<UnitEvents>,
    frames: Sender<ChildFrame>,
}

impl ControlLink for PipeLink {
    fn events(&self) -> &UnitEvents {
        &self.events
    }

    fn ready(&self) {
        self.send(ChildFrame::Ready);
    }

    fn setup_failed(&self, reason: String) {
        self.send(ChildFrame::SetupFailed { reason });
    }

    fn stopped(&self) {
        self.send(ChildFrame::Stopped);
    }
}

impl PipeLink {
    fn send(&self, frame: ChildFrame) {
        if self.frames.send(frame).is_err() {
            tracing::trace!("stdout writer is gone, dropping handshake frame");
        }
    }
}

/// Serialize outgoing frames and clock samples onto stdout until `Finished`.
fn write_loop(frames: Receiver<ChildFrame>, clocks: Receiver<ClockSample>) {
    let mut out = BufWriter::new(std::io::stdout());
    let closed = crossbeam_channel::never();
    let mut clocks_open = true;
    loop {
        let clock_rx = if clocks_open { &clocks } else { &closed };
        let done = crossbeam_channel::select! {
            recv(frames) -> frame => match frame {
                Ok(ChildFrame::Finished) => {
                    for sample in clocks.try_iter() {
                        let _ = write_frame(&mut out, &ChildFrame::Clock(sample));
                    }
                    let _ = write_frame(&mut out, &ChildFrame::Finished);
                    true
                }
                Ok(frame) => write_frame(&mut out, &frame).is_err(),
                Err(_) => true,
            },
            recv(clock_rx) -> sample => match sample {
                Ok(sample) => write_frame(&mut out, &ChildFrame::Clock(sample)).is_err(),
                Err(_) => {
                    clocks_open = false;
                    false
                }
            },
        };
        if done {
            break;
        }
    }
}

/// Apply control frames and route data frames until the parent hangs up.
fn read_loop(mut input: BufReader<Stdin>, events: &UnitEvents, wiring: &Wiring) {
    loop {
        match read_frame::<_, ParentFrame>(&mut input) {
            Ok(Some(ParentFrame::Control(signal))) => events.update(|f| f.apply(signal)),
            Ok(Some(ParentFrame::Data {
                connection,
                message,
            })) => {
                wiring.router().route(connection, message);
            }
            Ok(Some(ParentFrame::Assign { .. })) => {
                tracing::warn!("Ignoring repeated assignment");
            }
            Ok(None) => break,
            Err(FlowError::Serialization(e)) => {
                tracing::warn!("Skipping malformed frame: {}", e);
            }
            Err(e) => {
                tracing::warn!("Parent pipe failed: {}", e);
                break;
            }
        }
    }
    // Without a parent there is nobody left to start or close us.
    events.update(|f| {
        f.stop = true;
        f.close = true;
    });
}

/// Clock reporter of a worker. Without clock tracking the sender is dropped,
/// which closes the clock stream to the parent.
fn worker_clocks(config: &SchedulerConfig, tx: Sender<ClockSample>) -> ClockReporter {
    if config.track_clocks {
        ClockReporter::from_sender(tx, config.clock_timestamps)
    } else {
        ClockReporter::disabled()
    }
}

fn serve(registry: &NodeRegistry) -> Result<()> {
    let mut input = BufReader::new(std::io::stdin());
    let Some(ParentFrame::Assign {
        process,
        graph: description,
        config,
    }) = read_frame::<_, ParentFrame>(&mut input)?
    else {
        return Err(FlowError::Worker(
            "expected an assignment as first frame".to_string(),
        ));
    };

    let label = format!("{}:{}", ProcessIsolation::LEVEL.name(), process);
    let (frame_tx, frame_rx) = crossbeam_channel::unbounded::<ChildFrame>();
    let (clock_tx, clock_rx) = crossbeam_channel::unbounded::<ClockSample>();
    let writer = std::thread::Builder::new()
        .name(format!("{}-stdout", label))
        .spawn(move || write_loop(frame_rx, clock_rx))?;

    let log_frames = frame_tx.clone();
    let sink = Arc::new(LogSink::with_callback(Arc::new(move |line: &LogLine| {
        let _ = log_frames.send(ChildFrame::Log(line.clone()));
    })));
    tracing_subscriber::registry()
        .with(config.level_filter())
        .with(SinkLayer::new(Arc::clone(&sink), label.clone()))
        .try_init()
        .map_err(|e| FlowError::Worker(format!("cannot install worker logging: {}", e)))?;

    let graph = Graph::from_description(&description, registry)?;
    let items: Vec<PlacedNode> = graph
        .node_ids()
        .into_iter()
        .map(|id| graph.node(id).map(PlacedNode::from_entry))
        .collect::<std::result::Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|item| item.placement.context().process.as_deref() == Some(process.as_str()))
        .collect();

    let plan = WiringPlan::from_description(&description)?;
    let data_frames = frame_tx.clone();
    let outlet: RemoteOutlet = Arc::new(move |connection, message| {
        data_frames
            .send(ChildFrame::Data {
                connection,
                message,
            })
            .is_ok()
    });
    let wiring = Arc::new(Wiring::build(&plan, Some(&process), |_| {
        Some(Arc::clone(&outlet))
    })?);

    let events = UnitEvents::new();
    {
        let events = Arc::clone(&events);
        let wiring = Arc::clone(&wiring);
        std::thread::Builder::new()
            .name(format!("{}-stdin", label))
            .spawn(move || read_loop(input, &events, &wiring))?;
    }

    let ctx = Arc::new(RunContext::new(
        config.clone(),
        wiring,
        worker_clocks(&config, clock_tx),
        sink,
    ));
    tracing::debug!("Worker {} serving {} node(s)", label, items.len());

    let next = ProcessIsolation::LEVEL.successor().unwrap_or(Level::Local);
    let link = PipeLink {
        events,
        frames: frame_tx.clone(),
    };
    child_entrypoint(next, &label, items, &ctx, &link);

    tracing::debug!("Worker {} done", label);
    if frame_tx.send(ChildFrame::Finished).is_err() {
        tracing::trace!("{}: stdout writer is gone before Finished", label);
    }
    if writer.join().is_err() {
        eprintln!("liveflow worker: stdout writer panicked");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_clocks_follow_tracking() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let reporter = worker_clocks(&SchedulerConfig::default(), tx);
        reporter.register("A [Counter]", 3);
        assert_eq!(rx.try_recv().unwrap().ctr, 3);

        let config = SchedulerConfig {
            track_clocks: false,
            ..SchedulerConfig::default()
        };
        let (tx, rx) = crossbeam_channel::unbounded();
        let reporter = worker_clocks(&config, tx);
        assert!(reporter.is_passthrough());
        reporter.register("A [Counter]", 3);
        assert!(matches!(
            rx.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        ));
    }
}
