//! Log plumbing across isolation boundaries.
//!
//! Every worker gets its own log channel. Inside a thread worker a
//! [`ForwardLayer`] turns `tracing` events into [`LogLine`]s on that channel;
//! inside a worker process a [`SinkLayer`] feeds the process's [`LogSink`],
//! whose only callback writes `Log` frames to the parent. On the parent side a
//! [`LogDrain`] thread empties the channel into the parent's sink, and the
//! root sink finally re-emits the lines through `tracing` under
//! [`RELAY_TARGET`].
//!
//! ```text
//! worker thread ──ForwardLayer──► channel ──LogDrain──► LogSink ──► callbacks
//! worker process ──SinkLayer──► LogSink ──Log frame──► parent channel ──► …
//! ```

use crate::config::LoggingConfig;
use crate::error::{FlowError, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt as tfmt, EnvFilter, Layer};

/// Target used when relayed lines are re-emitted through `tracing`.
pub const RELAY_TARGET: &str = "liveflow::relay";

/// Log severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Self::Trace,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::INFO => Self::Info,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::ERROR => Self::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One formatted log record, as it travels between workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub target: String,
    /// Label of the execution unit that produced the line.
    pub context: String,
    pub message: String,
}

impl LogLine {
    pub fn new(
        level: LogLevel,
        target: impl Into<String>,
        context: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            target: target.into(),
            context: context.into(),
            message: message.into(),
        }
    }

    fn from_event(event: &Event<'_>, context: &str) -> Self {
        let meta = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        Self::new(meta.level().into(), meta.target(), context, visitor.finish())
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:>5} [{}] {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.level.as_str().to_uppercase(),
            self.context,
            self.target,
            self.message
        )
    }
}

/// Collects the `message` field plus any other fields as `key=value`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Callback receiving formatted lines.
pub type LogCallback = Arc<dyn Fn(&LogLine) + Send + Sync>;

/// Injected log callbacks. Dispatch holds one lock across all callbacks, so
/// lines from concurrent drains never interleave inside a callback.
#[derive(Default)]
pub struct LogSink {
    callbacks: Mutex<Vec<LogCallback>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose single callback re-emits lines through `tracing`.
    pub fn forward_to_tracing() -> Self {
        let sink = Self::new();
        sink.subscribe(Arc::new(relay_to_tracing));
        sink
    }

    pub fn with_callback(callback: LogCallback) -> Self {
        let sink = Self::new();
        sink.subscribe(callback);
        sink
    }

    pub fn subscribe(&self, callback: LogCallback) {
        self.lock().push(callback);
    }

    pub fn dispatch(&self, line: &LogLine) {
        let callbacks = self.lock();
        for callback in callbacks.iter() {
            callback(line);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogCallback>> {
        self.callbacks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogSink")
            .field("callbacks", &self.len())
            .finish()
    }
}

/// Re-emit a relayed line on the current subscriber.
pub fn relay_to_tracing(line: &LogLine) {
    match line.level {
        LogLevel::Trace => {
            tracing::trace!(target: RELAY_TARGET, "[{}] {}: {}", line.context, line.target, line.message)
        }
        LogLevel::Debug => {
            tracing::debug!(target: RELAY_TARGET, "[{}] {}: {}", line.context, line.target, line.message)
        }
        LogLevel::Info => {
            tracing::info!(target: RELAY_TARGET, "[{}] {}: {}", line.context, line.target, line.message)
        }
        LogLevel::Warn => {
            tracing::warn!(target: RELAY_TARGET, "[{}] {}: {}", line.context, line.target, line.message)
        }
        LogLevel::Error => {
            tracing::error!(target: RELAY_TARGET, "[{}] {}: {}", line.context, line.target, line.message)
        }
    }
}

// ── Layers ──

/// Sends every event to a log channel. Installed in thread workers.
pub struct ForwardLayer {
    tx: Sender<LogLine>,
    context: String,
}

impl ForwardLayer {
    pub fn new(tx: Sender<LogLine>, context: impl Into<String>) -> Self {
        Self {
            tx,
            context: context.into(),
        }
    }
}

impl<S: Subscriber> Layer<S> for ForwardLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let _ = self.tx.send(LogLine::from_event(event, &self.context));
    }
}

/// Dispatches events straight into a `LogSink`. Relayed lines are skipped so
/// a sink that re-emits through `tracing` cannot loop.
pub struct SinkLayer {
    sink: Arc<LogSink>,
    context: String,
}

impl SinkLayer {
    pub fn new(sink: Arc<LogSink>, context: impl Into<String>) -> Self {
        Self {
            sink,
            context: context.into(),
        }
    }
}

impl<S: Subscriber> Layer<S> for SinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if event.metadata().target() == RELAY_TARGET {
            return;
        }
        self.sink
            .dispatch(&LogLine::from_event(event, &self.context));
    }
}

// ── Drain ──

/// Thread moving lines from a unit's log channel into the parent sink.
pub struct LogDrain {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl LogDrain {
    pub fn spawn(label: &str, rx: Receiver<LogLine>, sink: Arc<LogSink>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name(format!("{}-log", label))
            .spawn(move || loop {
                match rx.recv_timeout(Duration::from_millis(50)) {
                    Ok(line) => sink.dispatch(&line),
                    Err(RecvTimeoutError::Timeout) => {
                        if flag.load(Ordering::Acquire) {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                if flag.load(Ordering::Acquire) {
                    rx.try_iter().for_each(|line| sink.dispatch(&line));
                    break;
                }
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Flush what is queued and join the drain thread.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Log drain thread panicked");
            }
        }
    }
}

impl Drop for LogDrain {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Host setup ──

/// Keeps the non-blocking file writer alive; drop it last.
pub type LogGuard = Option<tracing_appender::non_blocking::WorkerGuard>;

/// Install the global subscriber of a host program.
pub fn init(config: &LoggingConfig) -> Result<LogGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path.file_name().ok_or_else(|| {
                FlowError::Config(format!("Log file {} has no file name", path.display()))
            })?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(tfmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tfmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| FlowError::Config(format!("Failed to initialize logging: {}", e)))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn capture() -> (Arc<LogSink>, Arc<Mutex<Vec<LogLine>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let store = Arc::clone(&lines);
        let sink = Arc::new(LogSink::with_callback(Arc::new(move |line: &LogLine| {
            store.lock().unwrap().push(line.clone());
        })));
        (sink, lines)
    }

    #[test]
    fn test_sink_dispatches_to_every_callback() {
        let (sink, lines) = capture();
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        sink.subscribe(Arc::new(move |_| *counter.lock().unwrap() += 1));

        sink.dispatch(&LogLine::new(LogLevel::Info, "t", "root", "hello"));
        assert_eq!(lines.lock().unwrap().len(), 1);
        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_forward_layer_formats_fields() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let subscriber = tracing_subscriber::registry().with(ForwardLayer::new(tx, "thread:dsp"));
        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(node = "B [Square]", "value dropped");
        });

        let line = rx.try_recv().unwrap();
        assert_eq!(line.level, LogLevel::Warn);
        assert_eq!(line.context, "thread:dsp");
        assert_eq!(line.message, "value dropped node=B [Square]");
    }

    #[test]
    fn test_sink_layer_skips_relayed_lines() {
        let (sink, lines) = capture();
        let subscriber = tracing_subscriber::registry().with(SinkLayer::new(sink, "process:io"));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("direct");
            relay_to_tracing(&LogLine::new(LogLevel::Info, "x", "thread:t", "relayed"));
        });

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].message, "direct");
        assert_eq!(lines[0].context, "process:io");
    }

    #[test]
    fn test_drain_flushes_on_stop() {
        let (sink, lines) = capture();
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut drain = LogDrain::spawn("unit", rx, sink).unwrap();
        for i in 0..10 {
            tx.send(LogLine::new(LogLevel::Debug, "t", "unit", format!("line {}", i)))
                .unwrap();
        }
        drain.stop();
        assert_eq!(lines.lock().unwrap().len(), 10);
    }

    #[test]
    fn test_line_serializes() {
        let line = LogLine::new(LogLevel::Error, "liveflow::worker", "process:io", "boom");
        let json = serde_json::to_string(&line).unwrap();
        let back: LogLine = serde_json::from_str(&json).unwrap();
        assert_eq!(back, line);
        assert!(line.to_string().contains("ERROR [process:io] liveflow::worker: boom"));
    }
}
