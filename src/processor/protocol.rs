//! Wire protocol between a parent and its worker processes.
//!
//! One JSON document per line. The parent writes to the child's stdin, the
//! child writes to its stdout; stderr is left to the child's panics.
//! `Assign` is always the first frame a child reads.

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::logging::LogLine;
use crate::pipeline::bridge::BridgeMessage;
use crate::pipeline::clock::ClockSample;
use crate::pipeline::description::GraphDescription;
use crate::processor::events::ControlSignal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::{BufRead, Write};

/// Environment variable marking a process as a liveflow worker.
pub const WORKER_ENV: &str = "LIVEFLOW_WORKER";

/// Frames sent from parent to child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", content = "body", rename_all = "snake_case")]
pub enum ParentFrame {
    /// The child's process group, the whole graph and the scheduler settings.
    Assign {
        process: String,
        graph: GraphDescription,
        config: SchedulerConfig,
    },
    Control(ControlSignal),
    /// A bridge message for connection `connection` of the wiring plan.
    Data {
        connection: usize,
        message: BridgeMessage,
    },
}

/// Frames sent from child to parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", content = "body", rename_all = "snake_case")]
pub enum ChildFrame {
    Ready,
    SetupFailed { reason: String },
    Stopped,
    Log(LogLine),
    Clock(ClockSample),
    Data {
        connection: usize,
        message: BridgeMessage,
    },
    /// Last frame a child writes.
    Finished,
}

/// Write one frame as a JSON line and flush.
pub fn write_frame<W: Write, F: Serialize>(writer: &mut W, frame: &F) -> Result<()> {
    serde_json::to_writer(&mut *writer, frame)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Read the next frame; `Ok(None)` at end of stream. Blank lines are skipped.
pub fn read_frame<R: BufRead, F: DeserializeOwned>(reader: &mut R) -> Result<Option<F>> {
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            return Ok(Some(serde_json::from_str(line.trim_end())?));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_frames_over_a_stream() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &ChildFrame::Ready).unwrap();
        write_frame(
            &mut buf,
            &ChildFrame::Data {
                connection: 2,
                message: BridgeMessage::Data {
                    ctr: 4,
                    payload: json!(16),
                },
            },
        )
        .unwrap();
        write_frame(
            &mut buf,
            &ChildFrame::Log(LogLine::new(LogLevel::Info, "t", "process:io", "hi")),
        )
        .unwrap();
        buf.extend_from_slice(b"\n");
        write_frame(&mut buf, &ChildFrame::Finished).unwrap();

        let mut reader = Cursor::new(buf);
        let mut frames: Vec<ChildFrame> = Vec::new();
        while let Some(frame) = read_frame(&mut reader).unwrap() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[0], ChildFrame::Ready);
        assert!(matches!(frames[1], ChildFrame::Data { connection: 2, .. }));
        assert_eq!(frames[3], ChildFrame::Finished);
    }

    #[test]
    fn test_control_frame_shape() {
        let json = serde_json::to_string(&ParentFrame::Control(ControlSignal::Start)).unwrap();
        assert_eq!(json, r#"{"frame":"control","body":"start"}"#);
    }

    #[test]
    fn test_assign_round_trip() {
        let frame = ParentFrame::Assign {
            process: "io".to_string(),
            graph: GraphDescription::default(),
            config: SchedulerConfig::default(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: ParentFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }
}
