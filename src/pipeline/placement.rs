//! Declared execution placement of a node.
//!
//! A placement never changes once the node is constructed. The processor tree
//! reads it at three levels: the process group, the thread group inside that
//! process, and finally the cooperative local level which has no key at all.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a node runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Cooperatively driven in the caller's process, on the shared local driver.
    #[default]
    Local,
    /// On a dedicated thread shared by every node with the same group name.
    Thread(String),
    /// In a separate worker process, optionally on a named thread inside it.
    Process {
        group: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thread: Option<String>,
    },
}

impl Placement {
    pub fn local() -> Self {
        Placement::Local
    }

    pub fn thread(group: impl Into<String>) -> Self {
        Placement::Thread(group.into())
    }

    pub fn process(group: impl Into<String>) -> Self {
        Placement::Process {
            group: group.into(),
            thread: None,
        }
    }

    pub fn process_thread(group: impl Into<String>, thread: impl Into<String>) -> Self {
        Placement::Process {
            group: group.into(),
            thread: Some(thread.into()),
        }
    }

    /// Grouping key at a level of the processor tree, `None` when the node
    /// falls through to the next level.
    pub fn key_at(&self, level: Level) -> Option<&str> {
        match (self, level) {
            (Placement::Process { group, .. }, Level::Process) => Some(group),
            (Placement::Thread(group), Level::Thread) => Some(group),
            (Placement::Process { thread, .. }, Level::Thread) => thread.as_deref(),
            _ => None,
        }
    }

    /// The isolation context this placement resolves to.
    pub fn context(&self) -> ExecContext {
        match self {
            Placement::Local => ExecContext::default(),
            Placement::Thread(group) => ExecContext {
                process: None,
                thread: Some(group.clone()),
            },
            Placement::Process { group, thread } => ExecContext {
                process: Some(group.clone()),
                thread: thread.clone(),
            },
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Placement::Local)
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Local => write!(f, "local"),
            Placement::Thread(group) => write!(f, "thread:{}", group),
            Placement::Process {
                group,
                thread: None,
            } => write!(f, "process:{}", group),
            Placement::Process {
                group,
                thread: Some(thread),
            } => write!(f, "process:{}/thread:{}", group, thread),
        }
    }
}

/// Concrete isolation context. Two nodes exchange data without crossing a
/// boundary iff their contexts are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ExecContext {
    pub process: Option<String>,
    pub thread: Option<String>,
}

impl ExecContext {
    /// Same OS process (the caller's process when `process` is `None`).
    pub fn same_process(&self, other: &ExecContext) -> bool {
        self.process == other.process
    }
}

/// Level of the processor tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Process,
    Thread,
    Local,
}

impl Level {
    /// The level that un-keyed items are handed to. `Local` is terminal.
    pub fn successor(self) -> Option<Level> {
        match self {
            Level::Process => Some(Level::Thread),
            Level::Thread => Some(Level::Local),
            Level::Local => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Level::Process => "process",
            Level::Thread => "thread",
            Level::Local => "local",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_per_level() {
        let p = Placement::process_thread("io", "reader");
        assert_eq!(p.key_at(Level::Process), Some("io"));
        assert_eq!(p.key_at(Level::Thread), Some("reader"));
        assert_eq!(p.key_at(Level::Local), None);

        let t = Placement::thread("dsp");
        assert_eq!(t.key_at(Level::Process), None);
        assert_eq!(t.key_at(Level::Thread), Some("dsp"));

        assert_eq!(Placement::process("io").key_at(Level::Thread), None);
        assert_eq!(Placement::Local.key_at(Level::Process), None);
    }

    #[test]
    fn test_context_equality() {
        assert_eq!(Placement::Local.context(), ExecContext::default());
        assert_ne!(
            Placement::thread("a").context(),
            Placement::process("a").context()
        );
        assert!(Placement::thread("a")
            .context()
            .same_process(&Placement::Local.context()));
    }

    #[test]
    fn test_successor_chain() {
        assert_eq!(Level::Process.successor(), Some(Level::Thread));
        assert_eq!(Level::Thread.successor(), Some(Level::Local));
        assert_eq!(Level::Local.successor(), None);
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&Placement::process("io")).unwrap();
        assert_eq!(json, r#"{"process":{"group":"io"}}"#);
        let back: Placement = serde_json::from_str(r#""local""#).unwrap();
        assert_eq!(back, Placement::Local);
        let back: Placement = serde_json::from_str(r#"{"thread":"dsp"}"#).unwrap();
        assert_eq!(back, Placement::thread("dsp"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Placement::Local.to_string(), "local");
        assert_eq!(
            Placement::process_thread("io", "r").to_string(),
            "process:io/thread:r"
        );
    }
}
