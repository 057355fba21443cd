//! Shared data types for recado-shell.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier for a background process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId(pub String);

impl ProcessId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProcessId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Result of a completed one-shot command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Snapshot of a background process, returned by `list`.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub id: ProcessId,
    pub command: String,
    pub started_at: String,
    pub running: bool,
    pub exit_code: Option<i32>,
}

/// Incremental output returned by `poll`.
#[derive(Debug, Clone, Serialize)]
pub struct PollResult {
    pub id: ProcessId,
    /// Stdout produced since the previous poll.
    pub stdout: String,
    /// Stderr produced since the previous poll.
    pub stderr: String,
    /// Present once the process has terminated.
    pub exit_code: Option<i32>,
}
