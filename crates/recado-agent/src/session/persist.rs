//! Append-only JSONL persistence for agent sessions.
//!
//! One file per session: `{sessions_dir}/{handle}_{session_id}.jsonl`.
//! Strictly best-effort — an unwritable disk must never take the session
//! down with it.

use std::io::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::session::AgentSession;

/// One line of the session journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: usize,
    pub iteration: usize,
    pub tool_calls: Vec<String>,
    pub reply_preview: String,
    pub task_plan_snapshot: String,
    pub timestamp: String,
}

pub struct SessionJournal {
    path: PathBuf,
}

impl SessionJournal {
    pub fn new(sessions_dir: &str, session: &AgentSession) -> Self {
        let path = PathBuf::from(sessions_dir).join(format!(
            "{}_{}.jsonl",
            session.handle, session.session_id
        ));
        Self { path }
    }

    /// Append one round record. IO errors are logged, never propagated.
    pub fn append(&self, record: &RoundRecord) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let line = match serde_json::to_string(record) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "session journal serialization failed");
                return;
            }
        };
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(e) = result {
            warn!(error = %e, path = %self.path.display(), "session journal write failed");
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

/// Build a round record from the session's current state.
pub fn round_record(
    session: &AgentSession,
    round: usize,
    tool_calls: Vec<String>,
    reply: &str,
) -> RoundRecord {
    RoundRecord {
        round,
        iteration: session.iteration,
        tool_calls,
        reply_preview: reply.chars().take(200).collect(),
        task_plan_snapshot: session.task_plan.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionStatus, AgentSession};
    use recado_core::types::SessionId;

    fn session() -> AgentSession {
        AgentSession {
            session_id: SessionId::new(),
            handle: "549110001111".to_string(),
            objective: "obj".to_string(),
            status: SessionStatus::Running,
            iteration: 2,
            max_iterations: 15,
            started_at: chrono::Utc::now().to_rfc3339(),
            task_plan: "- [x] leer\n- [ ] informar".to_string(),
            scratchpad: String::new(),
            plan: None,
        }
    }

    #[test]
    fn appends_one_json_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let s = session();
        let journal = SessionJournal::new(dir.path().to_str().unwrap(), &s);

        journal.append(&round_record(&s, 1, vec!["list_source_files".to_string()], "ok"));
        journal.append(&round_record(&s, 2, vec![], "done"));

        let content = std::fs::read_to_string(journal.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: RoundRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.round, 1);
        assert_eq!(first.tool_calls, vec!["list_source_files"]);
        assert!(first.task_plan_snapshot.contains("[ ] informar"));
    }

    #[test]
    fn unwritable_path_does_not_panic() {
        let s = session();
        let journal = SessionJournal::new("/proc/definitely/not/writable", &s);
        journal.append(&round_record(&s, 1, vec![], "x"));
    }
}
