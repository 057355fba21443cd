//! Background agent sessions: lifecycle, plan model, and the active-session
//! map. At most one non-terminal session exists per handle.

pub mod loopdetect;
pub mod persist;
pub mod planner;
pub mod reactive;
pub mod runtime;
pub mod session_tools;
pub mod worker;

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use recado_core::types::SessionId;
use recado_core::{RecadoError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    WaitingUser,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerType {
    Reader,
    Analyzer,
    Coder,
    Reporter,
    General,
}

impl std::str::FromStr for WorkerType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "reader" => Ok(Self::Reader),
            "analyzer" => Ok(Self::Analyzer),
            "coder" => Ok(Self::Coder),
            "reporter" => Ok(Self::Reporter),
            "general" => Ok(Self::General),
            other => Err(format!("unknown worker type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

/// One step of a structured plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    pub id: usize,
    pub description: String,
    pub worker_type: WorkerType,
    /// Tool category tags resolved through the router at execution time.
    #[serde(default)]
    pub tools: Vec<String>,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

/// Hard cap on replanning after task failures.
pub const MAX_REPLANS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPlan {
    pub objective: String,
    pub context_summary: String,
    pub tasks: Vec<TaskStep>,
    pub replans: u32,
}

/// A background autonomous execution bound to one user objective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSession {
    pub session_id: SessionId,
    pub handle: String,
    pub objective: String,
    pub status: SessionStatus,
    pub iteration: usize,
    pub max_iterations: usize,
    pub started_at: String,
    /// Markdown checklist maintained by the session tools.
    pub task_plan: String,
    /// Free-form notes carried between reactive rounds.
    pub scratchpad: String,
    pub plan: Option<AgentPlan>,
}

/// Shared mutable session handle.
pub type SharedSession = Arc<Mutex<AgentSession>>;

struct ActiveEntry {
    session: SharedSession,
    cancel: CancellationToken,
}

/// Process-wide map of active (non-terminal) sessions, one per handle.
#[derive(Default)]
pub struct SessionManager {
    active: DashMap<String, ActiveEntry>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session for `handle`. Rejected while a non-terminal session
    /// exists for the same handle.
    pub fn create_session(
        &self,
        handle: &str,
        objective: &str,
        max_iterations: usize,
    ) -> Result<(SharedSession, CancellationToken)> {
        if let Some(entry) = self.active.get(handle) {
            let status = entry.session.lock().unwrap().status;
            if !status.is_terminal() {
                return Err(RecadoError::Session(format!(
                    "an agent session is already active for {handle}"
                )));
            }
        }
        let session = AgentSession {
            session_id: SessionId::new(),
            handle: handle.to_string(),
            objective: objective.to_string(),
            status: SessionStatus::Running,
            iteration: 0,
            max_iterations,
            started_at: chrono::Utc::now().to_rfc3339(),
            task_plan: String::new(),
            scratchpad: String::new(),
            plan: None,
        };
        info!(handle, session_id = %session.session_id, "agent session created");
        let shared = Arc::new(Mutex::new(session));
        let cancel = CancellationToken::new();
        self.active.insert(
            handle.to_string(),
            ActiveEntry {
                session: Arc::clone(&shared),
                cancel: cancel.clone(),
            },
        );
        Ok((shared, cancel))
    }

    /// The active session for `handle`, if any.
    pub fn get_active(&self, handle: &str) -> Option<SharedSession> {
        self.active.get(handle).and_then(|e| {
            let status = e.session.lock().unwrap().status;
            if status.is_terminal() {
                None
            } else {
                Some(Arc::clone(&e.session))
            }
        })
    }

    /// Cancel the active session. Returns `false` when none exists. The
    /// runtime observes the token at its next checkpoint.
    pub fn cancel_session(&self, handle: &str) -> bool {
        match self.active.get(handle) {
            Some(entry) => {
                let mut s = entry.session.lock().unwrap();
                if s.status.is_terminal() {
                    return false;
                }
                s.status = SessionStatus::Cancelled;
                entry.cancel.cancel();
                info!(handle, "agent session cancelled");
                true
            }
            None => false,
        }
    }

    /// Drop the map entry once a session reaches a terminal state.
    pub fn release(&self, handle: &str) {
        self.active.remove(handle);
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
