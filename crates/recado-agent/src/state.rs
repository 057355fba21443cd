//! Shared runtime state wired at startup and threaded through the pipeline
//! and the agent runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::warn;

use recado_core::RecadoConfig;
use recado_memory::MemoryStore;
use recado_shell::audit::AuditLog;
use recado_shell::registry::ProcessRegistry;
use recado_trace::TraceRecorder;

use crate::hitl::HitlCoordinator;
use crate::llm::LlmClient;
use crate::messaging::MessagingClient;
use crate::policy::PolicyEngine;
use crate::session::SessionManager;
use crate::tools::ToolRegistry;

/// Everything the dispatcher and agent runtime need, behind `Arc`s.
///
/// Singletons live here for the life of the process and are torn down in
/// reverse order during graceful shutdown (drain tasks, kill stragglers,
/// flush the recorder by dropping it last).
pub struct RuntimeState {
    pub config: Arc<RecadoConfig>,
    pub store: Arc<MemoryStore>,
    pub llm: Arc<dyn LlmClient>,
    pub messaging: Arc<dyn MessagingClient>,
    pub recorder: Arc<TraceRecorder>,
    pub registry: Arc<ToolRegistry>,
    pub policy: Arc<PolicyEngine>,
    pub hitl: Arc<HitlCoordinator>,
    pub processes: Arc<ProcessRegistry>,
    pub audit: Arc<AuditLog>,
    pub sessions: Arc<SessionManager>,
    tasks: TaskTracker,
}

impl RuntimeState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<RecadoConfig>,
        store: Arc<MemoryStore>,
        llm: Arc<dyn LlmClient>,
        messaging: Arc<dyn MessagingClient>,
        recorder: Arc<TraceRecorder>,
        registry: Arc<ToolRegistry>,
        policy: Arc<PolicyEngine>,
        processes: Arc<ProcessRegistry>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            config,
            store,
            llm,
            messaging,
            recorder,
            registry,
            policy,
            hitl: Arc::new(HitlCoordinator::new()),
            processes,
            audit,
            sessions: Arc::new(SessionManager::new()),
            tasks: TaskTracker::new(),
        }
    }

    /// Track a fire-and-forget background task so shutdown can await it.
    pub fn track_background_task<F>(&self, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(fut);
    }

    /// Await tracked background work up to `timeout`. Anything still
    /// running after that is abandoned (and logged).
    pub async fn wait_for_in_flight(&self, timeout: Duration) {
        self.tasks.close();
        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            warn!(
                pending = self.tasks.len(),
                "shutdown grace elapsed with tasks still in flight"
            );
        }
    }
}
