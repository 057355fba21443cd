//! Session-scoped tools registered for the lifetime of one agent session.
//! Each closes over the shared session handle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::hitl::HitlCoordinator;
use crate::messaging::MessagingClient;
use crate::session::{SessionStatus, SharedSession, TaskStatus};
use crate::tools::{Tool, ToolResult};

pub struct CreateTaskPlanTool {
    pub session: SharedSession,
}

#[async_trait]
impl Tool for CreateTaskPlanTool {
    fn name(&self) -> &str {
        "create_task_plan"
    }
    fn description(&self) -> &str {
        "Create or replace the markdown task checklist for this session"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "plan": {
                    "type": "string",
                    "description": "Markdown checklist, one `- [ ] task` per line"
                }
            },
            "required": ["plan"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let plan = args.get("plan").and_then(|v| v.as_str()).unwrap_or_default();
        if plan.trim().is_empty() {
            return ToolResult::error("plan must not be empty");
        }
        self.session.lock().unwrap().task_plan = plan.to_string();
        ToolResult::success("Task plan saved")
    }
}

pub struct GetTaskPlanTool {
    pub session: SharedSession,
}

#[async_trait]
impl Tool for GetTaskPlanTool {
    fn name(&self) -> &str {
        "get_task_plan"
    }
    fn description(&self) -> &str {
        "Read the current task checklist"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }
    async fn execute(&self, _args: serde_json::Value) -> ToolResult {
        let plan = self.session.lock().unwrap().task_plan.clone();
        if plan.is_empty() {
            ToolResult::success("No task plan yet")
        } else {
            ToolResult::success(plan)
        }
    }
}

pub struct UpdateTaskStatusTool {
    pub session: SharedSession,
}

#[async_trait]
impl Tool for UpdateTaskStatusTool {
    fn name(&self) -> &str {
        "update_task_status"
    }
    fn description(&self) -> &str {
        "Mark a structured-plan task as in_progress, done, or failed"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "integer" },
                "status": { "type": "string", "enum": ["in_progress", "done", "failed"] }
            },
            "required": ["task_id", "status"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let Some(task_id) = args.get("task_id").and_then(|v| v.as_u64()) else {
            return ToolResult::error("missing task_id");
        };
        let status = match args.get("status").and_then(|v| v.as_str()) {
            Some("in_progress") => TaskStatus::InProgress,
            Some("done") => TaskStatus::Done,
            Some("failed") => TaskStatus::Failed,
            _ => return ToolResult::error("status must be in_progress, done, or failed"),
        };
        let mut session = self.session.lock().unwrap();
        let Some(plan) = session.plan.as_mut() else {
            return ToolResult::error("no structured plan in this session");
        };
        match plan.tasks.iter_mut().find(|t| t.id == task_id as usize) {
            Some(task) => {
                task.status = status;
                ToolResult::success(format!("Task {task_id} set to {status:?}"))
            }
            None => ToolResult::error(format!("no task with id {task_id}")),
        }
    }
}

/// Lets the agent pause itself for a human decision. The session shows
/// `waiting_user` while blocked so the dispatcher routes the next message
/// here.
pub struct RequestApprovalTool {
    pub session: SharedSession,
    pub hitl: Arc<HitlCoordinator>,
    pub messaging: Arc<dyn MessagingClient>,
    pub timeout: Duration,
}

#[async_trait]
impl Tool for RequestApprovalTool {
    fn name(&self) -> &str {
        "request_user_approval"
    }
    fn description(&self) -> &str {
        "Ask the user to approve a destructive or ambiguous step before doing it"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "question": { "type": "string", "description": "What to ask the user" }
            },
            "required": ["question"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let question = match args.get("question").and_then(|v| v.as_str()) {
            Some(q) if !q.trim().is_empty() => q,
            _ => return ToolResult::error("missing question"),
        };
        let handle = {
            let mut s = self.session.lock().unwrap();
            s.status = SessionStatus::WaitingUser;
            s.handle.clone()
        };
        let answer = self
            .hitl
            .request_user_approval(&handle, question, self.messaging.as_ref(), self.timeout)
            .await;
        {
            let mut s = self.session.lock().unwrap();
            // Cancellation may have landed while we were blocked.
            if s.status == SessionStatus::WaitingUser {
                s.status = SessionStatus::Running;
            }
        }
        ToolResult::success(format!("User answered: {answer}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionManager;

    #[tokio::test]
    async fn plan_tools_roundtrip() {
        let mgr = SessionManager::new();
        let (session, _cancel) = mgr.create_session("h", "obj", 15).unwrap();
        let create = CreateTaskPlanTool {
            session: Arc::clone(&session),
        };
        let get = GetTaskPlanTool {
            session: Arc::clone(&session),
        };
        let r = create
            .execute(serde_json::json!({"plan": "- [ ] leer\n- [ ] informar"}))
            .await;
        assert!(r.success);
        let r = get.execute(serde_json::json!({})).await;
        assert!(r.content.contains("[ ] leer"));
    }

    #[tokio::test]
    async fn update_status_requires_a_structured_plan() {
        let mgr = SessionManager::new();
        let (session, _cancel) = mgr.create_session("h", "obj", 15).unwrap();
        let update = UpdateTaskStatusTool {
            session: Arc::clone(&session),
        };
        let r = update
            .execute(serde_json::json!({"task_id": 1, "status": "done"}))
            .await;
        assert!(!r.success);
    }
}
