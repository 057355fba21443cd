//! Agent-session entry point: bootstrap, mode selection, the
//! planner–orchestrator phases, and terminal-state handling.
//!
//! Runs as a background task; the originating webhook trace is long gone,
//! so a fresh trace (message_type `agent`) is opened here.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use recado_memory::types::{SpanKind, TraceMessageType, TraceStatus};
use recado_trace::context::generation_metadata;
use recado_trace::TraceContext;

use crate::llm::ChatMessage;
use crate::session::persist::{round_record, SessionJournal};
use crate::session::planner::{self, topological_order};
use crate::session::reactive::{run_reactive, ReactiveOutcome};
use crate::session::session_tools::{
    CreateTaskPlanTool, GetTaskPlanTool, RequestApprovalTool, UpdateTaskStatusTool,
};
use crate::session::worker::{
    build_worker_prompt, collect_results, resolve_task_categories, worker_span_name,
};
use crate::session::{SessionStatus, SharedSession, TaskStatus, MAX_REPLANS};
use crate::state::RuntimeState;
use crate::tools::tool_loop::{execute_tool_loop, ToolLoopDeps};
use crate::tools::{Tool, ToolRegistry};

/// Optional workspace files prepended as system messages at session start.
const BOOTSTRAP_FILES: &[&str] = &["SOUL.md", "USER.md", "TOOLS.md"];

/// Run one agent session to a terminal state. Always releases the active
/// slot and notifies the user on the way out.
pub async fn run_agent_session(
    state: Arc<RuntimeState>,
    session: SharedSession,
    cancel: CancellationToken,
) {
    let (handle, objective, session_id) = {
        let s = session.lock().unwrap();
        (s.handle.clone(), s.objective.clone(), s.session_id.clone())
    };

    let trace = state.recorder.start_trace(
        &handle,
        &objective,
        TraceMessageType::Agent,
        serde_json::json!({ "session_id": session_id.as_str() }),
    );

    let bootstrap = load_bootstrap(&state.config.agent.workspace_dir);
    let registry = session_registry(&state, &session);
    let journal = SessionJournal::new(&state.config.agent.sessions_dir, &session.lock().unwrap());

    let outcome = drive(
        &state,
        &registry,
        &session,
        &cancel,
        trace.as_ref(),
        bootstrap,
        &journal,
    )
    .await;

    let (final_status, message) = match outcome {
        SessionOutcome::Completed(text) => (SessionStatus::Completed, text),
        SessionOutcome::Cancelled => (
            SessionStatus::Cancelled,
            "🛑 Sesión cancelada.".to_string(),
        ),
        SessionOutcome::Failed(reason) => {
            warn!(session_id = %session_id, reason, "agent session failed");
            (
                SessionStatus::Failed,
                format!("❌ La sesión de agente falló: {reason}"),
            )
        }
    };

    {
        let mut s = session.lock().unwrap();
        // Cancellation set its own status already; don't overwrite it.
        if !s.status.is_terminal() {
            s.status = final_status;
        }
    }
    if let Err(e) = state.messaging.send_message(&handle, &message).await {
        warn!(error = %e, handle, "could not deliver session outcome");
    }
    if let Some(ctx) = &trace {
        let status = match final_status {
            SessionStatus::Completed => TraceStatus::Completed,
            _ => TraceStatus::Failed,
        };
        state.recorder.finish_trace(ctx, status, Some(&message), None);
    }
    state.sessions.release(&handle);
    info!(session_id = %session_id, status = ?final_status, "agent session finished");
}

enum SessionOutcome {
    Completed(String),
    Cancelled,
    Failed(String),
}

async fn drive(
    state: &Arc<RuntimeState>,
    registry: &ToolRegistry,
    session: &SharedSession,
    cancel: &CancellationToken,
    trace: Option<&TraceContext>,
    bootstrap: Vec<ChatMessage>,
    journal: &SessionJournal,
) -> SessionOutcome {
    let (handle, objective, session_id) = {
        let s = session.lock().unwrap();
        (s.handle.clone(), s.objective.clone(), s.session_id.clone())
    };

    // UNDERSTAND. A plan that fails to parse sends the session to the
    // reactive fallback instead of failing.
    let plan_span = trace.map(|ctx| {
        state
            .recorder
            .start_span(ctx, None, "planner:create_plan", SpanKind::Generation, Some(&objective))
    });
    let context = bootstrap
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let plan_outcome = match planner::create_plan(state.llm.as_ref(), &objective, &context).await {
        Ok(o) => o,
        Err(e) => {
            if let Some(span) = plan_span {
                state
                    .recorder
                    .finish_span(span, TraceStatus::Failed, Some(&e.to_string()), serde_json::json!({}));
            }
            return SessionOutcome::Failed(e.to_string());
        }
    };
    if let Some(span) = plan_span {
        state.recorder.finish_span(
            span,
            TraceStatus::Completed,
            Some(&format!("{} tasks", plan_outcome.plan.tasks.len())),
            generation_metadata(
                plan_outcome.response.input_tokens,
                plan_outcome.response.output_tokens,
                &plan_outcome.response.model,
            ),
        );
    }

    if !plan_outcome.parsed {
        info!(session_id = %session_id, "planner output unusable — reactive fallback");
        return match run_reactive(state, registry, session, cancel, trace, bootstrap, journal).await
        {
            ReactiveOutcome::Completed(text) => SessionOutcome::Completed(text),
            ReactiveOutcome::Cancelled => SessionOutcome::Cancelled,
            ReactiveOutcome::Failed(reason) => SessionOutcome::Failed(reason),
        };
    }

    let mut plan = plan_outcome.plan;
    session.lock().unwrap().plan = Some(plan.clone());

    // EXECUTE tasks in dependency order, replanning on failure up to the cap.
    loop {
        let order = topological_order(&plan);
        let total = plan.tasks.len();
        let mut failed_task: Option<usize> = None;

        for task_id in order {
            if cancel.is_cancelled() {
                return SessionOutcome::Cancelled;
            }
            let task = match plan.tasks.iter_mut().find(|t| t.id == task_id) {
                Some(t) if t.status == TaskStatus::Pending => t,
                _ => continue,
            };
            task.status = TaskStatus::InProgress;
            let task_snapshot = task.clone();
            session.lock().unwrap().plan = Some(plan.clone());

            let prior = collect_results(&plan);
            let categories = resolve_task_categories(&task_snapshot, &registry.category_names());
            let prompt = build_worker_prompt(&task_snapshot, &plan, &prior);

            let worker_span = trace.map(|ctx| {
                state.recorder.start_span(
                    ctx,
                    None,
                    &worker_span_name(&task_snapshot),
                    SpanKind::Agent,
                    Some(&task_snapshot.description),
                )
            });
            let parent = worker_span.as_ref().map(|s| s.id.clone());

            let mut messages = bootstrap.clone();
            messages.push(ChatMessage::system(prompt));
            messages.push(ChatMessage::user(task_snapshot.description.clone()));
            let deps = ToolLoopDeps {
                llm: state.llm.as_ref(),
                policy: &state.policy,
                hitl: &state.hitl,
                messaging: state.messaging.as_ref(),
                audit: Some(&state.audit),
                recorder: trace.map(|ctx| (state.recorder.as_ref(), ctx)),
                handle: &handle,
                session_id: session_id.as_str(),
                compaction_threshold: state.config.pipeline.compaction_threshold,
            };
            let result = execute_tool_loop(
                &deps,
                registry,
                &mut messages,
                &categories,
                state.config.pipeline.max_tools_per_call,
                parent.as_ref(),
            )
            .await;

            let Some(task) = plan.tasks.iter_mut().find(|t| t.id == task_id) else {
                continue;
            };
            match result {
                Ok(outcome) if !outcome.reply.trim().is_empty() => {
                    task.result = Some(outcome.reply.clone());
                    task.status = TaskStatus::Done;
                    if let Some(span) = worker_span {
                        state.recorder.finish_span(
                            span,
                            TraceStatus::Completed,
                            Some(&outcome.reply),
                            serde_json::json!({ "iterations": outcome.iterations }),
                        );
                    }
                }
                Ok(_) => {
                    task.status = TaskStatus::Failed;
                    failed_task = Some(task_id);
                    if let Some(span) = worker_span {
                        state.recorder.finish_span(
                            span,
                            TraceStatus::Failed,
                            Some("empty worker result"),
                            serde_json::json!({}),
                        );
                    }
                }
                Err(e) => {
                    task.status = TaskStatus::Failed;
                    failed_task = Some(task_id);
                    if let Some(span) = worker_span {
                        state.recorder.finish_span(
                            span,
                            TraceStatus::Failed,
                            Some(&e.to_string()),
                            serde_json::json!({}),
                        );
                    }
                }
            }

            {
                let mut s = session.lock().unwrap();
                s.plan = Some(plan.clone());
                let done = plan.tasks.iter().filter(|t| t.status == TaskStatus::Done).count();
                s.iteration = done;
                journal.append(&round_record(
                    &s,
                    done,
                    vec![format!("task_{task_id}")],
                    plan.tasks
                        .iter()
                        .find(|t| t.id == task_id)
                        .and_then(|t| t.result.as_deref())
                        .unwrap_or(""),
                ));
            }
            let done = plan.tasks.iter().filter(|t| t.status == TaskStatus::Done).count();
            let _ = state
                .messaging
                .send_message(&handle, &format!("🔧 {done}/{total}"))
                .await;

            if failed_task.is_some() {
                break;
            }
        }

        match failed_task {
            None => break,
            Some(task_id) => {
                if plan.replans >= MAX_REPLANS {
                    return SessionOutcome::Failed(format!(
                        "task {task_id} failed after {} replans",
                        plan.replans
                    ));
                }
                let Some(failed) = plan.tasks.iter().find(|t| t.id == task_id).cloned() else {
                    break;
                };
                let results = collect_results(&plan);
                let replan_span = trace.map(|ctx| {
                    state
                        .recorder
                        .start_span(ctx, None, "planner:replan", SpanKind::Generation, None)
                });
                match planner::replan(state.llm.as_ref(), &plan, &failed, &results).await {
                    Ok(o) => {
                        if let Some(span) = replan_span {
                            state.recorder.finish_span(
                                span,
                                TraceStatus::Completed,
                                Some(&format!("{} tasks", o.plan.tasks.len())),
                                generation_metadata(
                                    o.response.input_tokens,
                                    o.response.output_tokens,
                                    &o.response.model,
                                ),
                            );
                        }
                        plan = o.plan;
                        session.lock().unwrap().plan = Some(plan.clone());
                        info!(session_id = %session_id, replans = plan.replans, "replanned");
                    }
                    Err(e) => {
                        if let Some(span) = replan_span {
                            state.recorder.finish_span(
                                span,
                                TraceStatus::Failed,
                                Some(&e.to_string()),
                                serde_json::json!({}),
                            );
                        }
                        return SessionOutcome::Failed(e.to_string());
                    }
                }
            }
        }
    }

    // SYNTHESIZE.
    let synth_span = trace.map(|ctx| {
        state
            .recorder
            .start_span(ctx, None, "planner:synthesize", SpanKind::Generation, None)
    });
    match planner::synthesize(state.llm.as_ref(), &plan).await {
        Ok(r) => {
            if let Some(span) = synth_span {
                state.recorder.finish_span(
                    span,
                    TraceStatus::Completed,
                    Some(&r.content),
                    generation_metadata(r.input_tokens, r.output_tokens, &r.model),
                );
            }
            SessionOutcome::Completed(r.content)
        }
        Err(e) => {
            if let Some(span) = synth_span {
                state.recorder.finish_span(
                    span,
                    TraceStatus::Failed,
                    Some(&e.to_string()),
                    serde_json::json!({}),
                );
            }
            SessionOutcome::Failed(e.to_string())
        }
    }
}

/// Registry copy with the session-scoped tools added.
fn session_registry(state: &Arc<RuntimeState>, session: &SharedSession) -> ToolRegistry {
    let extra: Vec<(String, Arc<dyn Tool>)> = vec![
        (
            "agent".to_string(),
            Arc::new(CreateTaskPlanTool {
                session: Arc::clone(session),
            }),
        ),
        (
            "agent".to_string(),
            Arc::new(GetTaskPlanTool {
                session: Arc::clone(session),
            }),
        ),
        (
            "agent".to_string(),
            Arc::new(UpdateTaskStatusTool {
                session: Arc::clone(session),
            }),
        ),
        (
            "agent".to_string(),
            Arc::new(RequestApprovalTool {
                session: Arc::clone(session),
                hitl: Arc::clone(&state.hitl),
                messaging: Arc::clone(&state.messaging),
                timeout: Duration::from_secs(120),
            }),
        ),
    ];
    state.registry.extended(extra)
}

/// Read the optional bootstrap files into system messages.
fn load_bootstrap(workspace_dir: &str) -> Vec<ChatMessage> {
    let mut out = Vec::new();
    for name in BOOTSTRAP_FILES {
        let path = std::path::Path::new(workspace_dir).join(name);
        if let Ok(content) = std::fs::read_to_string(&path) {
            if !content.trim().is_empty() {
                out.push(ChatMessage::system(content));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;
    use crate::pipeline::dispatch::testutil::{state_with, ScriptedLlm};
    use crate::tools::testutil::registry_with;

    const PLAN: &str = r#"{
        "objective": "contar archivos en app/",
        "context_summary": "",
        "tasks": [
            {"id": 1, "description": "listar app/", "worker_type": "reader",
             "tools": ["selfcode"], "depends_on": []},
            {"id": 2, "description": "informar el total", "worker_type": "reporter",
             "tools": ["notes"], "depends_on": [1]}
        ]
    }"#;

    #[tokio::test]
    async fn planner_flow_completes_without_replans() {
        let mut worker1_call = ScriptedLlm::text("");
        worker1_call.tool_calls = vec![ToolCall {
            id: "c".to_string(),
            name: "list_source_files".to_string(),
            arguments: serde_json::json!({"text": "app"}),
        }];
        let registry = registry_with(&[
            ("selfcode", &["list_source_files"]),
            ("notes", &["add_note"]),
            ("evaluation", &["dataset_stats"]),
            ("debugging", &["recent_activity"]),
            ("conversation", &["save_memory"]),
        ]);
        let (state, messaging) = state_with(
            vec![
                ScriptedLlm::text(PLAN),                    // planner:create_plan
                worker1_call,                               // worker 1 uses a tool
                ScriptedLlm::text("hay 14 archivos"),       // worker 1 final
                ScriptedLlm::text("el total es 14"),        // worker 2 final
                ScriptedLlm::text("La carpeta app/ tiene 14 archivos."), // synthesize
            ],
            registry_with(&[("selfcode", &["list_source_files"])]),
        );
        let (session, cancel) = state
            .sessions
            .create_session("549110001111", "contar archivos en app/", 15)
            .unwrap();

        let outcome = drive(
            &state,
            &registry,
            &session,
            &cancel,
            None,
            Vec::new(),
            &SessionJournal::new(
                tempfile::tempdir().unwrap().path().to_str().unwrap(),
                &session.lock().unwrap(),
            ),
        )
        .await;

        match outcome {
            SessionOutcome::Completed(text) => assert!(text.contains("14")),
            _ => panic!("expected completion"),
        }
        let plan = session.lock().unwrap().plan.clone().unwrap();
        assert_eq!(plan.replans, 0);
        assert!(plan.tasks.iter().all(|t| t.status == TaskStatus::Done));
        // Progress updates went out (🔧 1/2, 🔧 2/2).
        let sent = messaging.sent.lock().unwrap();
        assert!(sent.iter().any(|(_, m)| m.contains("1/2")));
        assert!(sent.iter().any(|(_, m)| m.contains("2/2")));
    }

    #[tokio::test]
    async fn unparseable_plan_falls_back_to_reactive() {
        let registry = registry_with(&[("notes", &["add_note"])]);
        let (state, _messaging) = state_with(
            vec![
                ScriptedLlm::text("I would rather not produce JSON today."), // planner
                ScriptedLlm::text("objective complete — nothing to do"),     // reactive round
            ],
            registry_with(&[("notes", &["add_note"])]),
        );
        let (session, cancel) = state
            .sessions
            .create_session("h", "objetivo trivial", 3)
            .unwrap();
        let outcome = drive(
            &state,
            &registry,
            &session,
            &cancel,
            None,
            Vec::new(),
            &SessionJournal::new(
                tempfile::tempdir().unwrap().path().to_str().unwrap(),
                &session.lock().unwrap(),
            ),
        )
        .await;
        assert!(matches!(outcome, SessionOutcome::Completed(_)));
    }
}
