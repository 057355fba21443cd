//! Reactive fallback mode: a flat observe→act loop used when the planner
//! could not produce a structured plan.
//!
//! Each round re-injects the task plan as a dedicated system message
//! (replacing the previous one, found by marker, so history is not
//! duplicated), runs the tool loop, feeds observations to the loop
//! detector, and persists a journal line.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use recado_trace::TraceContext;

use crate::llm::{ChatMessage, Role};
use crate::session::loopdetect::{LoopAction, LoopDetector};
use crate::session::persist::{round_record, SessionJournal};
use crate::session::{SessionStatus, SharedSession};
use crate::state::RuntimeState;
use crate::tools::tool_loop::{execute_tool_loop, ToolLoopDeps};
use crate::tools::ToolRegistry;

/// Marker identifying the injected plan message across rounds.
const PLAN_MARKER: &str = "## Current task plan";
const SCRATCHPAD_MARKER: &str = "## Scratchpad";

/// Natural-language completion markers, checked only after the
/// deterministic checklist test.
const COMPLETION_MARKERS: &[&str] = &[
    "objective complete",
    "task complete",
    "all done",
    "objetivo completado",
    "tarea completada",
];

/// Outcome of the reactive loop.
pub enum ReactiveOutcome {
    Completed(String),
    Cancelled,
    Failed(String),
}

pub async fn run_reactive(
    state: &Arc<RuntimeState>,
    registry: &ToolRegistry,
    session: &SharedSession,
    cancel: &CancellationToken,
    trace: Option<&TraceContext>,
    bootstrap: Vec<ChatMessage>,
    journal: &SessionJournal,
) -> ReactiveOutcome {
    let (handle, objective, session_id, max_iterations) = {
        let s = session.lock().unwrap();
        (
            s.handle.clone(),
            s.objective.clone(),
            s.session_id.clone(),
            s.max_iterations,
        )
    };

    let mut messages: Vec<ChatMessage> = bootstrap;
    messages.push(ChatMessage::system(format!(
        "You are an autonomous agent working in the background.\n\
         Objective: {objective}\n\
         Use create_task_plan to lay out a markdown checklist, tick items \
         with update_task_status or by rewriting the plan, and say \
         \"objective complete\" when everything is done. Use \
         <scratchpad>…</scratchpad> for notes you want to keep between \
         rounds."
    )));
    messages.push(ChatMessage::user(objective.clone()));

    let mut detector = LoopDetector::new();
    let mut last_reply = String::new();
    let categories = registry.category_names();

    for round in 0..max_iterations {
        if cancel.is_cancelled() {
            info!(session_id = %session_id, round, "reactive loop observed cancellation");
            return ReactiveOutcome::Cancelled;
        }

        inject_marked_message(&mut messages, PLAN_MARKER, {
            let s = session.lock().unwrap();
            if s.task_plan.is_empty() {
                None
            } else {
                Some(format!("{PLAN_MARKER}\n{}", s.task_plan))
            }
        });
        inject_marked_message(&mut messages, SCRATCHPAD_MARKER, {
            let s = session.lock().unwrap();
            if s.scratchpad.is_empty() {
                None
            } else {
                Some(format!("{SCRATCHPAD_MARKER}\n{}", s.scratchpad))
            }
        });

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
        let outcome = match execute_tool_loop(&deps, registry, &mut messages, &categories, 8, None).await
        {
            Ok(o) => o,
            Err(e) => {
                warn!(error = %e, session_id = %session_id, "reactive round failed");
                return ReactiveOutcome::Failed(e.to_string());
            }
        };
        last_reply = outcome.reply.clone();

        // Loop detection over the round's tool calls.
        for (tool, hash) in &outcome.observations {
            match detector.observe(session_id.as_str(), tool, *hash) {
                LoopAction::Continue => {}
                LoopAction::Warn { message, .. } => {
                    messages.push(ChatMessage::system(message));
                }
                LoopAction::CircuitBreak { detector } => {
                    session.lock().unwrap().status = SessionStatus::Failed;
                    return ReactiveOutcome::Failed(format!(
                        "aborted by loop detector ({detector})"
                    ));
                }
            }
        }

        // Persist the scratchpad fragment, if the model left one.
        if let Some(pad) = extract_scratchpad(&outcome.reply) {
            session.lock().unwrap().scratchpad = pad;
        }

        {
            let mut s = session.lock().unwrap();
            s.iteration = round + 1;
            journal.append(&round_record(&s, round + 1, outcome.tools_used.clone(), &last_reply));
        }

        if is_complete(session, &outcome.reply) {
            info!(session_id = %session_id, round, "reactive loop complete");
            return ReactiveOutcome::Completed(strip_scratchpad(&outcome.reply));
        }
    }

    info!(session_id = %session_id, "reactive loop exhausted its iterations");
    ReactiveOutcome::Completed(strip_scratchpad(&last_reply))
}

/// Replace (or insert) the system message identified by `marker`. `None`
/// removes it.
fn inject_marked_message(messages: &mut Vec<ChatMessage>, marker: &str, content: Option<String>) {
    messages.retain(|m| !(m.role == Role::System && m.content.starts_with(marker)));
    if let Some(content) = content {
        messages.push(ChatMessage::system(content));
    }
}

/// Deterministic completion first: a checklist with nothing unticked is
/// done, whatever the prose says. Then the natural-language markers.
fn is_complete(session: &SharedSession, reply: &str) -> bool {
    let plan = session.lock().unwrap().task_plan.clone();
    if !plan.is_empty() {
        return !plan.contains("[ ]");
    }
    let lower = reply.to_lowercase();
    COMPLETION_MARKERS.iter().any(|m| lower.contains(m))
}

/// Pull the scratchpad fragment out of a reply.
pub fn extract_scratchpad(reply: &str) -> Option<String> {
    let start = reply.find("<scratchpad>")?;
    let after = &reply[start + "<scratchpad>".len()..];
    let end = after.find("</scratchpad>")?;
    let pad = after[..end].trim();
    if pad.is_empty() {
        None
    } else {
        Some(pad.to_string())
    }
}

/// Remove the scratchpad fragment from user-facing text.
pub fn strip_scratchpad(reply: &str) -> String {
    match (reply.find("<scratchpad>"), reply.find("</scratchpad>")) {
        (Some(s), Some(e)) if e > s => {
            let mut out = reply[..s].to_string();
            out.push_str(&reply[e + "</scratchpad>".len()..]);
            out.trim().to_string()
        }
        _ => reply.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;
    use crate::pipeline::dispatch::testutil::{state_with, ScriptedLlm};
    use crate::session::{SessionManager, SessionStatus};
    use crate::tools::testutil::registry_with;

    #[tokio::test]
    async fn five_identical_calls_trip_the_circuit_breaker() {
        // One reactive round in which the model calls the same tool with the
        // same arguments five times before giving up.
        let mut responses = Vec::new();
        for _ in 0..5 {
            let mut call = ScriptedLlm::text("");
            call.tool_calls = vec![ToolCall {
                id: "c".to_string(),
                name: "list_source_files".to_string(),
                arguments: serde_json::json!({"path": "app"}),
            }];
            responses.push(call);
        }
        responses.push(ScriptedLlm::text("sigo intentando"));

        let registry = registry_with(&[("selfcode", &["list_source_files"])]);
        let (state, _messaging) = state_with(responses, registry_with(&[("selfcode", &["list_source_files"])]));
        let (session, cancel) = state.sessions.create_session("h", "revisar app/", 10).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let journal = SessionJournal::new(dir.path().to_str().unwrap(), &session.lock().unwrap());

        let outcome = run_reactive(&state, &registry, &session, &cancel, None, Vec::new(), &journal).await;
        match outcome {
            ReactiveOutcome::Failed(reason) => assert!(reason.contains("genericRepeat")),
            _ => panic!("expected circuit break"),
        }
        assert_eq!(session.lock().unwrap().status, SessionStatus::Failed);
    }

    #[test]
    fn scratchpad_extraction_and_stripping() {
        let reply = "Avancé con el plan.\n<scratchpad>pendiente: revisar tests</scratchpad>\nSigo luego.";
        assert_eq!(
            extract_scratchpad(reply).as_deref(),
            Some("pendiente: revisar tests")
        );
        let stripped = strip_scratchpad(reply);
        assert!(!stripped.contains("scratchpad"));
        assert!(stripped.contains("Avancé"));
        assert!(stripped.contains("Sigo luego."));
    }

    #[test]
    fn empty_scratchpad_is_none() {
        assert!(extract_scratchpad("x <scratchpad>  </scratchpad> y").is_none());
        assert!(extract_scratchpad("sin etiquetas").is_none());
    }

    #[test]
    fn checklist_completion_is_deterministic() {
        let mgr = SessionManager::new();
        let (session, _c) = mgr.create_session("h", "obj", 15).unwrap();
        session.lock().unwrap().task_plan = "- [x] leer\n- [ ] informar".to_string();
        // Prose claims completion but the checklist wins.
        assert!(!is_complete(&session, "all done"));
        session.lock().unwrap().task_plan = "- [x] leer\n- [x] informar".to_string();
        assert!(is_complete(&session, "seguimos"));
    }

    #[test]
    fn marker_scan_applies_without_a_plan() {
        let mgr = SessionManager::new();
        let (session, _c) = mgr.create_session("h2", "obj", 15).unwrap();
        assert!(is_complete(&session, "Listo — objective complete."));
        assert!(!is_complete(&session, "todavía trabajando"));
    }

    #[test]
    fn plan_injection_replaces_previous_message() {
        let mut messages = vec![ChatMessage::user("objetivo")];
        inject_marked_message(
            &mut messages,
            PLAN_MARKER,
            Some(format!("{PLAN_MARKER}\n- [ ] a")),
        );
        inject_marked_message(
            &mut messages,
            PLAN_MARKER,
            Some(format!("{PLAN_MARKER}\n- [x] a")),
        );
        let plan_messages: Vec<&ChatMessage> = messages
            .iter()
            .filter(|m| m.content.starts_with(PLAN_MARKER))
            .collect();
        assert_eq!(plan_messages.len(), 1);
        assert!(plan_messages[0].content.contains("[x] a"));
    }
}
