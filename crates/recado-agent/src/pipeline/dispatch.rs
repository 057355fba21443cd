//! Webhook fan-in and the phase A–D request pipeline.
//!
//! Each inbound message runs on its own task. Ordering within a
//! conversation comes from the store (messages persist in arrival order);
//! cross-conversation work is fully concurrent.

use std::sync::Arc;

use tracing::{debug, info, warn};

use recado_core::types::log_context_budget;
use recado_core::Result;
use recado_memory::types::{MessageRole, TraceMessageType, TraceStatus};
use recado_trace::TraceContext;

use crate::guardrails;
use crate::llm::{ChatMessage, LlmClient, Role};
use crate::pipeline::builder::{
    capabilities_section, extract_user_facts, get_windowed_history, ContextBuilder,
};
use crate::pipeline::{curate, slash, summarize};
use crate::state::RuntimeState;
use crate::tools::router::{classify_intent, is_toolless};
use crate::tools::tool_loop::{execute_tool_loop, ToolLoopDeps};

/// Base persona prompt. The active version in the prompt store overrides
/// this fallback at runtime.
const BASE_PROMPT: &str = "You are recado, a personal WhatsApp assistant. \
Be concise, match the user's language, and use tools when they help.";

/// How many similar memories to retrieve before threshold filtering.
const MEMORY_TOP_K: usize = 5;
/// Fallback count when nothing passes the distance threshold.
const MEMORY_FALLBACK_K: usize = 3;

/// One inbound webhook message, already verified and extracted upstream.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub external_id: String,
    pub from: String,
    pub text: String,
    pub message_type: TraceMessageType,
}

/// Process one inbound message end to end. Returns the delivered reply, or
/// `None` when the message was dropped (duplicate), consumed by HITL, or a
/// command.
pub async fn handle_inbound(state: Arc<RuntimeState>, msg: InboundMessage) -> Result<Option<String>> {
    // 1. Exactly-once: atomic insert-if-absent on the external id.
    match state.store.mark_processed(&msg.external_id) {
        Ok(true) => {}
        Ok(false) => {
            debug!(external_id = %msg.external_id, "duplicate webhook delivery dropped");
            return Ok(None);
        }
        Err(e) => {
            warn!(error = %e, "dedup check failed, processing anyway");
        }
    }

    // 2. A pending approval consumes the message before anything else.
    if state.hitl.resolve(&msg.from, &msg.text) {
        debug!(handle = %msg.from, "message consumed by pending approval");
        return Ok(None);
    }

    // 3. Slash commands bypass the pipeline.
    if msg.text.starts_with('/') {
        let reply = slash::handle_command(&state, &msg.from, &msg.text).await;
        if let Some(reply) = reply {
            deliver(&state, &msg.from, &reply, None).await;
            return Ok(Some(reply));
        }
        return Ok(None);
    }

    // 4. Trace root.
    let trace = state.recorder.start_trace(
        &msg.from,
        &msg.text,
        msg.message_type,
        serde_json::json!({ "external_message_id": msg.external_id }),
    );

    let result = run_pipeline(&state, &msg, trace.as_ref()).await;

    match &result {
        // The success path finishes its trace inside `run_pipeline`, where
        // the outbound message id is known.
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, handle = %msg.from, "pipeline failed");
            if let Some(ctx) = &trace {
                state
                    .recorder
                    .finish_trace(ctx, TraceStatus::Failed, Some(&e.to_string()), None);
            }
            // Short localized apology; the raw error stays in the trace.
            deliver(&state, &msg.from, "Perdón, no pude procesar tu mensaje.", None).await;
        }
    }
    result
}

async fn run_pipeline(
    state: &Arc<RuntimeState>,
    msg: &InboundMessage,
    trace: Option<&TraceContext>,
) -> Result<Option<String>> {
    let conv_id = state
        .store
        .get_or_create_conversation(&msg.from)
        .map_err(|e| recado_core::RecadoError::Database(e.to_string()))?;

    // Phase A — in parallel: query embedding, user message persistence,
    // daily log excerpt.
    let span_a = trace.map(|ctx| {
        state.recorder.start_span(
            ctx,
            None,
            "phase:ingest",
            recado_memory::types::SpanKind::Span,
            None,
        )
    });
    let (embedding, saved, daily) = tokio::join!(
        async {
            match state.llm.embed(&msg.text).await {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!(error = %e, "query embedding failed; retrieval degraded");
                    None
                }
            }
        },
        async { state.store.save_message(conv_id, MessageRole::User, &msg.text) },
        async { state.store.get_daily_excerpt(10).unwrap_or_default() },
    );
    saved.map_err(|e| recado_core::RecadoError::Database(e.to_string()))?;
    if let Some(span) = span_a {
        state
            .recorder
            .finish_span(span, TraceStatus::Completed, None, serde_json::json!({}));
    }

    // Phase B — in parallel: similar memories (threshold with top-3
    // fallback), similar notes, windowed history + summary, sticky
    // categories, user facts source.
    let span_b = trace.map(|ctx| {
        state.recorder.start_span(
            ctx,
            None,
            "phase:retrieval",
            recado_memory::types::SpanKind::Span,
            None,
        )
    });
    let threshold = state.config.pipeline.memory_similarity_threshold;
    let verbatim = state.config.pipeline.history_verbatim_count;
    let (memories, notes, (history, summary), sticky, active_memories) = tokio::join!(
        async {
            let Some(vec) = embedding.as_deref() else {
                return Vec::new();
            };
            let hits = state
                .store
                .search_similar_memories_with_distance(vec, MEMORY_TOP_K)
                .unwrap_or_default();
            let close: Vec<String> = hits
                .iter()
                .filter(|(_, d)| *d < threshold)
                .map(|(c, _)| c.clone())
                .collect();
            if close.is_empty() {
                // Nothing under the threshold — fall back to the closest 3.
                hits.into_iter()
                    .take(MEMORY_FALLBACK_K)
                    .map(|(c, _)| c)
                    .collect()
            } else {
                close
            }
        },
        async {
            let Some(vec) = embedding.as_deref() else {
                return Vec::new();
            };
            state
                .store
                .search_similar_notes_with_distance(vec, 3)
                .unwrap_or_default()
                .into_iter()
                .map(|(c, _)| c)
                .collect::<Vec<String>>()
        },
        async { get_windowed_history(&state.store, conv_id, verbatim) },
        async { state.store.get_sticky_categories(conv_id).unwrap_or_default() },
        async { state.store.get_active_memories().unwrap_or_default() },
    );
    let user_facts = extract_user_facts(&active_memories);
    if let Some(span) = span_b {
        state.recorder.finish_span(
            span,
            TraceStatus::Completed,
            None,
            serde_json::json!({ "memories": memories.len(), "notes": notes.len() }),
        );
    }

    // Phase C — classification.
    let categories = classify_intent(
        &msg.text,
        &history,
        &sticky,
        state.llm.as_ref(),
        &state.registry,
    )
    .await;
    info!(handle = %msg.from, categories = categories.join(","), "intent classified");

    // Phase D — build the consolidated prompt and generate.
    let base = state
        .store
        .get_active_prompt("system")
        .ok()
        .flatten()
        .map(|p| p.content)
        .unwrap_or_else(|| BASE_PROMPT.to_string());
    let system = ContextBuilder::new(base)
        .add_section("user_memories", &memories.join("\n"))
        .add_section("relevant_notes", &notes.join("\n"))
        .add_section("recent_activity", &daily.join("\n"))
        .add_section(
            "capabilities",
            &if is_toolless(&categories) {
                capabilities_section(&[])
            } else {
                capabilities_section(&categories)
            },
        )
        .add_section("conversation_summary", summary.as_deref().unwrap_or(""))
        .build_system_message();

    let mut messages = vec![ChatMessage::system(system)];
    messages.extend(history.iter().cloned());
    if messages.last().map(|m| m.role != Role::User).unwrap_or(true) {
        messages.push(ChatMessage::user(msg.text.clone()));
    }
    // User facts ride in a dedicated high-priority system message placed
    // just before generation.
    if !user_facts.is_empty() {
        messages.push(ChatMessage::system(format!(
            "Known user facts:\n{}",
            user_facts.join("\n")
        )));
    }
    // The URL fast path can select `fetch` even when no backend registered
    // tools for it; tell the model instead of letting it invent a result.
    if categories.iter().any(|c| c == "fetch")
        && crate::tools::fetch_tools::get_fetch_mode(&state.registry) == "unavailable"
    {
        messages.push(ChatMessage::system(
            "No web fetch backend is available right now. Say so instead of guessing the page contents.",
        ));
    }

    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    log_context_budget(&contents, state.config.pipeline.context_token_limit);

    let (reply, tools_used) = if is_toolless(&categories) {
        let response = state
            .llm
            .chat(&messages, true)
            .await
            .map_err(|e| recado_core::RecadoError::Llm(e.to_string()))?;
        (response.content, Vec::new())
    } else {
        let loop_span = trace.map(|ctx| {
            state.recorder.start_span(
                ctx,
                None,
                "tool_loop",
                recado_memory::types::SpanKind::Span,
                None,
            )
        });
        let deps = ToolLoopDeps {
            llm: state.llm.as_ref(),
            policy: &state.policy,
            hitl: &state.hitl,
            messaging: state.messaging.as_ref(),
            audit: Some(&state.audit),
            recorder: trace.map(|ctx| (state.recorder.as_ref(), ctx)),
            handle: &msg.from,
            session_id: "pipeline",
            compaction_threshold: state.config.pipeline.compaction_threshold,
        };
        let parent = loop_span.as_ref().map(|s| s.id.clone());
        let outcome = execute_tool_loop(
            &deps,
            &state.registry,
            &mut messages,
            &categories,
            state.config.pipeline.max_tools_per_call,
            parent.as_ref(),
        )
        .await
        .map_err(|e| recado_core::RecadoError::Llm(e.to_string()))?;
        if let Some(span) = loop_span {
            state.recorder.finish_span(
                span,
                TraceStatus::Completed,
                Some(&outcome.reply),
                serde_json::json!({ "iterations": outcome.iterations }),
            );
        }
        (outcome.reply, outcome.tools_used)
    };

    // Guardrails + single-shot remediation.
    let report = guardrails::run_guardrails(
        &state.config.guardrails,
        state.llm.as_ref(),
        &msg.text,
        &reply,
        !tools_used.is_empty(),
        trace.map(|ctx| (state.recorder.as_ref(), ctx)),
    )
    .await;
    let final_reply = if report.passed() {
        reply.clone()
    } else {
        guardrails::handle_guardrail_failure(
            &report,
            &msg.text,
            &reply,
            &messages,
            state.llm.as_ref(),
            trace.map(|ctx| (state.recorder.as_ref(), ctx)),
        )
        .await
    };

    // Delivery. The outbound id binds the trace to the channel message.
    let external_id = deliver(state, &msg.from, &final_reply, trace).await;
    if let Some(ctx) = trace {
        state.recorder.finish_trace(
            ctx,
            TraceStatus::Completed,
            Some(&final_reply),
            external_id.as_deref(),
        );
    }

    // Persist & curate.
    state
        .store
        .save_message(conv_id, MessageRole::Assistant, &final_reply)
        .map_err(|e| recado_core::RecadoError::Database(e.to_string()))?;
    let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let _ = state
        .store
        .append_daily_log(&today, &format!("{}: {}", msg.from, msg.text));

    // Sticky TTL: one assistant turn without tools clears the set.
    if tools_used.is_empty() {
        let _ = state.store.clear_sticky_categories(conv_id);
    } else {
        let _ = state.store.save_sticky_categories(conv_id, &categories);
    }

    summarize::schedule_if_needed(state, conv_id);
    if state.config.eval.auto_curate {
        curate::schedule(state, trace, &msg.text, &final_reply, &report);
    }

    Ok(Some(final_reply))
}

/// Send the reply; failures are logged, never fatal to the pipeline state.
async fn deliver(
    state: &Arc<RuntimeState>,
    to: &str,
    text: &str,
    _trace: Option<&TraceContext>,
) -> Option<String> {
    match state.messaging.send_message(to, text).await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, to, "outbound delivery failed");
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use crate::llm::ToolCall;
    use crate::tools::testutil::registry_with;

    fn inbound(id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            external_id: id.to_string(),
            from: "549110001111".to_string(),
            text: text.to_string(),
            message_type: TraceMessageType::Text,
        }
    }

    #[tokio::test]
    async fn duplicate_delivery_is_dropped() {
        let (state, messaging) = state_with(
            vec![
                ScriptedLlm::text("none"),
                ScriptedLlm::text("¡Hola! ¿Cómo estás?"),
            ],
            registry_with(&[("notes", &["add_note"])]),
        );
        let first = handle_inbound(Arc::clone(&state), inbound("wamid.1", "hola"))
            .await
            .unwrap();
        assert!(first.is_some());
        let second = handle_inbound(Arc::clone(&state), inbound("wamid.1", "hola"))
            .await
            .unwrap();
        assert!(second.is_none());
        // Exactly one reply went out and one assistant message persisted.
        assert_eq!(messaging.sent.lock().unwrap().len(), 1);
        let conv = state.store.get_or_create_conversation("549110001111").unwrap();
        let msgs = state.store.get_recent_messages(conv, 10, 0).unwrap();
        let assistants = msgs
            .iter()
            .filter(|m| matches!(m.role, MessageRole::Assistant))
            .count();
        assert_eq!(assistants, 1);
    }

    #[tokio::test]
    async fn toolless_turn_clears_sticky() {
        let (state, _messaging) = state_with(
            vec![
                ScriptedLlm::text("none"),
                ScriptedLlm::text("Claro, te cuento enseguida."),
            ],
            registry_with(&[("notes", &["add_note"])]),
        );
        let conv = state.store.get_or_create_conversation("549110001111").unwrap();
        state
            .store
            .save_sticky_categories(conv, &["notes".to_string()])
            .unwrap();

        // Classifier says "none"; sticky falls back — but the scripted turn
        // produces no tool calls, so the turn ends toolless and sticky
        // expires.
        handle_inbound(Arc::clone(&state), inbound("wamid.2", "gracias!"))
            .await
            .unwrap();
        assert!(state.store.get_sticky_categories(conv).unwrap().is_empty());
    }

    #[tokio::test]
    async fn tool_turn_saves_sticky() {
        let mut call = ScriptedLlm::text("");
        call.tool_calls = vec![ToolCall {
            id: "c1".to_string(),
            name: "add_note".to_string(),
            arguments: serde_json::json!({"text": "recordar"}),
        }];
        let (state, _messaging) = state_with(
            vec![
                ScriptedLlm::text("notes"),
                call,
                ScriptedLlm::text("Anotado, quedó guardado en tus notas."),
            ],
            registry_with(&[("notes", &["add_note"])]),
        );
        handle_inbound(Arc::clone(&state), inbound("wamid.3", "anotá que debo llamar a Ana"))
            .await
            .unwrap();
        let conv = state.store.get_or_create_conversation("549110001111").unwrap();
        assert_eq!(
            state.store.get_sticky_categories(conv).unwrap(),
            vec!["notes".to_string()]
        );
    }

    #[tokio::test]
    async fn url_forces_fetch_category() {
        let mut call = ScriptedLlm::text("");
        call.tool_calls = vec![ToolCall {
            id: "c1".to_string(),
            name: "fetch_url".to_string(),
            arguments: serde_json::json!({"text": "https://example.com/a"}),
        }];
        // No classifier response needed — the URL fast path skips it.
        let (state, _messaging) = state_with(
            vec![call, ScriptedLlm::text("La página dice: ejemplo.")],
            registry_with(&[("notes", &["add_note"]), ("fetch", &["fetch_url"])]),
        );
        let reply = handle_inbound(Arc::clone(&state), inbound("wamid.4", "Check https://example.com/a"))
            .await
            .unwrap()
            .unwrap();
        assert!(reply.contains("ejemplo"));
        let conv = state.store.get_or_create_conversation("549110001111").unwrap();
        assert_eq!(
            state.store.get_sticky_categories(conv).unwrap(),
            vec!["fetch".to_string()]
        );
    }

    #[tokio::test]
    async fn pending_approval_consumes_the_message() {
        let (state, _messaging) = state_with(vec![], registry_with(&[("notes", &["add_note"])]));
        let hitl = Arc::clone(&state.hitl);
        let messaging2 = Arc::new(RecordingMessenger {
            sent: std::sync::Mutex::new(Vec::new()),
        });
        let waiter = {
            let hitl = Arc::clone(&hitl);
            let messaging2 = Arc::clone(&messaging2);
            tokio::spawn(async move {
                hitl.request_user_approval(
                    "549110001111",
                    "¿Apruebo?",
                    messaging2.as_ref(),
                    std::time::Duration::from_secs(5),
                )
                .await
            })
        };
        for _ in 0..50 {
            if state.hitl.is_waiting("549110001111") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let out = handle_inbound(Arc::clone(&state), inbound("wamid.5", "Aprobar"))
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(waiter.await.unwrap(), "Aprobar");
    }
}
