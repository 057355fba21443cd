//! Tool execution loop — the core agentic behavior.
//!
//! Flow: messages → LLM → if tool calls → policy gate → execute → inject
//! results → LLM → repeat. Stops when the model returns plain text or the
//! iteration budget runs out.
//!
//! The meta-tool `request_more_tools` is always offered first and handled
//! inline: it enlarges the palette mid-loop and is exempt from policy
//! evaluation and audit. Regular calls dispatch in parallel but their
//! results are appended in the model's original call order.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use recado_core::types::SpanId;
use recado_memory::types::{SpanKind, TraceStatus};
use recado_shell::audit::{AuditDecision, AuditEntry, AuditLog};
use recado_trace::context::generation_metadata;
use recado_trace::{TraceContext, TraceRecorder};

use crate::compact::compact_tool_output;
use crate::hitl::{is_affirmative, HitlCoordinator, DEFAULT_TIMEOUT};
use crate::llm::{ChatMessage, LlmClient, LlmError, Role, ToolCall, ToolDefinition};
use crate::messaging::MessagingClient;
use crate::policy::{PolicyAction, PolicyEngine};
use crate::tools::router::{request_more_tools_schema, select_tools, META_TOOL};
use crate::tools::{ToolRegistry, ToolResult};

/// Maximum LLM↔tool rounds per turn.
pub const MAX_TOOL_ITERATIONS: usize = 8;

/// Tool-result messages kept verbatim; older ones are cleared to a
/// placeholder after each iteration.
pub const KEEP_RECENT_TOOL_RESULTS: usize = 2;

/// Everything the loop needs besides the registry (which varies per call —
/// agent sessions pass an extended copy).
pub struct ToolLoopDeps<'a> {
    pub llm: &'a dyn LlmClient,
    pub policy: &'a PolicyEngine,
    pub hitl: &'a HitlCoordinator,
    pub messaging: &'a dyn MessagingClient,
    pub audit: Option<&'a AuditLog>,
    pub recorder: Option<(&'a TraceRecorder, &'a TraceContext)>,
    pub handle: &'a str,
    pub session_id: &'a str,
    pub compaction_threshold: usize,
}

/// Outcome of one completed loop.
pub struct ToolLoopOutcome {
    pub reply: String,
    /// Names of regular tools that actually executed.
    pub tools_used: Vec<String>,
    /// `(tool_name, params_hash)` per regular call, in dispatch order —
    /// consumed by the reactive loop detector.
    pub observations: Vec<(String, u64)>,
    pub iterations: usize,
}

/// Stable hash of a call's arguments, for repeat detection.
pub fn params_hash(args: &serde_json::Value) -> u64 {
    let mut h = DefaultHasher::new();
    args.to_string().hash(&mut h);
    h.finish()
}

/// Drive up to `MAX_TOOL_ITERATIONS` rounds against the model.
pub async fn execute_tool_loop(
    deps: &ToolLoopDeps<'_>,
    registry: &ToolRegistry,
    messages: &mut Vec<ChatMessage>,
    categories: &[String],
    max_tools: usize,
    parent_span_id: Option<&SpanId>,
) -> Result<ToolLoopOutcome, LlmError> {
    // The meta-tool is always position 0 and survives every palette change.
    let mut tools: Vec<ToolDefinition> = vec![request_more_tools_schema(registry)];
    tools.extend(select_tools(categories, registry, max_tools));

    let user_request = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .unwrap_or_default();

    let mut tools_used: Vec<String> = Vec::new();
    let mut observations: Vec<(String, u64)> = Vec::new();
    let mut last_text = String::new();

    for iteration in 0..MAX_TOOL_ITERATIONS {
        let iter_span = deps.recorder.map(|(rec, ctx)| {
            rec.start_span(
                ctx,
                parent_span_id,
                &format!("llm:iteration_{}", iteration + 1),
                SpanKind::Generation,
                None,
            )
        });

        // Thinking is off whenever tools are present.
        let response = match deps.llm.chat_with_tools(messages, &tools, false).await {
            Ok(r) => r,
            Err(e) => {
                if let (Some((rec, _)), Some(span)) = (deps.recorder, iter_span) {
                    rec.finish_span(span, TraceStatus::Failed, Some(&e.to_string()), serde_json::json!({}));
                }
                return Err(e);
            }
        };
        let iter_span_id = iter_span.as_ref().map(|s| s.id.clone());
        if let (Some((rec, _)), Some(span)) = (deps.recorder, iter_span) {
            rec.finish_span(
                span,
                TraceStatus::Completed,
                Some(&response.content),
                generation_metadata(response.input_tokens, response.output_tokens, &response.model),
            );
        }

        if response.tool_calls.is_empty() {
            debug!(iteration, "tool loop complete — no more tool calls");
            messages.push(ChatMessage::assistant(response.content.clone()));
            return Ok(ToolLoopOutcome {
                reply: response.content,
                tools_used,
                observations,
                iterations: iteration + 1,
            });
        }

        last_text = response.content.clone();
        let mut assistant = ChatMessage::assistant(response.content.clone());
        assistant.tool_calls = response.tool_calls.clone();
        messages.push(assistant);

        // Partition into meta and regular calls, keeping original indices so
        // results can be reassembled in the model's call order.
        let mut meta_calls: Vec<(usize, &ToolCall)> = Vec::new();
        let mut regular_calls: Vec<(usize, &ToolCall)> = Vec::new();
        for (idx, call) in response.tool_calls.iter().enumerate() {
            if call.name == META_TOOL {
                meta_calls.push((idx, call));
            } else {
                regular_calls.push((idx, call));
            }
        }

        let mut results: Vec<(usize, String, String)> = Vec::new();

        // Meta calls run sequentially — they mutate the palette.
        for (idx, call) in meta_calls {
            let requested: Vec<String> = call
                .arguments
                .get("categories")
                .and_then(|v| v.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|v| v.as_str().map(|s| s.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            let added = select_tools(&requested, registry, max_tools);
            let mut added_names: Vec<String> = Vec::new();
            for def in added {
                if !tools.iter().any(|t| t.name == def.name) {
                    added_names.push(def.name.clone());
                    tools.push(def);
                }
            }
            info!(
                requested = requested.join(","),
                added = added_names.len(),
                "meta-tool expanded palette"
            );
            results.push((
                idx,
                META_TOOL.to_string(),
                format!("Loaded {} tools: {}", added_names.len(), added_names.join(", ")),
            ));
        }

        // Regular calls dispatch in parallel; one failing call is an
        // observation, not a cancellation of its siblings.
        let futures: Vec<_> = regular_calls
            .iter()
            .map(|(idx, call)| {
                let idx = *idx;
                let call = (*call).clone();
                let iter_parent = iter_span_id.clone();
                async move {
                    let result =
                        run_regular_call(deps, registry, &call, iter_parent.as_ref()).await;
                    (idx, call, result)
                }
            })
            .collect();

        for (idx, call, result) in join_all(futures).await {
            observations.push((call.name.clone(), params_hash(&call.arguments)));
            if result.success {
                tools_used.push(call.name.clone());
            }
            results.push((idx, call.name, result.content));
        }

        // Reassemble in the model's original call order.
        results.sort_by_key(|(idx, _, _)| *idx);
        for (_, name, content) in results {
            let compacted = if content.len() > deps.compaction_threshold {
                compact_tool_output(&name, &content, &user_request, deps.llm, deps.compaction_threshold)
                    .await
            } else {
                content
            };
            messages.push(ChatMessage::tool(compacted));
        }

        clear_old_tool_results(messages);
    }

    warn!(max_iterations = MAX_TOOL_ITERATIONS, "tool loop exhausted its budget");
    Ok(ToolLoopOutcome {
        reply: last_text,
        tools_used,
        observations,
        iterations: MAX_TOOL_ITERATIONS,
    })
}

/// Policy-gate and execute one regular call, writing the audit entry.
async fn run_regular_call(
    deps: &ToolLoopDeps<'_>,
    registry: &ToolRegistry,
    call: &ToolCall,
    parent_span: Option<&SpanId>,
) -> ToolResult {
    let started_at = chrono::Utc::now().to_rfc3339();
    let span = deps.recorder.map(|(rec, ctx)| {
        rec.start_span(
            ctx,
            parent_span,
            &format!("tool:{}", call.name),
            SpanKind::Tool,
            Some(&call.arguments.to_string()),
        )
    });

    let (result, decision) = match deps.policy.evaluate(&call.name, &call.arguments) {
        PolicyAction::Allow => {
            let result = dispatch(registry, call).await;
            (result, AuditDecision::Allow)
        }
        PolicyAction::Block { reason } => (
            ToolResult::error(format!("🚫 Command blocked: {reason}")),
            AuditDecision::Deny,
        ),
        PolicyAction::Flag { reason } => {
            let question = format!(
                "⚠️ Approval needed: `{}` with {}\nReason: {reason}\nReply \"approve\" or \"reject\".",
                call.name, call.arguments
            );
            let answer = deps
                .hitl
                .request_user_approval(deps.handle, &question, deps.messaging, DEFAULT_TIMEOUT)
                .await;
            if is_affirmative(&answer) {
                let result = dispatch(registry, call).await;
                (result, AuditDecision::AskApproved)
            } else {
                (
                    ToolResult::error("permission denied"),
                    AuditDecision::AskRejected,
                )
            }
        }
    };

    if let Some(audit) = deps.audit {
        let entry = AuditEntry {
            session_id: deps.session_id.to_string(),
            handle: deps.handle.to_string(),
            command: call.name.clone(),
            arguments: call.arguments.clone(),
            decision,
            exit_code: None,
            duration_ms: None,
            stdout_preview: Some(preview(&result.content)),
            stderr_preview: None,
            started_at,
            completed_at: chrono::Utc::now().to_rfc3339(),
            error: if result.success {
                None
            } else {
                Some(preview(&result.content))
            },
        };
        if let Err(e) = audit.append(entry) {
            warn!(error = %e, tool = %call.name, "audit append failed");
        }
    }

    if let (Some((rec, _)), Some(span)) = (deps.recorder, span) {
        let status = if result.success {
            TraceStatus::Completed
        } else {
            TraceStatus::Failed
        };
        rec.finish_span(span, status, Some(&result.content), serde_json::json!({}));
    }
    result
}

async fn dispatch(registry: &ToolRegistry, call: &ToolCall) -> ToolResult {
    match registry.get(&call.name) {
        Some(tool) => {
            debug!(tool = %call.name, "executing tool");
            tool.execute(call.arguments.clone()).await
        }
        None => ToolResult::error(format!("unknown tool: {}", call.name)),
    }
}

/// Replace all but the `KEEP_RECENT_TOOL_RESULTS` most recent tool messages
/// with a one-line placeholder.
fn clear_old_tool_results(messages: &mut [ChatMessage]) {
    let tool_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == Role::Tool)
        .map(|(i, _)| i)
        .collect();
    if tool_indices.len() <= KEEP_RECENT_TOOL_RESULTS {
        return;
    }
    for &i in &tool_indices[..tool_indices.len() - KEEP_RECENT_TOOL_RESULTS] {
        let msg = &mut messages[i];
        if msg.content.starts_with("[cleared]") {
            continue;
        }
        let head: String = msg.content.chars().take(60).collect();
        msg.content = format!("[cleared] {head}");
    }
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::registry_with;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// LLM that replays a scripted sequence of responses.
    struct ScriptedLlm {
        responses: Mutex<Vec<crate::llm::ChatResponse>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<crate::llm::ChatResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    fn text_response(content: &str) -> crate::llm::ChatResponse {
        crate::llm::ChatResponse {
            content: content.to_string(),
            tool_calls: Vec::new(),
            input_tokens: 10,
            output_tokens: 5,
            model: "test".to_string(),
            total_duration_ms: 1,
        }
    }

    fn call_response(calls: Vec<(&str, serde_json::Value)>) -> crate::llm::ChatResponse {
        crate::llm::ChatResponse {
            content: String::new(),
            tool_calls: calls
                .into_iter()
                .enumerate()
                .map(|(i, (name, args))| ToolCall {
                    id: format!("call-{i}"),
                    name: name.to_string(),
                    arguments: args,
                })
                .collect(),
            input_tokens: 10,
            output_tokens: 5,
            model: "test".to_string(),
            total_duration_ms: 1,
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _think: bool,
        ) -> Result<crate::llm::ChatResponse, LlmError> {
            let mut r = self.responses.lock().unwrap();
            if r.is_empty() {
                return Ok(text_response("exhausted"));
            }
            Ok(r.remove(0))
        }

        async fn chat_with_tools(
            &self,
            messages: &[ChatMessage],
            _tools: &[crate::llm::ToolDefinition],
            think: bool,
        ) -> Result<crate::llm::ChatResponse, LlmError> {
            self.chat(messages, think).await
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Ok(vec![0.0, 1.0])
        }
    }

    struct NullMessenger;

    #[async_trait]
    impl MessagingClient for NullMessenger {
        async fn send_message(
            &self,
            _to: &str,
            _text: &str,
        ) -> recado_core::Result<Option<String>> {
            Ok(None)
        }
    }

    fn deps<'a>(
        llm: &'a ScriptedLlm,
        policy: &'a PolicyEngine,
        hitl: &'a HitlCoordinator,
        messaging: &'a NullMessenger,
        audit: Option<&'a AuditLog>,
    ) -> ToolLoopDeps<'a> {
        ToolLoopDeps {
            llm,
            policy,
            hitl,
            messaging,
            audit,
            recorder: None,
            handle: "549110001111",
            session_id: "s1",
            compaction_threshold: 20_000,
        }
    }

    fn plain_policy() -> PolicyEngine {
        PolicyEngine::permissive(vec!["git".to_string(), "ls".to_string()])
    }

    #[tokio::test]
    async fn plain_text_ends_the_loop() {
        let llm = ScriptedLlm::new(vec![text_response("Hola!")]);
        let registry = registry_with(&[("notes", &["add_note"])]);
        let policy = plain_policy();
        let hitl = HitlCoordinator::new();
        let messaging = NullMessenger;
        let d = deps(&llm, &policy, &hitl, &messaging, None);

        let mut messages = vec![ChatMessage::user("hola")];
        let out = execute_tool_loop(&d, &registry, &mut messages, &["notes".to_string()], 8, None)
            .await
            .unwrap();
        assert_eq!(out.reply, "Hola!");
        assert_eq!(out.iterations, 1);
        assert!(out.tools_used.is_empty());
        assert_eq!(messages.last().unwrap().role, Role::Assistant);
    }

    #[tokio::test]
    async fn tool_results_keep_the_models_call_order() {
        let llm = ScriptedLlm::new(vec![
            call_response(vec![
                ("t_a", serde_json::json!({"text": "primero"})),
                ("t_b", serde_json::json!({"text": "segundo"})),
                ("t_c", serde_json::json!({"text": "tercero"})),
            ]),
            text_response("listo"),
        ]);
        let registry = registry_with(&[("x", &["t_a", "t_b", "t_c"])]);
        let policy = plain_policy();
        let hitl = HitlCoordinator::new();
        let messaging = NullMessenger;
        let d = deps(&llm, &policy, &hitl, &messaging, None);

        let mut messages = vec![ChatMessage::user("haz tres cosas")];
        let out = execute_tool_loop(&d, &registry, &mut messages, &["x".to_string()], 8, None)
            .await
            .unwrap();
        assert_eq!(out.reply, "listo");

        let tool_contents: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| m.content.as_str())
            .collect();
        // One may already be cleared if more than KEEP_RECENT accumulated;
        // with exactly 3 in one round, the first is cleared after the round.
        assert_eq!(tool_contents.len(), 3);
        assert!(tool_contents[0].starts_with("[cleared] primero"));
        assert_eq!(tool_contents[1], "segundo");
        assert_eq!(tool_contents[2], "tercero");
        assert_eq!(out.tools_used, vec!["t_a", "t_b", "t_c"]);
    }

    #[tokio::test]
    async fn meta_tool_expands_palette_without_audit() {
        let dir = tempfile::tempdir().unwrap();
        let audit_path = dir.path().join("audit.jsonl");
        let audit = AuditLog::open(&audit_path).unwrap();

        let llm = ScriptedLlm::new(vec![
            call_response(vec![(
                META_TOOL,
                serde_json::json!({"categories": ["github"], "reason": "need issue tools"}),
            )]),
            call_response(vec![("gh_issues", serde_json::json!({"text": "x"}))]),
            text_response("done"),
        ]);
        let registry = registry_with(&[("notes", &["add_note"]), ("github", &["gh_issues", "gh_prs"])]);
        let policy = plain_policy();
        let hitl = HitlCoordinator::new();
        let messaging = NullMessenger;
        let d = deps(&llm, &policy, &hitl, &messaging, Some(&audit));

        let mut messages = vec![ChatMessage::user("revisa los issues")];
        let out = execute_tool_loop(&d, &registry, &mut messages, &["notes".to_string()], 8, None)
            .await
            .unwrap();
        assert_eq!(out.reply, "done");

        let loaded = messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .any(|m| m.content.contains("Loaded 2 tools") && m.content.contains("gh_issues"));
        assert!(loaded, "expected a Loaded-tools observation message");

        // Only the regular gh_issues call is audited; the meta call is not.
        let entries = AuditLog::load(&audit_path).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry.command, "gh_issues");
    }

    #[tokio::test]
    async fn blocked_command_reaches_the_model_as_an_observation() {
        let dir = tempfile::tempdir().unwrap();
        let audit_path = dir.path().join("audit.jsonl");
        let audit = AuditLog::open(&audit_path).unwrap();

        let llm = ScriptedLlm::new(vec![
            call_response(vec![("run_command", serde_json::json!({"command": "rm -rf /"}))]),
            text_response("entendido, no lo haré"),
        ]);
        let registry = registry_with(&[("shell", &["run_command"])]);
        let policy = plain_policy();
        let hitl = HitlCoordinator::new();
        let messaging = NullMessenger;
        let d = deps(&llm, &policy, &hitl, &messaging, Some(&audit));

        let mut messages = vec![ChatMessage::user("borra todo")];
        let out = execute_tool_loop(&d, &registry, &mut messages, &["shell".to_string()], 8, None)
            .await
            .unwrap();
        assert_eq!(out.reply, "entendido, no lo haré");
        assert!(out.tools_used.is_empty());

        let blocked = messages
            .iter()
            .any(|m| m.role == Role::Tool && m.content.contains("🚫 Command blocked"));
        assert!(blocked);

        let entries = AuditLog::load(&audit_path).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0].entry.decision, AuditDecision::Deny));
    }

    #[tokio::test]
    async fn flagged_call_executes_after_approval() {
        let dir = tempfile::tempdir().unwrap();
        let audit_path = dir.path().join("audit.jsonl");
        let policy_path = dir.path().join("policy.yaml");
        std::fs::write(
            &policy_path,
            "rules:\n  - id: flag-sudo\n    target_tool: run_command\n    argument_match:\n      command: \"^sudo \"\n    action: flag\n    reason: needs approval\n",
        )
        .unwrap();
        let audit = AuditLog::open(&audit_path).unwrap();
        let policy = PolicyEngine::load(policy_path.to_str().unwrap(), vec!["git".to_string()]);

        let llm = ScriptedLlm::new(vec![
            call_response(vec![(
                "run_command",
                serde_json::json!({"command": "sudo apt update"}),
            )]),
            text_response("Actualizado."),
        ]);
        let registry = registry_with(&[("shell", &["run_command"])]);
        let hitl = std::sync::Arc::new(HitlCoordinator::new());
        let messaging = NullMessenger;

        // Approve as soon as the question lands.
        {
            let hitl = std::sync::Arc::clone(&hitl);
            tokio::spawn(async move {
                for _ in 0..100 {
                    if hitl.resolve("549110001111", "Aprobar") {
                        return;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
            });
        }

        let d = ToolLoopDeps {
            llm: &llm,
            policy: &policy,
            hitl: &hitl,
            messaging: &messaging,
            audit: Some(&audit),
            recorder: None,
            handle: "549110001111",
            session_id: "s1",
            compaction_threshold: 20_000,
        };
        let mut messages = vec![ChatMessage::user("actualizá el sistema")];
        let out = execute_tool_loop(&d, &registry, &mut messages, &["shell".to_string()], 8, None)
            .await
            .unwrap();
        assert_eq!(out.reply, "Actualizado.");
        assert_eq!(out.tools_used, vec!["run_command"]);

        let entries = AuditLog::load(&audit_path).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(matches!(entries[0].entry.decision, AuditDecision::AskApproved));
    }

    #[tokio::test]
    async fn flagged_call_rejected_returns_permission_denied() {
        let llm = ScriptedLlm::new(vec![
            call_response(vec![(
                "run_command",
                serde_json::json!({"command": "terraform apply"}),
            )]),
            text_response("entendido"),
        ]);
        let registry = registry_with(&[("shell", &["run_command"])]);
        let policy = plain_policy();
        let hitl = std::sync::Arc::new(HitlCoordinator::new());
        let messaging = NullMessenger;

        {
            let hitl = std::sync::Arc::clone(&hitl);
            tokio::spawn(async move {
                for _ in 0..100 {
                    if hitl.resolve("549110001111", "/reject") {
                        return;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
            });
        }

        let d = ToolLoopDeps {
            llm: &llm,
            policy: &policy,
            hitl: &hitl,
            messaging: &messaging,
            audit: None,
            recorder: None,
            handle: "549110001111",
            session_id: "s1",
            compaction_threshold: 20_000,
        };
        let mut messages = vec![ChatMessage::user("aplicá el plan")];
        let out = execute_tool_loop(&d, &registry, &mut messages, &["shell".to_string()], 8, None)
            .await
            .unwrap();
        assert!(out.tools_used.is_empty());
        let denied = messages
            .iter()
            .any(|m| m.role == Role::Tool && m.content.contains("permission denied"));
        assert!(denied);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_assistant_text() {
        // Every response keeps calling a tool — the loop must stop on its own.
        let responses: Vec<_> = (0..MAX_TOOL_ITERATIONS)
            .map(|_| call_response(vec![("t_a", serde_json::json!({"text": "x"}))]))
            .collect();
        let llm = ScriptedLlm::new(responses);
        let registry = registry_with(&[("x", &["t_a"])]);
        let policy = plain_policy();
        let hitl = HitlCoordinator::new();
        let messaging = NullMessenger;
        let d = deps(&llm, &policy, &hitl, &messaging, None);

        let mut messages = vec![ChatMessage::user("loop")];
        let out = execute_tool_loop(&d, &registry, &mut messages, &["x".to_string()], 8, None)
            .await
            .unwrap();
        assert_eq!(out.iterations, MAX_TOOL_ITERATIONS);
        assert_eq!(out.observations.len(), MAX_TOOL_ITERATIONS);
    }

    #[tokio::test]
    async fn old_tool_results_are_cleared() {
        let llm = ScriptedLlm::new(vec![
            call_response(vec![("t_a", serde_json::json!({"text": "uno"}))]),
            call_response(vec![("t_a", serde_json::json!({"text": "dos"}))]),
            call_response(vec![("t_a", serde_json::json!({"text": "tres"}))]),
            text_response("fin"),
        ]);
        let registry = registry_with(&[("x", &["t_a"])]);
        let policy = plain_policy();
        let hitl = HitlCoordinator::new();
        let messaging = NullMessenger;
        let d = deps(&llm, &policy, &hitl, &messaging, None);

        let mut messages = vec![ChatMessage::user("tres rondas")];
        execute_tool_loop(&d, &registry, &mut messages, &["x".to_string()], 8, None)
            .await
            .unwrap();

        let tool_msgs: Vec<&ChatMessage> =
            messages.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tool_msgs.len(), 3);
        assert!(tool_msgs[0].content.starts_with("[cleared]"));
        assert_eq!(tool_msgs[1].content, "dos");
        assert_eq!(tool_msgs[2].content, "tres");
    }
}
