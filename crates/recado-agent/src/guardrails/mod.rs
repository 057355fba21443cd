//! Outbound reply validation.
//!
//! Deterministic checks always run; LLM-judge checks are opt-in and
//! fail-open on timeout or error. Every check emits a score onto the trace
//! (1.0 pass / 0.0 fail). Remediation is single-shot — a remediated reply
//! is never re-validated into a loop.

pub mod lang;
pub mod pii;

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{info, warn};

use recado_core::config::GuardrailsConfig;
use recado_memory::types::{ScoreSource, SpanKind, TraceStatus};
use recado_trace::{TraceContext, TraceRecorder};

use crate::llm::{ChatMessage, LlmClient};

/// Upper bound on reply length; chunk-splitting happens downstream, this
/// catches runaway generations.
const MAX_REPLY_CHARS: usize = 8_000;

/// Both sides must be at least this long before the language check applies.
const LANG_MIN_CHARS: usize = 30;

static RAW_TOOL_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)\{\s*"(name|tool|function)"\s*:\s*"[^"]+"\s*,\s*"(arguments|parameters|input)"|"tool_calls"\s*:"#)
        .expect("tool json regex")
});

/// Closed set of checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardrailCheck {
    NotEmpty,
    ExcessiveLength,
    NoRawToolJson,
    LanguageMatch,
    NoPii,
    ToolCoherence,
    HallucinationCheck,
}

impl GuardrailCheck {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotEmpty => "not_empty",
            Self::ExcessiveLength => "excessive_length",
            Self::NoRawToolJson => "no_raw_tool_json",
            Self::LanguageMatch => "language_match",
            Self::NoPii => "no_pii",
            Self::ToolCoherence => "tool_coherence",
            Self::HallucinationCheck => "hallucination_check",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub check: GuardrailCheck,
    pub passed: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GuardrailReport {
    pub outcomes: Vec<CheckOutcome>,
}

impl GuardrailReport {
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    pub fn first_failure(&self) -> Option<&CheckOutcome> {
        self.outcomes.iter().find(|o| !o.passed)
    }
}

/// Run the pipeline over `(user_text, reply, tools_were_used)` and emit one
/// score per check.
pub async fn run_guardrails(
    cfg: &GuardrailsConfig,
    llm: &dyn LlmClient,
    user_text: &str,
    reply: &str,
    tools_were_used: bool,
    tracer: Option<(&TraceRecorder, &TraceContext)>,
) -> GuardrailReport {
    let mut report = GuardrailReport::default();
    if !cfg.enabled {
        return report;
    }

    let trimmed = reply.trim();
    report.outcomes.push(CheckOutcome {
        check: GuardrailCheck::NotEmpty,
        passed: !trimmed.is_empty(),
        detail: None,
    });
    report.outcomes.push(CheckOutcome {
        check: GuardrailCheck::ExcessiveLength,
        passed: reply.len() <= MAX_REPLY_CHARS,
        detail: None,
    });
    report.outcomes.push(CheckOutcome {
        check: GuardrailCheck::NoRawToolJson,
        passed: !RAW_TOOL_JSON_RE.is_match(reply),
        detail: None,
    });

    // Language comparison is meaningless on short strings.
    let lang_outcome = if user_text.len() >= LANG_MIN_CHARS && reply.len() >= LANG_MIN_CHARS {
        match (lang::detect(user_text), lang::detect(reply)) {
            (Some(a), Some(b)) if a != b => CheckOutcome {
                check: GuardrailCheck::LanguageMatch,
                passed: false,
                detail: Some(a.to_string()),
            },
            _ => CheckOutcome {
                check: GuardrailCheck::LanguageMatch,
                passed: true,
                detail: None,
            },
        }
    } else {
        CheckOutcome {
            check: GuardrailCheck::LanguageMatch,
            passed: true,
            detail: None,
        }
    };
    report.outcomes.push(lang_outcome);

    let introduced = pii::find_introduced(user_text, reply);
    report.outcomes.push(CheckOutcome {
        check: GuardrailCheck::NoPii,
        passed: introduced.is_empty(),
        detail: if introduced.is_empty() {
            None
        } else {
            Some(introduced.join(","))
        },
    });

    if cfg.llm_checks {
        let timeout = Duration::from_secs_f64(cfg.llm_timeout_secs);
        if tools_were_used {
            let passed = llm_binary_check(
                llm,
                timeout,
                &format!(
                    "A reply was produced after using tools. Is it coherent with having \
                     used them (no invented tool output)?\nUser: {user_text}\nReply: {reply}\n\
                     Answer only yes or no."
                ),
            )
            .await;
            report.outcomes.push(CheckOutcome {
                check: GuardrailCheck::ToolCoherence,
                passed,
                detail: None,
            });
        }
        let passed = llm_binary_check(
            llm,
            timeout,
            &format!(
                "Does this reply avoid stating facts it could not know from the \
                 conversation?\nUser: {user_text}\nReply: {reply}\nAnswer only yes or no."
            ),
        )
        .await;
        report.outcomes.push(CheckOutcome {
            check: GuardrailCheck::HallucinationCheck,
            passed,
            detail: None,
        });
    }

    if let Some((rec, ctx)) = tracer {
        for outcome in &report.outcomes {
            rec.score(
                ctx,
                None,
                &format!("guardrail:{}", outcome.check.name()),
                if outcome.passed { 1.0 } else { 0.0 },
                ScoreSource::System,
                outcome.detail.as_deref(),
            );
        }
    }

    report
}

/// Run one yes/no judge call. Timeouts and errors count as pass.
async fn llm_binary_check(llm: &dyn LlmClient, timeout: Duration, prompt: &str) -> bool {
    let messages = [ChatMessage::system(prompt.to_string())];
    match tokio::time::timeout(timeout, llm.chat(&messages, false)).await {
        Ok(Ok(r)) => !r.content.trim().to_lowercase().starts_with("no"),
        Ok(Err(e)) => {
            warn!(error = %e, "llm guardrail check failed — passing open");
            true
        }
        Err(_) => {
            warn!("llm guardrail check timed out — passing open");
            true
        }
    }
}

/// Single-shot remediation. Returns the reply to deliver — remediated when
/// possible, the original otherwise. No recursion: the result is not
/// re-validated.
pub async fn handle_guardrail_failure(
    report: &GuardrailReport,
    user_text: &str,
    reply: &str,
    messages: &[ChatMessage],
    llm: &dyn LlmClient,
    tracer: Option<(&TraceRecorder, &TraceContext)>,
) -> String {
    let Some(failure) = report.first_failure() else {
        return reply.to_string();
    };
    info!(check = failure.check.name(), "guardrail failed, attempting remediation");

    match failure.check {
        GuardrailCheck::NoPii => pii::redact_introduced(user_text, reply),

        GuardrailCheck::NotEmpty => {
            match llm.chat(messages, false).await {
                Ok(r) if !r.content.trim().is_empty() => r.content,
                _ => "Perdón, no pude generar una respuesta. ¿Podés reformular?".to_string(),
            }
        }

        GuardrailCheck::LanguageMatch => {
            let lang_code = failure.detail.clone().unwrap_or_else(|| "es".to_string());
            let span = tracer.map(|(rec, ctx)| {
                rec.start_span(ctx, None, "guardrails:remediation", SpanKind::Generation, Some(reply))
            });
            let hint = format!(
                "IMPORTANT: the user wrote in {lang_code}. Rewrite your reply ONLY in \
                 {lang_code}. IMPORTANTE: el usuario escribió en {lang_code}. Reescribí \
                 tu respuesta SOLO en {lang_code}.\n\nReply to rewrite: {reply}"
            );
            let mut retry_messages = messages.to_vec();
            retry_messages.push(ChatMessage::system(hint));
            let result = llm.chat(&retry_messages, false).await;
            let (out, status, meta) = match result {
                Ok(r) if !r.content.trim().is_empty() => {
                    let meta = serde_json::json!({
                        "check": "language_match",
                        "lang_code": lang_code,
                        "gen_ai.usage.input_tokens": r.input_tokens,
                        "gen_ai.usage.output_tokens": r.output_tokens,
                    });
                    (r.content, TraceStatus::Completed, meta)
                }
                _ => (
                    reply.to_string(),
                    TraceStatus::Failed,
                    serde_json::json!({"check": "language_match", "lang_code": lang_code}),
                ),
            };
            if let (Some((rec, _)), Some(span)) = (tracer, span) {
                rec.finish_span(span, status, Some(&out), meta);
            }
            out
        }

        // Length, raw-json, and judge failures pass through with a log line;
        // the scores already record them.
        _ => {
            warn!(check = failure.check.name(), "no remediation for this check — passing through");
            reply.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::llm::{ChatResponse, LlmError};

    struct FixedLlm {
        reply: String,
    }

    #[async_trait]
    impl LlmClient for FixedLlm {
        async fn chat(&self, _m: &[ChatMessage], _t: bool) -> Result<ChatResponse, LlmError> {
            Ok(ChatResponse {
                content: self.reply.clone(),
                tool_calls: Vec::new(),
                input_tokens: 1,
                output_tokens: 1,
                model: "test".to_string(),
                total_duration_ms: 1,
            })
        }
        async fn chat_with_tools(
            &self,
            m: &[ChatMessage],
            _tools: &[crate::llm::ToolDefinition],
            t: bool,
        ) -> Result<ChatResponse, LlmError> {
            self.chat(m, t).await
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            Ok(vec![0.0])
        }
    }

    fn cfg() -> GuardrailsConfig {
        GuardrailsConfig::default()
    }

    #[tokio::test]
    async fn clean_reply_passes_all_checks() {
        let llm = FixedLlm { reply: String::new() };
        let report = run_guardrails(
            &cfg(),
            &llm,
            "¿Qué hora es en Buenos Aires ahora mismo?",
            "Son las tres de la tarde en Buenos Aires.",
            false,
            None,
        )
        .await;
        assert!(report.passed());
    }

    #[tokio::test]
    async fn empty_reply_fails_not_empty() {
        let llm = FixedLlm { reply: String::new() };
        let report = run_guardrails(&cfg(), &llm, "hola", "   ", false, None).await;
        assert!(!report.passed());
        assert_eq!(report.first_failure().unwrap().check, GuardrailCheck::NotEmpty);
    }

    #[tokio::test]
    async fn language_mismatch_detected_above_threshold() {
        let llm = FixedLlm { reply: String::new() };
        let report = run_guardrails(
            &cfg(),
            &llm,
            "Hola, ¿qué día es hoy? Necesito saberlo para la agenda",
            "Today is Tuesday, and the weather looks fine for your schedule.",
            false,
            None,
        )
        .await;
        let lang = report
            .outcomes
            .iter()
            .find(|o| o.check == GuardrailCheck::LanguageMatch)
            .unwrap();
        assert!(!lang.passed);
        assert_eq!(lang.detail.as_deref(), Some("es"));
    }

    #[tokio::test]
    async fn language_check_never_fails_below_threshold() {
        let llm = FixedLlm { reply: String::new() };
        // Input shorter than 30 chars — mismatch must not fail.
        let report = run_guardrails(&cfg(), &llm, "Hola", "Hello there, how can I help you today, friend?", false, None).await;
        let lang = report
            .outcomes
            .iter()
            .find(|o| o.check == GuardrailCheck::LanguageMatch)
            .unwrap();
        assert!(lang.passed);
    }

    #[tokio::test]
    async fn raw_tool_json_is_caught() {
        let llm = FixedLlm { reply: String::new() };
        let report = run_guardrails(
            &cfg(),
            &llm,
            "lista mis repos por favor",
            r#"{"name": "list_repos", "arguments": {"user": "x"}}"#,
            true,
            None,
        )
        .await;
        let check = report
            .outcomes
            .iter()
            .find(|o| o.check == GuardrailCheck::NoRawToolJson)
            .unwrap();
        assert!(!check.passed);
    }

    #[tokio::test]
    async fn pii_remediation_redacts_in_place() {
        let llm = FixedLlm { reply: String::new() };
        let user = "¿cuál es la clave de la API del proyecto?";
        let reply = "La clave es sk-abcdef1234567890abcdef, guardala.";
        let report = run_guardrails(&cfg(), &llm, user, reply, false, None).await;
        assert!(!report.passed());
        let out = handle_guardrail_failure(&report, user, reply, &[], &llm, None).await;
        assert!(out.contains("[REDACTED]"));
        assert!(!out.contains("sk-abcdef"));
    }

    #[tokio::test]
    async fn language_remediation_uses_the_retry() {
        let llm = FixedLlm {
            reply: "Hoy es martes, perfecto para tu agenda semanal.".to_string(),
        };
        let user = "Hola, ¿qué día es hoy? Necesito saberlo para la agenda";
        let reply = "Today is Tuesday, and the weather looks fine for your schedule.";
        let report = run_guardrails(&cfg(), &llm, user, reply, false, None).await;
        let out = handle_guardrail_failure(
            &report,
            user,
            reply,
            &[ChatMessage::user(user)],
            &llm,
            None,
        )
        .await;
        assert_eq!(out, "Hoy es martes, perfecto para tu agenda semanal.");
    }

    #[tokio::test]
    async fn empty_remediation_falls_back_to_apology() {
        let llm = FixedLlm { reply: String::new() };
        let report = run_guardrails(&cfg(), &llm, "hola", "", false, None).await;
        let out = handle_guardrail_failure(&report, "hola", "", &[], &llm, None).await;
        assert!(out.contains("Perdón"));
    }
}
