//! Best-effort dataset curation and self-correction memory writes.
//!
//! Scheduled after the reply has been delivered; nothing here blocks the
//! pipeline or surfaces to the user.

use std::sync::Arc;

use tracing::{debug, warn};

use recado_memory::types::{DatasetEntryType, MemoryCategory};
use recado_trace::TraceContext;

use crate::guardrails::GuardrailReport;
use crate::state::RuntimeState;

/// Queue a curation pass for the finished turn.
pub fn schedule(
    state: &Arc<RuntimeState>,
    trace: Option<&TraceContext>,
    user_text: &str,
    reply: &str,
    report: &GuardrailReport,
) {
    let Some(trace) = trace else {
        return;
    };
    let trace_id = trace.trace_id.as_str().to_string();
    let user_text = user_text.to_string();
    let reply = reply.to_string();
    let report = report.clone();
    let state2 = Arc::clone(state);
    state.track_background_task(async move {
        curate_turn(&state2, &trace_id, &user_text, &reply, &report);
    });
}

fn curate_turn(
    state: &Arc<RuntimeState>,
    trace_id: &str,
    user_text: &str,
    reply: &str,
    report: &GuardrailReport,
) {
    match report.first_failure() {
        None => {
            // A clean turn becomes a golden candidate.
            if let Err(e) = state.store.add_dataset_entry(
                trace_id,
                DatasetEntryType::Golden,
                user_text,
                reply,
                None,
                &[],
                &serde_json::json!({}),
            ) {
                warn!(error = %e, "curation: golden entry failed");
            }
        }
        Some(failure) => {
            let check = failure.check.name();
            let tags = vec![check.to_string()];
            if let Err(e) = state.store.add_dataset_entry(
                trace_id,
                DatasetEntryType::Failure,
                user_text,
                reply,
                None,
                &tags,
                &serde_json::json!({ "check": check }),
            ) {
                warn!(error = %e, "curation: failure entry failed");
            }
            // Private working note so the model can avoid repeating the
            // mistake; expires via the self-correction cleanup job.
            let note = format!(
                "When replying to requests like \"{}\", the {} check failed. Avoid that.",
                truncate(user_text, 120),
                check
            );
            match state
                .store
                .add_memory(&note, MemoryCategory::SelfCorrection, None)
            {
                Ok(Some(_)) => debug!(check, "self-correction memory saved"),
                Ok(None) => debug!(check, "self-correction memory deduplicated"),
                Err(e) => warn!(error = %e, "curation: self-correction write failed"),
            }
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}
