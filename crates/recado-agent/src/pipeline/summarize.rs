//! Rolling conversation summarization.
//!
//! Fired after a turn when the conversation outgrows
//! `conversation_max_messages`. The summarizer condenses everything before
//! the verbatim window into one summary row; messages themselves are
//! append-only and never deleted. Best-effort: failures are logged and the
//! next turn simply tries again.

use std::sync::Arc;

use tracing::{info, warn};

use crate::llm::{ChatMessage, LlmClient};
use crate::state::RuntimeState;

/// Spawn the summarization job when the threshold is crossed.
pub fn schedule_if_needed(state: &Arc<RuntimeState>, conversation_id: i64) {
    let count = match state.store.count_messages(conversation_id) {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "summarize: count failed");
            return;
        }
    };
    if count <= state.config.pipeline.conversation_max_messages {
        return;
    }
    let state = Arc::clone(state);
    let inner = Arc::clone(&state);
    state.track_background_task(async move {
        summarize_conversation(&inner, conversation_id).await;
    });
}

async fn summarize_conversation(state: &Arc<RuntimeState>, conversation_id: i64) {
    let verbatim = state.config.pipeline.history_verbatim_count;
    let old = match state
        .store
        .get_messages_before_window(conversation_id, verbatim)
    {
        Ok(msgs) if !msgs.is_empty() => msgs,
        Ok(_) => return,
        Err(e) => {
            warn!(error = %e, "summarize: load failed");
            return;
        }
    };

    let previous = state
        .store
        .get_latest_summary(conversation_id)
        .unwrap_or(None);
    let transcript: String = old
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = String::from(
        "Condense this conversation into a short summary that preserves \
         facts, decisions, and open threads. Write it in the user's language.\n\n",
    );
    if let Some(prev) = previous {
        prompt.push_str(&format!("Existing summary:\n{prev}\n\n"));
    }
    prompt.push_str(&format!("New messages:\n{transcript}"));

    let messages = [ChatMessage::system(prompt)];
    match state.llm.chat(&messages, false).await {
        Ok(r) if !r.content.trim().is_empty() => {
            let up_to = old.last().map(|m| m.id).unwrap_or(0);
            if let Err(e) = state
                .store
                .save_summary(conversation_id, r.content.trim(), up_to)
            {
                warn!(error = %e, "summarize: save failed");
            } else {
                info!(conversation_id, messages = old.len(), "conversation summarized");
            }
        }
        Ok(_) => warn!(conversation_id, "summarize: model returned empty summary"),
        Err(e) => warn!(error = %e, "summarize: llm call failed"),
    }
}
