//! Liveness endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use recado_agent::llm::{ChatMessage, LlmClient};
use recado_agent::RuntimeState;

/// `GET /healthz` — reports database and LLM reachability.
pub async fn healthz(State(state): State<Arc<RuntimeState>>) -> Json<serde_json::Value> {
    let db_ok = state.store.get_dataset_stats().is_ok();
    let llm_ok = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        state.llm.chat(&[ChatMessage::user("ping")], false),
    )
    .await
    .map(|r| r.is_ok())
    .unwrap_or(false);

    Json(serde_json::json!({
        "status": if db_ok { "ok" } else { "degraded" },
        "database": db_ok,
        "llm": llm_ok,
        "active_sessions": state.sessions.active_count(),
    }))
}
