//! Inbound message webhook.
//!
//! The messaging gateway has already verified signatures and downloaded
//! media by the time a request lands here; this route only extracts the
//! envelope and hands it to the pipeline on its own task.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use tracing::{info, warn};

use recado_agent::pipeline::{handle_inbound, InboundMessage};
use recado_agent::RuntimeState;
use recado_memory::types::TraceMessageType;

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    /// Channel message id, used for exactly-once processing.
    pub id: String,
    /// Sender handle.
    pub from: String,
    #[serde(default)]
    pub text: String,
    /// "text" | "audio" | "image" — transcription happens upstream, so
    /// audio/image arrive here with their text already extracted.
    #[serde(default = "default_type")]
    pub message_type: String,
}

fn default_type() -> String {
    "text".to_string()
}

/// `POST /webhook` — ack immediately, process on a tracked task.
pub async fn receive(
    State(state): State<Arc<RuntimeState>>,
    Json(payload): Json<WebhookPayload>,
) -> StatusCode {
    if payload.from.is_empty() || payload.text.trim().is_empty() {
        return StatusCode::UNPROCESSABLE_ENTITY;
    }
    let message_type = match payload.message_type.as_str() {
        "audio" => TraceMessageType::Audio,
        "image" => TraceMessageType::Image,
        _ => TraceMessageType::Text,
    };
    info!(from = %payload.from, id = %payload.id, "webhook received");

    let msg = InboundMessage {
        external_id: payload.id,
        from: payload.from,
        text: payload.text,
        message_type,
    };
    let state2 = Arc::clone(&state);
    state.track_background_task(async move {
        if let Err(e) = handle_inbound(state2, msg).await {
            warn!(error = %e, "inbound processing failed");
        }
    });
    StatusCode::ACCEPTED
}
