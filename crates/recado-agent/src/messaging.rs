//! Outbound messaging boundary.
//!
//! Formatting, chunk-splitting, and rate limiting belong to the gateway on
//! the other side of this trait — the core only needs the returned message
//! id for trace binding.

use async_trait::async_trait;
use tracing::debug;

use recado_core::{RecadoError, Result};

#[async_trait]
pub trait MessagingClient: Send + Sync {
    /// Send `text` to `to`, returning the provider's outbound message id
    /// when it exposes one.
    async fn send_message(&self, to: &str, text: &str) -> Result<Option<String>>;
}

/// HTTP client for a WhatsApp-gateway send endpoint.
pub struct WhatsappGateway {
    client: reqwest::Client,
    base_url: String,
}

impl WhatsappGateway {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MessagingClient for WhatsappGateway {
    async fn send_message(&self, to: &str, text: &str) -> Result<Option<String>> {
        let url = format!("{}/send", self.base_url);
        debug!(to, chars = text.len(), "sending message");
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "to": to, "text": text }))
            .send()
            .await
            .map_err(|e| RecadoError::Messaging(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(RecadoError::Messaging(format!(
                "send failed with status {}",
                resp.status()
            )));
        }
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| RecadoError::Messaging(e.to_string()))?;
        Ok(body
            .get("message_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()))
    }
}
