//! HTTP client for a local Ollama-compatible inference server.
//!
//! Endpoints used: `POST /api/chat` (with optional tools) and
//! `POST /api/embeddings`. Transient transport errors get one retry; API
//! errors do not.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use recado_core::config::LlmConfig;

use crate::llm::{
    strip_reasoning, ChatMessage, ChatResponse, LlmClient, LlmError, Role, ToolCall,
    ToolDefinition,
};

pub struct LocalLlm {
    client: reqwest::Client,
    base_url: String,
    model: String,
    embedding_model: String,
}

impl LocalLlm {
    pub fn new(cfg: &LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            embedding_model: cfg.embedding_model.clone(),
        }
    }

    async fn chat_inner(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        think: bool,
    ) -> Result<ChatResponse, LlmError> {
        let body = build_request_body(&self.model, messages, tools, think);
        let url = format!("{}/api/chat", self.base_url);
        debug!(model = %self.model, tools = tools.len(), "chat request");

        let resp = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) if e.is_connect() || e.is_timeout() => {
                // One retry for transient transport failures.
                warn!(error = %e, "chat transport error, retrying once");
                self.client.post(&url).json(&body).send().await?
            }
            Err(e) => return Err(LlmError::Http(e)),
        };

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "chat API error");
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        let api: ApiResponse = resp.json().await.map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(parse_response(api))
    }
}

#[async_trait]
impl LlmClient for LocalLlm {
    async fn chat(&self, messages: &[ChatMessage], think: bool) -> Result<ChatResponse, LlmError> {
        self.chat_inner(messages, &[], think).await
    }

    async fn chat_with_tools(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        think: bool,
    ) -> Result<ChatResponse, LlmError> {
        self.chat_inner(messages, tools, think).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.embedding_model,
            "prompt": text,
        });
        let resp = self.client.post(&url).json(&body).send().await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }
        let parsed: EmbeddingResponse =
            resp.json().await.map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(parsed.embedding)
    }
}

fn build_request_body(
    model: &str,
    messages: &[ChatMessage],
    tools: &[ToolDefinition],
    think: bool,
) -> serde_json::Value {
    let msgs: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            if m.tool_calls.is_empty() {
                serde_json::json!({ "role": role, "content": m.content })
            } else {
                let calls: Vec<serde_json::Value> = m
                    .tool_calls
                    .iter()
                    .map(|c| {
                        serde_json::json!({
                            "function": { "name": c.name, "arguments": c.arguments }
                        })
                    })
                    .collect();
                serde_json::json!({ "role": role, "content": m.content, "tool_calls": calls })
            }
        })
        .collect();

    let mut body = serde_json::json!({
        "model": model,
        "messages": msgs,
        "stream": false,
        "think": think,
    });
    if !tools.is_empty() {
        let defs: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(defs);
    }
    body
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: Option<String>,
    message: Option<ApiMessage>,
    #[serde(default)]
    prompt_eval_count: u32,
    #[serde(default)]
    eval_count: u32,
    /// Nanoseconds, per the Ollama API.
    #[serde(default)]
    total_duration: u64,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Debug, Deserialize)]
struct ApiToolCall {
    function: ApiFunction,
}

#[derive(Debug, Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

fn parse_response(api: ApiResponse) -> ChatResponse {
    let message = api.message.unwrap_or(ApiMessage {
        content: String::new(),
        tool_calls: Vec::new(),
    });
    let tool_calls = message
        .tool_calls
        .into_iter()
        .map(|c| ToolCall {
            id: Uuid::new_v4().to_string(),
            name: c.function.name,
            arguments: c.function.arguments,
        })
        .collect();
    ChatResponse {
        // Reasoning tags are removed here, before anything reaches history.
        content: strip_reasoning(&message.content),
        tool_calls,
        input_tokens: api.prompt_eval_count,
        output_tokens: api.eval_count,
        model: api.model.unwrap_or_default(),
        total_duration_ms: api.total_duration / 1_000_000,
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}
