//! The recado core: request pipeline, tool-calling executor, guardrails,
//! and the background agent runtime.
//!
//! Everything here is channel-agnostic. The gateway feeds inbound webhook
//! messages into `pipeline::handle_inbound` and wires the concrete LLM and
//! messaging clients at startup.

pub mod compact;
pub mod guardrails;
pub mod hitl;
pub mod llm;
pub mod llm_local;
pub mod messaging;
pub mod pipeline;
pub mod policy;
pub mod session;
pub mod state;
pub mod tools;

pub use llm::{ChatMessage, ChatResponse, LlmClient, LlmError, Role, ToolCall, ToolDefinition};
pub use messaging::MessagingClient;
pub use state::RuntimeState;
