use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Messaging-channel user handle (e.g. the WhatsApp phone JID).
///
/// At most one active conversation and one non-terminal agent session exist
/// per handle at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(pub String);

impl Handle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Handle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Handle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Opaque trace identifier (random UUID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque span identifier. Parent links are carried as ids, never pointers,
/// so the span tree stays acyclic across task boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId(pub String);

impl SpanId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SpanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque agent-session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rough token estimate: ~4 characters per token, floor of 1.
///
/// Good enough for budget warnings; exact counts come from the LLM response
/// usage counters.
pub fn estimate_tokens(text: &str) -> usize {
    std::cmp::max(1, text.len() / 4)
}

/// Sum the estimated tokens of a message list and log against `limit`.
///
/// INFO below 80%, WARN at 80–100%, ERROR above the limit. Never fails —
/// this is advisory only.
pub fn log_context_budget(contents: &[&str], limit: usize) -> usize {
    let estimate: usize = contents.iter().map(|c| estimate_tokens(c)).sum();
    let pct = estimate * 100 / std::cmp::max(1, limit);
    if estimate > limit {
        tracing::error!(estimate, limit, pct, "context budget exceeded");
    } else if pct >= 80 {
        tracing::warn!(estimate, limit, pct, "context budget near limit");
    } else {
        tracing::info!(estimate, limit, pct, "context budget ok");
    }
    estimate
}
