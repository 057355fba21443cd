//! Consolidated system-prompt assembly and history windowing.
//!
//! One system message carries the base prompt plus XML-delimited sections;
//! empty sections are omitted entirely so the model never sees hollow tags.

use std::sync::LazyLock;

use regex::Regex;

use recado_memory::types::{MemoryEntry, MessageRole, StoredMessage};
use recado_memory::MemoryStore;

use crate::llm::{ChatMessage, Role};

/// Builder for the single consolidated system message.
pub struct ContextBuilder {
    base: String,
    sections: Vec<(String, String)>,
}

impl ContextBuilder {
    pub fn new(base_prompt: impl Into<String>) -> Self {
        Self {
            base: base_prompt.into(),
            sections: Vec::new(),
        }
    }

    /// Add an XML-delimited section. Empty content is dropped.
    pub fn add_section(mut self, tag: &str, content: &str) -> Self {
        if !content.trim().is_empty() {
            self.sections.push((tag.to_string(), content.trim().to_string()));
        }
        self
    }

    pub fn build_system_message(self) -> String {
        let mut out = self.base;
        for (tag, content) in self.sections {
            out.push_str(&format!("\n\n<{tag}>\n{content}\n</{tag}>"));
        }
        out
    }
}

/// Windowed history: all messages when the conversation fits in
/// `verbatim_count`, otherwise the latest window plus the stored rolling
/// summary (never summarizing synchronously).
pub fn get_windowed_history(
    store: &MemoryStore,
    conversation_id: i64,
    verbatim_count: usize,
) -> (Vec<ChatMessage>, Option<String>) {
    let total = store.count_messages(conversation_id).unwrap_or(0);
    let recent = store
        .get_recent_messages(conversation_id, verbatim_count, 0)
        .unwrap_or_default();
    let messages = recent.iter().map(stored_to_chat).collect();
    let summary = if total > verbatim_count {
        store.get_latest_summary(conversation_id).unwrap_or(None)
    } else {
        None
    };
    (messages, summary)
}

fn stored_to_chat(m: &StoredMessage) -> ChatMessage {
    let role = match m.role {
        MessageRole::System => Role::System,
        MessageRole::User => Role::User,
        MessageRole::Assistant => Role::Assistant,
        MessageRole::Tool => Role::Tool,
    };
    ChatMessage {
        role,
        content: m.content.clone(),
        tool_calls: Vec::new(),
    }
}

/// Per-category capability blurbs for the `<capabilities>` section.
/// Commands are always listed; category capabilities only when active.
pub fn capabilities_section(active_categories: &[String]) -> String {
    const CAPABILITIES: &[(&str, &str)] = &[
        ("conversation", "Recall and store long-term memories about the user."),
        ("notes", "Save and semantically search free-form notes."),
        ("projects", "Track project notes and their status."),
        ("selfcode", "Read and search the assistant's own source tree."),
        ("shell", "Run vetted shell commands and manage background processes."),
        ("evaluation", "Inspect trace scores and the curated eval dataset."),
        ("debugging", "Look at recent activity logs and traces."),
        ("fetch", "Download and read web pages the user links."),
    ];
    let mut lines: Vec<String> = CAPABILITIES
        .iter()
        .filter(|(cat, _)| active_categories.iter().any(|a| a == cat))
        .map(|(cat, desc)| format!("- {cat}: {desc}"))
        .collect();
    lines.push(
        "Commands: /agent <objective> starts a background agent session, /status shows it, \
         /cancel stops it; /approve and /reject answer pending approval requests."
            .to_string(),
    );
    lines.join("\n")
}

static FACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(me llamo|se llama|mi nombre|my name is|vivo en|vive en|lives? in|trabajo en|trabaja en|works? at|cumpleaños|birthday|años|years old)",
    )
    .expect("fact regex")
});

/// Stable user facts worth pinning as a high-priority system message,
/// regex-extracted from the active memories.
pub fn extract_user_facts(memories: &[MemoryEntry]) -> Vec<String> {
    memories
        .iter()
        .filter(|m| m.active && FACT_RE.is_match(&m.content))
        .map(|m| m.content.clone())
        .collect()
}
