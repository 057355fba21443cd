//! Tool-output compaction.
//!
//! Large tool outputs are shrunk before they enter history, in order of
//! preference: JSON-aware field extraction (no LLM, preserves exact
//! identifiers), LLM summarization with an explicit no-placeholder
//! instruction, hard truncation. A summarizing model tends to replace real
//! identifiers with `[placeholders]`; the JSON path exists to keep strings
//! like repository names byte-exact.

use tracing::{debug, warn};

use crate::llm::{ChatMessage, LlmClient};

/// Fields worth keeping when extracting from JSON tool output.
const KEY_FIELDS: &[&str] = &[
    "name",
    "full_name",
    "id",
    "title",
    "description",
    "html_url",
    "url",
    "state",
    "number",
    "login",
    "email",
    "path",
    "sha",
    "tag_name",
    "status",
];

/// Nested objects flattened one level into `parent.field`.
const FLATTEN_PARENTS: &[&str] = &["user", "login", "owner", "author"];

/// Compact `text` when it exceeds `max_length`.
pub async fn compact_tool_output(
    tool_name: &str,
    text: &str,
    user_request: &str,
    llm: &dyn LlmClient,
    max_length: usize,
) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
        if let Some(extracted) = extract_json(&value, max_length) {
            debug!(tool = tool_name, from = text.len(), to = extracted.len(), "json compaction");
            return extracted;
        }
    }

    match summarize(tool_name, text, user_request, llm, max_length).await {
        Some(summary) => summary,
        None => {
            warn!(tool = tool_name, "compaction fell back to hard truncation");
            hard_truncate(text, max_length)
        }
    }
}

/// Extract whitelisted fields from a JSON value. Returns `None` when the
/// shape yields nothing useful.
pub fn extract_json(value: &serde_json::Value, max_length: usize) -> Option<String> {
    // Lists: either a top-level array or an `items` array.
    let list = match value {
        serde_json::Value::Array(items) => Some(items.as_slice()),
        serde_json::Value::Object(map) => map.get("items").and_then(|v| v.as_array()).map(|a| a.as_slice()),
        _ => None,
    };

    if let Some(items) = list {
        let total = items.len();
        let mut lines: Vec<String> = Vec::new();
        let mut used = 0usize;
        for item in items {
            let line = extract_object_line(item);
            if line.is_empty() {
                continue;
            }
            // Leave room for the closing annotation.
            if used + line.len() + 64 > max_length {
                break;
            }
            used += line.len() + 1;
            lines.push(line);
        }
        if lines.is_empty() {
            return None;
        }
        let shown = lines.len();
        let mut out = lines.join("\n");
        if shown < total {
            out.push_str(&format!("\n(Showing {shown} of {total})"));
        }
        return Some(out);
    }

    let line = extract_object_line(value);
    if line.is_empty() {
        None
    } else {
        Some(line)
    }
}

/// One object → `field: value` pairs for whitelisted fields, flattening one
/// level of the well-known nested objects.
fn extract_object_line(value: &serde_json::Value) -> String {
    let Some(map) = value.as_object() else {
        return String::new();
    };
    let mut parts: Vec<String> = Vec::new();
    for field in KEY_FIELDS {
        if let Some(v) = map.get(*field) {
            if let Some(text) = scalar_text(v) {
                parts.push(format!("{field}: {text}"));
            }
        }
    }
    for parent in FLATTEN_PARENTS {
        if let Some(serde_json::Value::Object(inner)) = map.get(*parent) {
            for field in KEY_FIELDS {
                if let Some(v) = inner.get(*field) {
                    if let Some(text) = scalar_text(v) {
                        parts.push(format!("{parent}.{field}: {text}"));
                    }
                }
            }
        }
    }
    parts.join(", ")
}

fn scalar_text(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

async fn summarize(
    tool_name: &str,
    text: &str,
    user_request: &str,
    llm: &dyn LlmClient,
    max_length: usize,
) -> Option<String> {
    let prompt = format!(
        "Summarize this output from the `{tool_name}` tool so it still answers \
         the user's request: \"{user_request}\".\n\
         Keep every identifier (names, ids, URLs, hashes) EXACTLY as written. \
         NEVER substitute real identifiers with [placeholders].\n\n{text}"
    );
    let messages = [ChatMessage::system(prompt)];
    match llm.chat(&messages, false).await {
        Ok(r) if !r.content.trim().is_empty() => Some(hard_truncate(&r.content, max_length)),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, tool = tool_name, "compaction summarize failed");
            None
        }
    }
}

fn hard_truncate(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }
    let mut end = max_length.saturating_sub(16);
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[truncated]", &text[..end])
}
