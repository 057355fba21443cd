//! Web fetch tool, registered under the dynamic `fetch` category.
//!
//! The category may also be populated by an external skill source; the
//! router treats it like any built-in category either way.

use async_trait::async_trait;
use tracing::debug;

use super::{Tool, ToolResult};

const MAX_BODY_CHARS: usize = 16_000;

/// Current fetch backend, surfaced so the pipeline can explain a fallback
/// when no backend is registered.
pub fn get_fetch_mode(registry: &super::ToolRegistry) -> &'static str {
    if registry.tools_in("fetch").is_empty() {
        "unavailable"
    } else {
        "http"
    }
}

pub struct FetchUrlTool {
    pub client: reqwest::Client,
}

impl FetchUrlTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(20))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for FetchUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }
    fn description(&self) -> &str {
        "Download a web page and return its text content"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "http(s) URL to fetch" }
            },
            "required": ["url"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let url = match args.get("url").and_then(|v| v.as_str()) {
            Some(u) if u.starts_with("http://") || u.starts_with("https://") => u,
            Some(_) => return ToolResult::error("only http(s) URLs are supported"),
            None => return ToolResult::error("missing url"),
        };
        debug!(url, "fetching");
        let resp = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return ToolResult::error(format!("fetch failed: {e}")),
        };
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let text = strip_tags(&body);
        let mut out = format!("[{status}] {url}\n");
        if text.len() > MAX_BODY_CHARS {
            let mut end = MAX_BODY_CHARS;
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            out.push_str(&text[..end]);
            out.push_str("\n[truncated]");
        } else {
            out.push_str(&text);
        }
        if status.is_success() {
            ToolResult::success(out)
        } else {
            ToolResult::error(out)
        }
    }
}

/// Crude HTML-to-text: drop tags, script/style bodies, and collapse
/// whitespace. Good enough for the model to read an article.
fn strip_tags(html: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with the original.
    let lower = {
        let mut s = html.to_string();
        s.make_ascii_lowercase();
        s
    };
    let mut out = String::with_capacity(html.len() / 2);
    let mut in_tag = false;
    let mut i = 0;
    while i < html.len() {
        let ch = html[i..].chars().next().unwrap();
        if ch == '<' {
            // Skip script/style elements wholesale.
            for (open, close) in [("<script", "</script>"), ("<style", "</style>")] {
                if lower[i..].starts_with(open) {
                    match lower[i..].find(close) {
                        Some(pos) => i += pos + close.len(),
                        None => i = html.len(),
                    }
                    in_tag = false;
                    break;
                }
            }
            if i < html.len() && html[i..].starts_with('<') {
                in_tag = true;
                i += 1;
            }
            continue;
        }
        if ch == '>' {
            in_tag = false;
            out.push(' ');
        } else if !in_tag {
            out.push(ch);
        }
        i += ch.len_utf8();
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}
