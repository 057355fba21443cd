//! Source-tree inspection tools (category: selfcode).
//!
//! All paths resolve under the configured project root; anything escaping
//! it is refused before touching the filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Tool, ToolResult};

const MAX_FILE_CHARS: usize = 12_000;
const MAX_MATCHES: usize = 50;

/// Resolve `relative` under `root`, refusing traversal outside it.
fn resolve(root: &Path, relative: &str) -> Result<PathBuf, String> {
    if relative.contains("..") {
        return Err("path traversal is not allowed".to_string());
    }
    let joined = root.join(relative.trim_start_matches('/'));
    Ok(joined)
}

pub struct ListSourceFilesTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ListSourceFilesTool {
    fn name(&self) -> &str {
        "list_source_files"
    }
    fn description(&self) -> &str {
        "List files under a directory of the project tree"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory relative to the project root", "default": "." }
            }
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let rel = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let dir = match resolve(&self.root, rel) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) => return ToolResult::error(format!("cannot list {rel}: {e}")),
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| {
                let suffix = if e.path().is_dir() { "/" } else { "" };
                format!("{}{suffix}", e.file_name().to_string_lossy())
            })
            .collect();
        names.sort();
        let count = names.len();
        ToolResult::success(format!("{}\n({count} entries)", names.join("\n")))
    }
}

pub struct ReadSourceFileTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ReadSourceFileTool {
    fn name(&self) -> &str {
        "read_source_file"
    }
    fn description(&self) -> &str {
        "Read a file from the project tree"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" }
            },
            "required": ["path"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let rel = match args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolResult::error("missing path"),
        };
        let path = match resolve(&self.root, rel) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        match std::fs::read_to_string(&path) {
            Ok(content) if content.len() > MAX_FILE_CHARS => {
                let mut end = MAX_FILE_CHARS;
                while end > 0 && !content.is_char_boundary(end) {
                    end -= 1;
                }
                ToolResult::success(format!("{}\n[file truncated]", &content[..end]))
            }
            Ok(content) => ToolResult::success(content),
            Err(e) => ToolResult::error(format!("cannot read {rel}: {e}")),
        }
    }
}

pub struct SearchSourceTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for SearchSourceTool {
    fn name(&self) -> &str {
        "search_source"
    }
    fn description(&self) -> &str {
        "Search the project tree for a text pattern"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "path": { "type": "string", "default": "." }
            },
            "required": ["pattern"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let pattern = match args.get("pattern").and_then(|v| v.as_str()) {
            Some(p) if !p.is_empty() => p,
            _ => return ToolResult::error("missing pattern"),
        };
        let rel = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let dir = match resolve(&self.root, rel) {
            Ok(p) => p,
            Err(e) => return ToolResult::error(e),
        };
        let mut matches: Vec<String> = Vec::new();
        search_dir(&dir, &self.root, pattern, &mut matches);
        if matches.is_empty() {
            ToolResult::success(format!("No matches for `{pattern}`"))
        } else {
            let total = matches.len();
            matches.truncate(MAX_MATCHES);
            let mut out = matches.join("\n");
            if total > MAX_MATCHES {
                out.push_str(&format!("\n(Showing {MAX_MATCHES} of {total})"));
            }
            ToolResult::success(out)
        }
    }
}

fn search_dir(dir: &Path, root: &Path, pattern: &str, matches: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name == "target" {
            continue;
        }
        if path.is_dir() {
            search_dir(&path, root, pattern, matches);
        } else if let Ok(content) = std::fs::read_to_string(&path) {
            for (lineno, line) in content.lines().enumerate() {
                if line.contains(pattern) {
                    let rel = path.strip_prefix(root).unwrap_or(&path);
                    matches.push(format!("{}:{}: {}", rel.display(), lineno + 1, line.trim()));
                }
            }
        }
    }
}
