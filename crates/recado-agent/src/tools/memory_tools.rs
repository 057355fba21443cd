//! Long-term memory tools (category: conversation).

use std::sync::Arc;

use async_trait::async_trait;

use recado_memory::types::MemoryCategory;
use recado_memory::MemoryStore;

use super::{Tool, ToolResult};

pub struct SaveMemoryTool {
    pub store: Arc<MemoryStore>,
}

#[async_trait]
impl Tool for SaveMemoryTool {
    fn name(&self) -> &str {
        "save_memory"
    }
    fn description(&self) -> &str {
        "Store a durable fact or preference about the user"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "The fact to remember" },
                "category": {
                    "type": "string",
                    "enum": ["personal", "preference", "project"],
                    "description": "Kind of memory"
                }
            },
            "required": ["content"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let content = match args.get("content").and_then(|v| v.as_str()) {
            Some(c) if !c.trim().is_empty() => c.trim(),
            _ => return ToolResult::error("missing content"),
        };
        let category = args
            .get("category")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<MemoryCategory>().ok())
            .unwrap_or(MemoryCategory::Personal);
        match self.store.add_memory(content, category, None) {
            Ok(Some(id)) => ToolResult::success(format!("Memory saved (id {id})")),
            Ok(None) => ToolResult::success("A near-identical memory already exists"),
            Err(e) => ToolResult::error(format!("could not save memory: {e}")),
        }
    }
}

pub struct ListMemoriesTool {
    pub store: Arc<MemoryStore>,
}

#[async_trait]
impl Tool for ListMemoriesTool {
    fn name(&self) -> &str {
        "list_memories"
    }
    fn description(&self) -> &str {
        "List the active memories about the user"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }
    async fn execute(&self, _args: serde_json::Value) -> ToolResult {
        match self.store.get_active_memories() {
            Ok(memories) => {
                // Self-corrections are private working notes — never listed.
                let lines: Vec<String> = memories
                    .iter()
                    .filter(|m| !m.category.is_private())
                    .map(|m| format!("[{}] {} ({})", m.id, m.content, m.category))
                    .collect();
                if lines.is_empty() {
                    ToolResult::success("No memories stored yet")
                } else {
                    ToolResult::success(lines.join("\n"))
                }
            }
            Err(e) => ToolResult::error(format!("could not list memories: {e}")),
        }
    }
}

pub struct ForgetMemoryTool {
    pub store: Arc<MemoryStore>,
}

#[async_trait]
impl Tool for ForgetMemoryTool {
    fn name(&self) -> &str {
        "forget_memory"
    }
    fn description(&self) -> &str {
        "Deactivate a stored memory by id"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "id": { "type": "integer", "description": "Memory id from list_memories" }
            },
            "required": ["id"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let Some(id) = args.get("id").and_then(|v| v.as_i64()) else {
            return ToolResult::error("missing id");
        };
        match self.store.deactivate_memory(id) {
            Ok(()) => ToolResult::success(format!("Memory {id} forgotten")),
            Err(e) => ToolResult::error(format!("could not forget memory: {e}")),
        }
    }
}
