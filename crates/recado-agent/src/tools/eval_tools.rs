//! Evaluation and debugging tools (categories: evaluation, debugging).

use std::sync::Arc;

use async_trait::async_trait;

use recado_memory::MemoryStore;

use super::{Tool, ToolResult};

pub struct DatasetStatsTool {
    pub store: Arc<MemoryStore>,
}

#[async_trait]
impl Tool for DatasetStatsTool {
    fn name(&self) -> &str {
        "dataset_stats"
    }
    fn description(&self) -> &str {
        "Counters for the curated eval dataset"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }
    async fn execute(&self, _args: serde_json::Value) -> ToolResult {
        match self.store.get_dataset_stats() {
            Ok(s) => ToolResult::success(format!(
                "golden: {}, failure: {}, correction: {}",
                s.golden, s.failure, s.correction
            )),
            Err(e) => ToolResult::error(format!("stats unavailable: {e}")),
        }
    }
}

pub struct RecentTraceTool {
    pub store: Arc<MemoryStore>,
}

#[async_trait]
impl Tool for RecentTraceTool {
    fn name(&self) -> &str {
        "latest_trace"
    }
    fn description(&self) -> &str {
        "Latest trace id recorded for a user handle"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "handle": { "type": "string" }
            },
            "required": ["handle"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let handle = args.get("handle").and_then(|v| v.as_str()).unwrap_or_default();
        if handle.is_empty() {
            return ToolResult::error("missing handle");
        }
        match self.store.get_latest_trace_id(handle) {
            Ok(Some(id)) => ToolResult::success(id),
            Ok(None) => ToolResult::success(format!("No traces for {handle}")),
            Err(e) => ToolResult::error(format!("lookup failed: {e}")),
        }
    }
}

pub struct DailyLogTool {
    pub store: Arc<MemoryStore>,
}

#[async_trait]
impl Tool for DailyLogTool {
    fn name(&self) -> &str {
        "recent_activity"
    }
    fn description(&self) -> &str {
        "Read the latest daily activity log entries"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "default": 20 }
            }
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(20) as usize;
        match self.store.get_daily_excerpt(limit) {
            Ok(entries) if entries.is_empty() => ToolResult::success("No activity logged yet"),
            Ok(entries) => ToolResult::success(entries.join("\n")),
            Err(e) => ToolResult::error(format!("log unavailable: {e}")),
        }
    }
}
