//! Note tools (categories: notes, projects).

use std::sync::Arc;

use async_trait::async_trait;

use recado_memory::types::NoteScope;
use recado_memory::MemoryStore;

use super::{Tool, ToolResult};
use crate::llm::LlmClient;

pub struct AddNoteTool {
    pub store: Arc<MemoryStore>,
    pub llm: Arc<dyn LlmClient>,
    pub scope: NoteScope,
}

#[async_trait]
impl Tool for AddNoteTool {
    fn name(&self) -> &str {
        match self.scope {
            NoteScope::User => "add_note",
            NoteScope::Project => "add_project_note",
        }
    }
    fn description(&self) -> &str {
        match self.scope {
            NoteScope::User => "Save a free-form note for the user",
            NoteScope::Project => "Save a note attached to a project",
        }
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "owner": { "type": "string", "description": "User handle or project name" },
                "content": { "type": "string" }
            },
            "required": ["owner", "content"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let owner = args.get("owner").and_then(|v| v.as_str()).unwrap_or_default();
        let content = args
            .get("content")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if owner.is_empty() || content.is_empty() {
            return ToolResult::error("owner and content are required");
        }
        // Embed so the note is retrievable semantically; a failed embedding
        // still saves the text.
        let embedding = self.llm.embed(content).await.ok();
        match self
            .store
            .add_note(self.scope, owner, content, embedding.as_deref())
        {
            Ok(id) => ToolResult::success(format!("Note saved (id {id})")),
            Err(e) => ToolResult::error(format!("could not save note: {e}")),
        }
    }
}

pub struct SearchNotesTool {
    pub store: Arc<MemoryStore>,
    pub llm: Arc<dyn LlmClient>,
}

#[async_trait]
impl Tool for SearchNotesTool {
    fn name(&self) -> &str {
        "search_notes"
    }
    fn description(&self) -> &str {
        "Semantically search saved notes"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "top_k": { "type": "integer", "default": 3 }
            },
            "required": ["query"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let query = args.get("query").and_then(|v| v.as_str()).unwrap_or_default();
        if query.is_empty() {
            return ToolResult::error("missing query");
        }
        let top_k = args.get("top_k").and_then(|v| v.as_u64()).unwrap_or(3) as usize;
        let embedding = match self.llm.embed(query).await {
            Ok(v) => v,
            Err(e) => return ToolResult::error(format!("embedding failed: {e}")),
        };
        match self.store.search_similar_notes_with_distance(&embedding, top_k) {
            Ok(hits) if hits.is_empty() => ToolResult::success("No matching notes"),
            Ok(hits) => {
                let lines: Vec<String> = hits
                    .iter()
                    .map(|(content, d)| format!("({d:.3}) {content}"))
                    .collect();
                ToolResult::success(lines.join("\n"))
            }
            Err(e) => ToolResult::error(format!("search failed: {e}")),
        }
    }
}

pub struct ListProjectNotesTool {
    pub store: Arc<MemoryStore>,
}

#[async_trait]
impl Tool for ListProjectNotesTool {
    fn name(&self) -> &str {
        "list_project_notes"
    }
    fn description(&self) -> &str {
        "List the notes saved for a project"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "project": { "type": "string" }
            },
            "required": ["project"]
        })
    }
    async fn execute(&self, args: serde_json::Value) -> ToolResult {
        let project = args
            .get("project")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if project.is_empty() {
            return ToolResult::error("missing project");
        }
        match self.store.list_notes(NoteScope::Project, project) {
            Ok(notes) if notes.is_empty() => {
                ToolResult::success(format!("No notes for project {project}"))
            }
            Ok(notes) => {
                let lines: Vec<String> = notes
                    .iter()
                    .map(|n| format!("[{}] {}", n.id, n.content))
                    .collect();
                ToolResult::success(lines.join("\n"))
            }
            Err(e) => ToolResult::error(format!("could not list notes: {e}")),
        }
    }
}
