//! Tool system for the tool-calling loop.
//!
//! Defines the `Tool` trait all handlers implement, the registry mapping
//! tool names to schemas and handlers, and the ordered category map the
//! router selects from.

pub mod eval_tools;
pub mod fetch_tools;
pub mod memory_tools;
pub mod notes_tools;
pub mod router;
pub mod selfcode_tools;
pub mod shell_tools;
pub mod tool_loop;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::ToolDefinition;

/// Result of executing a tool. Errors are observations, not exceptions —
/// the model sees them and decides whether to retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub content: String,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: message.into(),
        }
    }
}

/// Trait that all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name (e.g. "run_command").
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the arguments object.
    fn parameters(&self) -> serde_json::Value;
    async fn execute(&self, args: serde_json::Value) -> ToolResult;
}

/// Registry of available tools plus the ordered category map.
///
/// Category order matters — the selector walks categories in declaration
/// order when distributing the tool budget. Dynamic categories (e.g.
/// `fetch` from an external skill source) append after the built-ins.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    categories: Vec<(String, Vec<String>)>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under `category`, creating the category at the end
    /// of the order if it does not exist yet.
    pub fn register(&mut self, category: &str, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.categories.iter_mut().find(|(c, _)| c == category) {
            Some((_, names)) => {
                if !names.contains(&name) {
                    names.push(name.clone());
                }
            }
            None => {
                self.categories
                    .push((category.to_string(), vec![name.clone()]));
            }
        }
        self.tools.insert(name, tool);
    }

    /// Category names in declaration order.
    pub fn category_names(&self) -> Vec<String> {
        self.categories.iter().map(|(c, _)| c.clone()).collect()
    }

    /// Tool names registered under `category`, in registration order.
    pub fn tools_in(&self, category: &str) -> &[String] {
        self.categories
            .iter()
            .find(|(c, _)| c == category)
            .map(|(_, names)| names.as_slice())
            .unwrap_or(&[])
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Schema for one registered tool.
    pub fn definition(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.get(name).map(|t| ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters(),
        })
    }

    /// A copy of this registry extended with session-scoped tools. The base
    /// registry is untouched; the clone shares the tool handlers via `Arc`.
    pub fn extended(&self, extra: Vec<(String, Arc<dyn Tool>)>) -> ToolRegistry {
        let mut out = ToolRegistry {
            tools: self.tools.clone(),
            categories: self.categories.clone(),
        };
        for (category, tool) in extra {
            out.register(&category, tool);
        }
        out
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::registry_with;

    #[test]
    fn category_order_is_declaration_order() {
        let reg = registry_with(&[
            ("projects", &["p1", "p2"]),
            ("github", &["g1"]),
            ("shell", &["run_command"]),
        ]);
        assert_eq!(reg.category_names(), vec!["projects", "github", "shell"]);
        assert_eq!(reg.tools_in("projects"), &["p1", "p2"]);
    }

    #[test]
    fn extended_registry_leaves_base_untouched() {
        let reg = registry_with(&[("shell", &["run_command"])]);
        let ext = reg.extended(vec![(
            "agent".to_string(),
            std::sync::Arc::new(super::testutil::EchoTool {
                tool_name: "create_task_plan".to_string(),
            }),
        )]);
        assert!(ext.contains("create_task_plan"));
        assert!(!reg.contains("create_task_plan"));
    }
}
