//! Deterministic mapping from intent categories to concrete tool schemas.
//!
//! The selector distributes the tool budget proportionally across the
//! requested categories instead of letting the first category starve the
//! rest. A single category keeps the legacy behavior (the whole budget).

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::llm::{ChatMessage, LlmClient, ToolDefinition};
use crate::tools::ToolRegistry;

/// Name of the meta-tool the executor handles inline.
pub const META_TOOL: &str = "request_more_tools";

/// Sentinel category answer meaning "no tools needed".
pub const NONE_CATEGORY: &str = "none";

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s>\)]+").expect("url regex"));

/// Select up to `max_tools` tool schemas for the given categories.
///
/// `per_cat = max(2, max_tools / N)`; each category contributes up to
/// `per_cat` tools in its declaration order, deduped across categories,
/// and the result is truncated to `max_tools`.
pub fn select_tools(
    categories: &[String],
    registry: &ToolRegistry,
    max_tools: usize,
) -> Vec<ToolDefinition> {
    if categories.is_empty() {
        return Vec::new();
    }
    let per_cat = std::cmp::max(2, max_tools / categories.len());
    let mut selected: Vec<ToolDefinition> = Vec::new();

    for category in categories {
        let mut taken = 0;
        for name in registry.tools_in(category) {
            if taken >= per_cat {
                break;
            }
            if selected.iter().any(|t| &t.name == name) {
                continue;
            }
            if let Some(def) = registry.definition(name) {
                selected.push(def);
                taken += 1;
            }
        }
    }

    selected.truncate(max_tools);
    selected
}

/// Schema for the meta-tool. The description embeds the available category
/// names (sorted) so the model knows what it can ask for.
pub fn request_more_tools_schema(registry: &ToolRegistry) -> ToolDefinition {
    let mut names = registry.category_names();
    names.sort();
    ToolDefinition {
        name: META_TOOL.to_string(),
        description: format!(
            "Request additional tools when the current palette is insufficient. \
             Available categories: {}.",
            names.join(", ")
        ),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "categories": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Category names to load tools from"
                },
                "reason": {
                    "type": "string",
                    "description": "Why the additional tools are needed"
                }
            },
            "required": ["categories", "reason"]
        }),
    }
}

/// Classify the user's intent into tool categories.
///
/// Fast path: a URL in the message forces `fetch` without an LLM call —
/// this guarantees tools when the classifier would otherwise return none.
/// Otherwise one LLM call over the recent context; `none` plus non-empty
/// sticky categories falls back to sticky.
pub async fn classify_intent(
    user_text: &str,
    recent: &[ChatMessage],
    sticky: &[String],
    llm: &dyn LlmClient,
    registry: &ToolRegistry,
) -> Vec<String> {
    if URL_RE.is_match(user_text) {
        debug!("url fast-path: forcing fetch category");
        return vec!["fetch".to_string()];
    }

    let category_list = registry.category_names().join(", ");
    let mut prompt = format!(
        "Classify the user's request into tool categories.\n\
         Available categories: {category_list}.\n\
         Reply with a comma-separated list of category names, or `none` if \
         no tools are needed.\n\n"
    );
    if !sticky.is_empty() {
        prompt.push_str(&format!(
            "Recently used categories (prefer these for short follow-ups): {}.\n\n",
            sticky.join(", ")
        ));
    }
    let context: Vec<String> = recent
        .iter()
        .rev()
        .take(6)
        .rev()
        .map(|m| format!("{:?}: {}", m.role, m.content))
        .collect();
    if !context.is_empty() {
        prompt.push_str("Recent conversation:\n");
        prompt.push_str(&context.join("\n"));
        prompt.push('\n');
    }
    prompt.push_str(&format!("\nUser request: {user_text}"));

    let messages = [ChatMessage::system(prompt)];
    let answer = match llm.chat(&messages, false).await {
        Ok(r) => r.content,
        Err(e) => {
            warn!(error = %e, "intent classification failed, using sticky fallback");
            return sticky.to_vec();
        }
    };

    let known = registry.category_names();
    let parsed: Vec<String> = answer
        .to_lowercase()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| known.iter().any(|k| k == s))
        .collect();

    // `none` (or anything unrecognisable) with sticky present falls back to
    // the sticky set — short follow-ups rarely name their category.
    if parsed.is_empty() {
        if !sticky.is_empty() {
            debug!("classifier returned no categories, falling back to sticky");
            return sticky.to_vec();
        }
        return Vec::new();
    }
    parsed
}

/// True when the classified categories mean "answer without tools".
pub fn is_toolless(categories: &[String]) -> bool {
    categories.is_empty() || (categories.len() == 1 && categories[0] == NONE_CATEGORY)
}

/// Whether `text` contains a URL (exposed for the dispatcher's fast path).
pub fn contains_url(text: &str) -> bool {
    URL_RE.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::testutil::registry_with;

    fn cats(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn budget_split_across_two_categories() {
        let reg = registry_with(&[
            (
                "projects",
                &["p1", "p2", "p3", "p4", "p5", "p6", "p7", "p8", "p9", "p10"],
            ),
            (
                "github",
                &["g1", "g2", "g3", "g4", "g5", "g6", "g7", "g8", "g9", "g10"],
            ),
        ]);
        let selected = select_tools(&cats(&["projects", "github"]), &reg, 8);
        let names: Vec<&str> = selected.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["p1", "p2", "p3", "p4", "g1", "g2", "g3", "g4"]);
    }

    #[test]
    fn single_category_gets_the_whole_budget() {
        let reg = registry_with(&[(
            "projects",
            &["p1", "p2", "p3", "p4", "p5", "p6", "p7", "p8", "p9", "p10"],
        )]);
        let selected = select_tools(&cats(&["projects"]), &reg, 8);
        assert_eq!(selected.len(), 8);
        assert_eq!(selected[0].name, "p1");
        assert_eq!(selected[7].name, "p8");
    }

    #[test]
    fn per_category_floor_is_two() {
        // Five categories with budget 8: 8/5 = 1, floored up to 2 each,
        // then truncated back to the total budget.
        let reg = registry_with(&[
            ("a", &["a1", "a2", "a3"]),
            ("b", &["b1", "b2", "b3"]),
            ("c", &["c1", "c2", "c3"]),
            ("d", &["d1", "d2", "d3"]),
            ("e", &["e1", "e2", "e3"]),
        ]);
        let selected = select_tools(&cats(&["a", "b", "c", "d", "e"]), &reg, 8);
        assert_eq!(selected.len(), 8);
        let names: Vec<&str> = selected.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a1", "a2", "b1", "b2", "c1", "c2", "d1", "d2"]);
    }

    #[test]
    fn sparse_category_contributes_what_it_has() {
        let reg = registry_with(&[("a", &["a1"]), ("b", &["b1", "b2", "b3", "b4", "b5"])]);
        let selected = select_tools(&cats(&["a", "b"]), &reg, 8);
        let names: Vec<&str> = selected.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a1", "b1", "b2", "b3", "b4"]);
    }

    #[test]
    fn unknown_category_is_skipped() {
        let reg = registry_with(&[("a", &["a1", "a2"])]);
        let selected = select_tools(&cats(&["missing", "a"]), &reg, 8);
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn duplicate_tool_across_categories_is_selected_once() {
        let mut reg = registry_with(&[("a", &["shared", "a2"])]);
        // Also list "shared" under category b.
        let tool = std::sync::Arc::new(crate::tools::testutil::EchoTool {
            tool_name: "shared".to_string(),
        });
        reg.register("b", tool);
        reg.register(
            "b",
            std::sync::Arc::new(crate::tools::testutil::EchoTool {
                tool_name: "b2".to_string(),
            }),
        );
        let selected = select_tools(&cats(&["a", "b"]), &reg, 8);
        let names: Vec<&str> = selected.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["shared", "a2", "b2"]);
    }

    #[test]
    fn meta_schema_lists_sorted_categories() {
        let reg = registry_with(&[("zeta", &["z1"]), ("alpha", &["a1"])]);
        let schema = request_more_tools_schema(&reg);
        assert_eq!(schema.name, META_TOOL);
        assert!(schema.description.contains("alpha, zeta"));
    }

    #[test]
    fn url_detection() {
        assert!(contains_url("Check https://example.com/a please"));
        assert!(contains_url("see http://foo.bar"));
        assert!(!contains_url("no links here"));
    }

    #[test]
    fn toolless_detection() {
        assert!(is_toolless(&[]));
        assert!(is_toolless(&["none".to_string()]));
        assert!(!is_toolless(&cats(&["shell"])));
    }
}
