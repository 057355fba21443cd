//! Security policy engine for tool calls.
//!
//! Rules come from a YAML file loaded at startup. Evaluation is first match
//! wins, in declaration order; with no matching rule the fallback is allow —
//! except for `run_command`, which falls through to the static command
//! validator. A rule file that fails to parse fails secure: every governed
//! call is treated as needing approval.
//!
//! The meta-tool is exempt by contract and never reaches this engine.

use serde::Deserialize;
use std::collections::HashMap;
use tracing::{error, warn};

use recado_shell::safety::{validate_command, CommandDecision};

/// What the engine tells the executor to do with one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyAction {
    Allow,
    /// Refuse without executing; the reason goes back to the model.
    Block { reason: String },
    /// Pause for human approval.
    Flag { reason: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RuleAction {
    Allow,
    Flag,
    Block,
}

/// One declared rule.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    pub target_tool: String,
    /// Field name → regex matched against the argument's string form.
    #[serde(default)]
    pub argument_match: HashMap<String, String>,
    action: RuleAction,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    rules: Vec<PolicyRule>,
}

struct CompiledRule {
    rule: PolicyRule,
    patterns: Vec<(String, regex::Regex)>,
}

/// Rule evaluator. Built once at startup and shared.
pub struct PolicyEngine {
    rules: Vec<CompiledRule>,
    /// Set when the rule file was unreadable or malformed — every governed
    /// call is then flagged for approval.
    fail_secure: bool,
    shell_allowlist: Vec<String>,
}

impl PolicyEngine {
    /// Load rules from `path`. A missing file means no rules (default
    /// allow); a malformed file means fail-secure.
    pub fn load(path: &str, shell_allowlist: Vec<String>) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(_) => {
                return Self {
                    rules: Vec::new(),
                    fail_secure: false,
                    shell_allowlist,
                }
            }
        };
        match serde_yaml::from_str::<PolicyFile>(&text) {
            Ok(file) => {
                let mut rules = Vec::new();
                let mut broken = false;
                for rule in file.rules {
                    let mut patterns = Vec::new();
                    for (field, pattern) in &rule.argument_match {
                        match regex::Regex::new(pattern) {
                            Ok(re) => patterns.push((field.clone(), re)),
                            Err(e) => {
                                error!(rule = %rule.id, field, error = %e, "bad rule regex");
                                broken = true;
                            }
                        }
                    }
                    rules.push(CompiledRule { rule, patterns });
                }
                Self {
                    rules,
                    fail_secure: broken,
                    shell_allowlist,
                }
            }
            Err(e) => {
                error!(path, error = %e, "policy file parse failed — failing secure");
                Self {
                    rules: Vec::new(),
                    fail_secure: true,
                    shell_allowlist,
                }
            }
        }
    }

    /// Engine with no rule file (tests and minimal deployments).
    pub fn permissive(shell_allowlist: Vec<String>) -> Self {
        Self {
            rules: Vec::new(),
            fail_secure: false,
            shell_allowlist,
        }
    }

    /// Evaluate one regular tool call.
    pub fn evaluate(&self, tool_name: &str, args: &serde_json::Value) -> PolicyAction {
        if self.fail_secure {
            return PolicyAction::Flag {
                reason: "policy rules failed to load".to_string(),
            };
        }

        for compiled in &self.rules {
            if compiled.rule.target_tool != tool_name {
                continue;
            }
            let matched = compiled.patterns.iter().all(|(field, re)| {
                field_as_text(args, field)
                    .map(|text| re.is_match(&text))
                    .unwrap_or(false)
            });
            if matched {
                let reason = compiled
                    .rule
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("matched rule {}", compiled.rule.id));
                return match compiled.rule.action {
                    RuleAction::Allow => PolicyAction::Allow,
                    RuleAction::Block => PolicyAction::Block { reason },
                    RuleAction::Flag => PolicyAction::Flag { reason },
                };
            }
        }

        // No rule matched. Shell commands still go through the static
        // validator; everything else defaults to allow.
        if tool_name == "run_command" {
            let command = args
                .get("command")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            return match validate_command(command, &self.shell_allowlist) {
                CommandDecision::Allow => PolicyAction::Allow,
                CommandDecision::Deny { reason } => {
                    warn!(command, %reason, "command denied");
                    PolicyAction::Block { reason }
                }
                CommandDecision::Ask { reason } => PolicyAction::Flag { reason },
            };
        }

        PolicyAction::Allow
    }
}

fn field_as_text(args: &serde_json::Value, field: &str) -> Option<String> {
    args.get(field).map(|v| match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}
