use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (recado.toml + RECADO_* env overrides).
///
/// A single immutable instance is built at startup and threaded (by Arc)
/// into every component that needs it.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecadoConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub guardrails: GuardrailsConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
    #[serde(default)]
    pub agent: AgentRuntimeConfig,
    #[serde(default)]
    pub eval: EvalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Base URL of the outbound messaging gateway (send endpoint).
    #[serde(default = "default_messaging_url")]
    pub messaging_url: String,
    /// Seconds to wait for tracked background tasks during shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            messaging_url: default_messaging_url(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the local inference server.
    #[serde(default = "default_llm_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_embed_model")]
    pub embedding_model: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_url(),
            model: default_model(),
            embedding_model: default_embed_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Request-pipeline knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Max regular tools offered per LLM call.
    #[serde(default = "default_max_tools")]
    pub max_tools_per_call: usize,
    /// Message count that triggers rolling summarization.
    #[serde(default = "default_conversation_max")]
    pub conversation_max_messages: usize,
    /// How many recent messages are kept verbatim in the context window.
    #[serde(default = "default_verbatim_count")]
    pub history_verbatim_count: usize,
    /// L2 distance below which a memory counts as relevant. Unnormalised
    /// embeddings make this calibration-dependent; 1.0 is conservative.
    #[serde(default = "default_memory_threshold")]
    pub memory_similarity_threshold: f32,
    /// Tool output size (chars) that triggers compaction.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: usize,
    /// Token budget used for context-size warnings.
    #[serde(default = "default_context_token_limit")]
    pub context_token_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_tools_per_call: default_max_tools(),
            conversation_max_messages: default_conversation_max(),
            history_verbatim_count: default_verbatim_count(),
            memory_similarity_threshold: default_memory_threshold(),
            compaction_threshold: default_compaction_threshold(),
            context_token_limit: default_context_token_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailsConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Opt-in LLM-judge checks (tool coherence, hallucination).
    #[serde(default)]
    pub llm_checks: bool,
    /// Timeout for a single LLM-judge check; timeouts count as pass.
    #[serde(default = "default_guardrail_timeout")]
    pub llm_timeout_secs: f64,
}

impl Default for GuardrailsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            llm_checks: false,
            llm_timeout_secs: default_guardrail_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Fraction of traces recorded, 0.0–1.0.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Optional JSONL mirror file for a second observability sink.
    #[serde(default)]
    pub export_path: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_rate: default_sample_rate(),
            retention_days: default_retention_days(),
            export_path: None,
        }
    }
}

/// Background agent runtime + shell gating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRuntimeConfig {
    /// Feature flag gating shell/write tools. Off by default.
    #[serde(default)]
    pub write_enabled: bool,
    #[serde(default = "default_agent_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
    /// Base commands the shell validator auto-allows.
    #[serde(default = "default_shell_allowlist")]
    pub shell_allowlist: Vec<String>,
    /// Directory for per-session JSONL files.
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: String,
    /// Workspace directory holding SOUL.md / USER.md / TOOLS.md.
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: String,
    /// Optional multi-project workspace root.
    #[serde(default)]
    pub projects_root: Option<String>,
    /// Path to the YAML policy rules file; missing file means no rules.
    #[serde(default = "default_policy_path")]
    pub policy_path: String,
    /// Path to the hash-chained audit log.
    #[serde(default = "default_audit_path")]
    pub audit_path: String,
}

impl Default for AgentRuntimeConfig {
    fn default() -> Self {
        Self {
            write_enabled: false,
            max_iterations: default_agent_iterations(),
            session_timeout_secs: default_session_timeout(),
            shell_allowlist: default_shell_allowlist(),
            sessions_dir: default_sessions_dir(),
            workspace_dir: default_workspace_dir(),
            projects_root: None,
            policy_path: default_policy_path(),
            audit_path: default_audit_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EvalConfig {
    /// Enable best-effort dataset curation after each turn.
    #[serde(default)]
    pub auto_curate: bool,
}

fn bool_true() -> bool {
    true
}
fn default_port() -> u16 {
    8722
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_messaging_url() -> String {
    "http://localhost:3000".to_string()
}
fn default_shutdown_grace() -> u64 {
    10
}
fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "qwen3:8b".to_string()
}
fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_llm_timeout() -> u64 {
    120
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.recado/recado.db", home)
}
fn default_max_tools() -> usize {
    8
}
fn default_conversation_max() -> usize {
    40
}
fn default_verbatim_count() -> usize {
    8
}
fn default_memory_threshold() -> f32 {
    1.0
}
fn default_compaction_threshold() -> usize {
    20_000
}
fn default_context_token_limit() -> usize {
    32_000
}
fn default_guardrail_timeout() -> f64 {
    3.0
}
fn default_sample_rate() -> f64 {
    1.0
}
fn default_retention_days() -> u32 {
    30
}
fn default_agent_iterations() -> usize {
    15
}
fn default_session_timeout() -> u64 {
    300
}
fn default_shell_allowlist() -> Vec<String> {
    [
        "pytest", "ruff", "mypy", "make", "npm", "pip", "git", "cat", "head", "tail", "wc", "ls",
        "find", "grep", "echo", "python", "python3", "node", "cargo", "rustc",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_sessions_dir() -> String {
    "agent_sessions".to_string()
}
fn default_workspace_dir() -> String {
    ".".to_string()
}
fn default_policy_path() -> String {
    "policy.yaml".to_string()
}
fn default_audit_path() -> String {
    "audit.jsonl".to_string()
}

impl RecadoConfig {
    /// Load config from a TOML file with RECADO_* env var overrides.
    ///
    /// A missing file is fine — defaults apply and env vars still override.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: RecadoConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("RECADO_").split("_"))
            .extract()
            .map_err(|e| crate::error::RecadoError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.recado/recado.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RecadoConfig::default();
        assert_eq!(cfg.pipeline.max_tools_per_call, 8);
        assert_eq!(cfg.pipeline.history_verbatim_count, 8);
        assert_eq!(cfg.pipeline.compaction_threshold, 20_000);
        assert_eq!(cfg.agent.max_iterations, 15);
        assert!(!cfg.agent.write_enabled);
        assert!(cfg.guardrails.enabled);
        assert!(!cfg.guardrails.llm_checks);
        assert!((cfg.guardrails.llm_timeout_secs - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn allowlist_contains_dev_tooling() {
        let allow = default_shell_allowlist();
        for cmd in ["git", "grep", "pytest", "cargo"] {
            assert!(allow.iter().any(|a| a == cmd), "missing {cmd}");
        }
    }
}
