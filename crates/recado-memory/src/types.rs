use serde::{Deserialize, Serialize};

/// Role of a stored conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A single stored message. Messages are append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub created_at: String,
}

/// Memory category. `SelfCorrection` is private — it never surfaces to the
/// external memory export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryCategory {
    Personal,
    Preference,
    Project,
    SelfCorrection,
}

impl MemoryCategory {
    pub fn is_private(&self) -> bool {
        matches!(self, Self::SelfCorrection)
    }
}

impl std::fmt::Display for MemoryCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Personal => write!(f, "personal"),
            Self::Preference => write!(f, "preference"),
            Self::Project => write!(f, "project"),
            Self::SelfCorrection => write!(f, "self_correction"),
        }
    }
}

impl std::str::FromStr for MemoryCategory {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "personal" => Ok(Self::Personal),
            "preference" => Ok(Self::Preference),
            "project" => Ok(Self::Project),
            "self_correction" => Ok(Self::SelfCorrection),
            other => Err(format!("unknown memory category: {other}")),
        }
    }
}

/// A long-term memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: i64,
    pub content: String,
    pub category: MemoryCategory,
    pub active: bool,
    pub created_at: String,
}

/// Whether a note belongs to the user or to a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteScope {
    User,
    Project,
}

impl std::fmt::Display for NoteScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Project => write!(f, "project"),
        }
    }
}

impl std::str::FromStr for NoteScope {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "project" => Ok(Self::Project),
            other => Err(format!("unknown note scope: {other}")),
        }
    }
}

/// Free-form note, embedded for semantic retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub scope: NoteScope,
    /// User handle or project name, depending on scope.
    pub owner: String,
    pub content: String,
    pub created_at: String,
}

/// Kind of inbound interaction a trace covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceMessageType {
    Text,
    Audio,
    Image,
    Agent,
}

impl std::fmt::Display for TraceMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Audio => write!(f, "audio"),
            Self::Image => write!(f, "image"),
            Self::Agent => write!(f, "agent"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Started,
    Completed,
    Failed,
}

impl std::fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Structural kind of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Span,
    Generation,
    Tool,
    Guardrail,
    Agent,
    System,
    User,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Span => write!(f, "span"),
            Self::Generation => write!(f, "generation"),
            Self::Tool => write!(f, "tool"),
            Self::Guardrail => write!(f, "guardrail"),
            Self::Agent => write!(f, "agent"),
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
        }
    }
}

/// Who produced a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSource {
    System,
    User,
    LlmJudge,
    Human,
}

impl std::fmt::Display for ScoreSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::LlmJudge => write!(f, "llm_judge"),
            Self::Human => write!(f, "human"),
        }
    }
}

/// Eval dataset entry classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetEntryType {
    Golden,
    Failure,
    Correction,
}

impl std::fmt::Display for DatasetEntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Golden => write!(f, "golden"),
            Self::Failure => write!(f, "failure"),
            Self::Correction => write!(f, "correction"),
        }
    }
}

impl std::str::FromStr for DatasetEntryType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "golden" => Ok(Self::Golden),
            "failure" => Ok(Self::Failure),
            "correction" => Ok(Self::Correction),
            other => Err(format!("unknown dataset entry type: {other}")),
        }
    }
}

/// Aggregate counters returned by `get_dataset_stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DatasetStats {
    pub golden: u64,
    pub failure: u64,
    pub correction: u64,
}

/// A versioned system prompt. At most one version per name is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptVersion {
    pub id: i64,
    pub prompt_name: String,
    pub version: i64,
    pub content: String,
    pub is_active: bool,
    /// "human" or "agent".
    pub created_by: String,
    pub approved_at: Option<String>,
    pub created_at: String,
}

/// A user-defined scheduled job, restored at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: i64,
    pub handle: String,
    pub name: String,
    /// Cron-style schedule expression, interpreted by the gateway.
    pub schedule: String,
    /// Natural-language instruction executed when the job fires.
    pub action: String,
    pub active: bool,
    pub created_at: String,
}
