use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("command blocked: {reason}")]
    CommandBlocked { reason: String },

    #[error("command timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("process not found: {id}")]
    ProcessNotFound { id: String },

    #[error("too many background processes (limit {limit})")]
    TooManyProcesses { limit: usize },

    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("write tools are disabled")]
    WriteDisabled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ShellError>;
