//! Policy-gated shell execution for the agent runtime.
//!
//! Three layers: `safety` decides allow/deny/ask before anything runs,
//! `exec`/`registry` run commands (one-shot or background) without shell
//! interpretation, and `audit` writes every decision to a hash-chained
//! append-only log.

pub mod audit;
pub mod error;
pub mod exec;
pub mod registry;
pub mod safety;
pub mod truncate;
pub mod types;

pub use audit::{AuditEntry, AuditLog};
pub use error::{Result, ShellError};
pub use registry::ProcessRegistry;
pub use safety::{validate_command, CommandDecision};
