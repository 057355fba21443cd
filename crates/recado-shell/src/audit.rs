//! Hash-chained command audit trail.
//!
//! Append-only JSONL. Each line carries `previous_hash` and `entry_hash`,
//! where `entry_hash = SHA-256(previous_hash || canonical_json(entry))` and
//! the canonical form is the entry serialized WITHOUT its two hash fields
//! (serde field order is the canonical order). Every append is fsynced so a
//! crash can at worst leave one truncated trailing line, which is ignored
//! on load.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::error::Result;

/// `previous_hash` of the very first entry.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// Decision recorded for a policy-governed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
    Allow,
    Deny,
    AskApproved,
    AskRejected,
}

/// One audit record, minus the chain fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub session_id: String,
    pub handle: String,
    pub command: String,
    pub arguments: serde_json::Value,
    pub decision: AuditDecision,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<u64>,
    pub stdout_preview: Option<String>,
    pub stderr_preview: Option<String>,
    pub started_at: String,
    pub completed_at: String,
    pub error: Option<String>,
}

/// The on-disk line: entry fields plus the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainedEntry {
    #[serde(flatten)]
    pub entry: AuditEntry,
    pub previous_hash: String,
    pub entry_hash: String,
}

/// Append-only audit log with a sequential hash chain.
pub struct AuditLog {
    file: Mutex<File>,
    last_hash: Mutex<String>,
}

impl AuditLog {
    /// Open (or create) the log at `path`, resuming the chain from the last
    /// intact line. A trailing truncated line is tolerated and skipped.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let last_hash = match File::open(path) {
            Ok(f) => {
                let mut last = GENESIS_HASH.to_string();
                for line in BufReader::new(f).lines() {
                    let Ok(line) = line else { break };
                    match serde_json::from_str::<ChainedEntry>(&line) {
                        Ok(e) => last = e.entry_hash,
                        Err(_) => {
                            // Partial trailing write — ignore and stop.
                            warn!("audit log has a truncated trailing line");
                            break;
                        }
                    }
                }
                last
            }
            Err(_) => GENESIS_HASH.to_string(),
        };
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            last_hash: Mutex::new(last_hash),
        })
    }

    /// Append one entry, extending the chain and fsyncing before returning.
    pub fn append(&self, entry: AuditEntry) -> Result<ChainedEntry> {
        // Hold the hash lock for the whole append so concurrent writers
        // serialize into a single chain.
        let mut last = self.last_hash.lock().unwrap();
        let previous_hash = last.clone();
        let entry_hash = chain_hash(&previous_hash, &entry);
        let chained = ChainedEntry {
            entry,
            previous_hash,
            entry_hash: entry_hash.clone(),
        };
        let line = serde_json::to_string(&chained)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        {
            let mut f = self.file.lock().unwrap();
            writeln!(f, "{line}")?;
            f.sync_all()?;
        }
        *last = entry_hash;
        Ok(chained)
    }

    /// Load all intact entries. Used by verification and tests.
    pub fn load(path: impl AsRef<Path>) -> Result<Vec<ChainedEntry>> {
        let f = match File::open(path) {
            Ok(f) => f,
            Err(_) => return Ok(Vec::new()),
        };
        let mut entries = Vec::new();
        for line in BufReader::new(f).lines() {
            let Ok(line) = line else { break };
            match serde_json::from_str::<ChainedEntry>(&line) {
                Ok(e) => entries.push(e),
                Err(_) => break,
            }
        }
        Ok(entries)
    }
}

/// Verify the chain invariant over a loaded sequence.
pub fn verify_chain(entries: &[ChainedEntry]) -> bool {
    let mut expected_prev = GENESIS_HASH.to_string();
    for e in entries {
        if e.previous_hash != expected_prev {
            return false;
        }
        if chain_hash(&e.previous_hash, &e.entry) != e.entry_hash {
            return false;
        }
        expected_prev = e.entry_hash.clone();
    }
    true
}

fn chain_hash(previous_hash: &str, entry: &AuditEntry) -> String {
    // serde_json serializes struct fields in declaration order, which is
    // the canonical form for this chain.
    let canonical = serde_json::to_string(entry).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(command: &str, decision: AuditDecision) -> AuditEntry {
        AuditEntry {
            session_id: "s1".to_string(),
            handle: "549110001111".to_string(),
            command: command.to_string(),
            arguments: serde_json::json!({"command": command}),
            decision,
            exit_code: Some(0),
            duration_ms: Some(5),
            stdout_preview: None,
            stderr_preview: None,
            started_at: "2026-08-01T12:00:00Z".to_string(),
            completed_at: "2026-08-01T12:00:01Z".to_string(),
            error: None,
        }
    }

    #[test]
    fn chain_links_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::open(&path).unwrap();
        log.append(entry("git status", AuditDecision::Allow)).unwrap();
        log.append(entry("rm -rf /", AuditDecision::Deny)).unwrap();
        log.append(entry("sudo apt update", AuditDecision::AskApproved)).unwrap();

        let entries = AuditLog::load(&path).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].previous_hash, GENESIS_HASH);
        assert_eq!(entries[1].previous_hash, entries[0].entry_hash);
        assert_eq!(entries[2].previous_hash, entries[1].entry_hash);
        assert!(verify_chain(&entries));
    }

    #[test]
    fn tampering_breaks_verification() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::open(&path).unwrap();
        log.append(entry("git status", AuditDecision::Allow)).unwrap();

        let mut entries = AuditLog::load(&path).unwrap();
        entries[0].entry.command = "git push --force".to_string();
        assert!(!verify_chain(&entries));
    }

    #[test]
    fn reopen_resumes_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let log = AuditLog::open(&path).unwrap();
            log.append(entry("ls", AuditDecision::Allow)).unwrap();
        }
        {
            let log = AuditLog::open(&path).unwrap();
            log.append(entry("cat README.md", AuditDecision::Allow)).unwrap();
        }
        let entries = AuditLog::load(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(verify_chain(&entries));
    }

    #[test]
    fn truncated_trailing_line_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let log = AuditLog::open(&path).unwrap();
            log.append(entry("ls", AuditDecision::Allow)).unwrap();
        }
        // Simulate a torn write.
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            write!(f, "{{\"session_id\":\"s1\",\"trunc").unwrap();
        }
        let entries = AuditLog::load(&path).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(verify_chain(&entries));
    }
}
