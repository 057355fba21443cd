//! Versioned system prompts.
//!
//! Activation is a single transaction that deactivates the previous active
//! version and activates the new one, so at most one version per prompt name
//! is ever active — even under interleaved activations.

use crate::error::{MemoryError, Result};
use crate::store::MemoryStore;
use crate::types::PromptVersion;

impl MemoryStore {
    /// Save a new (inactive) version. The version number is allocated as
    /// max(existing) + 1 inside the same lock.
    pub fn save_prompt_version(
        &self,
        prompt_name: &str,
        content: &str,
        created_by: &str,
    ) -> Result<PromptVersion> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let version: i64 = db.query_row(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM prompt_versions WHERE prompt_name = ?1",
            rusqlite::params![prompt_name],
            |row| row.get(0),
        )?;
        db.execute(
            "INSERT INTO prompt_versions (prompt_name, version, content, is_active, created_by, created_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?5)",
            rusqlite::params![prompt_name, version, content, created_by, now],
        )?;
        let id = db.last_insert_rowid();
        Ok(PromptVersion {
            id,
            prompt_name: prompt_name.to_string(),
            version,
            content: content.to_string(),
            is_active: false,
            created_by: created_by.to_string(),
            approved_at: None,
            created_at: now,
        })
    }

    pub fn get_active_prompt(&self, prompt_name: &str) -> Result<Option<PromptVersion>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, prompt_name, version, content, is_active, created_by, approved_at, created_at
             FROM prompt_versions WHERE prompt_name = ?1 AND is_active = 1",
            rusqlite::params![prompt_name],
            row_to_prompt,
        ) {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(MemoryError::Database(e)),
        }
    }

    pub fn get_prompt(&self, prompt_name: &str, version: i64) -> Result<Option<PromptVersion>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, prompt_name, version, content, is_active, created_by, approved_at, created_at
             FROM prompt_versions WHERE prompt_name = ?1 AND version = ?2",
            rusqlite::params![prompt_name, version],
            row_to_prompt,
        ) {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(MemoryError::Database(e)),
        }
    }

    pub fn list_prompt_versions(&self, prompt_name: &str) -> Result<Vec<PromptVersion>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, prompt_name, version, content, is_active, created_by, approved_at, created_at
             FROM prompt_versions WHERE prompt_name = ?1 ORDER BY version",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![prompt_name], row_to_prompt)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Transactionally make `version` the only active version of
    /// `prompt_name`.
    pub fn activate_prompt(&self, prompt_name: &str, version: i64) -> Result<()> {
        let mut db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let tx = db.transaction()?;
        tx.execute(
            "UPDATE prompt_versions SET is_active = 0 WHERE prompt_name = ?1 AND is_active = 1",
            rusqlite::params![prompt_name],
        )?;
        let n = tx.execute(
            "UPDATE prompt_versions SET is_active = 1, approved_at = ?3
             WHERE prompt_name = ?1 AND version = ?2",
            rusqlite::params![prompt_name, version, now],
        )?;
        if n == 0 {
            // Roll back the deactivation — the requested version is missing.
            tx.rollback()?;
            return Err(MemoryError::NotFound {
                what: format!("prompt {prompt_name} v{version}"),
            });
        }
        tx.commit()?;
        Ok(())
    }
}

fn row_to_prompt(row: &rusqlite::Row<'_>) -> rusqlite::Result<PromptVersion> {
    let active: i64 = row.get(4)?;
    Ok(PromptVersion {
        id: row.get(0)?,
        prompt_name: row.get(1)?,
        version: row.get(2)?,
        content: row.get(3)?,
        is_active: active == 1,
        created_by: row.get(5)?,
        approved_at: row.get(6)?,
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::store::MemoryStore;

    #[test]
    fn at_most_one_active_version() {
        let s = MemoryStore::in_memory().unwrap();
        s.save_prompt_version("system", "v1 text", "human").unwrap();
        s.save_prompt_version("system", "v2 text", "agent").unwrap();
        s.save_prompt_version("system", "v3 text", "human").unwrap();

        s.activate_prompt("system", 1).unwrap();
        s.activate_prompt("system", 3).unwrap();
        s.activate_prompt("system", 2).unwrap();

        let versions = s.list_prompt_versions("system").unwrap();
        let active: Vec<i64> = versions.iter().filter(|v| v.is_active).map(|v| v.version).collect();
        assert_eq!(active, vec![2]);
        assert_eq!(
            s.get_active_prompt("system").unwrap().unwrap().content,
            "v2 text"
        );
    }

    #[test]
    fn activating_missing_version_preserves_current_active() {
        let s = MemoryStore::in_memory().unwrap();
        s.save_prompt_version("system", "v1", "human").unwrap();
        s.activate_prompt("system", 1).unwrap();
        assert!(s.activate_prompt("system", 99).is_err());
        // The transaction rolled back; v1 is still the active version.
        assert!(s.get_active_prompt("system").unwrap().is_some());
    }
}
