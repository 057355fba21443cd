//! Eval dataset curation storage.

use std::collections::BTreeSet;

use crate::error::{MemoryError, Result};
use crate::store::MemoryStore;
use crate::types::{DatasetEntryType, DatasetStats};

impl MemoryStore {
    /// Insert a curated entry and return its id.
    pub fn add_dataset_entry(
        &self,
        trace_id: &str,
        entry_type: DatasetEntryType,
        input: &str,
        output: &str,
        expected_output: Option<&str>,
        tags: &[String],
        metadata: &serde_json::Value,
    ) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let tags_json =
            serde_json::to_string(tags).map_err(|e| MemoryError::Serialization(e.to_string()))?;
        db.execute(
            "INSERT INTO dataset_entries
                 (trace_id, entry_type, input, output, expected_output, tags, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                trace_id,
                entry_type.to_string(),
                input,
                output,
                expected_output,
                tags_json,
                metadata.to_string(),
                now
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Merge additional tags into an entry's tag set.
    pub fn add_dataset_tags(&self, entry_id: i64, tags: &[String]) -> Result<()> {
        let db = self.db.lock().unwrap();
        let existing: String = db
            .query_row(
                "SELECT tags FROM dataset_entries WHERE id = ?1",
                rusqlite::params![entry_id],
                |row| row.get(0),
            )
            .map_err(|_| MemoryError::NotFound {
                what: format!("dataset entry {entry_id}"),
            })?;
        let mut set: BTreeSet<String> = serde_json::from_str(&existing).unwrap_or_default();
        set.extend(tags.iter().cloned());
        let merged = serde_json::to_string(&set)
            .map_err(|e| MemoryError::Serialization(e.to_string()))?;
        db.execute(
            "UPDATE dataset_entries SET tags = ?2 WHERE id = ?1",
            rusqlite::params![entry_id, merged],
        )?;
        Ok(())
    }

    pub fn get_dataset_stats(&self) -> Result<DatasetStats> {
        let db = self.db.lock().unwrap();
        let mut stmt =
            db.prepare("SELECT entry_type, COUNT(*) FROM dataset_entries GROUP BY entry_type")?;
        let mut stats = DatasetStats::default();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows.filter_map(|r| r.ok()) {
            match row.0.as_str() {
                "golden" => stats.golden = row.1 as u64,
                "failure" => stats.failure = row.1 as u64,
                "correction" => stats.correction = row.1 as u64,
                _ => {}
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn entry_roundtrip_with_tag_merge() {
        let s = MemoryStore::in_memory().unwrap();
        let id = s
            .add_dataset_entry(
                "t1",
                DatasetEntryType::Failure,
                "in",
                "out",
                None,
                &["language_match".to_string()],
                &serde_json::json!({"check": "language_match"}),
            )
            .unwrap();
        s.add_dataset_tags(id, &["remediated".to_string(), "language_match".to_string()])
            .unwrap();
        let stats = s.get_dataset_stats().unwrap();
        assert_eq!(stats.failure, 1);
        assert_eq!(stats.golden, 0);
    }
}
