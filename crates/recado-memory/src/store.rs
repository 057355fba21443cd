use std::sync::Mutex;

use rusqlite::Connection;
use tracing::debug;

use crate::db::init_db;
use crate::embedding;
use crate::error::{MemoryError, Result};
use crate::types::*;

/// Textual similarity above which a new memory is considered a duplicate of
/// an existing active one.
const MEMORY_DEDUP_RATIO: f64 = 0.8;

/// Thread-safe repository over a single SQLite connection.
///
/// All access goes through this struct. A `Mutex<Connection>` is sufficient
/// for the single-node target; every method takes the lock for the duration
/// of one statement or one short transaction.
pub struct MemoryStore {
    pub(crate) db: Mutex<Connection>,
}

impl MemoryStore {
    /// Wrap an already-open connection, creating tables if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Open (or create) the database file at `path`.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        Self::new(conn)
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    // -----------------------------------------------------------------------
    // Conversations & messages
    // -----------------------------------------------------------------------

    /// Return the conversation id for `handle`, creating the row if absent.
    ///
    /// The UNIQUE constraint on `handle` enforces at most one conversation
    /// per handle; the read-back handles the concurrent-insert race.
    pub fn get_or_create_conversation(&self, handle: &str) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT OR IGNORE INTO conversations (handle, created_at) VALUES (?1, ?2)",
            rusqlite::params![handle, now],
        )?;
        let id = db.query_row(
            "SELECT id FROM conversations WHERE handle = ?1",
            rusqlite::params![handle],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Append one message. Messages are never updated or deleted.
    pub fn save_message(&self, conversation_id: i64, role: MessageRole, content: &str) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO messages (conversation_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![conversation_id, role.to_string(), content, now],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// The most recent `limit` messages (skipping `offset`), oldest first.
    pub fn get_recent_messages(
        &self,
        conversation_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, role, content, created_at
             FROM messages WHERE conversation_id = ?1
             ORDER BY id DESC LIMIT ?2 OFFSET ?3",
        )?;
        let mut rows: Vec<StoredMessage> = stmt
            .query_map(
                rusqlite::params![conversation_id, limit as i64, offset as i64],
                row_to_message,
            )?
            .filter_map(|r| r.ok())
            .collect();
        rows.reverse();
        Ok(rows)
    }

    pub fn count_messages(&self, conversation_id: i64) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            rusqlite::params![conversation_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Latest rolling summary, if one exists.
    pub fn get_latest_summary(&self, conversation_id: i64) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT content FROM summaries WHERE conversation_id = ?1
             ORDER BY id DESC LIMIT 1",
            rusqlite::params![conversation_id],
            |row| row.get(0),
        ) {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(MemoryError::Database(e)),
        }
    }

    /// Store a new rolling summary covering messages up to `up_to_message`.
    pub fn save_summary(&self, conversation_id: i64, content: &str, up_to_message: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO summaries (conversation_id, content, up_to_message, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![conversation_id, content, up_to_message, now],
        )?;
        Ok(())
    }

    /// Messages older than the verbatim window, for the summarization job.
    pub fn get_messages_before_window(
        &self,
        conversation_id: i64,
        verbatim_count: usize,
    ) -> Result<Vec<StoredMessage>> {
        let total = self.count_messages(conversation_id)?;
        if total <= verbatim_count {
            return Ok(Vec::new());
        }
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, role, content, created_at
             FROM messages WHERE conversation_id = ?1
             ORDER BY id ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(
                rusqlite::params![conversation_id, (total - verbatim_count) as i64],
                row_to_message,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Processed-message dedup
    // -----------------------------------------------------------------------

    /// Atomic insert-if-absent for webhook dedup.
    ///
    /// Returns `true` when this call claimed the id (first delivery) and
    /// `false` on a retry — the caller drops the duplicate silently.
    pub fn mark_processed(&self, external_id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let changed = db.execute(
            "INSERT OR IGNORE INTO processed_messages (external_id, processed_at)
             VALUES (?1, ?2)",
            rusqlite::params![external_id, now],
        )?;
        Ok(changed == 1)
    }

    // -----------------------------------------------------------------------
    // Memories
    // -----------------------------------------------------------------------

    /// Insert a memory unless an active one is textually near-identical
    /// (normalized similarity > 0.8). Returns the id, or `None` when
    /// deduplicated away.
    pub fn add_memory(
        &self,
        content: &str,
        category: MemoryCategory,
        embedding_vec: Option<&[f32]>,
    ) -> Result<Option<i64>> {
        for existing in self.get_active_memories()? {
            let ratio = strsim::normalized_levenshtein(&existing.content, content);
            if ratio > MEMORY_DEDUP_RATIO {
                debug!(ratio, existing_id = existing.id, "memory deduplicated");
                return Ok(None);
            }
        }
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let blob = embedding_vec.map(embedding::encode);
        db.execute(
            "INSERT INTO memories (content, category, active, embedding, created_at)
             VALUES (?1, ?2, 1, ?3, ?4)",
            rusqlite::params![content, category.to_string(), blob, now],
        )?;
        Ok(Some(db.last_insert_rowid()))
    }

    pub fn get_active_memories(&self) -> Result<Vec<MemoryEntry>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, content, category, active, created_at
             FROM memories WHERE active = 1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], row_to_memory)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn list_memories(&self) -> Result<Vec<MemoryEntry>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, content, category, active, created_at
             FROM memories ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], row_to_memory)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn deactivate_memory(&self, id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE memories SET active = 0 WHERE id = ?1",
            rusqlite::params![id],
        )?;
        if n == 0 {
            return Err(MemoryError::NotFound {
                what: format!("memory {id}"),
            });
        }
        Ok(())
    }

    /// Deactivate self-correction memories older than `max_age_days`.
    /// They are working notes for the model, not durable user facts.
    pub fn cleanup_expired_self_corrections(&self, max_age_days: i64) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(max_age_days)).to_rfc3339();
        let n = db.execute(
            "UPDATE memories SET active = 0
             WHERE category = 'self_correction' AND active = 1 AND created_at < ?1",
            rusqlite::params![cutoff],
        )?;
        Ok(n)
    }

    /// Top-K active memories by L2 distance to `query`, with distances.
    /// Memories without an embedding are skipped.
    pub fn search_similar_memories_with_distance(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<(String, f32)>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, content, embedding FROM memories
             WHERE active = 1 AND embedding IS NOT NULL",
        )?;
        let rows: Vec<(i64, String, Vec<u8>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(db);

        let candidates: Vec<(i64, Vec<f32>)> = rows
            .iter()
            .map(|(id, _, blob)| (*id, embedding::decode(blob)))
            .collect();
        let ranked = embedding::rank_by_distance(query, candidates, top_k);
        let by_id: std::collections::HashMap<i64, &String> =
            rows.iter().map(|(id, c, _)| (*id, c)).collect();
        Ok(ranked
            .into_iter()
            .filter_map(|(id, d)| by_id.get(&id).map(|c| ((*c).clone(), d)))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Notes
    // -----------------------------------------------------------------------

    pub fn add_note(
        &self,
        scope: NoteScope,
        owner: &str,
        content: &str,
        embedding_vec: Option<&[f32]>,
    ) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let blob = embedding_vec.map(embedding::encode);
        db.execute(
            "INSERT INTO notes (scope, owner, content, embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![scope.to_string(), owner, content, blob, now],
        )?;
        Ok(db.last_insert_rowid())
    }

    pub fn list_notes(&self, scope: NoteScope, owner: &str) -> Result<Vec<Note>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, scope, owner, content, created_at
             FROM notes WHERE scope = ?1 AND owner = ?2 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![scope.to_string(), owner], row_to_note)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Top-K notes by L2 distance, same contract as the memory search.
    pub fn search_similar_notes_with_distance(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<(String, f32)>> {
        let db = self.db.lock().unwrap();
        let mut stmt =
            db.prepare("SELECT id, content, embedding FROM notes WHERE embedding IS NOT NULL")?;
        let rows: Vec<(i64, String, Vec<u8>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(db);

        let candidates: Vec<(i64, Vec<f32>)> = rows
            .iter()
            .map(|(id, _, blob)| (*id, embedding::decode(blob)))
            .collect();
        let ranked = embedding::rank_by_distance(query, candidates, top_k);
        let by_id: std::collections::HashMap<i64, &String> =
            rows.iter().map(|(id, c, _)| (*id, c)).collect();
        Ok(ranked
            .into_iter()
            .filter_map(|(id, d)| by_id.get(&id).map(|c| ((*c).clone(), d)))
            .collect())
    }

    // -----------------------------------------------------------------------
    // Sticky conversation state
    // -----------------------------------------------------------------------

    pub fn get_sticky_categories(&self, conversation_id: i64) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT sticky_categories FROM conversation_state WHERE conversation_id = ?1",
            rusqlite::params![conversation_id],
            |row| row.get::<_, String>(0),
        ) {
            Ok(json) => Ok(serde_json::from_str(&json).unwrap_or_default()),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(Vec::new()),
            Err(e) => Err(MemoryError::Database(e)),
        }
    }

    pub fn save_sticky_categories(&self, conversation_id: i64, categories: &[String]) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let json = serde_json::to_string(categories)
            .map_err(|e| MemoryError::Serialization(e.to_string()))?;
        db.execute(
            "INSERT INTO conversation_state (conversation_id, sticky_categories, last_tool_categories, updated_at)
             VALUES (?1, ?2, ?2, ?3)
             ON CONFLICT(conversation_id) DO UPDATE SET
                 sticky_categories = ?2, last_tool_categories = ?2, updated_at = ?3",
            rusqlite::params![conversation_id, json, now],
        )?;
        Ok(())
    }

    /// Sticky TTL is one assistant turn without tools — the dispatcher calls
    /// this when a turn ends toolless.
    pub fn clear_sticky_categories(&self, conversation_id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "UPDATE conversation_state SET sticky_categories = '[]', updated_at = ?2
             WHERE conversation_id = ?1",
            rusqlite::params![conversation_id, now],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Daily activity log
    // -----------------------------------------------------------------------

    pub fn append_daily_log(&self, day: &str, entry: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO daily_log (day, entry, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![day, entry, now],
        )?;
        Ok(())
    }

    /// Most recent `limit` entries of the latest logged day, oldest first.
    pub fn get_daily_excerpt(&self, limit: usize) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let day: Option<String> = match db.query_row(
            "SELECT day FROM daily_log ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        ) {
            Ok(d) => Some(d),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(MemoryError::Database(e)),
        };
        let Some(day) = day else {
            return Ok(Vec::new());
        };
        let mut stmt = db.prepare(
            "SELECT entry FROM daily_log WHERE day = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let mut rows: Vec<String> = stmt
            .query_map(rusqlite::params![day, limit as i64], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        rows.reverse();
        Ok(rows)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role_str: String = row.get(2)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: role_str.parse().unwrap_or(MessageRole::User),
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryEntry> {
    let cat_str: String = row.get(2)?;
    let active: i64 = row.get(3)?;
    Ok(MemoryEntry {
        id: row.get(0)?,
        content: row.get(1)?,
        category: cat_str.parse().unwrap_or(MemoryCategory::Personal),
        active: active == 1,
        created_at: row.get(4)?,
    })
}

fn row_to_note(row: &rusqlite::Row<'_>) -> rusqlite::Result<Note> {
    let scope_str: String = row.get(1)?;
    Ok(Note {
        id: row.get(0)?,
        scope: scope_str.parse().unwrap_or(NoteScope::User),
        owner: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::in_memory().unwrap()
    }

    #[test]
    fn conversation_is_unique_per_handle() {
        let s = store();
        let a = s.get_or_create_conversation("549110001111").unwrap();
        let b = s.get_or_create_conversation("549110001111").unwrap();
        assert_eq!(a, b);
        let c = s.get_or_create_conversation("549110002222").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn messages_come_back_oldest_first() {
        let s = store();
        let conv = s.get_or_create_conversation("h").unwrap();
        for i in 0..5 {
            s.save_message(conv, MessageRole::User, &format!("m{i}")).unwrap();
        }
        let msgs = s.get_recent_messages(conv, 3, 0).unwrap();
        let contents: Vec<&str> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[test]
    fn mark_processed_is_exactly_once() {
        let s = store();
        assert!(s.mark_processed("wamid.123").unwrap());
        assert!(!s.mark_processed("wamid.123").unwrap());
        assert!(s.mark_processed("wamid.456").unwrap());
    }

    #[test]
    fn near_duplicate_memory_is_rejected() {
        let s = store();
        let first = s
            .add_memory("The user prefers tea over coffee", MemoryCategory::Preference, None)
            .unwrap();
        assert!(first.is_some());
        let dup = s
            .add_memory("The user prefers tea over coffee!", MemoryCategory::Preference, None)
            .unwrap();
        assert!(dup.is_none());
        let distinct = s
            .add_memory("The user works from Buenos Aires", MemoryCategory::Personal, None)
            .unwrap();
        assert!(distinct.is_some());
    }

    #[test]
    fn deactivated_memory_no_longer_blocks_dedup() {
        let s = store();
        let id = s
            .add_memory("Keep replies short", MemoryCategory::Preference, None)
            .unwrap()
            .unwrap();
        s.deactivate_memory(id).unwrap();
        let again = s
            .add_memory("Keep replies short", MemoryCategory::Preference, None)
            .unwrap();
        assert!(again.is_some());
    }

    #[test]
    fn memory_search_orders_by_distance() {
        let s = store();
        s.add_memory("likes chess", MemoryCategory::Personal, Some(&[1.0, 0.0]))
            .unwrap();
        s.add_memory("owns a cat", MemoryCategory::Personal, Some(&[0.0, 5.0]))
            .unwrap();
        let hits = s
            .search_similar_memories_with_distance(&[1.0, 0.1], 2)
            .unwrap();
        assert_eq!(hits[0].0, "likes chess");
        assert!(hits[0].1 < hits[1].1);
    }

    #[test]
    fn sticky_roundtrip_and_clear() {
        let s = store();
        let conv = s.get_or_create_conversation("h").unwrap();
        assert!(s.get_sticky_categories(conv).unwrap().is_empty());
        s.save_sticky_categories(conv, &["github".into(), "projects".into()])
            .unwrap();
        assert_eq!(
            s.get_sticky_categories(conv).unwrap(),
            vec!["github".to_string(), "projects".to_string()]
        );
        s.clear_sticky_categories(conv).unwrap();
        assert!(s.get_sticky_categories(conv).unwrap().is_empty());
    }

    #[test]
    fn summary_latest_wins() {
        let s = store();
        let conv = s.get_or_create_conversation("h").unwrap();
        assert!(s.get_latest_summary(conv).unwrap().is_none());
        s.save_summary(conv, "first", 3).unwrap();
        s.save_summary(conv, "second", 9).unwrap();
        assert_eq!(s.get_latest_summary(conv).unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn window_split_returns_pre_window_messages() {
        let s = store();
        let conv = s.get_or_create_conversation("h").unwrap();
        for i in 0..10 {
            s.save_message(conv, MessageRole::User, &format!("m{i}")).unwrap();
        }
        let before = s.get_messages_before_window(conv, 8).unwrap();
        assert_eq!(before.len(), 2);
        assert_eq!(before[0].content, "m0");
        assert!(s.get_messages_before_window(conv, 20).unwrap().is_empty());
    }

    #[test]
    fn self_correction_cleanup_only_touches_private_category() {
        let s = store();
        s.add_memory("old correction", MemoryCategory::SelfCorrection, None)
            .unwrap();
        s.add_memory("durable fact", MemoryCategory::Personal, None)
            .unwrap();
        // Nothing is older than 0 days in the future direction; use -1 to
        // force the cutoff past "now".
        let n = s.cleanup_expired_self_corrections(-1).unwrap();
        assert_eq!(n, 1);
        let active = s.get_active_memories().unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content, "durable fact");
    }
}
