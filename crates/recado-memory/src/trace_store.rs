//! Trace, span, and score persistence. The recorder in `recado-trace` is the
//! only caller; it treats every error here as best-effort.

use crate::error::{MemoryError, Result};
use crate::store::MemoryStore;
use crate::types::{ScoreSource, SpanKind, TraceMessageType, TraceStatus};

impl MemoryStore {
    pub fn save_trace(
        &self,
        trace_id: &str,
        handle: &str,
        input: &str,
        message_type: TraceMessageType,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO traces (trace_id, handle, input, message_type, status, started_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                trace_id,
                handle,
                input,
                message_type.to_string(),
                TraceStatus::Started.to_string(),
                now,
                metadata.to_string()
            ],
        )?;
        Ok(())
    }

    pub fn finish_trace(
        &self,
        trace_id: &str,
        status: TraceStatus,
        output: Option<&str>,
        external_message_id: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let n = db.execute(
            "UPDATE traces SET status = ?2, output = COALESCE(?3, output),
                 external_message_id = COALESCE(?4, external_message_id), ended_at = ?5
             WHERE trace_id = ?1",
            rusqlite::params![trace_id, status.to_string(), output, external_message_id, now],
        )?;
        if n == 0 {
            return Err(MemoryError::NotFound {
                what: format!("trace {trace_id}"),
            });
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn save_trace_span(
        &self,
        span_id: &str,
        trace_id: &str,
        parent_id: Option<&str>,
        name: &str,
        kind: SpanKind,
        input: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO spans (span_id, trace_id, parent_id, name, kind, input, status, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'started', ?7)",
            rusqlite::params![span_id, trace_id, parent_id, name, kind.to_string(), input, now],
        )?;
        Ok(())
    }

    pub fn finish_trace_span(
        &self,
        span_id: &str,
        status: TraceStatus,
        output: Option<&str>,
        duration_ms: i64,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        let n = db.execute(
            "UPDATE spans SET status = ?2, output = ?3, ended_at = ?4,
                 duration_ms = ?5, metadata = ?6
             WHERE span_id = ?1",
            rusqlite::params![
                span_id,
                status.to_string(),
                output,
                now,
                duration_ms,
                metadata.to_string()
            ],
        )?;
        if n == 0 {
            return Err(MemoryError::NotFound {
                what: format!("span {span_id}"),
            });
        }
        Ok(())
    }

    pub fn save_trace_score(
        &self,
        trace_id: &str,
        span_id: Option<&str>,
        name: &str,
        value: f64,
        source: ScoreSource,
        comment: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO scores (trace_id, span_id, name, value, source, comment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![trace_id, span_id, name, value, source.to_string(), comment, now],
        )?;
        Ok(())
    }

    /// Most recently started trace id for a handle, if any.
    pub fn get_latest_trace_id(&self, handle: &str) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT trace_id FROM traces WHERE handle = ?1
             ORDER BY started_at DESC LIMIT 1",
            rusqlite::params![handle],
            |row| row.get(0),
        ) {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(MemoryError::Database(e)),
        }
    }

    /// Resolve the trace bound to an outbound message id.
    pub fn get_trace_id_by_external_id(&self, external_id: &str) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT trace_id FROM traces WHERE external_message_id = ?1",
            rusqlite::params![external_id],
            |row| row.get(0),
        ) {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(MemoryError::Database(e)),
        }
    }

    /// Delete traces (and their spans/scores) older than `retention_days`.
    pub fn prune_traces(&self, retention_days: u32) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let cutoff =
            (chrono::Utc::now() - chrono::Duration::days(retention_days as i64)).to_rfc3339();
        db.execute(
            "DELETE FROM spans WHERE trace_id IN
                 (SELECT trace_id FROM traces WHERE started_at < ?1)",
            rusqlite::params![cutoff],
        )?;
        db.execute(
            "DELETE FROM scores WHERE trace_id IN
                 (SELECT trace_id FROM traces WHERE started_at < ?1)",
            rusqlite::params![cutoff],
        )?;
        let n = db.execute(
            "DELETE FROM traces WHERE started_at < ?1",
            rusqlite::params![cutoff],
        )?;
        Ok(n)
    }
}
