//! User-defined cron jobs. The gateway restores active jobs at startup and
//! re-arms them on its scheduler.

use crate::error::{MemoryError, Result};
use crate::store::MemoryStore;
use crate::types::CronJob;

impl MemoryStore {
    pub fn add_cron_job(
        &self,
        handle: &str,
        name: &str,
        schedule: &str,
        action: &str,
    ) -> Result<CronJob> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO cron_jobs (handle, name, schedule, action, active, created_at)
             VALUES (?1, ?2, ?3, ?4, 1, ?5)",
            rusqlite::params![handle, name, schedule, action, now],
        )?;
        Ok(CronJob {
            id: db.last_insert_rowid(),
            handle: handle.to_string(),
            name: name.to_string(),
            schedule: schedule.to_string(),
            action: action.to_string(),
            active: true,
            created_at: now,
        })
    }

    pub fn remove_cron_job(&self, id: i64) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute("DELETE FROM cron_jobs WHERE id = ?1", rusqlite::params![id])?;
        if n == 0 {
            return Err(MemoryError::NotFound {
                what: format!("cron job {id}"),
            });
        }
        Ok(())
    }

    pub fn set_cron_job_active(&self, id: i64, active: bool) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE cron_jobs SET active = ?2 WHERE id = ?1",
            rusqlite::params![id, active as i64],
        )?;
        if n == 0 {
            return Err(MemoryError::NotFound {
                what: format!("cron job {id}"),
            });
        }
        Ok(())
    }

    pub fn list_cron_jobs(&self, handle: &str) -> Result<Vec<CronJob>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, handle, name, schedule, action, active, created_at
             FROM cron_jobs WHERE handle = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![handle], row_to_job)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// All active jobs, for startup restoration.
    pub fn get_active_cron_jobs(&self) -> Result<Vec<CronJob>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, handle, name, schedule, action, active, created_at
             FROM cron_jobs WHERE active = 1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], row_to_job)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<CronJob> {
    let active: i64 = row.get(5)?;
    Ok(CronJob {
        id: row.get(0)?,
        handle: row.get(1)?,
        name: row.get(2)?,
        schedule: row.get(3)?,
        action: row.get(4)?,
        active: active == 1,
        created_at: row.get(6)?,
    })
}
