use rusqlite::{Connection, Result};

/// Initialise all tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_conversation_tables(conn)?;
    create_memory_tables(conn)?;
    create_trace_tables(conn)?;
    create_dataset_tables(conn)?;
    create_prompt_tables(conn)?;
    create_cron_table(conn)?;
    Ok(())
}

fn create_conversation_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            handle      TEXT NOT NULL UNIQUE,
            created_at  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL,
            role            TEXT NOT NULL,
            content         TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conv
            ON messages(conversation_id, id);
        CREATE TABLE IF NOT EXISTS summaries (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id INTEGER NOT NULL,
            content         TEXT NOT NULL,
            up_to_message   INTEGER NOT NULL,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_summaries_conv
            ON summaries(conversation_id, id DESC);
        CREATE TABLE IF NOT EXISTS conversation_state (
            conversation_id      INTEGER PRIMARY KEY,
            sticky_categories    TEXT NOT NULL DEFAULT '[]',
            last_tool_categories TEXT NOT NULL DEFAULT '[]',
            updated_at           TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS processed_messages (
            external_id  TEXT PRIMARY KEY,
            processed_at TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS daily_log (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            day        TEXT NOT NULL,
            entry      TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_daily_log_day
            ON daily_log(day, id);",
    )
}

fn create_memory_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memories (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            content     TEXT NOT NULL,
            category    TEXT NOT NULL,
            active      INTEGER NOT NULL DEFAULT 1,
            embedding   BLOB,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memories_active
            ON memories(active, category);
        CREATE TABLE IF NOT EXISTS notes (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            scope       TEXT NOT NULL,
            owner       TEXT NOT NULL,
            content     TEXT NOT NULL,
            embedding   BLOB,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_notes_owner
            ON notes(scope, owner);",
    )
}

fn create_trace_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS traces (
            trace_id            TEXT PRIMARY KEY,
            handle              TEXT NOT NULL,
            input               TEXT,
            output              TEXT,
            external_message_id TEXT,
            message_type        TEXT NOT NULL,
            status              TEXT NOT NULL,
            started_at          TEXT NOT NULL,
            ended_at            TEXT,
            metadata            TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_traces_handle
            ON traces(handle, started_at DESC);
        CREATE INDEX IF NOT EXISTS idx_traces_external
            ON traces(external_message_id);
        CREATE TABLE IF NOT EXISTS spans (
            span_id     TEXT PRIMARY KEY,
            trace_id    TEXT NOT NULL,
            parent_id   TEXT,
            name        TEXT NOT NULL,
            kind        TEXT NOT NULL,
            input       TEXT,
            output      TEXT,
            status      TEXT NOT NULL,
            started_at  TEXT NOT NULL,
            ended_at    TEXT,
            duration_ms INTEGER,
            metadata    TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_spans_trace
            ON spans(trace_id, started_at);
        CREATE TABLE IF NOT EXISTS scores (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            trace_id   TEXT NOT NULL,
            span_id    TEXT,
            name       TEXT NOT NULL,
            value      REAL NOT NULL,
            source     TEXT NOT NULL,
            comment    TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_scores_trace
            ON scores(trace_id);",
    )
}

fn create_dataset_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS dataset_entries (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            trace_id        TEXT NOT NULL,
            entry_type      TEXT NOT NULL,
            input           TEXT NOT NULL,
            output          TEXT NOT NULL,
            expected_output TEXT,
            tags            TEXT NOT NULL DEFAULT '[]',
            metadata        TEXT NOT NULL DEFAULT '{}',
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_dataset_type
            ON dataset_entries(entry_type);",
    )
}

fn create_prompt_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS prompt_versions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            prompt_name TEXT NOT NULL,
            version     INTEGER NOT NULL,
            content     TEXT NOT NULL,
            is_active   INTEGER NOT NULL DEFAULT 0,
            created_by  TEXT NOT NULL,
            approved_at TEXT,
            created_at  TEXT NOT NULL,
            UNIQUE(prompt_name, version)
        );
        CREATE INDEX IF NOT EXISTS idx_prompts_active
            ON prompt_versions(prompt_name, is_active);",
    )
}

fn create_cron_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS cron_jobs (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            handle     TEXT NOT NULL,
            name       TEXT NOT NULL,
            schedule   TEXT NOT NULL,
            action     TEXT NOT NULL,
            active     INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_cron_active
            ON cron_jobs(active);",
    )
}
