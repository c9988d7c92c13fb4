//! SQL migration definitions for the Stagecraft database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: generation_cache, pipeline_runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Model response cache
CREATE TABLE IF NOT EXISTS generation_cache (
    id          TEXT PRIMARY KEY,
    task        TEXT NOT NULL,
    prompt_hash TEXT NOT NULL,
    model_id    TEXT NOT NULL,
    response    TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE(task, prompt_hash, model_id)
);

CREATE INDEX IF NOT EXISTS idx_generation_cache_task ON generation_cache(task);

-- One row per pipeline run
CREATE TABLE IF NOT EXISTS pipeline_runs (
    id              TEXT PRIMARY KEY,
    event_number    INTEGER NOT NULL,
    event_date      TEXT NOT NULL,
    activity_id     INTEGER,
    style           TEXT NOT NULL,
    format          TEXT NOT NULL,
    success         INTEGER NOT NULL,
    error_message   TEXT,
    artifact_path   TEXT,
    elapsed_seconds REAL NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pipeline_runs_event ON pipeline_runs(event_number, event_date);

INSERT OR IGNORE INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
