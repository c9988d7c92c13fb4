//! Turso Embedded / libSQL storage layer (offline mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding the model
//! generation cache and the pipeline run history. Neither is required for a
//! run; the orchestrator only opens the database when one is configured.

mod migrations;

use std::path::Path;

use chrono::Utc;
use libsql::{Connection, Database, params};
use serde::{Deserialize, Serialize};
use stagecraft_shared::{Result, StagecraftError};
use uuid::Uuid;

/// One recorded pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub event_number: u32,
    pub event_date: String,
    pub activity_id: Option<u64>,
    pub style: String,
    pub format: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub artifact_path: Option<String>,
    pub elapsed_seconds: f64,
    pub created_at: String,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

fn storage_err(e: impl std::fmt::Display) -> StagecraftError {
    StagecraftError::Storage(e.to_string())
}

impl Storage {
    /// Open or create a database at `path`, applying pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StagecraftError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = db.connect().map_err(storage_err)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        StagecraftError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    // -----------------------------------------------------------------------
    // Generation cache
    // -----------------------------------------------------------------------

    /// Look up a cached model response.
    pub async fn get_generation_cache(
        &self,
        task: &str,
        prompt_hash: &str,
        model_id: &str,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT response FROM generation_cache
                 WHERE task = ?1 AND prompt_hash = ?2 AND model_id = ?3",
                params![task, prompt_hash, model_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<String>(0).map_err(storage_err)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Store a model response in the cache (upserts).
    pub async fn set_generation_cache(
        &self,
        task: &str,
        prompt_hash: &str,
        model_id: &str,
        response: &str,
    ) -> Result<()> {
        let id = Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO generation_cache (id, task, prompt_hash, model_id, response, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(task, prompt_hash, model_id) DO UPDATE SET
                   response = excluded.response,
                   created_at = excluded.created_at",
                params![id.as_str(), task, prompt_hash, model_id, response, now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Drop every cached response for a task (or all tasks when `None`).
    pub async fn clear_generation_cache(&self, task: Option<&str>) -> Result<u64> {
        let affected = match task {
            Some(task) => self
                .conn
                .execute("DELETE FROM generation_cache WHERE task = ?1", params![task])
                .await
                .map_err(storage_err)?,
            None => self
                .conn
                .execute("DELETE FROM generation_cache", params![])
                .await
                .map_err(storage_err)?,
        };
        Ok(affected)
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Record one pipeline run.
    pub async fn record_run(&self, run: &RunRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO pipeline_runs (id, event_number, event_date, activity_id, style, format,
                                            success, error_message, artifact_path, elapsed_seconds, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    run.id.as_str(),
                    i64::from(run.event_number),
                    run.event_date.as_str(),
                    run.activity_id.map(|id| id as i64),
                    run.style.as_str(),
                    run.format.as_str(),
                    i64::from(run.success),
                    run.error_message.as_deref(),
                    run.artifact_path.as_deref(),
                    run.elapsed_seconds,
                    run.created_at.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Most recent runs, newest first.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, event_number, event_date, activity_id, style, format, success,
                        error_message, artifact_path, elapsed_seconds, created_at
                 FROM pipeline_runs ORDER BY created_at DESC, id DESC LIMIT ?1",
                params![i64::from(limit)],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }
}

/// Convert a libSQL row into a `RunRecord`.
fn row_to_run(row: &libsql::Row) -> Result<RunRecord> {
    Ok(RunRecord {
        id: row.get::<String>(0).map_err(storage_err)?,
        event_number: row.get::<i64>(1).map_err(storage_err)? as u32,
        event_date: row.get::<String>(2).map_err(storage_err)?,
        activity_id: row
            .get::<Option<i64>>(3)
            .map_err(storage_err)?
            .map(|id| id as u64),
        style: row.get::<String>(4).map_err(storage_err)?,
        format: row.get::<String>(5).map_err(storage_err)?,
        success: row.get::<i64>(6).map_err(storage_err)? != 0,
        error_message: row.get::<Option<String>>(7).map_err(storage_err)?,
        artifact_path: row.get::<Option<String>>(8).map_err(storage_err)?,
        elapsed_seconds: row.get::<f64>(9).map_err(storage_err)?,
        created_at: row.get::<String>(10).map_err(storage_err)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("sc_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn run(event_number: u32, success: bool) -> RunRecord {
        RunRecord {
            id: Uuid::now_v7().to_string(),
            event_number,
            event_date: "2025-07-08".into(),
            activity_id: Some(14_223_001_987),
            style: "literary".into(),
            format: "markup".into(),
            success,
            error_message: (!success).then(|| "not found: no report".to_string()),
            artifact_path: success.then(|| "/tmp/event_04.md".to_string()),
            elapsed_seconds: 12.5,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("sc_test_{}.db", Uuid::now_v7()));
        let _s1 = Storage::open(&tmp).await.expect("first open");
        drop(_s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn generation_cache_roundtrip() {
        let storage = test_storage().await;

        let miss = storage
            .get_generation_cache("write_draft", "abc123", "model-a")
            .await
            .unwrap();
        assert!(miss.is_none());

        storage
            .set_generation_cache("write_draft", "abc123", "model-a", "Once upon a stage")
            .await
            .unwrap();
        let hit = storage
            .get_generation_cache("write_draft", "abc123", "model-a")
            .await
            .unwrap();
        assert_eq!(hit.as_deref(), Some("Once upon a stage"));

        // Different model is a different key
        let other = storage
            .get_generation_cache("write_draft", "abc123", "model-b")
            .await
            .unwrap();
        assert!(other.is_none());

        // Upsert replaces
        storage
            .set_generation_cache("write_draft", "abc123", "model-a", "Second take")
            .await
            .unwrap();
        let hit = storage
            .get_generation_cache("write_draft", "abc123", "model-a")
            .await
            .unwrap();
        assert_eq!(hit.as_deref(), Some("Second take"));
    }

    #[tokio::test]
    async fn clear_cache_by_task() {
        let storage = test_storage().await;
        storage
            .set_generation_cache("assign_role", "h1", "m", "{}")
            .await
            .unwrap();
        storage
            .set_generation_cache("write_draft", "h2", "m", "text")
            .await
            .unwrap();

        let removed = storage.clear_generation_cache(Some("assign_role")).await.unwrap();
        assert_eq!(removed, 1);
        assert!(
            storage
                .get_generation_cache("write_draft", "h2", "m")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn run_history() {
        let storage = test_storage().await;
        storage.record_run(&run(4, true)).await.unwrap();
        storage.record_run(&run(5, false)).await.unwrap();

        let runs = storage.recent_runs(10).await.unwrap();
        assert_eq!(runs.len(), 2);

        let failed = runs.iter().find(|r| r.event_number == 5).unwrap();
        assert!(!failed.success);
        assert!(failed.error_message.as_deref().unwrap().contains("no report"));
        assert!(failed.artifact_path.is_none());

        let ok = runs.iter().find(|r| r.event_number == 4).unwrap();
        assert_eq!(ok.activity_id, Some(14_223_001_987));
        assert_eq!(ok.elapsed_seconds, 12.5);
    }
}
