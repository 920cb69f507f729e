//! SQLite-backed task store.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;

use super::{DurableSnapshot, DurableTask, TaskSink};
use crate::task::TaskStatus;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    prompt TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL,
    result_json TEXT,
    error TEXT,
    logs_json TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at);
"#;

const SELECT_COLUMNS: &str =
    "id, prompt, status, result_json, error, logs_json, created_at, updated_at, completed_at";

/// Task store in a single SQLite file.
///
/// The connection is shared behind a mutex and every query runs on the
/// blocking pool.
#[derive(Clone)]
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path.display()))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .context("Storage task panicked")?
    }
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(Box::new(e)))
}

fn json_column<T: serde::de::DeserializeOwned>(raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| conversion_error(Box::new(e)))
}

fn conversion_error(e: Box<dyn std::error::Error + Send + Sync>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e)
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<DurableTask> {
    let status: String = row.get(2)?;
    let result: Option<String> = row.get(3)?;
    let logs: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    let completed_at: Option<String> = row.get(8)?;

    Ok(DurableTask {
        id: row.get(0)?,
        prompt: row.get(1)?,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
        result: result.as_deref().map(json_column).transpose()?,
        error: row.get(4)?,
        logs: json_column(&logs)?,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
        completed_at: completed_at.as_deref().map(parse_time).transpose()?,
    })
}

#[async_trait]
impl TaskSink for SqliteTaskStore {
    async fn create(&self, id: &str, prompt: &str) -> anyhow::Result<()> {
        let id = id.to_string();
        let prompt = prompt.to_string();
        self.run(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT OR IGNORE INTO tasks (id, prompt, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id, prompt, TaskStatus::Pending.as_str(), now],
            )?;
            Ok(())
        })
        .await
    }

    async fn save(&self, id: &str, snapshot: &DurableSnapshot) -> anyhow::Result<()> {
        let id = id.to_string();
        let status = snapshot.status.as_str();
        let result = snapshot
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let error = snapshot.error.clone();
        let logs = serde_json::to_string(&snapshot.logs)?;
        let completed_at = snapshot.completed_at.map(|t| t.to_rfc3339());

        self.run(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO tasks (id, status, result_json, error, logs_json,
                                    created_at, updated_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     status = excluded.status,
                     result_json = excluded.result_json,
                     error = excluded.error,
                     logs_json = excluded.logs_json,
                     updated_at = excluded.updated_at,
                     completed_at = excluded.completed_at
                 WHERE tasks.status NOT IN ('DONE', 'ERROR')
                    OR excluded.status IN ('DONE', 'ERROR')",
                params![id, status, result, error, logs, now, completed_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn load(&self, id: &str) -> anyhow::Result<Option<DurableTask>> {
        let id = id.to_string();
        self.run(move |conn| {
            let task = conn
                .query_row(
                    &format!("SELECT {} FROM tasks WHERE id = ?1", SELECT_COLUMNS),
                    params![id],
                    row_to_task,
                )
                .optional()?;
            Ok(task)
        })
        .await
    }

    async fn list_recent(&self, limit: usize) -> anyhow::Result<Vec<DurableTask>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.run(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM tasks ORDER BY created_at DESC, id ASC LIMIT ?1",
                SELECT_COLUMNS
            ))?;
            let tasks = stmt
                .query_map(params![limit], row_to_task)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
        .await
    }
}
