use async_trait::async_trait;
use browser_agent_core::{Error, Result, ThreadId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::checkpoint::{Checkpoint, CheckpointStore};

/// Single-file checkpoint store. Every step is kept; `load` returns the newest.
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    inner: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl SqliteCheckpointStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Storage(format!("Failed to create checkpoint directory: {}", e))
            })?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Storage(format!("Failed to open checkpoint db: {}", e)))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn, Some(db_path.to_path_buf()))
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Storage(format!("Failed to open in-memory db: {}", e)))?;
        Self::with_connection(conn, None)
    }

    fn with_connection(conn: Connection, db_path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT NOT NULL,
                step INTEGER NOT NULL,
                position TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (thread_id, step)
            );
            ",
        )
        .map_err(|e| Error::Storage(format!("Failed to init checkpoint schema: {}", e)))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = inner
                .lock()
                .map_err(|_| Error::Storage("checkpoint connection poisoned".to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| Error::Storage(format!("checkpoint task failed: {}", e)))?
    }
}

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let thread_id = checkpoint.thread_id.to_string();
        let step = i64::try_from(checkpoint.step)
            .map_err(|_| Error::Storage(format!("step out of range: {}", checkpoint.step)))?;
        let position = serde_json::to_string(&checkpoint.position)?;
        let state = serde_json::to_string(&checkpoint.state)?;
        let created_at = checkpoint.created_at.to_rfc3339();

        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            let latest: Option<i64> = tx
                .query_row(
                    "SELECT MAX(step) FROM checkpoints WHERE thread_id = ?1",
                    params![thread_id],
                    |row| row.get(0),
                )
                .map_err(storage_err)?;
            if let Some(latest) = latest {
                if step < latest {
                    return Err(Error::Storage(format!(
                        "stale checkpoint for {}: step {} is behind {}",
                        thread_id, step, latest
                    )));
                }
            }
            tx.execute(
                "INSERT OR REPLACE INTO checkpoints (thread_id, step, position, state, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![thread_id, step, position, state, created_at],
            )
            .map_err(storage_err)?;
            tx.commit().map_err(storage_err)?;
            debug!(thread_id = %thread_id, step, "Checkpoint saved");
            Ok(())
        })
        .await
    }

    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>> {
        let key = thread_id.to_string();
        let row = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT step, position, state, created_at FROM checkpoints
                     WHERE thread_id = ?1 ORDER BY step DESC LIMIT 1",
                    params![key],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(storage_err)
            })
            .await?;

        let Some((step, position, state, created_at)) = row else {
            return Ok(None);
        };
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| Error::Storage(format!("bad checkpoint timestamp: {}", e)))?;
        Ok(Some(Checkpoint {
            thread_id: thread_id.clone(),
            step: step as u64,
            state: serde_json::from_str(&state)?,
            position: serde_json::from_str(&position)?,
            created_at,
        }))
    }

    async fn list_threads(&self) -> Result<Vec<ThreadId>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT thread_id FROM checkpoints ORDER BY thread_id")
                .map_err(storage_err)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(storage_err)?;
            let mut threads = Vec::new();
            for row in rows {
                threads.push(ThreadId::from(row.map_err(storage_err)?));
            }
            Ok(threads)
        })
        .await
    }

    async fn delete(&self, thread_id: &ThreadId) -> Result<()> {
        let key = thread_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM checkpoints WHERE thread_id = ?1", params![key])
                .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
