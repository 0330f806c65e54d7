use async_trait::async_trait;
use browser_agent_core::{Error, Result, ThreadId};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::checkpoint::{Checkpoint, CheckpointStore};

/// Networked checkpoint store for multi-node deployments.
pub struct PostgresCheckpointStore {
    pool: PgPool,
}

fn storage_err(e: sqlx::Error) -> Error {
    Error::Storage(e.to_string())
}

impl PostgresCheckpointStore {
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(url)
            .await
            .map_err(|e| Error::Config(format!("cannot connect to checkpoint database: {}", e)))?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id TEXT NOT NULL,
                step BIGINT NOT NULL,
                position JSONB NOT NULL,
                state JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (thread_id, step)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PostgresCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let step = i64::try_from(checkpoint.step)
            .map_err(|_| Error::Storage(format!("step out of range: {}", checkpoint.step)))?;
        let position = serde_json::to_value(&checkpoint.position)?;
        let state = serde_json::to_value(&checkpoint.state)?;

        // The row is only written when no newer step exists for the thread.
        let result = sqlx::query(
            r#"
            INSERT INTO checkpoints (thread_id, step, position, state, created_at)
            SELECT $1, $2, $3, $4, $5
            WHERE NOT EXISTS (
                SELECT 1 FROM checkpoints WHERE thread_id = $1 AND step > $2
            )
            ON CONFLICT (thread_id, step) DO UPDATE SET
                position = EXCLUDED.position,
                state = EXCLUDED.state,
                created_at = EXCLUDED.created_at
            "#,
        )
        .bind(checkpoint.thread_id.as_str())
        .bind(step)
        .bind(&position)
        .bind(&state)
        .bind(checkpoint.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(Error::Storage(format!(
                "stale checkpoint for {}: step {} is behind the stored step",
                checkpoint.thread_id, step
            )));
        }
        Ok(())
    }

    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>> {
        let row: Option<(i64, serde_json::Value, serde_json::Value, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT step, position, state, created_at
            FROM checkpoints
            WHERE thread_id = $1
            ORDER BY step DESC
            LIMIT 1
            "#,
        )
        .bind(thread_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        let Some((step, position, state, created_at)) = row else {
            return Ok(None);
        };
        Ok(Some(Checkpoint {
            thread_id: thread_id.clone(),
            step: step as u64,
            state: serde_json::from_value(state)?,
            position: serde_json::from_value(position)?,
            created_at,
        }))
    }

    async fn list_threads(&self) -> Result<Vec<ThreadId>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT thread_id FROM checkpoints ORDER BY thread_id")
                .fetch_all(&self.pool)
                .await
                .map_err(storage_err)?;
        Ok(rows.into_iter().map(|(id,)| ThreadId::from(id)).collect())
    }

    async fn delete(&self, thread_id: &ThreadId) -> Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE thread_id = $1")
            .bind(thread_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
