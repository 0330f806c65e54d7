use async_trait::async_trait;
use browser_agent_core::config::{CheckpointBackend, CheckpointConfig};
use browser_agent_core::state::ExecutorPosition;
use browser_agent_core::{AgentState, Error, Paths, Result, ThreadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::sqlite::SqliteCheckpointStore;

/// Durable snapshot of one thread after a completed tool call or a suspension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: ThreadId,
    pub step: u64,
    pub state: AgentState,
    #[serde(default)]
    pub position: ExecutorPosition,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(step: u64, state: AgentState, position: ExecutorPosition) -> Self {
        Self {
            thread_id: state.thread_id.clone(),
            step,
            state,
            position,
            created_at: Utc::now(),
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.position, ExecutorPosition::Suspended { .. })
    }
}

/// Thread-scoped checkpoint persistence.
///
/// Steps are monotonic per thread: saving a step lower than the latest stored
/// one fails with `Error::Storage`; re-saving the latest step overwrites it.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Latest checkpoint for the thread.
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>>;

    async fn list_threads(&self) -> Result<Vec<ThreadId>>;

    async fn delete(&self, thread_id: &ThreadId) -> Result<()>;

    fn backend_name(&self) -> &'static str;
}

/// Build the configured backend. Misconfiguration is reported here, at startup.
pub async fn open_checkpoint_store(
    config: &CheckpointConfig,
    paths: &Paths,
) -> Result<Arc<dyn CheckpointStore>> {
    match config.backend {
        CheckpointBackend::Sqlite => {
            let path = config.sqlite_path(paths);
            let store = SqliteCheckpointStore::open(&path)?;
            info!(path = %path.display(), "Using SQLite checkpoint store");
            Ok(Arc::new(store))
        }
        CheckpointBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .filter(|u| !u.trim().is_empty())
                .ok_or_else(|| {
                    Error::Config(
                        "DATABASE_URL must be set when CHECKPOINT_DB_TYPE=postgres".to_string(),
                    )
                })?;
            open_postgres(url, config.pool_size).await
        }
    }
}

#[cfg(feature = "postgres")]
async fn open_postgres(url: &str, pool_size: u32) -> Result<Arc<dyn CheckpointStore>> {
    let store = crate::postgres::PostgresCheckpointStore::connect(url, pool_size).await?;
    info!(pool_size, "Using PostgreSQL checkpoint store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_url: &str, _pool_size: u32) -> Result<Arc<dyn CheckpointStore>> {
    Err(Error::Config(
        "postgres checkpoint backend requested but this build lacks the `postgres` feature"
            .to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_factory_defaults_to_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let store = open_checkpoint_store(&CheckpointConfig::default(), &paths)
            .await
            .unwrap();
        assert_eq!(store.backend_name(), "sqlite");
        assert!(paths.checkpoint_db().exists());
    }

    #[tokio::test]
    async fn test_factory_postgres_without_url_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let config = CheckpointConfig {
            backend: CheckpointBackend::Postgres,
            ..Default::default()
        };
        let err = open_checkpoint_store(&config, &paths).await.err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_checkpoint_suspended_flag() {
        let state = AgentState::new(ThreadId::from("t1"));
        let idle = Checkpoint::new(1, state.clone(), ExecutorPosition::Idle);
        assert!(!idle.is_suspended());
        assert_eq!(idle.thread_id.as_str(), "t1");
    }
}
