pub mod audit;
pub mod checkpoint;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sqlite;

pub use audit::{AuditEvent, AuditLogger};
pub use checkpoint::{open_checkpoint_store, Checkpoint, CheckpointStore};
#[cfg(feature = "postgres")]
pub use postgres::PostgresCheckpointStore;
pub use sqlite::SqliteCheckpointStore;
