use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

/// A pool config object, designed to be passable across API boundaries.
///
/// `db_url` is a sqlite URL, e.g. `sqlite:///data/dispatch.db` or
/// `sqlite::memory:`. Foreign keys are always enabled: the queue schema relies
/// on cascade deletes and the row-GC trigger.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PoolConfig {
    pub db_url: String,
    pub max_connections: Option<u32>,         // Default to 4
    pub acquire_timeout_seconds: Option<u64>, // Default to 30
}

impl PoolConfig {
    pub async fn connect(&self) -> Result<SqlitePool, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(&self.db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        SqlitePoolOptions::new()
            .max_connections(self.max_connections.unwrap_or(4))
            .acquire_timeout(Duration::from_secs(
                self.acquire_timeout_seconds.unwrap_or(30),
            ))
            .connect_with(options)
            .await
    }
}

/// Default cap on distinct queued events across all processors.
pub const DEFAULT_MAX_QUEUE_SIZE: i64 = 100;

/// Default entry expiry.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(24 * 60 * 60);
