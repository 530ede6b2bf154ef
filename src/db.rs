use std::{path::Path, time::Duration};

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::info;

use crate::history::StoreError;

pub type DbPool = SqlitePool;

/// Open (creating if needed) the history database in WAL mode so one writer
/// process and a reader process can share the file.
pub async fn create_pool(path: &Path) -> Result<DbPool, StoreError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }

    let connect_options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(connect_options)
        .await?;

    info!(path = %path.display(), "opened history database");
    Ok(pool)
}

/// Private in-memory database. A single long-lived connection keeps every
/// query on the same memory image.
pub async fn create_memory_pool() -> Result<DbPool, StoreError> {
    let connect_options = SqliteConnectOptions::new().in_memory(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(connect_options)
        .await?;
    Ok(pool)
}
