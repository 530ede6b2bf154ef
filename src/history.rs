use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::aggregate::{self, Trend};
use crate::db::DbPool;
use crate::entity::TrackedEntity;
use crate::model::{State, StatusRecord};
use crate::timeutil::{from_millis, to_millis};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The record is not strictly newer than the entity's last stored record.
    #[error("out-of-order record for `{entity_id}` at {ts}")]
    OutOfOrder {
        entity_id: String,
        ts: DateTime<Utc>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Closed time range `[start, end]` for windowed reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn ending_at(end: DateTime<Utc>, length: Duration) -> Self {
        Self {
            start: end - length,
            end,
        }
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }

    /// Whole hours covered, at least one.
    pub fn hours(&self) -> usize {
        self.length().num_hours().max(1) as usize
    }
}

const CREATE_ENTITIES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    entity_id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL
)
"#;

const CREATE_RECORDS_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    entity_id TEXT NOT NULL,
    ts_ms INTEGER NOT NULL,
    state TEXT NOT NULL,
    PRIMARY KEY (entity_id, ts_ms)
)
"#;

/// Columns added after the first schema; only ever appended to.
const ENTITY_COLUMNS: &[(&str, &str)] = &[
    ("kind", "TEXT NOT NULL DEFAULT ''"),
    ("group_label", "TEXT NOT NULL DEFAULT ''"),
    ("position", "INTEGER NOT NULL DEFAULT 0"),
    ("updated_at_ms", "INTEGER NOT NULL DEFAULT 0"),
];

const RECORD_COLUMNS: &[(&str, &str)] = &[
    ("severity", "INTEGER NOT NULL DEFAULT 0"),
    ("value", "REAL"),
    ("latency_ms", "INTEGER"),
    ("message", "TEXT"),
];

const INSERT_RECORD_SQL: &str = r#"
INSERT INTO records (entity_id, ts_ms, state, severity, value, latency_ms, message)
SELECT ?, ?, ?, ?, ?, ?, ?
WHERE NOT EXISTS (SELECT 1 FROM records WHERE entity_id = ? AND ts_ms >= ?)
"#;

const RECORD_COLUMNS_SQL: &str = "entity_id, ts_ms, state, value, latency_ms, message";

#[derive(Clone)]
pub struct HistoryStore {
    pool: DbPool,
}

impl HistoryStore {
    /// Wrap a pool and bring the schema up to date.
    pub async fn new(pool: DbPool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_ENTITIES_SQL).execute(&self.pool).await?;
        sqlx::query(CREATE_RECORDS_SQL).execute(&self.pool).await?;
        self.add_missing_columns("entities", ENTITY_COLUMNS).await?;
        self.add_missing_columns("records", RECORD_COLUMNS).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS records_ts_idx ON records (ts_ms)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_missing_columns(
        &self,
        table: &str,
        columns: &[(&str, &str)],
    ) -> Result<(), StoreError> {
        let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
            .fetch_all(&self.pool)
            .await?;
        let mut present = HashSet::new();
        for row in rows {
            let name: String = row.try_get("name")?;
            present.insert(name);
        }

        for (name, definition) in columns {
            if present.contains(*name) {
                continue;
            }
            sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {name} {definition}"))
                .execute(&self.pool)
                .await?;
            info!(table, column = *name, "added missing column");
        }
        Ok(())
    }

    /// Upsert entity metadata in configuration order.
    pub async fn register_entities(&self, entities: &[TrackedEntity]) -> Result<(), StoreError> {
        let now_ms = to_millis(Utc::now());
        let mut tx = self.pool.begin().await?;
        for (position, entity) in entities.iter().enumerate() {
            sqlx::query(
                r#"
INSERT INTO entities (entity_id, name, kind, group_label, position, updated_at_ms)
VALUES (?, ?, ?, ?, ?, ?)
ON CONFLICT(entity_id) DO UPDATE SET
    name = excluded.name,
    kind = excluded.kind,
    group_label = excluded.group_label,
    position = excluded.position,
    updated_at_ms = excluded.updated_at_ms
"#,
            )
            .bind(&entity.id)
            .bind(&entity.name)
            .bind(entity.kind().as_str())
            .bind(&entity.group)
            .bind(position as i64)
            .bind(now_ms)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(count = entities.len(), "registered entities");
        Ok(())
    }

    /// Append one record; rejects anything not strictly newer than the
    /// entity's last record.
    pub async fn append(&self, record: &StatusRecord) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_record(&mut *conn, record).await
    }

    /// Append a whole cycle atomically; any failure rolls every row back.
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn append_cycle(&self, records: &[StatusRecord]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            insert_record(&mut *tx, record).await?;
        }
        tx.commit().await?;
        Ok(records.len())
    }

    /// A timestamp no earlier than `now` and strictly after every stored one.
    pub async fn next_cycle_timestamp(
        &self,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, StoreError> {
        let row = sqlx::query("SELECT MAX(ts_ms) AS max_ts FROM records")
            .fetch_one(&self.pool)
            .await?;
        let max_ts: Option<i64> = row.try_get("max_ts")?;
        let now_ms = to_millis(now);
        Ok(from_millis(match max_ts {
            Some(max) if max >= now_ms => max + 1,
            _ => now_ms,
        }))
    }

    /// Delete records older than `cutoff`, keeping each entity's newest
    /// record at or before it so a window starting at `cutoff` still knows
    /// its opening state. Returns the number removed.
    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff_ms = to_millis(cutoff);
        let result = sqlx::query(
            r#"
DELETE FROM records
WHERE ts_ms < ?
  AND ts_ms < (
    SELECT MAX(anchor.ts_ms) FROM records AS anchor
    WHERE anchor.entity_id = records.entity_id AND anchor.ts_ms <= ?
  )
"#,
        )
        .bind(cutoff_ms)
        .bind(cutoff_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Open a read transaction. Every query made through the reader sees the
    /// same set of committed cycles.
    pub async fn reader(&self) -> Result<HistoryReader, StoreError> {
        Ok(HistoryReader {
            tx: self.pool.begin().await?,
        })
    }

    pub async fn latest(&self, entity_id: &str) -> Result<Option<StatusRecord>, StoreError> {
        self.reader().await?.latest(entity_id).await
    }

    pub async fn latest_value(&self, entity_id: &str) -> Result<Option<StatusRecord>, StoreError> {
        self.reader().await?.latest_value(entity_id).await
    }

    pub async fn series(
        &self,
        entity_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<StatusRecord>, StoreError> {
        self.reader().await?.series(entity_id, since).await
    }

    pub async fn record_count(&self, entity_id: &str) -> Result<i64, StoreError> {
        self.reader().await?.record_count(entity_id).await
    }

    pub async fn uptime(&self, entity_id: &str, window: Window) -> Result<Option<f64>, StoreError> {
        self.reader().await?.uptime(entity_id, window).await
    }

    pub async fn trend(
        &self,
        entity_id: &str,
        window: Window,
        deadband: f64,
    ) -> Result<Option<Trend>, StoreError> {
        self.reader().await?.trend(entity_id, window, deadband).await
    }

    pub async fn episodes(&self, entity_id: &str, window: Window) -> Result<usize, StoreError> {
        self.reader().await?.episodes(entity_id, window).await
    }

    pub async fn buckets(
        &self,
        entity_id: &str,
        window: Window,
    ) -> Result<Vec<Option<State>>, StoreError> {
        self.reader().await?.buckets(entity_id, window).await
    }

    pub async fn last_failure(
        &self,
        entity_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<StatusRecord>, StoreError> {
        self.reader().await?.last_failure(entity_id, since).await
    }
}

pub struct HistoryReader {
    tx: Transaction<'static, Sqlite>,
}

impl HistoryReader {
    /// End the read transaction.
    pub async fn finish(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }

    pub async fn latest(&mut self, entity_id: &str) -> Result<Option<StatusRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS_SQL} FROM records WHERE entity_id = ? ORDER BY ts_ms DESC LIMIT 1"
        ))
        .bind(entity_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Most recent record that carries a numeric value.
    pub async fn latest_value(
        &mut self,
        entity_id: &str,
    ) -> Result<Option<StatusRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS_SQL} FROM records \
             WHERE entity_id = ? AND value IS NOT NULL ORDER BY ts_ms DESC LIMIT 1"
        ))
        .bind(entity_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Records at or after `since`, oldest first.
    pub async fn series(
        &mut self,
        entity_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<StatusRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS_SQL} FROM records \
             WHERE entity_id = ? AND ts_ms >= ? ORDER BY ts_ms ASC"
        ))
        .bind(entity_id)
        .bind(to_millis(since))
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn record_count(&mut self, entity_id: &str) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM records WHERE entity_id = ?")
            .bind(entity_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row.try_get("n")?)
    }

    /// The window's records preceded by the last record at or before its start.
    pub async fn window_records(
        &mut self,
        entity_id: &str,
        window: Window,
    ) -> Result<Vec<StatusRecord>, StoreError> {
        self.anchored_records(entity_id, window, "").await
    }

    /// Like [`window_records`](Self::window_records) but restricted to valued
    /// records, so an UNKNOWN row at the window start does not hide the
    /// baseline.
    pub async fn valued_window_records(
        &mut self,
        entity_id: &str,
        window: Window,
    ) -> Result<Vec<StatusRecord>, StoreError> {
        self.anchored_records(entity_id, window, " AND value IS NOT NULL")
            .await
    }

    async fn anchored_records(
        &mut self,
        entity_id: &str,
        window: Window,
        filter: &str,
    ) -> Result<Vec<StatusRecord>, StoreError> {
        let start_ms = to_millis(window.start);
        let anchor = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS_SQL} FROM records \
             WHERE entity_id = ? AND ts_ms <= ?{filter} ORDER BY ts_ms DESC LIMIT 1"
        ))
        .bind(entity_id)
        .bind(start_ms)
        .fetch_optional(&mut *self.tx)
        .await?;
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS_SQL} FROM records \
             WHERE entity_id = ? AND ts_ms > ? AND ts_ms <= ?{filter} ORDER BY ts_ms ASC"
        ))
        .bind(entity_id)
        .bind(start_ms)
        .bind(to_millis(window.end))
        .fetch_all(&mut *self.tx)
        .await?;

        anchor.iter().chain(rows.iter()).map(record_from_row).collect()
    }

    pub async fn uptime(
        &mut self,
        entity_id: &str,
        window: Window,
    ) -> Result<Option<f64>, StoreError> {
        let records = self.window_records(entity_id, window).await?;
        Ok(aggregate::uptime(&records, window.start, window.end))
    }

    pub async fn trend(
        &mut self,
        entity_id: &str,
        window: Window,
        deadband: f64,
    ) -> Result<Option<Trend>, StoreError> {
        let records = self.valued_window_records(entity_id, window).await?;
        Ok(aggregate::trend(&records, window.end, window.length(), deadband))
    }

    pub async fn episodes(&mut self, entity_id: &str, window: Window) -> Result<usize, StoreError> {
        let records = self.window_records(entity_id, window).await?;
        Ok(aggregate::episodes(&records, window.start, window.end))
    }

    pub async fn buckets(
        &mut self,
        entity_id: &str,
        window: Window,
    ) -> Result<Vec<Option<State>>, StoreError> {
        let records = self.window_records(entity_id, window).await?;
        Ok(aggregate::buckets(&records, window.start, window.hours()))
    }

    /// Most recent non-OK record at or after `since`.
    pub async fn last_failure(
        &mut self,
        entity_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<StatusRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS_SQL} FROM records \
             WHERE entity_id = ? AND ts_ms >= ? AND state != 'ok' ORDER BY ts_ms DESC LIMIT 1"
        ))
        .bind(entity_id)
        .bind(to_millis(since))
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }
}

async fn insert_record(
    conn: &mut sqlx::SqliteConnection,
    record: &StatusRecord,
) -> Result<(), StoreError> {
    let ts_ms = to_millis(record.ts);
    let result = sqlx::query::<Sqlite>(INSERT_RECORD_SQL)
        .bind(&record.entity_id)
        .bind(ts_ms)
        .bind(record.state.as_str())
        .bind(i64::from(record.state.rank()))
        .bind(record.value.filter(|v| v.is_finite()))
        .bind(record.latency_ms)
        .bind(record.message.as_deref())
        .bind(&record.entity_id)
        .bind(ts_ms)
        .execute(&mut *conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::OutOfOrder {
            entity_id: record.entity_id.clone(),
            ts: record.ts,
        });
    }
    Ok(())
}

fn record_from_row(row: &SqliteRow) -> Result<StatusRecord, StoreError> {
    let state: String = row.try_get("state")?;
    let ts_ms: i64 = row.try_get("ts_ms")?;
    Ok(StatusRecord {
        entity_id: row.try_get("entity_id")?,
        ts: from_millis(ts_ms),
        state: state.parse().unwrap_or(State::Unknown),
        value: row.try_get("value")?,
        latency_ms: row.try_get("latency_ms")?,
        message: row.try_get("message")?,
    })
}
