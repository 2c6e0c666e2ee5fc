// # SQLite History Store
//
// This crate provides a SQLite implementation of the HistoryStore trait for
// the parcels aggregator.
//
// ## Schema
//
// One table, one row per distinct response body per (tracking number,
// source). Rows are never deleted. The schema is created on open.
//
// ```sql
// CREATE TABLE tracking_responses (
//     id               INTEGER PRIMARY KEY AUTOINCREMENT,
//     source_name      TEXT    NOT NULL,
//     tracking_number  TEXT    NOT NULL,
//     first_fetched_at INTEGER NOT NULL,  -- ns since Unix epoch, UTC
//     last_fetched_at  INTEGER NOT NULL,  -- ns since Unix epoch, UTC
//     response_body    BLOB    NOT NULL,
//     status           TEXT    NOT NULL
// );
// ```
//
// Timestamps are stored as integer nanoseconds so a stored response reads
// back exactly as it was written.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parcels_core::{Error, HistoryStore, RawResponse, ResponseStatus, Result, SourceName};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::Row;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tracking_responses (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    source_name      TEXT    NOT NULL,
    tracking_number  TEXT    NOT NULL,
    first_fetched_at INTEGER NOT NULL,
    last_fetched_at  INTEGER NOT NULL,
    response_body    BLOB    NOT NULL,
    status           TEXT    NOT NULL
)
"#;

const CREATE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_tracking_responses_latest
    ON tracking_responses (tracking_number, source_name, last_fetched_at)
"#;

const SELECT_LATEST: &str = r#"
SELECT id, source_name, tracking_number, first_fetched_at, last_fetched_at, response_body, status
  FROM tracking_responses
 WHERE tracking_number = ? AND source_name = ?
 ORDER BY last_fetched_at DESC, id DESC
 LIMIT 1
"#;

/// SQLite-backed history store
#[derive(Debug, Clone)]
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    /// Open (or create) a database file and make sure the schema exists
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::history_store(format!("Failed to open {}: {}", path.display(), e))
            })?;

        info!("Opened SQLite history store at {}", path.display());
        Self::from_pool(pool).await
    }

    /// Private in-memory database (tests, throwaway runs)
    pub async fn in_memory() -> Result<Self> {
        // Every in-memory connection is its own database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                Error::history_store(format!("Failed to open in-memory database: {}", e))
            })?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema if needed
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        for statement in [CREATE_TABLE, CREATE_INDEX] {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| Error::history_store(format!("Failed to create schema: {}", e)))?;
        }
        Ok(Self { pool })
    }

    /// Total number of stored rows
    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM tracking_responses")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::history_store(format!("Failed to count rows: {}", e)))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn get_latest(
        &self,
        tracking_number: &str,
        source_names: &[SourceName],
    ) -> Result<Vec<RawResponse>> {
        let mut latest = Vec::with_capacity(source_names.len());

        for source_name in source_names {
            let row = sqlx::query(SELECT_LATEST)
                .bind(tracking_number)
                .bind(source_name.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::history_store(format!(
                        "Failed to load latest {} response: {}",
                        source_name, e
                    ))
                })?;

            if let Some(row) = row {
                latest.push(from_row(&row)?);
            }
        }

        debug!(tracking_number, rows = latest.len(), "Loaded latest responses");
        Ok(latest)
    }

    async fn insert(
        &self,
        tracking_number: &str,
        source_name: &SourceName,
        response: &RawResponse,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tracking_responses
                (source_name, tracking_number, first_fetched_at, last_fetched_at, response_body, status)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(source_name.as_str())
        .bind(tracking_number)
        .bind(to_nanos(response.first_fetched_at)?)
        .bind(to_nanos(response.last_fetched_at)?)
        .bind(response.body.as_slice())
        .bind(response.status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::history_store(format!("Failed to insert response: {}", e)))?;

        Ok(())
    }

    async fn update(&self, response: &RawResponse) -> Result<()> {
        let id = response
            .id
            .ok_or_else(|| Error::history_store("Cannot update a response without an id"))?;

        let result = sqlx::query(
            r#"
            UPDATE tracking_responses
               SET source_name = ?,
                   tracking_number = ?,
                   first_fetched_at = ?,
                   last_fetched_at = ?,
                   response_body = ?,
                   status = ?
             WHERE id = ?
            "#,
        )
        .bind(response.source_name.as_str())
        .bind(response.tracking_number.as_str())
        .bind(to_nanos(response.first_fetched_at)?)
        .bind(to_nanos(response.last_fetched_at)?)
        .bind(response.body.as_slice())
        .bind(response.status.as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::history_store(format!("Failed to update response {}: {}", id, e)))?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("History row {}", id)));
        }
        Ok(())
    }
}

fn to_nanos(time: DateTime<Utc>) -> Result<i64> {
    time.timestamp_nanos_opt()
        .ok_or_else(|| Error::history_store(format!("Timestamp out of range: {}", time)))
}

fn from_nanos(nanos: i64) -> Result<DateTime<Utc>> {
    let secs = nanos.div_euclid(1_000_000_000);
    let subsec = nanos.rem_euclid(1_000_000_000) as u32;
    DateTime::from_timestamp(secs, subsec)
        .ok_or_else(|| Error::history_store(format!("Stored timestamp out of range: {}", nanos)))
}

fn from_row(row: &SqliteRow) -> Result<RawResponse> {
    let column = |e: sqlx::Error| Error::history_store(format!("Malformed history row: {}", e));

    let status: String = row.try_get("status").map_err(column)?;
    let status = ResponseStatus::parse(&status)
        .ok_or_else(|| Error::history_store(format!("Unknown stored status: {}", status)))?;
    let source_name: String = row.try_get("source_name").map_err(column)?;

    Ok(RawResponse {
        id: Some(row.try_get("id").map_err(column)?),
        tracking_number: row.try_get("tracking_number").map_err(column)?,
        source_name: SourceName::from(source_name),
        first_fetched_at: from_nanos(row.try_get("first_fetched_at").map_err(column)?)?,
        last_fetched_at: from_nanos(row.try_get("last_fetched_at").map_err(column)?)?,
        body: row.try_get("response_body").map_err(column)?,
        status,
    })
}
