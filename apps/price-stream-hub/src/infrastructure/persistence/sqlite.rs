//! SQLite aggregate store.
//!
//! Buckets live in `hourly_average`, unique on `(pair, hour_start)`. Each
//! merge is one `IMMEDIATE` transaction on a single connection: the write
//! lock is taken before the read, so no other writer can slip between the
//! select and the upsert. Blocking calls run on the tokio blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::application::ports::{AggregateStore, StoreError};
use crate::domain::aggregate::{BucketKey, HourlyBucket};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS hourly_average (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    pair         TEXT    NOT NULL,
    hour_start   TEXT    NOT NULL,
    avg_price    REAL    NOT NULL,
    sample_count INTEGER NOT NULL,
    UNIQUE (pair, hour_start)
);
";

const SELECT_ONE: &str = "SELECT pair, hour_start, avg_price, sample_count
    FROM hourly_average WHERE pair = ?1 AND hour_start = ?2";

const SELECT_PAIR: &str = "SELECT pair, hour_start, avg_price, sample_count
    FROM hourly_average WHERE pair = ?1 ORDER BY hour_start DESC";

const UPSERT: &str = "INSERT INTO hourly_average (pair, hour_start, avg_price, sample_count)
    VALUES (?1, ?2, ?3, ?4)
    ON CONFLICT (pair, hour_start)
    DO UPDATE SET avg_price = excluded.avg_price, sample_count = excluded.sample_count";

type RawRow = (String, String, f64, i64);

/// Bucket store backed by a SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteAggregateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAggregateStore {
    /// Open (or create) the database at `path` and ensure the schema.
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the file cannot be opened or the
    /// schema cannot be applied.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Database(format!("cannot create {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path).map_err(db_error)?;
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .map_err(db_error)?;
        tracing::debug!(journal_mode = %mode, "SQLite journal mode");
        tracing::info!(path = %path.display(), "Opened SQLite aggregate store");
        Self::with_connection(conn)
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory().map_err(db_error)?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(db_error)?;
        conn.execute_batch(SCHEMA).map_err(db_error)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
    }
}

#[async_trait]
impl AggregateStore for SqliteAggregateStore {
    async fn merge(
        &self,
        key: &BucketKey,
        price: f64,
        count: u64,
    ) -> Result<HourlyBucket, StoreError> {
        if count == 0 {
            return Err(StoreError::EmptyContribution {
                pair: key.pair.clone(),
            });
        }
        let key = key.clone();
        self.blocking(move |conn| {
            let hour = key.hour_start_iso();
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db_error)?;

            let existing = tx
                .query_row(SELECT_ONE, params![key.pair, hour], read_row)
                .optional()
                .map_err(db_error)?
                .map(into_bucket)
                .transpose()?;

            let merged = HourlyBucket::merged(existing, &key, price, count);
            let stored_count = i64::try_from(merged.sample_count)
                .map_err(|_| StoreError::Database("sample count overflow".to_string()))?;

            tx.execute(
                UPSERT,
                params![merged.pair, hour, merged.avg_price, stored_count],
            )
            .map_err(db_error)?;
            tx.commit().map_err(db_error)?;

            Ok(merged)
        })
        .await
    }

    async fn get(&self, key: &BucketKey) -> Result<Option<HourlyBucket>, StoreError> {
        let key = key.clone();
        self.blocking(move |conn| {
            conn.query_row(SELECT_ONE, params![key.pair, key.hour_start_iso()], read_row)
                .optional()
                .map_err(db_error)?
                .map(into_bucket)
                .transpose()
        })
        .await
    }

    async fn buckets_for_pair(&self, pair: &str) -> Result<Vec<HourlyBucket>, StoreError> {
        let pair = pair.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare_cached(SELECT_PAIR).map_err(db_error)?;
            let rows = stmt
                .query_map(params![pair], read_row)
                .map_err(db_error)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_error)?;
            rows.into_iter().map(into_bucket).collect()
        })
        .await
    }
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_bucket((pair, hour, avg_price, count): RawRow) -> Result<HourlyBucket, StoreError> {
    let hour_start = DateTime::parse_from_rfc3339(&hour)
        .map_err(|e| StoreError::CorruptRow(format!("hour_start {hour:?}: {e}")))?
        .with_timezone(&Utc);
    let sample_count = u64::try_from(count)
        .map_err(|_| StoreError::CorruptRow(format!("negative sample_count {count}")))?;

    Ok(HourlyBucket {
        pair,
        hour_start,
        avg_price,
        sample_count,
    })
}

#[allow(clippy::needless_pass_by_value)]
fn db_error(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}
