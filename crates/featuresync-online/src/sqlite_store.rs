//! SQLite feature store
//!
//! A single-file durable store for one process. Each record is stored as
//! its wire entries (JSON) next to the event time in unix seconds.
//!
//! ## Schema
//!
//! ```text
//! feature_records
//! ├─ feature_group: TEXT   ┐ PRIMARY KEY
//! ├─ customer_id:   TEXT   ┘
//! ├─ event_time:    INTEGER (unix seconds)
//! └─ record:        TEXT    (JSON array of {FeatureName, ValueAsString})
//! ```
//!
//! `put_record` runs inside an `IMMEDIATE` transaction: the write lock is
//! taken before the current row is read, so the compare and the replace are
//! atomic even with other processes on the same file. The compare uses the
//! `event_time` column and the raw payload only, so a row whose JSON no
//! longer decodes can still be replaced by a newer record.

use async_trait::async_trait;
use chrono::DateTime;
use featuresync_core::{
    recover_mutex, CustomerId, Error, FeatureEntry, FeatureRecord, FeatureStore, PutOutcome,
    Result,
};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Feature store backed by a SQLite database file
#[derive(Clone)]
pub struct SqliteFeatureStore {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

impl SqliteFeatureStore {
    /// Open (or create) a store at `db_path`
    ///
    /// Configured with WAL so readers don't block the writer, and a busy
    /// timeout so short lock contention waits instead of failing.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref().to_string_lossy().to_string();

        let conn = Connection::open(&db_path).map_err(|e| {
            Error::StorageError(anyhow::anyhow!("Failed to open feature store DB: {}", e))
        })?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Failed to enable WAL mode: {}", e)))?;
        conn.pragma_update(None, "synchronous", "NORMAL").map_err(|e| {
            Error::StorageError(anyhow::anyhow!("Failed to set synchronous mode: {}", e))
        })?;

        Self::with_connection(conn, db_path)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            Error::StorageError(anyhow::anyhow!("Failed to open in-memory DB: {}", e))
        })?;
        Self::with_connection(conn, ":memory:".to_string())
    }

    fn with_connection(conn: Connection, db_path: String) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| Error::StorageError(anyhow::anyhow!("Failed to set busy timeout: {}", e)))?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS feature_records (
                feature_group TEXT NOT NULL,
                customer_id TEXT NOT NULL,
                event_time INTEGER NOT NULL,
                record TEXT NOT NULL,
                PRIMARY KEY (feature_group, customer_id)
            )
            "#,
            [],
        )
        .map_err(|e| {
            Error::StorageError(anyhow::anyhow!("Failed to create feature_records table: {}", e))
        })?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
        })
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Runs a blocking closure against the connection off the async runtime
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = recover_mutex(&conn, "SqliteFeatureStore")?;
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::internal(format!("SQLite task failed: {}", e)))?
    }
}

fn read_record(
    conn: &Connection,
    feature_group: &str,
    customer_id: &str,
) -> Result<Option<FeatureRecord>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT record FROM feature_records WHERE feature_group = ?1 AND customer_id = ?2",
            [feature_group, customer_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::StorageError(anyhow::anyhow!("Failed to read record: {}", e)))?;

    match raw {
        Some(json) => {
            let entries: Vec<FeatureEntry> = serde_json::from_str(&json).map_err(|_| {
                Error::CorruptRecord {
                    customer_id: customer_id.to_string(),
                    feature: "record".to_string(),
                    value: json.clone(),
                }
            })?;
            FeatureRecord::from_wire(entries).map(Some)
        }
        None => Ok(None),
    }
}

/// Event time (unix seconds) and raw payload of the current row
fn read_current(
    conn: &Connection,
    feature_group: &str,
    customer_id: &str,
) -> Result<Option<(i64, String)>> {
    conn.query_row(
        "SELECT event_time, record FROM feature_records WHERE feature_group = ?1 AND customer_id = ?2",
        [feature_group, customer_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
    .map_err(|e| Error::StorageError(anyhow::anyhow!("Failed to read record: {}", e)))
}

/// Same rule as `resolve_put`, on stored seconds and payload text
fn resolve_stored(current: Option<(i64, &str)>, event_time: i64, payload: &str) -> Result<PutOutcome> {
    let (current_secs, current_payload) = match current {
        None => return Ok(PutOutcome::Written),
        Some(current) => current,
    };

    if event_time > current_secs {
        return Ok(PutOutcome::Written);
    }
    if event_time == current_secs && current_payload == payload {
        return Ok(PutOutcome::Unchanged);
    }

    let current_event_time = DateTime::from_timestamp(current_secs, 0).ok_or_else(|| {
        Error::internal(format!("stored event_time {} is out of range", current_secs))
    })?;
    Ok(PutOutcome::Stale { current_event_time })
}

#[async_trait]
impl FeatureStore for SqliteFeatureStore {
    async fn put_record(&self, feature_group: &str, record: &FeatureRecord) -> Result<PutOutcome> {
        let feature_group = feature_group.to_string();
        let record = record.clone();
        let payload = serde_json::to_string(&record.to_wire())?;

        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(|e| {
                    Error::StorageError(anyhow::anyhow!("Failed to begin transaction: {}", e))
                })?;

            let current = read_current(&tx, &feature_group, record.customer_id.as_str())?;
            let outcome = resolve_stored(
                current.as_ref().map(|(secs, raw)| (*secs, raw.as_str())),
                record.event_time.timestamp(),
                &payload,
            )?;

            if outcome == PutOutcome::Written {
                tx.execute(
                    "INSERT OR REPLACE INTO feature_records \
                     (feature_group, customer_id, event_time, record) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        &feature_group,
                        record.customer_id.as_str(),
                        record.event_time.timestamp(),
                        &payload,
                    ],
                )
                .map_err(|e| Error::StorageError(anyhow::anyhow!("Failed to write record: {}", e)))?;
            }

            tx.commit().map_err(|e| {
                Error::StorageError(anyhow::anyhow!("Failed to commit transaction: {}", e))
            })?;
            Ok(outcome)
        })
        .await
    }

    async fn get_record(
        &self,
        feature_group: &str,
        customer_id: &CustomerId,
    ) -> Result<Option<FeatureRecord>> {
        let feature_group = feature_group.to_string();
        let customer_id = customer_id.clone();
        self.with_conn(move |conn| read_record(conn, &feature_group, customer_id.as_str()))
            .await
    }

    async fn health_check(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|_| ())
                .map_err(|e| Error::StorageError(anyhow::anyhow!("SQLite health check failed: {}", e)))
        })
        .await
    }

    fn store_type(&self) -> &'static str {
        "sqlite"
    }
}
