use super::traits::{Claim, MessageStore, StoreError, StoreResult, Take};
use crate::lifecycle::Message;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// How long a writer waits on a locked database file before failing.
const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_COLUMNS: &str =
    "handle, payload, notify_address, reference_label, access_secret, created_at";

/// SQLite-backed message store.
///
/// A single connection is shared behind a mutex and every statement runs on
/// the blocking pool. Takes run inside an IMMEDIATE transaction so the
/// select-check-delete sequence is indivisible even when another process
/// has the same database file open.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    location: String,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL journal mode")?;
        Self::from_connection(conn, path.display().to_string())
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::from_connection(conn, ":memory:".to_string())
    }

    fn from_connection(conn: Connection, location: String) -> anyhow::Result<Self> {
        conn.busy_timeout(SQLITE_BUSY_TIMEOUT)
            .context("Failed to set SQLite busy timeout")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    fn init_schema(conn: &Connection) -> anyhow::Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                handle TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                notify_address TEXT,
                reference_label TEXT,
                access_secret TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at);
            ",
        )
        .context("Failed to initialize messages schema")?;
        Ok(())
    }

    fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
        let created_ms: i64 = row.get(5)?;
        let created_at = DateTime::<Utc>::from_timestamp_millis(created_ms).ok_or_else(|| {
            rusqlite::Error::IntegralValueOutOfRange(5, created_ms)
        })?;

        Ok(Message {
            handle: row.get(0)?,
            payload: row.get(1)?,
            notify_address: row.get(2)?,
            reference_label: row.get(3)?,
            access_secret: row.get(4)?,
            created_at,
        })
    }

    /// Run `f` against the shared connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Backend(anyhow::anyhow!("SQLite worker task failed: {e}")))?
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl MessageStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert(&self, message: &Message) -> StoreResult<()> {
        let message = message.clone();
        self.with_conn(move |conn| {
            let result = conn.execute(
                "INSERT INTO messages
                    (handle, payload, notify_address, reference_label, access_secret, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    message.handle,
                    message.payload,
                    message.notify_address,
                    message.reference_label,
                    message.access_secret,
                    message.created_at.timestamp_millis(),
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(StoreError::Conflict),
                Err(e) => Err(anyhow::Error::new(e)
                    .context("Failed to insert message")
                    .into()),
            }
        })
        .await
    }

    async fn take_by_handle(&self, handle: &str, claim: Claim<'_>) -> StoreResult<Take> {
        let handle = handle.to_string();
        let supplied = match claim {
            Claim::Reader(secret) => Some(secret.map(str::to_string)),
            Claim::Expiry => None,
        };

        self.with_conn(move |conn| {
            let claim = match &supplied {
                Some(secret) => Claim::Reader(secret.as_deref()),
                None => Claim::Expiry,
            };

            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .context("Failed to begin take transaction")?;

            let found = tx
                .query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM messages WHERE handle = ?1"),
                    params![handle],
                    SqliteStore::row_to_message,
                )
                .optional()
                .context("Failed to look up message")?;

            let Some(message) = found else {
                return Ok(Take::Absent);
            };

            if !claim.admits(message.access_secret.as_deref()) {
                // Dropping the transaction rolls back; the record stays.
                return Ok(Take::Denied);
            }

            let deleted = tx
                .execute("DELETE FROM messages WHERE handle = ?1", params![handle])
                .context("Failed to delete message")?;
            tx.commit().context("Failed to commit take transaction")?;

            if deleted == 1 {
                Ok(Take::Taken(message))
            } else {
                Ok(Take::Absent)
            }
        })
        .await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let cutoff_ms = cutoff.timestamp_millis();
        self.with_conn(move |conn| {
            let purged = conn
                .execute(
                    "DELETE FROM messages WHERE created_at < ?1",
                    params![cutoff_ms],
                )
                .context("Failed to purge expired messages")?;
            Ok(purged as u64)
        })
        .await
    }

    async fn count(&self) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
                .context("Failed to count messages")?;
            let count = usize::try_from(count).context("SQLite returned a negative count")?;
            Ok(count)
        })
        .await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .context("SQLite health probe failed")?;
            Ok(())
        })
        .await
    }
}
