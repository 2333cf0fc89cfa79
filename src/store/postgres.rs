use super::traits::{Claim, MessageStore, StoreError, StoreResult, Take};
use crate::lifecycle::Message;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use postgres::error::SqlState;
use postgres::{Client, NoTls, Row};
use std::sync::Arc;
use std::time::Duration;

/// Maximum allowed connect timeout (seconds) to avoid unreasonable waits.
const POSTGRES_CONNECT_TIMEOUT_CAP_SECS: u64 = 300;

/// PostgreSQL-backed message store.
///
/// Takes lock the row with `SELECT ... FOR UPDATE` and delete it inside the
/// same transaction, so concurrent readers queue behind the first one and
/// then find nothing.
pub struct PostgresStore {
    client: Arc<Mutex<Client>>,
}

impl PostgresStore {
    pub fn connect(conn_str: &str, connect_timeout_secs: Option<u64>) -> Result<Self> {
        let client = Self::initialize_client(conn_str.to_string(), connect_timeout_secs)?;
        Ok(Self {
            client: Arc::new(Mutex::new(client)),
        })
    }

    // The synchronous client drives its own runtime internally, which panics
    // when called from inside tokio; connect on a plain thread instead.
    fn initialize_client(conn_str: String, connect_timeout_secs: Option<u64>) -> Result<Client> {
        let init_handle = std::thread::Builder::new()
            .name("postgres-store-init".to_string())
            .spawn(move || -> Result<Client> {
                let mut config: postgres::Config = conn_str
                    .parse()
                    .context("invalid PostgreSQL connection string")?;

                if let Some(timeout_secs) = connect_timeout_secs {
                    let bounded = timeout_secs.min(POSTGRES_CONNECT_TIMEOUT_CAP_SECS);
                    config.connect_timeout(Duration::from_secs(bounded));
                }

                let mut client = config
                    .connect(NoTls)
                    .context("failed to connect to PostgreSQL message store")?;
                Self::init_schema(&mut client)?;
                Ok(client)
            })
            .context("failed to spawn PostgreSQL initializer thread")?;

        init_handle
            .join()
            .map_err(|_| anyhow::anyhow!("PostgreSQL initializer thread panicked"))?
    }

    fn init_schema(client: &mut Client) -> Result<()> {
        client
            .batch_execute(
                "
                CREATE TABLE IF NOT EXISTS messages (
                    handle TEXT PRIMARY KEY,
                    payload TEXT NOT NULL,
                    notify_address TEXT,
                    reference_label TEXT,
                    access_secret TEXT,
                    created_at TIMESTAMPTZ NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at);
                ",
            )
            .context("failed to initialize messages schema")?;
        Ok(())
    }

    fn row_to_message(row: &Row) -> Message {
        Message {
            handle: row.get(0),
            payload: row.get(1),
            notify_address: row.get(2),
            reference_label: row.get(3),
            access_secret: row.get(4),
            created_at: row.get(5),
        }
    }

    async fn with_client<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Client) -> StoreResult<T> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || {
            let mut client = client.lock();
            f(&mut client)
        })
        .await
        .map_err(|e| StoreError::Backend(anyhow::anyhow!("PostgreSQL worker task failed: {e}")))?
    }
}

#[async_trait]
impl MessageStore for PostgresStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn insert(&self, message: &Message) -> StoreResult<()> {
        let message = message.clone();
        self.with_client(move |client| {
            let result = client.execute(
                "INSERT INTO messages
                    (handle, payload, notify_address, reference_label, access_secret, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    &message.handle,
                    &message.payload,
                    &message.notify_address,
                    &message.reference_label,
                    &message.access_secret,
                    &message.created_at,
                ],
            );
            match result {
                Ok(_) => Ok(()),
                Err(e) if e.code() == Some(&SqlState::UNIQUE_VIOLATION) => {
                    Err(StoreError::Conflict)
                }
                Err(e) => Err(anyhow::Error::new(e)
                    .context("failed to insert message")
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

        self.with_client(move |client| {
            let claim = match &supplied {
                Some(secret) => Claim::Reader(secret.as_deref()),
                None => Claim::Expiry,
            };

            let mut tx = client
                .transaction()
                .context("failed to begin take transaction")?;
            let row = tx
                .query_opt(
                    "SELECT handle, payload, notify_address, reference_label, access_secret, created_at
                     FROM messages WHERE handle = $1 FOR UPDATE",
                    &[&handle],
                )
                .context("failed to look up message")?;

            let Some(row) = row else {
                return Ok(Take::Absent);
            };
            let message = Self::row_to_message(&row);

            if !claim.admits(message.access_secret.as_deref()) {
                tx.rollback().context("failed to release row lock")?;
                return Ok(Take::Denied);
            }

            let deleted = tx
                .execute("DELETE FROM messages WHERE handle = $1", &[&handle])
                .context("failed to delete message")?;
            tx.commit().context("failed to commit take transaction")?;

            if deleted == 1 {
                Ok(Take::Taken(message))
            } else {
                Ok(Take::Absent)
            }
        })
        .await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        self.with_client(move |client| {
            let purged = client
                .execute("DELETE FROM messages WHERE created_at < $1", &[&cutoff])
                .context("failed to purge expired messages")?;
            Ok(purged)
        })
        .await
    }

    async fn count(&self) -> StoreResult<usize> {
        self.with_client(|client| {
            let row = client
                .query_one("SELECT COUNT(*) FROM messages", &[])
                .context("failed to count messages")?;
            let count: i64 = row.get(0);
            let count = usize::try_from(count).context("PostgreSQL returned a negative count")?;
            Ok(count)
        })
        .await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.with_client(|client| {
            client
                .simple_query("SELECT 1")
                .context("PostgreSQL health probe failed")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_connection_string_is_error() {
        let outcome = PostgresStore::connect("host=/nope port=notaport", Some(1));
        assert!(outcome.is_err());
    }
}
