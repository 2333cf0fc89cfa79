use crate::lifecycle::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Errors surfaced by a [`MessageStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record with this handle already exists.
    #[error("message handle already exists")]
    Conflict,

    /// The backend could not complete the operation.
    #[error("storage backend failure: {0:#}")]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Who is asking the fetch-and-delete primitive to remove a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim<'a> {
    /// A reader presenting an optional access secret. The record is only
    /// removed if it carries no secret or the secret matches.
    Reader(Option<&'a str>),
    /// The reaper. Removes the record unconditionally.
    Expiry,
}

impl Claim<'_> {
    pub fn admits(&self, stored_secret: Option<&str>) -> bool {
        match self {
            Claim::Expiry => true,
            Claim::Reader(supplied) => {
                crate::security::access_secret_matches(stored_secret, *supplied)
            }
        }
    }
}

/// Outcome of a single fetch-and-delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Take {
    /// The record was removed; the caller is its only recipient.
    Taken(Message),
    /// No record exists under the handle.
    Absent,
    /// A record exists but the claim was refused; nothing was deleted.
    Denied,
}

/// Durable message storage.
///
/// Implementations must make [`take_by_handle`](MessageStore::take_by_handle)
/// and [`delete_older_than`](MessageStore::delete_older_than) indivisible with
/// respect to each other and to concurrent callers: for any handle, at most
/// one call ever observes the record.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Backend name for logs and diagnostics.
    fn name(&self) -> &str;

    /// Persist a new record. Fails with [`StoreError::Conflict`] on a
    /// duplicate handle and never overwrites.
    async fn insert(&self, message: &Message) -> StoreResult<()>;

    /// Atomically locate, check and delete the record under `handle`.
    async fn take_by_handle(&self, handle: &str, claim: Claim<'_>) -> StoreResult<Take>;

    /// Atomically delete every record created strictly before `cutoff`,
    /// returning how many were removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    /// Number of live records.
    async fn count(&self) -> StoreResult<usize>;

    /// Liveness probe.
    async fn health_check(&self) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_claim_ignores_secrets() {
        assert!(Claim::Expiry.admits(None));
        assert!(Claim::Expiry.admits(Some("locked")));
    }

    #[test]
    fn reader_claim_checks_secret() {
        assert!(Claim::Reader(None).admits(None));
        assert!(Claim::Reader(Some("s")).admits(Some("s")));
        assert!(!Claim::Reader(None).admits(Some("s")));
        assert!(!Claim::Reader(Some("t")).admits(Some("s")));
    }

    #[test]
    fn backend_error_keeps_context() {
        let err = StoreError::from(anyhow::anyhow!("disk full").context("insert failed"));
        assert!(err.to_string().contains("insert failed"));
        assert!(err.to_string().contains("disk full"));
    }
}
