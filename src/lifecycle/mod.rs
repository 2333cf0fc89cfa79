//! Create, one-time consume and expire transitions for stored messages.
//!
//! Every terminal transition goes through [`MessageStore::take_by_handle`], so
//! a handle is either delivered to exactly one reader or expired by the
//! reaper, never both. Nothing about message state is cached in process.

pub mod message;

pub use message::{is_valid_handle, Message, MessageDraft, MAX_HANDLE_LEN};

use crate::clock::Clock;
use crate::notify::{Notifier, ReadReceipt};
use crate::observability::{Observer, ObserverEvent};
use crate::store::{Claim, MessageStore, StoreError, Take};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("a message with this handle already exists")]
    Conflict,

    #[error("message not found")]
    NotFound,

    #[error("access secret does not match")]
    Unauthorized,

    #[error("message store unavailable")]
    BackendUnavailable(#[source] StoreError),
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => Self::Conflict,
            other => Self::BackendUnavailable(other),
        }
    }
}

/// What a successful consume hands back to the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub handle: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

pub struct MessageLifecycle {
    store: Arc<dyn MessageStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn Observer>,
}

impl MessageLifecycle {
    pub fn new(
        store: Arc<dyn MessageStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            store,
            notifier,
            clock,
            observer,
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn observer(&self) -> &Arc<dyn Observer> {
        &self.observer
    }

    /// Persist a new message. Duplicate handles fail with `Conflict`.
    pub async fn create(&self, draft: MessageDraft) -> Result<(), LifecycleError> {
        if !is_valid_handle(&draft.handle) {
            return Err(LifecycleError::Validation(format!(
                "handle must be 1-{MAX_HANDLE_LEN} characters of [A-Za-z0-9_-]"
            )));
        }
        if draft.payload.is_empty() {
            return Err(LifecycleError::Validation("payload must not be empty".into()));
        }

        let message = draft.stamp(self.clock.wall());
        match self.store.insert(&message).await {
            Ok(()) => {
                self.observer.record_event(&ObserverEvent::MessageCreated);
                tracing::debug!(handle = %message.handle, "message stored");
                Ok(())
            }
            Err(StoreError::Conflict) => {
                tracing::debug!(handle = %message.handle, "duplicate handle rejected");
                Err(LifecycleError::Conflict)
            }
            Err(e) => {
                tracing::error!("failed to store message: {e}");
                Err(LifecycleError::BackendUnavailable(e))
            }
        }
    }

    /// Take the message under `handle`, destroying it.
    ///
    /// `NotFound` covers never-created, already-delivered and expired alike.
    /// A wrong secret yields `Unauthorized` and leaves the record in place.
    pub async fn consume(
        &self,
        handle: &str,
        access_secret: Option<&str>,
    ) -> Result<Delivery, LifecycleError> {
        if !is_valid_handle(handle) {
            return Err(LifecycleError::Validation("malformed handle".into()));
        }

        let outcome = self
            .store
            .take_by_handle(handle, Claim::Reader(access_secret))
            .await
            .map_err(|e| {
                tracing::error!("failed to consume message: {e}");
                LifecycleError::BackendUnavailable(e)
            })?;

        match outcome {
            Take::Taken(message) => {
                self.observer.record_event(&ObserverEvent::MessageDelivered);
                self.dispatch_receipt(&message);
                Ok(Delivery {
                    handle: message.handle,
                    payload: message.payload,
                    created_at: message.created_at,
                })
            }
            Take::Absent => {
                self.observer.record_event(&ObserverEvent::ConsumeMissed);
                Err(LifecycleError::NotFound)
            }
            Take::Denied => {
                self.observer.record_event(&ObserverEvent::ConsumeDenied);
                Err(LifecycleError::Unauthorized)
            }
        }
    }

    /// Destroy the message under `handle` without delivering it.
    /// Returns `false` if it was already gone.
    pub async fn expire(&self, handle: &str) -> Result<bool, LifecycleError> {
        if !is_valid_handle(handle) {
            return Err(LifecycleError::Validation("malformed handle".into()));
        }
        match self.store.take_by_handle(handle, Claim::Expiry).await? {
            Take::Taken(_) => Ok(true),
            Take::Absent => Ok(false),
            // Expiry claims are never refused.
            Take::Denied => Ok(false),
        }
    }

    pub async fn health_check(&self) -> Result<(), LifecycleError> {
        self.store
            .health_check()
            .await
            .map_err(LifecycleError::BackendUnavailable)
    }

    fn dispatch_receipt(&self, message: &Message) {
        let Some(address) = message.notify_address.clone() else {
            return;
        };
        let receipt = ReadReceipt {
            address,
            reference_label: message.reference_label.clone(),
        };
        let notifier = Arc::clone(&self.notifier);
        let observer = Arc::clone(&self.observer);

        tokio::spawn(async move {
            if let Err(e) = notifier.send(&receipt).await {
                observer.record_event(&ObserverEvent::NotificationFailed);
                tracing::warn!(notifier = notifier.name(), "read receipt failed: {e:#}");
            }
        });
    }
}
