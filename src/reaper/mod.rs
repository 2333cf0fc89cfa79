//! Periodic purge of messages nobody read within the TTL.

use crate::clock::Clock;
use crate::config::ReaperConfig;
use crate::lifecycle::{LifecycleError, MessageLifecycle};
use crate::observability::ObserverEvent;
use crate::task::PeriodicTask;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

const COMPONENT: &str = "reaper";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub purged: u64,
    pub cutoff: DateTime<Utc>,
}

pub struct Reaper {
    lifecycle: Arc<MessageLifecycle>,
    ttl: Duration,
}

impl Reaper {
    pub fn new(lifecycle: Arc<MessageLifecycle>, ttl: Duration) -> Self {
        Self { lifecycle, ttl }
    }

    pub fn from_config(lifecycle: Arc<MessageLifecycle>, config: &ReaperConfig) -> Self {
        Self::new(lifecycle, config.ttl())
    }

    /// Messages created strictly before this instant are expired.
    pub fn cutoff(&self) -> DateTime<Utc> {
        let now = self.lifecycle.clock().wall();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        now.checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Purge everything past the TTL in one atomic store call.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let cutoff = self.cutoff();
        let observer = self.lifecycle.observer();

        match self.lifecycle.store().delete_older_than(cutoff).await {
            Ok(purged) => {
                observer.record_event(&ObserverEvent::SweepCompleted { purged });
                crate::health::mark_component_ok(COMPONENT);
                if purged > 0 {
                    tracing::info!(purged, cutoff = %cutoff, "reaper purged expired messages");
                } else {
                    tracing::debug!(cutoff = %cutoff, "reaper found nothing to purge");
                }
                Ok(SweepReport { purged, cutoff })
            }
            Err(e) => {
                observer.record_event(&ObserverEvent::SweepFailed);
                crate::health::mark_component_error(COMPONENT, &e);
                Err(anyhow::Error::new(e).context("reaper sweep failed"))
            }
        }
    }

    /// Expire one handle through the same delete path readers use.
    pub async fn expire(&self, handle: &str) -> Result<bool, LifecycleError> {
        let expired = self.lifecycle.expire(handle).await?;
        if expired {
            self.lifecycle
                .observer()
                .record_event(&ObserverEvent::MessageExpired);
            tracing::info!(handle, "message expired on request");
        }
        Ok(expired)
    }

    /// Run [`sweep`](Self::sweep) every `interval`. Failures are logged and
    /// left for the next tick.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> PeriodicTask {
        crate::health::mark_component_ok(COMPONENT);
        PeriodicTask::spawn(COMPONENT, interval, move || {
            let reaper = Arc::clone(&self);
            async move {
                if let Err(e) = reaper.sweep().await {
                    tracing::warn!("{e:#}");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::lifecycle::MessageDraft;
    use crate::notify::NoopNotifier;
    use crate::observability::NoopObserver;
    use crate::store::SqliteStore;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn setup() -> (Arc<ManualClock>, Arc<MessageLifecycle>, Reaper) {
        let clock = Arc::new(ManualClock::new());
        let lifecycle = Arc::new(MessageLifecycle::new(
            Arc::new(SqliteStore::in_memory().unwrap()),
            Arc::new(NoopNotifier),
            clock.clone(),
            Arc::new(NoopObserver),
        ));
        let reaper = Reaper::new(lifecycle.clone(), 30 * DAY);
        (clock, lifecycle, reaper)
    }

    #[tokio::test]
    async fn message_survives_until_ttl() {
        let (clock, lifecycle, reaper) = setup();
        lifecycle.create(MessageDraft::new("m", "x")).await.unwrap();

        clock.advance(30 * DAY - Duration::from_secs(1));
        assert_eq!(reaper.sweep().await.unwrap().purged, 0);
        assert!(lifecycle.consume("m", None).await.is_ok());
    }

    #[tokio::test]
    async fn message_past_ttl_is_purged() {
        let (clock, lifecycle, reaper) = setup();
        lifecycle.create(MessageDraft::new("m", "x")).await.unwrap();

        clock.advance(30 * DAY + Duration::from_secs(1));
        assert_eq!(reaper.sweep().await.unwrap().purged, 1);
        assert!(matches!(
            lifecycle.consume("m", None).await,
            Err(LifecycleError::NotFound)
        ));
    }

    #[tokio::test]
    async fn sweep_only_touches_old_messages() {
        let (clock, lifecycle, reaper) = setup();
        lifecycle.create(MessageDraft::new("old", "x")).await.unwrap();
        clock.advance(20 * DAY);
        lifecycle.create(MessageDraft::new("new", "y")).await.unwrap();
        clock.advance(11 * DAY);

        assert_eq!(reaper.sweep().await.unwrap().purged, 1);
        assert_eq!(lifecycle.consume("new", None).await.unwrap().payload, "y");
    }

    #[tokio::test]
    async fn expire_single_handle() {
        let (_clock, lifecycle, reaper) = setup();
        lifecycle.create(MessageDraft::new("one", "x")).await.unwrap();
        assert!(reaper.expire("one").await.unwrap());
        assert!(!reaper.expire("one").await.unwrap());
    }

    #[derive(Default)]
    struct RecordingObserver(parking_lot::Mutex<Vec<ObserverEvent>>);

    impl crate::observability::Observer for RecordingObserver {
        fn record_event(&self, event: &ObserverEvent) {
            self.0.lock().push(event.clone());
        }

        fn name(&self) -> &str {
            "recording"
        }

        fn as_any(&self) -> &dyn std::any::Any {
            self
        }
    }

    #[tokio::test]
    async fn expire_is_not_reported_as_a_sweep() {
        let observer = Arc::new(RecordingObserver::default());
        let lifecycle = Arc::new(MessageLifecycle::new(
            Arc::new(SqliteStore::in_memory().unwrap()),
            Arc::new(NoopNotifier),
            Arc::new(ManualClock::new()),
            observer.clone(),
        ));
        let reaper = Reaper::new(lifecycle.clone(), 30 * DAY);
        lifecycle.create(MessageDraft::new("one", "x")).await.unwrap();
        assert!(reaper.expire("one").await.unwrap());

        let events = observer.0.lock().clone();
        assert!(events.contains(&ObserverEvent::MessageExpired));
        assert!(!events
            .iter()
            .any(|e| matches!(e, ObserverEvent::SweepCompleted { .. })));
    }

    #[tokio::test]
    async fn sweep_marks_health() {
        let (_clock, _lifecycle, reaper) = setup();
        reaper.sweep().await.unwrap();
        assert_eq!(
            crate::health::component(COMPONENT).unwrap().status,
            "ok"
        );
    }

    #[tokio::test]
    async fn spawned_reaper_stops_cleanly() {
        let (_clock, _lifecycle, reaper) = setup();
        let task = Arc::new(reaper).spawn(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(task.join(Duration::from_secs(1)).await);
    }
}
