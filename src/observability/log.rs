use super::traits::{Observer, ObserverEvent};
use std::any::Any;
use tracing::{debug, info};

/// Emits every event as a structured `tracing` record.
pub struct LogObserver;

impl Observer for LogObserver {
    fn record_event(&self, event: &ObserverEvent) {
        match event {
            ObserverEvent::MessageCreated => debug!(event = "message_created"),
            ObserverEvent::MessageDelivered => debug!(event = "message_delivered"),
            ObserverEvent::ConsumeMissed => debug!(event = "consume_missed"),
            ObserverEvent::ConsumeDenied => info!(event = "consume_denied"),
            ObserverEvent::SweepCompleted { purged } => {
                debug!(event = "sweep_completed", purged = *purged);
            }
            ObserverEvent::SweepFailed => info!(event = "sweep_failed"),
            ObserverEvent::MessageExpired => info!(event = "message_expired"),
            ObserverEvent::RequestThrottled => debug!(event = "request_throttled"),
            ObserverEvent::VisitorsEvicted { count, remaining } => {
                debug!(event = "visitors_evicted", count = *count, remaining = *remaining);
            }
            ObserverEvent::NotificationFailed => info!(event = "notification_failed"),
        }
    }

    fn name(&self) -> &str {
        "log"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
