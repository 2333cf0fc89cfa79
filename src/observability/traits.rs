use std::any::Any;

/// Things worth counting. Never carries payloads or secrets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverEvent {
    MessageCreated,
    MessageDelivered,
    /// A consume found no record (never created, delivered or expired).
    ConsumeMissed,
    /// A consume presented the wrong access secret.
    ConsumeDenied,
    SweepCompleted {
        purged: u64,
    },
    SweepFailed,
    /// One handle expired on request, outside the periodic sweep.
    MessageExpired,
    RequestThrottled,
    VisitorsEvicted {
        count: usize,
        remaining: usize,
    },
    NotificationFailed,
}

pub trait Observer: Send + Sync + 'static {
    fn record_event(&self, event: &ObserverEvent);

    fn name(&self) -> &str;

    /// Lets the metrics endpoint reach the concrete backend.
    fn as_any(&self) -> &dyn Any;
}
