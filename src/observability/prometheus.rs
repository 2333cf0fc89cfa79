use super::traits::{Observer, ObserverEvent};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::any::Any;

/// Keeps counters in a private registry and renders them for `GET /metrics`.
pub struct PrometheusObserver {
    registry: Registry,
    messages_created: IntCounter,
    consumes: IntCounterVec,
    swept: IntCounter,
    sweep_failures: IntCounter,
    expired: IntCounter,
    throttled: IntCounter,
    visitors_evicted: IntCounter,
    visitors: IntGauge,
    notification_failures: IntCounter,
}

impl PrometheusObserver {
    pub fn try_new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let messages_created = IntCounter::new(
            "readonce_messages_created_total",
            "Messages stored by POST /msg or the chat command",
        )?;
        let consumes = IntCounterVec::new(
            Opts::new(
                "readonce_consumes_total",
                "Consume attempts by outcome (delivered, missed, denied)",
            ),
            &["outcome"],
        )?;
        let swept = IntCounter::new(
            "readonce_reaper_purged_total",
            "Expired messages purged by the reaper",
        )?;
        let sweep_failures = IntCounter::new(
            "readonce_reaper_failures_total",
            "Reaper sweeps that failed and were left for the next tick",
        )?;
        let expired = IntCounter::new(
            "readonce_messages_expired_total",
            "Messages expired one at a time with `sweep --handle`",
        )?;
        let throttled = IntCounter::new(
            "readonce_requests_throttled_total",
            "Requests rejected by the rate limiter",
        )?;
        let visitors_evicted = IntCounter::new(
            "readonce_visitors_evicted_total",
            "Idle rate-limiter visitors removed by the sweep",
        )?;
        let visitors = IntGauge::new(
            "readonce_visitors",
            "Rate-limiter visitors tracked after the last sweep",
        )?;
        let notification_failures = IntCounter::new(
            "readonce_notification_failures_total",
            "Read receipts that could not be sent",
        )?;

        registry.register(Box::new(messages_created.clone()))?;
        registry.register(Box::new(consumes.clone()))?;
        registry.register(Box::new(swept.clone()))?;
        registry.register(Box::new(sweep_failures.clone()))?;
        registry.register(Box::new(expired.clone()))?;
        registry.register(Box::new(throttled.clone()))?;
        registry.register(Box::new(visitors_evicted.clone()))?;
        registry.register(Box::new(visitors.clone()))?;
        registry.register(Box::new(notification_failures.clone()))?;

        Ok(Self {
            registry,
            messages_created,
            consumes,
            swept,
            sweep_failures,
            expired,
            throttled,
            visitors_evicted,
            visitors,
            notification_failures,
        })
    }

    /// Text exposition format.
    pub fn encode(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("failed to encode Prometheus metrics: {e}");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Observer for PrometheusObserver {
    fn record_event(&self, event: &ObserverEvent) {
        match event {
            ObserverEvent::MessageCreated => self.messages_created.inc(),
            ObserverEvent::MessageDelivered => {
                self.consumes.with_label_values(&["delivered"]).inc();
            }
            ObserverEvent::ConsumeMissed => self.consumes.with_label_values(&["missed"]).inc(),
            ObserverEvent::ConsumeDenied => self.consumes.with_label_values(&["denied"]).inc(),
            ObserverEvent::SweepCompleted { purged } => self.swept.inc_by(*purged),
            ObserverEvent::SweepFailed => self.sweep_failures.inc(),
            ObserverEvent::MessageExpired => self.expired.inc(),
            ObserverEvent::RequestThrottled => self.throttled.inc(),
            ObserverEvent::VisitorsEvicted { count, remaining } => {
                self.visitors_evicted.inc_by(*count as u64);
                self.visitors
                    .set(i64::try_from(*remaining).unwrap_or(i64::MAX));
            }
            ObserverEvent::NotificationFailed => self.notification_failures.inc(),
        }
    }

    fn name(&self) -> &str {
        "prometheus"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exposition() {
        let observer = PrometheusObserver::try_new().unwrap();
        observer.record_event(&ObserverEvent::MessageCreated);
        observer.record_event(&ObserverEvent::MessageDelivered);
        observer.record_event(&ObserverEvent::ConsumeMissed);
        observer.record_event(&ObserverEvent::ConsumeMissed);
        observer.record_event(&ObserverEvent::SweepCompleted { purged: 4 });

        let text = observer.encode();
        assert!(text.contains("readonce_messages_created_total 1"));
        assert!(text.contains(r#"readonce_consumes_total{outcome="delivered"} 1"#));
        assert!(text.contains(r#"readonce_consumes_total{outcome="missed"} 2"#));
        assert!(text.contains("readonce_reaper_purged_total 4"));
    }

    #[test]
    fn manual_expiry_is_counted_apart_from_sweeps() {
        let observer = PrometheusObserver::try_new().unwrap();
        observer.record_event(&ObserverEvent::MessageExpired);

        let text = observer.encode();
        assert!(text.contains("readonce_messages_expired_total 1"));
        assert!(text.contains("readonce_reaper_purged_total 0"));
    }

    #[test]
    fn visitor_gauge_tracks_latest_sweep() {
        let observer = PrometheusObserver::try_new().unwrap();
        observer.record_event(&ObserverEvent::VisitorsEvicted {
            count: 3,
            remaining: 10,
        });
        observer.record_event(&ObserverEvent::VisitorsEvicted {
            count: 2,
            remaining: 8,
        });

        let text = observer.encode();
        assert!(text.contains("readonce_visitors_evicted_total 5"));
        assert!(text.contains("readonce_visitors 8"));
    }

    #[test]
    fn separate_instances_do_not_share_state() {
        let a = PrometheusObserver::try_new().unwrap();
        let b = PrometheusObserver::try_new().unwrap();
        a.record_event(&ObserverEvent::RequestThrottled);
        assert!(a.encode().contains("readonce_requests_throttled_total 1"));
        assert!(b.encode().contains("readonce_requests_throttled_total 0"));
    }
}
