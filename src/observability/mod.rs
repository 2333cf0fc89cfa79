pub mod log;
pub mod noop;
#[cfg(feature = "observability-prometheus")]
pub mod prometheus;
pub mod traits;

pub use self::log::LogObserver;
pub use self::noop::NoopObserver;
#[cfg(feature = "observability-prometheus")]
pub use self::prometheus::PrometheusObserver;
pub use traits::{Observer, ObserverEvent};

use crate::config::ObservabilityConfig;
use std::sync::Arc;

pub const OBSERVABILITY_BACKENDS: [&str; 3] = ["prometheus", "log", "none"];

/// Factory: create the right observer from config.
pub fn create_observer(config: &ObservabilityConfig) -> Arc<dyn Observer> {
    match config.backend.trim().to_ascii_lowercase().as_str() {
        "log" => Arc::new(LogObserver),
        "prometheus" => create_prometheus_observer(),
        "none" | "noop" | "" => Arc::new(NoopObserver),
        other => {
            tracing::warn!("Unknown observability backend '{other}', falling back to noop");
            Arc::new(NoopObserver)
        }
    }
}

#[cfg(feature = "observability-prometheus")]
fn create_prometheus_observer() -> Arc<dyn Observer> {
    match PrometheusObserver::try_new() {
        Ok(observer) => Arc::new(observer),
        Err(e) => {
            tracing::warn!("Prometheus observer unavailable ({e}); falling back to log");
            Arc::new(LogObserver)
        }
    }
}

#[cfg(not(feature = "observability-prometheus"))]
fn create_prometheus_observer() -> Arc<dyn Observer> {
    tracing::warn!(
        "Prometheus backend requested but this build was compiled without `observability-prometheus`; falling back to log"
    );
    Arc::new(LogObserver)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(backend: &str) -> ObservabilityConfig {
        ObservabilityConfig {
            backend: backend.into(),
        }
    }

    #[test]
    fn factory_selects_backend() {
        assert_eq!(create_observer(&config("log")).name(), "log");
        assert_eq!(create_observer(&config("none")).name(), "noop");
        assert_eq!(create_observer(&config("")).name(), "noop");
    }

    #[test]
    fn factory_unknown_backend_is_noop() {
        assert_eq!(create_observer(&config("datadog")).name(), "noop");
    }

    #[cfg(feature = "observability-prometheus")]
    #[test]
    fn factory_prometheus_is_downcastable() {
        let observer = create_observer(&config("prometheus"));
        assert!(observer
            .as_any()
            .downcast_ref::<PrometheusObserver>()
            .is_some());
    }
}
