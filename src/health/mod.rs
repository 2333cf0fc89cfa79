//! Process-wide component health registry.
//!
//! Background loops and the gateway report here; `GET /health` and the
//! daemon state file read the snapshot.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Instant;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ComponentHealth {
    pub status: String,
    pub updated_at: String,
    pub last_ok: Option<String>,
    pub last_error: Option<String>,
}

struct HealthRegistry {
    started_at: Instant,
    components: Mutex<BTreeMap<String, ComponentHealth>>,
}

static REGISTRY: OnceLock<HealthRegistry> = OnceLock::new();

fn registry() -> &'static HealthRegistry {
    REGISTRY.get_or_init(|| HealthRegistry {
        started_at: Instant::now(),
        components: Mutex::new(BTreeMap::new()),
    })
}

fn upsert_component<F>(component: &str, update: F)
where
    F: FnOnce(&mut ComponentHealth),
{
    let now = Utc::now().to_rfc3339();
    let mut map = registry().components.lock();
    let entry = map
        .entry(component.to_string())
        .or_insert_with(|| ComponentHealth {
            status: "starting".into(),
            updated_at: now.clone(),
            last_ok: None,
            last_error: None,
        });
    update(entry);
    entry.updated_at = now;
}

pub fn mark_component_ok(component: &str) {
    upsert_component(component, |entry| {
        entry.status = "ok".into();
        entry.last_ok = Some(Utc::now().to_rfc3339());
    });
}

pub fn mark_component_error(component: &str, error: impl ToString) {
    let message = error.to_string();
    upsert_component(component, move |entry| {
        entry.status = "error".into();
        entry.last_error = Some(message);
    });
}

#[cfg(test)]
pub(crate) fn component(component: &str) -> Option<ComponentHealth> {
    registry().components.lock().get(component).cloned()
}

pub fn snapshot_json() -> serde_json::Value {
    let registry = registry();
    let components = registry.components.lock().clone();
    let healthy = components.values().all(|c| c.status != "error");

    serde_json::json!({
        "status": if healthy { "ok" } else { "degraded" },
        "pid": std::process::id(),
        "uptime_seconds": registry.started_at.elapsed().as_secs(),
        "updated_at": Utc::now().to_rfc3339(),
        "components": components,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // The registry is global; each test uses its own component names.

    #[test]
    fn ok_then_error_keeps_both_timestamps() {
        mark_component_ok("health-test-a");
        mark_component_error("health-test-a", "boom");

        let entry = component("health-test-a").unwrap();
        assert_eq!(entry.status, "error");
        assert!(entry.last_ok.is_some());
        assert_eq!(entry.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn snapshot_lists_components() {
        mark_component_ok("health-test-c");
        let json = snapshot_json();
        assert_eq!(json["components"]["health-test-c"]["status"], "ok");
        assert!(json["uptime_seconds"].is_u64());
    }
}
