use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::gateway::AppState;
use crate::lifecycle::MessageLifecycle;
use crate::observability::{Observer, ObserverEvent};
use crate::ratelimit::RateLimiter;
use crate::reaper::Reaper;
use crate::task::PeriodicTask;
use anyhow::Result;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

const STATUS_FLUSH_SECONDS: u64 = 5;

/// Everything the gateway and the background tasks share.
pub struct Services {
    pub lifecycle: Arc<MessageLifecycle>,
    pub rate_limiter: Arc<RateLimiter>,
    pub observer: Arc<dyn Observer>,
    pub reaper: Arc<Reaper>,
}

impl Services {
    pub fn build(config: &Config) -> Result<Self> {
        Self::build_with_clock(config, Arc::new(SystemClock))
    }

    pub fn build_with_clock(config: &Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let store = crate::store::create_store(&config.storage, &config.config_dir())?;
        let notifier = crate::notify::create_notifier(&config.notify)?;
        let observer = crate::observability::create_observer(&config.observability);

        let lifecycle = Arc::new(MessageLifecycle::new(
            store,
            notifier,
            Arc::clone(&clock),
            Arc::clone(&observer),
        ));
        let rate_limiter = Arc::new(RateLimiter::from_config(&config.rate_limit, clock));
        let reaper = Arc::new(Reaper::from_config(Arc::clone(&lifecycle), &config.reaper));

        Ok(Self {
            lifecycle,
            rate_limiter,
            observer,
            reaper,
        })
    }

    pub fn app_state(&self, config: &Config) -> AppState {
        AppState {
            lifecycle: Arc::clone(&self.lifecycle),
            rate_limiter: Arc::clone(&self.rate_limiter),
            observer: Arc::clone(&self.observer),
            trust_forwarded_headers: config.gateway.trust_forwarded_headers,
            public_url: Arc::from(public_url(config).as_str()),
            slack_enabled: config.slack.enabled,
        }
    }
}

fn public_url(config: &Config) -> String {
    let url = config.gateway.public_url.trim();
    if url.is_empty() {
        format!("http://{}:{}", config.gateway.host, config.gateway.port)
    } else {
        url.trim_end_matches('/').to_string()
    }
}

/// Run until SIGINT or SIGTERM.
pub async fn run(config: Config) -> Result<()> {
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_token.cancel();
    });
    run_until(config, shutdown).await
}

/// Run until `shutdown` is cancelled.
pub async fn run_until(config: Config, shutdown: CancellationToken) -> Result<()> {
    crate::health::mark_component_ok("daemon");
    let services = Services::build(&config)?;
    let grace = config.gateway.shutdown_grace();

    let mut tasks = vec![spawn_state_writer(&config)];

    if config.reaper.enabled {
        tracing::info!(
            interval_secs = config.reaper.interval_secs,
            ttl_days = config.reaper.ttl_days,
            "reaper enabled"
        );
        tasks.push(Arc::clone(&services.reaper).spawn(config.reaper.interval()));
    } else {
        tracing::info!("Reaper disabled; unread messages are kept indefinitely");
    }

    if services.rate_limiter.is_enabled() {
        tasks.push(spawn_visitor_gc(
            Arc::clone(&services.rate_limiter),
            Arc::clone(&services.observer),
            config.rate_limit.sweep_interval(),
        ));
    } else {
        tracing::info!("Rate limiting disabled (capacity = 0)");
    }

    let state = services.app_state(&config);
    let served = crate::gateway::run_gateway(&config.gateway, state, shutdown.clone()).await;
    // Background work must stop even when the gateway failed to bind.
    shutdown.cancel();

    for name in crate::task::join_all(tasks, grace).await {
        crate::health::mark_component_error(name, "aborted during shutdown");
    }
    crate::health::mark_component_error("daemon", "shutdown requested");
    tracing::info!("readonce stopped");

    served
}

fn spawn_visitor_gc(
    limiter: Arc<RateLimiter>,
    observer: Arc<dyn Observer>,
    interval: Duration,
) -> PeriodicTask {
    crate::health::mark_component_ok("visitor_gc");
    PeriodicTask::spawn("visitor_gc", interval, move || {
        let limiter = Arc::clone(&limiter);
        let observer = Arc::clone(&observer);
        async move {
            let count = limiter.sweep_idle();
            let remaining = limiter.len();
            observer.record_event(&ObserverEvent::VisitorsEvicted { count, remaining });
            if count > 0 {
                tracing::debug!(count, remaining, "evicted idle visitors");
            }
            crate::health::mark_component_ok("visitor_gc");
        }
    })
}

pub fn state_file_path(config: &Config) -> PathBuf {
    config.config_dir().join("daemon_state.json")
}

fn spawn_state_writer(config: &Config) -> PeriodicTask {
    let path = state_file_path(config);
    PeriodicTask::spawn(
        "state_writer",
        Duration::from_secs(STATUS_FLUSH_SECONDS),
        move || {
            let path = path.clone();
            async move {
                if let Some(parent) = path.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                let mut json = crate::health::snapshot_json();
                if let Some(obj) = json.as_object_mut() {
                    obj.insert(
                        "written_at".into(),
                        serde_json::json!(Utc::now().to_rfc3339()),
                    );
                }
                let data = serde_json::to_vec_pretty(&json).unwrap_or_else(|_| b"{}".to_vec());
                if let Err(e) = tokio::fs::write(&path, data).await {
                    tracing::debug!("failed to write daemon state to {}: {e}", path.display());
                }
            }
        },
    )
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::path::Path;

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.config_path = dir.join("config.toml");
        config.storage.sqlite_path = Some(":memory:".into());
        config.observability.backend = "none".into();
        config.gateway.port = 0;
        config
    }

    #[test]
    fn state_file_path_uses_config_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        assert_eq!(
            state_file_path(&config),
            tmp.path().join("daemon_state.json")
        );
    }

    #[test]
    fn public_url_falls_back_to_bind_address() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = test_config(tmp.path());
        config.gateway.port = 4000;
        config.gateway.public_url = String::new();
        assert_eq!(public_url(&config), "http://127.0.0.1:4000");

        config.gateway.public_url = "https://readonce.example/".into();
        assert_eq!(public_url(&config), "https://readonce.example");
    }

    #[tokio::test]
    async fn services_share_one_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let services = Services::build(&config).unwrap();
        let state = services.app_state(&config);
        assert!(Arc::ptr_eq(&state.lifecycle, &services.lifecycle));
        assert!(!state.slack_enabled);
    }

    #[tokio::test]
    async fn visitor_gc_evicts_idle_visitors() {
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(RateLimiter::new(
            3,
            1.0,
            Duration::from_secs(180),
            100,
            clock.clone(),
        ));
        assert!(limiter.admit("10.0.0.1").is_allowed());
        clock.advance(Duration::from_secs(181));

        let task = spawn_visitor_gc(
            Arc::clone(&limiter),
            Arc::new(crate::observability::NoopObserver),
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(task.join(Duration::from_secs(1)).await);
        assert!(limiter.is_empty());
    }

    #[tokio::test]
    async fn run_until_returns_after_cancel() {
        let tmp = tempfile::tempdir().unwrap();
        let config = test_config(tmp.path());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_until(config, shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .expect("daemon should stop")
            .unwrap();
        assert!(result.is_ok());
    }
}
