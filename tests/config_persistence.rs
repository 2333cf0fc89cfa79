#![allow(clippy::field_reassign_with_default)]
//! Config load/save round-trip tests.
//!
//! Exercises Config::load_or_init_in() against isolated temp directories,
//! env-style overrides through an injected lookup, and TOML round-trips of
//! every section.

use readonce::config::{Config, GatewayConfig, RateLimitConfig, ReaperConfig, StorageConfig};
use std::collections::HashMap;
use std::fs;

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn config_default_uses_sqlite() {
    let config = Config::default();
    assert_eq!(
        config.storage.backend, "sqlite",
        "default storage backend should be sqlite"
    );
    assert!(
        config.storage.sqlite_path.is_none(),
        "sqlite path should default to the config directory"
    );
}

#[test]
fn reaper_default_is_thirty_days() {
    let reaper = ReaperConfig::default();
    assert!(reaper.enabled, "reaper should run by default");
    assert_eq!(reaper.ttl_days, 30, "default TTL should be 30 days");
    assert_eq!(reaper.ttl().as_secs(), 30 * 24 * 60 * 60);
}

#[test]
fn rate_limit_default_is_small_burst() {
    let rate = RateLimitConfig::default();
    assert_eq!(rate.capacity, 3, "default burst should be 3 requests");
    assert!(rate.refill_per_second > 0.0);
    assert_eq!(rate.idle_secs, 180, "idle visitors forgotten after 3 minutes");
}

#[test]
fn gateway_default_is_loopback() {
    let gateway = GatewayConfig::default();
    assert_eq!(gateway.host, "127.0.0.1");
    assert!(!gateway.trust_forwarded_headers);
    assert_eq!(gateway.allowed_origins, vec!["*".to_string()]);
}

#[test]
fn default_config_validates() {
    Config::default()
        .validate()
        .expect("default config must be valid");
}

// ─────────────────────────────────────────────────────────────────────────────
// TOML round-trips
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn config_toml_roundtrip_preserves_sections() {
    let mut config = Config::default();
    config.gateway.port = 8088;
    config.storage = StorageConfig {
        backend: "postgres".into(),
        ..StorageConfig::default()
    };
    config.storage.postgres.host = Some("db.internal".into());
    config.reaper.ttl_days = 7;
    config.rate_limit.capacity = 10;
    config.slack.enabled = true;

    let toml_str = toml::to_string_pretty(&config).expect("config should serialize");
    let parsed: Config = toml::from_str(&toml_str).expect("config should deserialize");

    assert_eq!(parsed.gateway.port, 8088);
    assert_eq!(parsed.storage.backend, "postgres");
    assert_eq!(parsed.storage.postgres.host.as_deref(), Some("db.internal"));
    assert_eq!(parsed.reaper.ttl_days, 7);
    assert_eq!(parsed.rate_limit.capacity, 10);
    assert!(parsed.slack.enabled);
}

#[test]
fn partial_toml_fills_defaults() {
    let parsed: Config = toml::from_str(
        r#"
[reaper]
ttl_days = 2
"#,
    )
    .expect("partial config should parse");

    assert_eq!(parsed.reaper.ttl_days, 2);
    assert!(parsed.reaper.enabled, "missing fields take defaults");
    assert_eq!(parsed.storage.backend, "sqlite");
    assert_eq!(parsed.observability.backend, "prometheus");
}

#[test]
fn unsupported_backend_fails_validation() {
    let mut config = Config::default();
    config.storage.backend = "mongodb".into();
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.observability.backend = "statsd".into();
    assert!(config.validate().is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Load / init on disk
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn load_or_init_writes_default_file() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("nested");

    let config = Config::load_or_init_in(&dir).await.unwrap();

    let path = dir.join("config.toml");
    assert!(path.exists(), "first load should write config.toml");
    assert_eq!(config.config_path, path);
    assert_eq!(config.config_dir(), dir);

    let contents = fs::read_to_string(&path).unwrap();
    assert!(contents.contains("[reaper]"));
    assert!(contents.contains("[rate_limit]"));
}

#[cfg(unix)]
#[tokio::test]
async fn new_config_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempfile::tempdir().unwrap();
    Config::load_or_init_in(tmp.path()).await.unwrap();

    let mode = fs::metadata(tmp.path().join("config.toml"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600, "config may hold credentials");
}

#[tokio::test]
async fn load_reads_existing_file() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(
        tmp.path().join("config.toml"),
        "[reaper]\nttl_days = 3\ninterval_secs = 60\n\n[slack]\nenabled = true\n",
    )
    .unwrap();

    let config = Config::load_or_init_in(tmp.path()).await.unwrap();
    assert_eq!(config.reaper.ttl_days, 3);
    assert_eq!(config.reaper.interval_secs, 60);
    assert!(config.slack.enabled);
}

#[tokio::test]
async fn load_rejects_invalid_values() {
    let tmp = tempfile::tempdir().unwrap();
    fs::write(tmp.path().join("config.toml"), "[reaper]\nttl_days = 0\n").unwrap();

    let err = Config::load_or_init_in(tmp.path()).await.unwrap_err();
    assert!(
        err.to_string().contains("ttl_days"),
        "error should name the bad field: {err}"
    );
}

#[tokio::test]
async fn save_then_load_roundtrip() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config::load_or_init_in(tmp.path()).await.unwrap();
    config.rate_limit.capacity = 9;
    config.storage.sqlite_path = Some("data/messages.db".into());
    config.save().await.unwrap();

    let reloaded = Config::load_or_init_in(tmp.path()).await.unwrap();
    assert_eq!(reloaded.rate_limit.capacity, 9);
    assert_eq!(
        reloaded.storage.sqlite_path.as_deref(),
        Some("data/messages.db")
    );

    let leftovers: Vec<_> = fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
        .collect();
    assert!(leftovers.is_empty(), "atomic save must not leave temp files");
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment overrides
// ─────────────────────────────────────────────────────────────────────────────

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn prefixed_override_beats_bare_name() {
    let mut config = Config::default();
    config.apply_overrides_from(lookup_from(&[("READONCE_PORT", "9000"), ("PORT", "7000")]));
    assert_eq!(config.gateway.port, 9000);
}

#[test]
fn bare_legacy_names_are_honored() {
    let mut config = Config::default();
    config.apply_overrides_from(lookup_from(&[
        ("PORT", "7000"),
        ("DATABASE_URL", "postgres://u@h/db"),
    ]));
    assert_eq!(config.gateway.port, 7000);
    assert_eq!(
        config.storage.postgres.url.as_deref(),
        Some("postgres://u@h/db")
    );
}

#[test]
fn invalid_override_is_ignored() {
    let mut config = Config::default();
    let before = config.rate_limit.capacity;
    config.apply_overrides_from(lookup_from(&[
        ("READONCE_RATE_CAPACITY", "lots"),
        ("READONCE_TRUST_FORWARDED_HEADERS", "maybe"),
    ]));
    assert_eq!(config.rate_limit.capacity, before);
    assert!(!config.gateway.trust_forwarded_headers);
}

#[test]
fn blank_override_is_ignored() {
    let mut config = Config::default();
    config.apply_overrides_from(lookup_from(&[("READONCE_STORAGE_BACKEND", "   ")]));
    assert_eq!(config.storage.backend, "sqlite");
}
