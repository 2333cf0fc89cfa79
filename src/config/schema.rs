use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
#[cfg(unix)]
use tokio::fs::File;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Env var that relocates the whole config directory.
pub const CONFIG_DIR_ENV: &str = "READONCE_CONFIG_DIR";

const CONFIG_FILE_NAME: &str = "config.toml";

// ── Top-level ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Where this config was loaded from. Computed, never serialized.
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub reaper: ReaperConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub slack: SlackConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ── Gateway ──────────────────────────────────────────────────────

/// HTTP front door (`[gateway]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,

    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Trust proxy-forwarded client IP headers (`X-Forwarded-For`, `X-Real-IP`).
    /// Disabled by default; enable only behind a trusted reverse proxy.
    #[serde(default)]
    pub trust_forwarded_headers: bool,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// How long in-flight requests get to finish after a shutdown signal.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,

    /// Base URL of the web client; shareable links are built from it.
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_gateway_port() -> u16 {
    4000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_body_bytes() -> usize {
    1_048_576
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".into()]
}

fn default_public_url() -> String {
    "http://localhost:3000".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            trust_forwarded_headers: false,
            request_timeout_secs: default_request_timeout_secs(),
            max_body_bytes: default_max_body_bytes(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            allowed_origins: default_allowed_origins(),
            public_url: default_public_url(),
        }
    }
}

impl GatewayConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

// ── Storage ──────────────────────────────────────────────────────

/// Message persistence (`[storage]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "sqlite" (default) or "postgres".
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// SQLite file, relative to the config directory unless absolute.
    /// ":memory:" keeps everything in process.
    #[serde(default)]
    pub sqlite_path: Option<String>,

    #[serde(default)]
    pub postgres: PostgresStoreConfig,
}

fn default_storage_backend() -> String {
    crate::store::default_store_backend_key().into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            sqlite_path: None,
            postgres: PostgresStoreConfig::default(),
        }
    }
}

/// `[storage.postgres]`: either a full `url` or discrete parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PostgresStoreConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub dbname: Option<String>,
    #[serde(default)]
    pub sslmode: Option<String>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

// ── Reaper ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_reaper_interval_secs")]
    pub interval_secs: u64,

    /// Unread messages older than this are purged.
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u64,
}

fn default_true() -> bool {
    true
}

fn default_reaper_interval_secs() -> u64 {
    300
}

fn default_ttl_days() -> u64 {
    30
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_reaper_interval_secs(),
            ttl_days: default_ttl_days(),
        }
    }
}

impl ReaperConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_days.saturating_mul(24 * 60 * 60))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

// ── Rate limiting ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Bucket size per client. 0 disables throttling.
    #[serde(default = "default_rate_capacity")]
    pub capacity: u32,

    #[serde(default = "default_refill_per_second")]
    pub refill_per_second: f64,

    /// Visitors untouched for longer than this are forgotten.
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "default_max_visitors")]
    pub max_visitors: usize,
}

fn default_rate_capacity() -> u32 {
    3
}

fn default_refill_per_second() -> f64 {
    1.0
}

fn default_idle_secs() -> u64 {
    180
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_visitors() -> usize {
    crate::ratelimit::DEFAULT_MAX_VISITORS
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_rate_capacity(),
            refill_per_second: default_refill_per_second(),
            idle_secs: default_idle_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_visitors: default_max_visitors(),
        }
    }
}

impl RateLimitConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// ── Notifications ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    #[serde(default)]
    pub email: EmailNotifyConfig,
}

/// `[notify.email]`: read receipts over SMTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailNotifyConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Sender mailbox; defaults to `username`.
    #[serde(default)]
    pub from: Option<String>,
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".into()
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for EmailNotifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            username: None,
            password: None,
            from: None,
        }
    }
}

// ── Chat command ─────────────────────────────────────────────────

/// `[slack]`: the `/slack-write` slash-command endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SlackConfig {
    #[serde(default)]
    pub enabled: bool,
}

// ── Observability ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// "prometheus", "log" or "none".
    #[serde(default = "default_observability_backend")]
    pub backend: String,
}

fn default_observability_backend() -> String {
    "prometheus".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            backend: default_observability_backend(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

/// `explicit` (the `--config-dir` flag) > `READONCE_CONFIG_DIR` > `~/.readonce`.
pub fn resolve_config_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    if let Some(dir) = std::env::var(CONFIG_DIR_ENV)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    {
        return Ok(PathBuf::from(dir));
    }
    default_config_dir()
}

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".readonce"))
}

impl Config {
    /// Load `config.toml` from `dir`, writing a default one first if absent.
    pub async fn load_or_init_in(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);

        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let initialized = !config_path.exists();
        let mut config = if initialized {
            let mut config = Config {
                config_path: config_path.clone(),
                ..Config::default()
            };
            config.save().await?;

            // Restrict permissions on newly created config file (may contain credentials)
            #[cfg(unix)]
            {
                use std::{fs::Permissions, os::unix::fs::PermissionsExt};
                let _ = fs::set_permissions(&config_path, Permissions::from_mode(0o600)).await;
            }
            config
        } else {
            // Warn if config file is world-readable (may contain credentials)
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = fs::metadata(&config_path).await {
                    if meta.permissions().mode() & 0o004 != 0 {
                        tracing::warn!(
                            "Config file {:?} is world-readable (mode {:o}). \
                             Consider restricting with: chmod 600 {:?}",
                            config_path,
                            meta.permissions().mode() & 0o777,
                            config_path,
                        );
                    }
                }
            }

            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            config.config_path = config_path.clone();
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            initialized,
            "Config loaded"
        );
        Ok(config)
    }

    pub fn config_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map_or_else(|| PathBuf::from("."), PathBuf::from)
    }

    /// Validate configuration values that would cause runtime failures.
    pub fn validate(&self) -> Result<()> {
        if self.gateway.host.trim().is_empty() {
            anyhow::bail!("gateway.host must not be empty");
        }
        if self.gateway.max_body_bytes == 0 {
            anyhow::bail!("gateway.max_body_bytes must be greater than 0");
        }

        if crate::store::classify_store_backend(&self.storage.backend)
            == crate::store::StoreBackendKind::Unknown
        {
            anyhow::bail!(
                "storage.backend '{}' is not supported (expected sqlite or postgres)",
                self.storage.backend
            );
        }

        if self.reaper.interval_secs == 0 {
            anyhow::bail!("reaper.interval_secs must be greater than 0");
        }
        if self.reaper.ttl_days == 0 {
            anyhow::bail!("reaper.ttl_days must be greater than 0");
        }

        let rate = &self.rate_limit;
        if rate.capacity > 0 && !(rate.refill_per_second.is_finite() && rate.refill_per_second > 0.0)
        {
            anyhow::bail!("rate_limit.refill_per_second must be a positive number");
        }
        if rate.idle_secs == 0 {
            anyhow::bail!("rate_limit.idle_secs must be greater than 0");
        }
        if rate.sweep_interval_secs == 0 {
            anyhow::bail!("rate_limit.sweep_interval_secs must be greater than 0");
        }

        if self.notify.email.enabled && self.notify.email.smtp_host.trim().is_empty() {
            anyhow::bail!("notify.email.smtp_host is required when email is enabled");
        }

        let backend = self.observability.backend.trim().to_ascii_lowercase();
        if !backend.is_empty()
            && !crate::observability::OBSERVABILITY_BACKENDS.contains(&backend.as_str())
        {
            anyhow::bail!(
                "observability.backend '{}' is not supported (expected prometheus, log or none)",
                self.observability.backend
            );
        }

        Ok(())
    }

    /// Apply `READONCE_*` (and a few bare legacy) environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Same as [`apply_env_overrides`](Self::apply_env_overrides) with an
    /// injectable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| -> Option<(String, String)> {
            keys.iter().find_map(|key| {
                lookup(key)
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .map(|v| ((*key).to_string(), v))
            })
        };

        // Gateway
        if let Some((_, host)) = get(&["READONCE_HOST", "HOST"]) {
            self.gateway.host = host;
        }
        if let Some((key, port)) = get(&["READONCE_PORT", "PORT"]) {
            set_parsed(&key, &port, &mut self.gateway.port);
        }
        if let Some((_, url)) = get(&["READONCE_PUBLIC_URL"]) {
            self.gateway.public_url = url;
        }
        if let Some((key, flag)) = get(&["READONCE_TRUST_FORWARDED_HEADERS"]) {
            match parse_flag(&flag) {
                Some(value) => self.gateway.trust_forwarded_headers = value,
                None => tracing::warn!(
                    "Ignoring invalid {key} (valid: 1|0|true|false|yes|no|on|off)"
                ),
            }
        }

        // Storage
        if let Some((_, backend)) = get(&["READONCE_STORAGE_BACKEND"]) {
            self.storage.backend = backend;
        }
        if let Some((_, path)) = get(&["READONCE_SQLITE_PATH"]) {
            self.storage.sqlite_path = Some(path);
        }
        let pg = &mut self.storage.postgres;
        if let Some((_, url)) = get(&["READONCE_DATABASE_URL", "DATABASE_URL"]) {
            pg.url = Some(url);
        }
        if let Some((_, host)) = get(&["READONCE_DB_HOST"]) {
            pg.host = Some(host);
        }
        if let Some((key, port)) = get(&["READONCE_DB_PORT"]) {
            match port.parse::<u16>() {
                Ok(port) => pg.port = Some(port),
                Err(_) => tracing::warn!("Ignoring invalid {key}: {port:?}"),
            }
        }
        if let Some((_, user)) = get(&["READONCE_DB_USER"]) {
            pg.user = Some(user);
        }
        if let Some((_, password)) = get(&["READONCE_DB_PASSWORD"]) {
            pg.password = Some(password);
        }
        if let Some((_, name)) = get(&["READONCE_DB_NAME"]) {
            pg.dbname = Some(name);
        }
        if let Some((_, sslmode)) = get(&["READONCE_DB_SSLMODE"]) {
            pg.sslmode = Some(sslmode);
        }

        // Reaper
        if let Some((key, days)) = get(&["READONCE_TTL_DAYS"]) {
            set_parsed(&key, &days, &mut self.reaper.ttl_days);
        }
        if let Some((key, secs)) = get(&["READONCE_REAPER_INTERVAL_SECS"]) {
            set_parsed(&key, &secs, &mut self.reaper.interval_secs);
        }

        // Rate limiting
        if let Some((key, capacity)) = get(&["READONCE_RATE_CAPACITY"]) {
            set_parsed(&key, &capacity, &mut self.rate_limit.capacity);
        }
        if let Some((key, rate)) = get(&["READONCE_RATE_REFILL_PER_SECOND"]) {
            set_parsed(&key, &rate, &mut self.rate_limit.refill_per_second);
        }
        if let Some((key, secs)) = get(&["READONCE_RATE_IDLE_SECS"]) {
            set_parsed(&key, &secs, &mut self.rate_limit.idle_secs);
        }

        // Email
        if let Some((_, user)) = get(&["READONCE_EMAIL_USERNAME"]) {
            self.notify.email.username = Some(user);
        }
        if let Some((_, password)) = get(&["READONCE_EMAIL_PASSWORD"]) {
            self.notify.email.password = Some(password);
        }
    }

    /// Write atomically: temp file, fsync, rename over the old file.
    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;

        fs::create_dir_all(parent_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or(CONFIG_FILE_NAME);
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4()));

        let mut temp_file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .await
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        if let Err(e) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }

        sync_directory(parent_dir).await
    }
}

fn set_parsed<T: std::str::FromStr>(key: &str, raw: &str, target: &mut T) {
    match raw.parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!("Ignoring invalid {key}: {raw:?}"),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

async fn sync_directory(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir = File::open(path)
            .await
            .with_context(|| format!("Failed to open directory for fsync: {}", path.display()))?;
        dir.sync_all()
            .await
            .with_context(|| format!("Failed to fsync directory metadata: {}", path.display()))?;
        return Ok(());
    }

    #[cfg(not(unix))]
    {
        let _ = path;
        Ok(())
    }
}
