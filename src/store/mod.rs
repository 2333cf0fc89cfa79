pub mod backend;
#[cfg(feature = "store-postgres")]
pub mod postgres;
pub mod sqlite;
pub mod traits;

pub use backend::{classify_store_backend, default_store_backend_key, StoreBackendKind};
#[cfg(feature = "store-postgres")]
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;
pub use traits::{Claim, MessageStore, StoreError, StoreResult, Take};

use crate::config::{PostgresStoreConfig, StorageConfig};
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name of the SQLite database when `sqlite_path` is not set.
pub const DEFAULT_SQLITE_FILE: &str = "messages.db";

const IN_MEMORY_PATH: &str = ":memory:";

/// Factory: open the configured message store.
pub fn create_store(
    config: &StorageConfig,
    config_dir: &Path,
) -> anyhow::Result<Arc<dyn MessageStore>> {
    match classify_store_backend(&config.backend) {
        StoreBackendKind::Sqlite => {
            let store = match resolve_sqlite_path(config, config_dir) {
                None => SqliteStore::in_memory()?,
                Some(path) => SqliteStore::open(&path)?,
            };
            tracing::info!(
                backend = "sqlite",
                location = store.location(),
                "message store opened"
            );
            Ok(Arc::new(store))
        }
        StoreBackendKind::Postgres => build_postgres_store(&config.postgres),
        StoreBackendKind::Unknown => anyhow::bail!(
            "unknown storage backend '{}'; expected one of: sqlite, postgres",
            config.backend
        ),
    }
}

/// `None` means an in-memory database.
pub fn resolve_sqlite_path(config: &StorageConfig, config_dir: &Path) -> Option<PathBuf> {
    match config.sqlite_path.as_deref().map(str::trim) {
        Some(IN_MEMORY_PATH) => None,
        Some(path) if !path.is_empty() => {
            let path = PathBuf::from(path);
            Some(if path.is_absolute() {
                path
            } else {
                config_dir.join(path)
            })
        }
        _ => Some(config_dir.join(DEFAULT_SQLITE_FILE)),
    }
}

/// Connection string from `url`, falling back to the discrete parameters.
pub fn postgres_connection_string(config: &PostgresStoreConfig) -> anyhow::Result<String> {
    if let Some(url) = config
        .url
        .as_deref()
        .map(str::trim)
        .filter(|url| !url.is_empty())
    {
        return Ok(url.to_string());
    }

    let host = config
        .host
        .as_deref()
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .context("storage backend 'postgres' requires [storage.postgres] url or host")?;
    let port = config.port.map(|p| p.to_string()).unwrap_or_default();

    Ok(backend::conninfo_string(&[
        ("host", host),
        ("port", &port),
        ("user", config.user.as_deref().unwrap_or_default()),
        ("password", config.password.as_deref().unwrap_or_default()),
        ("dbname", config.dbname.as_deref().unwrap_or_default()),
        ("sslmode", config.sslmode.as_deref().unwrap_or_default()),
    ]))
}

#[cfg(feature = "store-postgres")]
fn build_postgres_store(config: &PostgresStoreConfig) -> anyhow::Result<Arc<dyn MessageStore>> {
    let conn_str = postgres_connection_string(config)?;
    let store = PostgresStore::connect(&conn_str, config.connect_timeout_secs)?;
    tracing::info!(backend = "postgres", "message store opened");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "store-postgres"))]
fn build_postgres_store(_config: &PostgresStoreConfig) -> anyhow::Result<Arc<dyn MessageStore>> {
    anyhow::bail!(
        "storage backend 'postgres' requested but this build was compiled without `store-postgres`; rebuild with `--features store-postgres`"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sqlite_config(path: Option<&str>) -> StorageConfig {
        StorageConfig {
            backend: "sqlite".into(),
            sqlite_path: path.map(str::to_string),
            ..StorageConfig::default()
        }
    }

    #[test]
    fn sqlite_path_defaults_into_config_dir() {
        let dir = Path::new("/etc/readonce");
        assert_eq!(
            resolve_sqlite_path(&sqlite_config(None), dir),
            Some(dir.join(DEFAULT_SQLITE_FILE))
        );
        assert_eq!(
            resolve_sqlite_path(&sqlite_config(Some("  ")), dir),
            Some(dir.join(DEFAULT_SQLITE_FILE))
        );
    }

    #[test]
    fn sqlite_path_relative_and_absolute() {
        let dir = Path::new("/etc/readonce");
        assert_eq!(
            resolve_sqlite_path(&sqlite_config(Some("data/m.db")), dir),
            Some(dir.join("data/m.db"))
        );
        assert_eq!(
            resolve_sqlite_path(&sqlite_config(Some("/var/lib/m.db")), dir),
            Some(PathBuf::from("/var/lib/m.db"))
        );
        assert_eq!(
            resolve_sqlite_path(&sqlite_config(Some(":memory:")), dir),
            None
        );
    }

    #[tokio::test]
    async fn create_store_opens_sqlite_file() {
        let tmp = TempDir::new().unwrap();
        let store = create_store(&sqlite_config(None), tmp.path()).unwrap();
        assert_eq!(store.name(), "sqlite");
        assert!(store.health_check().await.is_ok());
        assert!(tmp.path().join(DEFAULT_SQLITE_FILE).exists());
    }

    #[test]
    fn create_store_rejects_unknown_backend() {
        let tmp = TempDir::new().unwrap();
        let config = StorageConfig {
            backend: "redis".into(),
            ..StorageConfig::default()
        };
        let err = create_store(&config, tmp.path()).err().unwrap();
        assert!(err.to_string().contains("unknown storage backend"));
    }

    #[test]
    fn postgres_url_takes_precedence() {
        let config = PostgresStoreConfig {
            url: Some("postgres://u:p@db/secrets".into()),
            host: Some("ignored".into()),
            ..PostgresStoreConfig::default()
        };
        assert_eq!(
            postgres_connection_string(&config).unwrap(),
            "postgres://u:p@db/secrets"
        );
    }

    #[test]
    fn postgres_discrete_parameters() {
        let config = PostgresStoreConfig {
            host: Some("db".into()),
            port: Some(5433),
            user: Some("readonce".into()),
            dbname: Some("secrets".into()),
            sslmode: Some("disable".into()),
            ..PostgresStoreConfig::default()
        };
        assert_eq!(
            postgres_connection_string(&config).unwrap(),
            "host=db port=5433 user=readonce dbname=secrets sslmode=disable"
        );
    }

    #[test]
    fn postgres_requires_url_or_host() {
        assert!(postgres_connection_string(&PostgresStoreConfig::default()).is_err());
    }
}
