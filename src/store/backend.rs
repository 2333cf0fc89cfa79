#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StoreBackendKind {
    Sqlite,
    Postgres,
    Unknown,
}

pub fn default_store_backend_key() -> &'static str {
    "sqlite"
}

pub fn classify_store_backend(backend: &str) -> StoreBackendKind {
    match backend.trim().to_ascii_lowercase().as_str() {
        "sqlite" => StoreBackendKind::Sqlite,
        "postgres" | "postgresql" => StoreBackendKind::Postgres,
        _ => StoreBackendKind::Unknown,
    }
}

/// Build a libpq-style key/value connection string from discrete settings.
///
/// Values containing whitespace, quotes or backslashes are single-quoted and
/// escaped. Empty values are skipped.
pub fn conninfo_string(params: &[(&str, &str)]) -> String {
    params
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{key}={}", quote_conninfo_value(value)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_conninfo_value(value: &str) -> String {
    let needs_quotes = value
        .chars()
        .any(|c| c.is_whitespace() || c == '\'' || c == '\\');
    if !needs_quotes {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_known_backends() {
        assert_eq!(classify_store_backend("sqlite"), StoreBackendKind::Sqlite);
        assert_eq!(classify_store_backend("postgres"), StoreBackendKind::Postgres);
        assert_eq!(classify_store_backend(" PostgreSQL "), StoreBackendKind::Postgres);
    }

    #[test]
    fn classify_unknown_backend() {
        assert_eq!(classify_store_backend("redis"), StoreBackendKind::Unknown);
        assert_eq!(classify_store_backend(""), StoreBackendKind::Unknown);
    }

    #[test]
    fn default_backend_is_sqlite() {
        assert_eq!(
            classify_store_backend(default_store_backend_key()),
            StoreBackendKind::Sqlite
        );
    }

    #[test]
    fn conninfo_skips_empty_values() {
        let conn = conninfo_string(&[
            ("host", "db.internal"),
            ("port", "5432"),
            ("user", "readonce"),
            ("password", ""),
            ("dbname", "secrets"),
        ]);
        assert_eq!(conn, "host=db.internal port=5432 user=readonce dbname=secrets");
    }

    #[test]
    fn conninfo_quotes_awkward_values() {
        let conn = conninfo_string(&[("password", "it's a pass\\word")]);
        assert_eq!(conn, r"password='it\'s a pass\\word'");
    }
}
