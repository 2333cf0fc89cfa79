pub mod schema;

pub use schema::{
    resolve_config_dir, Config, EmailNotifyConfig, GatewayConfig, NotifyConfig,
    ObservabilityConfig, PostgresStoreConfig, RateLimitConfig, ReaperConfig, SlackConfig,
    StorageConfig, CONFIG_DIR_ENV,
};
