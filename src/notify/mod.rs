pub mod email;
pub mod traits;

pub use email::EmailNotifier;
pub use traits::{Notifier, ReadReceipt};

use crate::config::NotifyConfig;
use async_trait::async_trait;
use std::sync::Arc;

/// Notifier used when no channel is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    fn name(&self) -> &str {
        "noop"
    }

    async fn send(&self, _receipt: &ReadReceipt) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Factory: build the notifier selected by `[notify]`.
pub fn create_notifier(config: &NotifyConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    if config.email.enabled {
        let notifier = EmailNotifier::new(&config.email)?;
        tracing::info!(
            host = %config.email.smtp_host,
            port = config.email.smtp_port,
            "email read receipts enabled"
        );
        return Ok(Arc::new(notifier));
    }
    Ok(Arc::new(NoopNotifier))
}
