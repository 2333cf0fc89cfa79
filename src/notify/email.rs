use super::traits::{Notifier, ReadReceipt};
use crate::config::EmailNotifyConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

/// Sends read receipts as plain-text mail through an SMTP relay (STARTTLS).
pub struct EmailNotifier {
    transport: SmtpTransport,
    from: Mailbox,
}

impl EmailNotifier {
    pub fn new(config: &EmailNotifyConfig) -> Result<Self> {
        let host = config.smtp_host.trim();
        anyhow::ensure!(!host.is_empty(), "email notifier requires smtp_host");

        let from = config
            .from
            .as_deref()
            .or(config.username.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .context("email notifier requires `from` or `username`")?
            .parse::<Mailbox>()
            .context("invalid sender address for email notifier")?;

        let mut builder = SmtpTransport::starttls_relay(host)
            .with_context(|| format!("failed to configure SMTP relay {host}"))?
            .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (config.username.as_deref(), config.password.as_deref())
        {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    fn compose(&self, receipt: &ReadReceipt) -> Result<Message> {
        let to = receipt
            .address
            .parse::<Mailbox>()
            .context("invalid notification address")?;
        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(receipt.subject())
            .header(ContentType::TEXT_PLAIN)
            .body(receipt.body())
            .context("failed to build notification email")
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, receipt: &ReadReceipt) -> Result<()> {
        let email = self.compose(receipt)?;
        let transport = self.transport.clone();
        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .context("SMTP worker task failed")?
            .context("SMTP delivery failed")?;
        Ok(())
    }
}
