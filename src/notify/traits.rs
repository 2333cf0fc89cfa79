use async_trait::async_trait;

/// What a notifier is told after a message has been delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReceipt {
    pub address: String,
    pub reference_label: Option<String>,
}

impl ReadReceipt {
    pub fn subject(&self) -> &'static str {
        "Your message has been read."
    }

    pub fn body(&self) -> String {
        match self.reference_label.as_deref() {
            Some(label) => format!(
                "Your message with reference name: \"{label}\" has been viewed and destroyed."
            ),
            None => "Your message has been viewed and destroyed.".to_string(),
        }
    }
}

/// Best-effort side channel told about deliveries.
///
/// Callers fire `send` in the background and only log the outcome; an `Err`
/// is never retried.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, receipt: &ReadReceipt) -> anyhow::Result<()>;
}
