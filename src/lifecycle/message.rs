use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Longest handle accepted on create or consume.
pub const MAX_HANDLE_LEN: usize = 128;

/// A message as submitted by its author, before the server stamps it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    #[serde(alias = "uuid")]
    pub handle: String,
    #[serde(alias = "message")]
    pub payload: String,
    #[serde(default, alias = "email", deserialize_with = "empty_as_none")]
    pub notify_address: Option<String>,
    #[serde(default, alias = "reference_name", deserialize_with = "empty_as_none")]
    pub reference_label: Option<String>,
    #[serde(default, alias = "password", deserialize_with = "empty_as_none")]
    pub access_secret: Option<String>,
}

impl MessageDraft {
    pub fn new(handle: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            payload: payload.into(),
            notify_address: None,
            reference_label: None,
            access_secret: None,
        }
    }

    pub fn with_access_secret(mut self, secret: impl Into<String>) -> Self {
        self.access_secret = Some(secret.into());
        self
    }

    pub fn with_notify(mut self, address: impl Into<String>, label: Option<String>) -> Self {
        self.notify_address = Some(address.into());
        self.reference_label = label;
        self
    }

    pub(crate) fn stamp(self, created_at: DateTime<Utc>) -> Message {
        Message {
            handle: self.handle,
            payload: self.payload,
            notify_address: self.notify_address,
            reference_label: self.reference_label,
            access_secret: self.access_secret,
            created_at,
        }
    }
}

/// A stored message record. Only ever held in memory between a take and
/// its hand-off to the one caller that won it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub handle: String,
    pub payload: String,
    pub notify_address: Option<String>,
    pub reference_label: Option<String>,
    #[serde(skip_serializing)]
    pub access_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Handles are `[A-Za-z0-9_-]{1,128}`, which keeps `;` free as the
/// handle/secret separator in read URLs.
pub fn is_valid_handle(handle: &str) -> bool {
    !handle.is_empty()
        && handle.len() <= MAX_HANDLE_LEN
        && handle
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()))
}
