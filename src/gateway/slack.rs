//! `POST /slack-write` slash command.
//!
//! The text is sealed with a fresh key before it is stored. Only the sealed
//! form reaches the store; the key travels back to the caller in the URL
//! fragment, which browsers never send to the server.

use super::AppState;
use crate::lifecycle::MessageDraft;
use axum::{
    extract::{rejection::FormRejection, Form, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

const USAGE_HINT: &str =
    "Usage: /readonce <secret text>. The reply is a link that works exactly once.";

#[derive(Debug, Deserialize)]
pub struct SlashCommand {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SlackReply {
    pub response_type: String,
    pub text: String,
}

impl SlackReply {
    fn ephemeral(text: impl Into<String>) -> Self {
        Self {
            response_type: "ephemeral".into(),
            text: text.into(),
        }
    }
}

/// Link the recipient opens. `key` goes after `#` so it stays client-side.
pub fn share_link(public_url: &str, handle: &str, key: &str) -> String {
    format!(
        "{}/msg?bin={handle}#{key}",
        public_url.trim_end_matches('/')
    )
}

pub async fn handle_slack_write(
    State(state): State<AppState>,
    form: Result<Form<SlashCommand>, FormRejection>,
) -> Response {
    let Form(command) = match form {
        Ok(form) => form,
        Err(e) => {
            tracing::debug!("rejected slash command body: {e}");
            return (StatusCode::BAD_REQUEST, e.body_text()).into_response();
        }
    };

    let text = command.text.trim();
    if text.is_empty() {
        return Json(SlackReply::ephemeral(USAGE_HINT)).into_response();
    }

    let sealed = match crate::security::seal(text) {
        Ok(sealed) => sealed,
        Err(e) => {
            tracing::error!("failed to seal slash command text: {e:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let handle = uuid::Uuid::new_v4().to_string();
    if let Err(e) = state
        .lifecycle
        .create(MessageDraft::new(handle.clone(), sealed.payload))
        .await
    {
        tracing::error!("failed to store slash command message: {e}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    tracing::info!(
        user = command.user_name.as_deref().unwrap_or("unknown"),
        command = command.command.as_deref().unwrap_or(""),
        "slash command stored a message"
    );

    let link = share_link(&state.public_url, &handle, &sealed.key);
    Json(SlackReply::ephemeral(format!(
        "Here is your one-time link: {link}"
    )))
    .into_response()
}
