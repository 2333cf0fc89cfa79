//! `/msg` handlers: store a message, and read it back exactly once.

use super::{AppState, NOT_FOUND_MESSAGE};
use crate::lifecycle::{LifecycleError, MessageDraft};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    /// `<handle>` or `<handle>;<secret>`.
    pub bin: Option<String>,
}

#[derive(Debug, Serialize)]
struct ReadResponse {
    payload: String,
}

/// Split `bin` at the first `;`. An empty secret counts as none.
pub fn parse_bin(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once(';') {
        Some((handle, secret)) => (handle, Some(secret).filter(|s| !s.is_empty())),
        None => (raw, None),
    }
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

fn not_found() -> Response {
    error_body(StatusCode::NOT_FOUND, NOT_FOUND_MESSAGE)
}

fn internal_error() -> Response {
    error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

/// POST /msg: store a new message
pub async fn handle_create_message(
    State(state): State<AppState>,
    body: Result<Json<MessageDraft>, JsonRejection>,
) -> Response {
    let Json(draft) = match body {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!("rejected message body: {e}");
            return error_body(StatusCode::BAD_REQUEST, &e.body_text());
        }
    };

    match state.lifecycle.create(draft).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(LifecycleError::Validation(reason)) => error_body(StatusCode::BAD_REQUEST, &reason),
        Err(LifecycleError::Conflict) => error_body(
            StatusCode::CONFLICT,
            "A message with this handle already exists",
        ),
        Err(e) => {
            tracing::error!("message create failed: {e}");
            internal_error()
        }
    }
}

/// GET /msg?bin=<handle>[;<secret>]: deliver and destroy
pub async fn handle_read_message(
    State(state): State<AppState>,
    query: Result<Query<ReadQuery>, QueryRejection>,
) -> Response {
    let Ok(Query(query)) = query else {
        return not_found();
    };
    let Some(raw) = query.bin.as_deref() else {
        return not_found();
    };
    let (handle, secret) = parse_bin(raw);

    match state.lifecycle.consume(handle, secret).await {
        Ok(delivery) => Json(ReadResponse {
            payload: delivery.payload,
        })
        .into_response(),
        // Unknown, consumed, expired, malformed and wrong-secret all look alike.
        Err(
            LifecycleError::NotFound | LifecycleError::Unauthorized | LifecycleError::Validation(_),
        ) => not_found(),
        Err(e) => {
            tracing::error!("message read failed: {e}");
            internal_error()
        }
    }
}
