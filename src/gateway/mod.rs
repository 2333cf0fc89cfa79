//! Axum-based HTTP front door with body limits, timeouts and per-client
//! throttling.
//!
//! - `POST /msg`, `GET /msg` and `POST /slack-write` go through the rate limiter
//! - `GET /ping` checks the message store
//! - `GET /health` and `GET /metrics` expose runtime state

pub mod api;
pub mod slack;

use crate::config::GatewayConfig;
use crate::lifecycle::MessageLifecycle;
use crate::observability::{Observer, ObserverEvent};
use crate::ratelimit::{Admission, RateLimiter};
use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Body returned for every "no such message" outcome.
pub const NOT_FOUND_MESSAGE: &str =
    "This message has either already been viewed and destroyed, or it never existed";

/// Prometheus content type for text exposition format.
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

const CORS_MAX_AGE_SECS: u64 = 300;

/// Rate-limiter key of the caller, attached by the throttle middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<MessageLifecycle>,
    pub rate_limiter: Arc<RateLimiter>,
    pub observer: Arc<dyn Observer>,
    pub trust_forwarded_headers: bool,
    /// Base of shareable links handed out by the chat command.
    pub public_url: Arc<str>,
    pub slack_enabled: bool,
}

fn parse_client_ip(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"').trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }

    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Some(addr.ip());
    }

    let value = value.trim_matches(['[', ']']);
    value.parse::<IpAddr>().ok()
}

fn forwarded_client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(xff) = headers.get("X-Forwarded-For").and_then(|v| v.to_str().ok()) {
        for candidate in xff.split(',') {
            if let Some(ip) = parse_client_ip(candidate) {
                return Some(ip);
            }
        }
    }

    headers
        .get("X-Real-IP")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_client_ip)
}

/// `None` when no address can be attributed to the caller. Such requests are
/// refused rather than sharing one bucket.
pub fn client_key_from_request(
    peer_addr: Option<SocketAddr>,
    headers: &HeaderMap,
    trust_forwarded_headers: bool,
) -> Option<String> {
    if trust_forwarded_headers {
        if let Some(ip) = forwarded_client_ip(headers) {
            return Some(ip.to_string());
        }
    }

    peer_addr.map(|addr| addr.ip().to_string())
}

async fn throttle(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let Some(key) = client_key_from_request(peer, request.headers(), state.trust_forwarded_headers)
    else {
        tracing::warn!("rejecting request without an identifiable client address");
        let err = serde_json::json!({ "error": "Unable to identify client" });
        return (StatusCode::BAD_REQUEST, Json(err)).into_response();
    };

    match state.rate_limiter.admit(&key) {
        Admission::Allowed => {
            request.extensions_mut().insert(ClientKey(key));
            next.run(request).await
        }
        Admission::Denied { retry_after } => {
            state.observer.record_event(&ObserverEvent::RequestThrottled);
            tracing::warn!(client = %key, path = %request.uri().path(), "rate limit exceeded");
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let retry_secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            let err = serde_json::json!({
                "error": "Too many requests. Please slow down.",
                "retry_after": retry_secs,
            });
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, retry_secs.to_string())],
                Json(err),
            )
                .into_response()
        }
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.is_empty() || allowed_origins.iter().any(|o| o.trim() == "*")
    {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|o| match HeaderValue::from_str(o.trim()) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("ignoring invalid CORS origin {o:?}");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::ACCEPT,
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
        ])
        .expose_headers([header::LINK])
        .max_age(Duration::from_secs(CORS_MAX_AGE_SECS))
}

/// Build the full router. [`serve`] attaches each peer address as
/// `ConnectInfo` so the throttle layer can see it.
pub fn build_router(state: AppState, config: &GatewayConfig) -> Router {
    let mut throttled = Router::new().route(
        "/msg",
        get(api::handle_read_message).post(api::handle_create_message),
    );
    if state.slack_enabled {
        throttled = throttled.route("/slack-write", post(slack::handle_slack_write));
    }
    let throttled =
        throttled.route_layer(middleware::from_fn_with_state(state.clone(), throttle));

    Router::new()
        .route("/ping", get(handle_ping))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .merge(throttled)
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(cors_layer(&config.allowed_origins))
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until `shutdown` fires, then drain for at most
/// `shutdown_grace_secs`.
pub async fn run_gateway(
    config: &GatewayConfig,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind gateway to {addr}"))?;
    let app = build_router(state, config);
    serve(listener, app, shutdown, config.shutdown_grace()).await
}

/// Serve `app` on an already-bound listener.
///
/// On `shutdown` the listener is closed and every open connection is told to
/// finish its in-flight request. Connections still open after `grace` are
/// aborted.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
    grace: Duration,
) -> Result<()> {
    let local_addr = listener.local_addr().context("Gateway listener has no address")?;
    tracing::info!(addr = %local_addr, "gateway listening");
    crate::health::mark_component_ok("gateway");

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        app.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!("gateway accept failed: {e}");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }
    drop(listener);

    tracing::info!(
        grace_ms = grace.as_millis() as u64,
        open = connections.len(),
        "shutdown requested; draining in-flight requests"
    );
    let drained = tokio::time::timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_ok() {
        tracing::info!("gateway drained");
    } else {
        tracing::warn!(
            remaining = connections.len(),
            "drain window expired; closing remaining connections"
        );
        connections.shutdown().await;
    }

    crate::health::mark_component_error("gateway", "shutdown requested");
    Ok(())
}

const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: Router,
    shutdown: CancellationToken,
) {
    let service = hyper::service::service_fn(move |mut request: hyper::Request<Incoming>| {
        request.extensions_mut().insert(ConnectInfo(peer));
        app.clone().oneshot(request)
    });

    let builder = auto::Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let result = tokio::select! {
        result = connection.as_mut() => result,
        () = shutdown.cancelled() => {
            // Idle keep-alive connections close now; busy ones after the
            // current response.
            connection.as_mut().graceful_shutdown();
            connection.as_mut().await
        }
    };
    if let Err(e) = result {
        tracing::debug!(peer = %peer, "connection closed with error: {e}");
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// GET /ping: store liveness
async fn handle_ping(State(state): State<AppState>) -> Response {
    match state.lifecycle.health_check().await {
        Ok(()) => {
            crate::health::mark_component_ok("store");
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                "pong",
            )
                .into_response()
        }
        Err(e) => {
            crate::health::mark_component_error("store", &e);
            tracing::error!("store health check failed: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// GET /health: component snapshot, never includes secrets
async fn handle_health() -> impl IntoResponse {
    Json(crate::health::snapshot_json())
}

/// GET /metrics: Prometheus text exposition format
async fn handle_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        metrics_body(state.observer.as_ref()),
    )
}

#[cfg(feature = "observability-prometheus")]
fn metrics_body(observer: &dyn Observer) -> String {
    if let Some(prom) = observer
        .as_any()
        .downcast_ref::<crate::observability::PrometheusObserver>()
    {
        return prom.encode();
    }
    String::from(
        "# Prometheus backend not enabled. Set [observability] backend = \"prometheus\" in config.\n",
    )
}

#[cfg(not(feature = "observability-prometheus"))]
fn metrics_body(_observer: &dyn Observer) -> String {
    String::from("# Prometheus support was not compiled into this build.\n")
}
