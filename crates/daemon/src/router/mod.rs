//! HTTP router for the share.
//!
//! The router is two layers deep. The outer router owns the perimeter: it
//! checks the client address against the allow list, checks and strips the
//! capability token from the path, and records session activity. Everything
//! that passes is handed to the inner router, which dispatches on the
//! token-less path and writes one access log entry per request.
//!
//! ```text
//! request ──► perimeter_gate ──► record_access ──► handlers
//!               │ 403 IP_DENIED      (JSON line)     /, /browse, /dl,
//!               │ 404 Not Found                      /udl, /upload, /status
//! ```

pub mod error;
pub mod handlers;
pub mod page;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::{DefaultBodyLimit, Query, Request, State};
use axum::http::{header, Uri};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use perimeter::{AllowList, SessionLifecycle, TokenGate};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info_span, warn};

pub use error::ApiError;

use crate::files::ShareAreas;
use crate::logging::access::{new_request_id, AccessEntry};
use crate::logging::AccessLog;

/// Extra room above the upload limit for multipart framing.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// Share-wide settings the handlers read.
#[derive(Debug, Clone)]
pub struct ShareSettings {
    pub read_only: bool,
    pub max_upload_mb: u64,
    /// Full URL shown on the index page, once known.
    pub share_url: Option<String>,
}

impl ShareSettings {
    /// Upload limit in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

/// State shared by every request.
#[derive(Clone)]
pub struct AppState {
    pub areas: Arc<ShareAreas>,
    pub allow_list: Arc<AllowList>,
    pub gate: Arc<TokenGate>,
    pub lifecycle: Arc<SessionLifecycle>,
    pub access_log: Arc<AccessLog>,
    pub settings: Arc<ShareSettings>,
}

/// Bytes sent or received by a handler, for the access log.
#[derive(Debug, Clone, Copy)]
pub struct BytesTransferred(pub u64);

/// Error code of a failed request, for the access log.
#[derive(Debug, Clone, Copy)]
pub struct FailureCode(pub &'static str);

/// Build the full router.
pub fn build_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.settings.max_upload_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    let api = Router::new()
        .route("/", get(handlers::index))
        .route("/browse", get(handlers::browse))
        .route("/dl", get(handlers::download_shared))
        .route("/udl", get(handlers::download_upload))
        .route(
            "/upload",
            post(handlers::upload).fallback(handlers::method_not_allowed),
        )
        .route("/status", get(handlers::status))
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(state.clone(), record_access))
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            info_span!(
                "request",
                method = %request.method(),
                path = %request.uri().path(),
            )
        }))
        .with_state(state.clone());

    Router::new()
        .fallback_service(api)
        .layer(middleware::from_fn_with_state(state, perimeter_gate))
}

fn client_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Allow list, then token. On success the token is stripped from the URI.
async fn perimeter_gate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let client = client_addr(&request).map(|addr| addr.ip());
    if !state.allow_list.is_allowed(client) {
        warn!(client = ?client, "Rejected client outside allow list");
        return ApiError::IpDenied.into_response();
    }

    let Some(remaining) = state.gate.validate_path(request.uri().path()) else {
        debug!(client = ?client, "Rejected request without a valid token");
        return handlers::not_found().await;
    };

    let rewritten = match request.uri().query() {
        Some(query) => format!("{remaining}?{query}"),
        None => remaining.to_string(),
    };
    match rewritten.parse::<Uri>() {
        Ok(uri) => *request.uri_mut() = uri,
        Err(_) => return handlers::not_found().await,
    }

    state.lifecycle.record_activity();
    next.run(request).await
}

#[derive(Debug, Default, Deserialize)]
struct LoggedQuery {
    area: Option<String>,
    path: Option<String>,
}

fn implied_area(endpoint: &str) -> Option<&'static str> {
    match endpoint {
        "/dl" => Some("shared"),
        "/udl" | "/upload" => Some("uploads"),
        _ => None,
    }
}

/// One access log line per request that passed the perimeter.
async fn record_access(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let ip = client_addr(&request).map(|addr| addr.ip().to_string());
    let method = request.method().to_string();
    let endpoint = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);
    let logged = Query::<LoggedQuery>::try_from_uri(request.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();
    let ua = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let response = next.run(request).await;

    let area = logged
        .area
        .or_else(|| implied_area(&endpoint).map(str::to_string));
    let entry = AccessEntry {
        ts: Utc::now(),
        rid: new_request_id(),
        ip,
        method,
        endpoint,
        query,
        area,
        path: logged.path,
        status: response.status().as_u16(),
        bytes: response
            .extensions()
            .get::<BytesTransferred>()
            .map_or(0, |b| b.0),
        ua,
        dur: started.elapsed().as_millis() as u64,
        err: response
            .extensions()
            .get::<FailureCode>()
            .map(|c| c.0.to_string()),
    };
    state.access_log.record(entry).await;

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implied_area() {
        assert_eq!(implied_area("/dl"), Some("shared"));
        assert_eq!(implied_area("/udl"), Some("uploads"));
        assert_eq!(implied_area("/upload"), Some("uploads"));
        assert_eq!(implied_area("/browse"), None);
    }

    #[test]
    fn test_max_upload_bytes() {
        let settings = ShareSettings {
            read_only: false,
            max_upload_mb: 2,
            share_url: None,
        };
        assert_eq!(settings.max_upload_bytes(), 2 * 1024 * 1024);
    }
}
