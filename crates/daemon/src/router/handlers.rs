//! Request handlers for the routes behind the perimeter.
//!
//! Handlers see URIs with the token already stripped. Each one validates
//! every path against the containment validator of its own area, on the
//! blocking pool, before touching the filesystem.

use axum::body::Body;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use super::error::ApiError;
use super::page::IndexPage;
use super::{AppState, BytesTransferred};
use crate::files::{
    content_disposition, mime_for_name, prepare_download, prepare_upload_dir, Area,
    DirectoryListing, SavedFile, TransferError, UploadBatch,
};

/// Query of `browse`.
#[derive(Debug, Default, Deserialize)]
pub struct BrowseQuery {
    pub area: Option<String>,
    pub path: Option<String>,
}

/// Query of the download and upload routes.
#[derive(Debug, Default, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

/// Body of a successful upload.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub files: Vec<SavedFile>,
}

/// Body of `status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub remaining_ttl_minutes: u64,
    pub uptime_seconds: u64,
    pub read_only: bool,
}

fn join_error(err: tokio::task::JoinError) -> ApiError {
    ApiError::Internal(format!("blocking task failed: {err}"))
}

pub async fn index(State(state): State<AppState>) -> Response {
    let share_path = state.gate.share_path();
    let log_path = state
        .access_log
        .path()
        .map(|p| p.display().to_string());

    let html = IndexPage {
        base: share_path.trim_end_matches('/'),
        remaining_ttl_minutes: state.lifecycle.remaining_ttl_minutes(),
        read_only: state.settings.read_only,
        max_upload_mb: state.settings.max_upload_mb,
        log_path: log_path.as_deref(),
        share_url: state.settings.share_url.as_deref(),
    }
    .render();

    let len = html.len() as u64;
    let mut response = Html(html).into_response();
    response.extensions_mut().insert(BytesTransferred(len));
    response
}

pub async fn browse(
    State(state): State<AppState>,
    Query(query): Query<BrowseQuery>,
) -> Result<Json<DirectoryListing>, ApiError> {
    let area: Area = query
        .area
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|_| ApiError::InvalidArea)?;

    let areas = state.areas.clone();
    let listing = tokio::task::spawn_blocking(move || areas.list(area, query.path.as_deref()))
        .await
        .map_err(join_error)??;

    Ok(Json(listing))
}

pub async fn download_shared(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Response, ApiError> {
    download(state, Area::Shared, query.path).await
}

pub async fn download_upload(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
) -> Result<Response, ApiError> {
    if !state.areas.uploads_root().is_dir() {
        return Err(ApiError::FileNotFound);
    }
    download(state, Area::Uploads, query.path).await
}

async fn download(state: AppState, area: Area, path: Option<String>) -> Result<Response, ApiError> {
    let relative = path
        .filter(|p| !p.is_empty())
        .ok_or(ApiError::PathRequired)?;
    let max_upload_mb = state.settings.max_upload_mb;

    let areas = state.areas.clone();
    let target = tokio::task::spawn_blocking(move || prepare_download(areas.validator(area), &relative))
        .await
        .map_err(join_error)?
        .map_err(|e| ApiError::from_transfer(e, max_upload_mb))?;

    let file = tokio::fs::File::open(&target.path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::FileNotFound
        } else {
            ApiError::Internal(e.to_string())
        }
    })?;

    debug!(area = area.as_str(), path = %target.path.display(), size = target.size, "Serving download");

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_for_name(&target.name))
        .header(header::CONTENT_LENGTH, target.size)
        .header(header::CONTENT_DISPOSITION, content_disposition(&target.name))
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    response.extensions_mut().insert(BytesTransferred(target.size));
    Ok(response)
}

fn multipart_to_transfer(err: MultipartError, limit: u64) -> TransferError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        TransferError::TooLarge { limit }
    } else {
        TransferError::Malformed(err.body_text())
    }
}

pub async fn upload(
    State(state): State<AppState>,
    Query(query): Query<PathQuery>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let settings = &state.settings;
    if settings.read_only {
        return Err(ApiError::ReadOnly);
    }

    let limit = settings.max_upload_bytes();
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(ApiError::PayloadTooLarge(settings.max_upload_mb));
    }

    let mut multipart = multipart.map_err(|_| ApiError::InvalidContentType)?;

    let areas = state.areas.clone();
    let relative = query.path.clone();
    let dir = tokio::task::spawn_blocking(move || {
        prepare_upload_dir(areas.validator(Area::Uploads), relative.as_deref())
    })
    .await
    .map_err(join_error)?
    .map_err(|e| ApiError::from_transfer(e, settings.max_upload_mb))?;

    let mut batch = UploadBatch::new(dir, limit);
    let to_api = |e: TransferError| ApiError::from_transfer(e, settings.max_upload_mb);

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| to_api(multipart_to_transfer(e, limit)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original = match field.file_name() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => continue,
        };

        let chunks = field.map_err(|e| multipart_to_transfer(e, limit));
        batch.save(&original, chunks).await.map_err(to_api)?;
    }

    if batch.saved().is_empty() {
        return Err(ApiError::NoFiles);
    }

    let received = batch.received();
    let files = batch.into_saved();
    info!(count = files.len(), bytes = received, "Upload complete");

    let mut response = Json(UploadResponse {
        success: true,
        files,
    })
    .into_response();
    response.extensions_mut().insert(BytesTransferred(received));
    Ok(response)
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        remaining_ttl_minutes: state.lifecycle.remaining_ttl_minutes(),
        uptime_seconds: state.lifecycle.uptime_secs(),
        read_only: state.settings.read_only,
    })
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

pub async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}
