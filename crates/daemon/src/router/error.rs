//! JSON error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use perimeter::ContainmentError;
use serde::Serialize;

use super::FailureCode;
use crate::files::{BrowseError, TransferError};

/// Errors returned to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Client address not in the allow list.
    #[error("Access denied")]
    IpDenied,

    /// `area` was neither `shared` nor `uploads`.
    #[error("Invalid area")]
    InvalidArea,

    /// The requested path failed containment.
    #[error("Invalid path")]
    Containment(#[from] ContainmentError),

    /// A download was requested without a path.
    #[error("Path is required")]
    PathRequired,

    #[error("Directory not found")]
    DirNotFound,

    #[error("File not found")]
    FileNotFound,

    /// Uploads are disabled.
    #[error("Uploads disabled (readonly mode)")]
    ReadOnly,

    /// Upload exceeds the size limit, in megabytes.
    #[error("File too large. Max size: {0} MB")]
    PayloadTooLarge(u64),

    #[error("Invalid content type")]
    InvalidContentType,

    #[error("No files uploaded")]
    NoFiles,

    #[error("Method not allowed")]
    MethodNotAllowed,

    /// Anything unexpected; the detail is logged, not sent.
    #[error("Internal error")]
    Internal(String),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::IpDenied | ApiError::ReadOnly => StatusCode::FORBIDDEN,
            ApiError::InvalidArea
            | ApiError::Containment(_)
            | ApiError::PathRequired
            | ApiError::InvalidContentType
            | ApiError::NoFiles => StatusCode::BAD_REQUEST,
            ApiError::DirNotFound | ApiError::FileNotFound => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code sent in the body.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::IpDenied => "IP_DENIED",
            ApiError::InvalidArea => "INVALID_AREA",
            ApiError::Containment(e) => e.code(),
            ApiError::PathRequired => "INVALID_PATH",
            ApiError::DirNotFound => "DIR_NOT_FOUND",
            ApiError::FileNotFound => "FILE_NOT_FOUND",
            ApiError::ReadOnly => "READONLY_MODE",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::InvalidContentType => "INVALID_CONTENT_TYPE",
            ApiError::NoFiles => "NO_FILES",
            ApiError::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Map a transfer failure, given the upload limit in megabytes.
    pub fn from_transfer(err: TransferError, max_upload_mb: u64) -> Self {
        match err {
            TransferError::Containment(e) => ApiError::Containment(e),
            TransferError::FileNotFound(_) => ApiError::FileNotFound,
            TransferError::TooLarge { .. } => ApiError::PayloadTooLarge(max_upload_mb),
            TransferError::Malformed(_) => ApiError::InvalidContentType,
            TransferError::Io(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<BrowseError> for ApiError {
    fn from(err: BrowseError) -> Self {
        match err {
            BrowseError::Containment(e) => ApiError::Containment(e),
            BrowseError::DirNotFound(_) => ApiError::DirNotFound,
            BrowseError::Io(e) => ApiError::Internal(e.to_string()),
        }
    }
}

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            tracing::error!(%detail, "Request failed");
        }

        let code = self.code();
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
            code,
        };
        let mut response = (self.status(), Json(body)).into_response();
        response.extensions_mut().insert(FailureCode(code));
        response
    }
}
