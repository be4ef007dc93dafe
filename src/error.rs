use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::fetch::FetchError;

/// Wire-facing errors. Everything a handler can fail with maps onto one of
/// these; the pipelines themselves only return their own error types.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Image URL is required")]
    MissingUrl,
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Encrypted file is required")]
    MissingFile,
    #[error("Media key is required")]
    MissingKey,
    #[error(transparent)]
    Fetch(#[from] FetchError),
    // Deliberately generic: the response must not reveal which decryption
    // step rejected the input.
    #[error("Failed to decrypt media")]
    DecryptionFailed,
    #[error("Endpoint not found")]
    NotFound,
    #[error("Internal server error")]
    Internal,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
}

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorBody,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingUrl
            | ApiError::InvalidUrl
            | ApiError::MissingFile
            | ApiError::MissingKey
            | ApiError::Fetch(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::DecryptionFailed | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::MissingUrl => "MISSING_URL",
            ApiError::InvalidUrl => "INVALID_URL",
            ApiError::MissingFile => "MISSING_FILE",
            ApiError::MissingKey => "MISSING_KEY",
            ApiError::Fetch(err) => err.code(),
            ApiError::DecryptionFailed => "DECRYPTION_FAILED",
            ApiError::NotFound => "NOT_FOUND",
            ApiError::Internal => "INTERNAL_ERROR",
        }
    }

    /// Upstream HTTP status, echoed in the envelope when a fetch received one.
    fn upstream_status(&self) -> Option<u16> {
        match self {
            ApiError::Fetch(err) => err.upstream_status(),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let resp = ErrorResponse {
            success: false,
            error: ErrorBody {
                message: self.to_string(),
                code: self.code(),
                status: self.upstream_status(),
            },
        };

        (status, Json(resp)).into_response()
    }
}
