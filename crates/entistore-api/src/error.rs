//! API error types and their HTTP rendering.

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use entistore_core::error::EntistoreError;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Request-level failures. Every variant renders as a JSON
/// `{error, code}` body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("entity not found")]
    NotFound,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("version conflict")]
    VersionConflict,

    #[error("storage unavailable")]
    Unavailable,

    #[error(transparent)]
    Store(#[from] EntistoreError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::VersionConflict => StatusCode::CONFLICT,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::VersionConflict => "version_conflict",
            Self::Unavailable => "service_unavailable",
            Self::Store(_) => "internal_error",
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // Validation and storage faults are not distinguished on the wire.
            Self::Store(err) => {
                error!(error = %err, "Store operation failed");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            error: message,
            code: self.code().to_string(),
        });
        (status, body).into_response()
    }
}
