//! HTTP-facing error type for job submission/query routes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("media error: {0}")]
    Media(#[from] vsr_media::MediaError),

    #[error("store error: {0}")]
    Store(#[from] vsr_store::StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(vsr_store::StoreError::JobNotFound(_))
            | ApiError::Store(vsr_store::StoreError::BatchNotFound(_))
            | ApiError::Store(vsr_store::StoreError::WorkerNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Media(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = if status == StatusCode::INTERNAL_SERVER_ERROR
            && std::env::var("ENVIRONMENT").unwrap_or_default() == "production"
        {
            "an internal error occurred".to_string()
        } else {
            self.to_string()
        };
        (status, Json(ErrorResponse { detail })).into_response()
    }
}
