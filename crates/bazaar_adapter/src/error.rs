#![forbid(unsafe_code)]

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bazaar_os::IngressError;
use bazaar_storage::StoreError;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

/// `{ "error": { "code", "message" } }`
#[derive(Debug, Clone, Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorDetail,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unprocessable(String),
    #[error("{0}")]
    BadGateway(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Unprocessable(_) => (StatusCode::UNPROCESSABLE_ENTITY, "NO_USABLE_RESULT"),
            ApiError::BadGateway(_) => (StatusCode::BAD_GATEWAY, "STORE_REJECTED"),
            ApiError::ServiceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
            }
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(code, error = %self, "request failed");
        }
        let body = ApiErrorResponse {
            error: ApiErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::StoreUnavailable { .. } => ApiError::ServiceUnavailable(e.to_string()),
            StoreError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            StoreError::Forbidden { .. } => ApiError::Forbidden(e.to_string()),
            StoreError::Rejected { .. } | StoreError::Corrupt { .. } => {
                ApiError::BadGateway(e.to_string())
            }
            StoreError::Contract(v) => ApiError::BadRequest(v.to_string()),
        }
    }
}

impl From<IngressError> for ApiError {
    fn from(e: IngressError) -> Self {
        match e {
            IngressError::InvalidInput(msg) => ApiError::BadRequest(msg),
            IngressError::NoUsableResult(_) => ApiError::Unprocessable(
                "neither source nor the local fallback produced a usable result".to_string(),
            ),
            IngressError::Store(store) => store.into(),
            IngressError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}
