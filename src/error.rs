use crate::client::BdlError;
use crate::store::StoreError;
use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

/// Request failure, rendered as `{"detail": ...}` with a matching status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Upstream(#[from] BdlError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid request: {0}")]
    Validation(String),
}

impl ApiError {
    fn status_and_detail(&self) -> (StatusCode, Value) {
        match self {
            ApiError::Upstream(BdlError::Configuration(msg)) | ApiError::Configuration(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!(msg))
            }
            ApiError::Upstream(BdlError::RateLimited { retry_after_secs }) => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({
                    "error": "Too many requests (rate limit).",
                    "retry_after_seconds": retry_after_secs,
                }),
            ),
            ApiError::Upstream(BdlError::UpstreamServer { status, body })
            | ApiError::Upstream(BdlError::UpstreamClient { status, body }) => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                body.clone(),
            ),
            ApiError::Upstream(BdlError::Transport(e)) => (StatusCode::BAD_GATEWAY, json!(e.to_string())),
            ApiError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, json!(e.to_string())),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, json!(msg)),
            ApiError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, json!(msg)),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status_and_detail().0
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = self.status_and_detail();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
