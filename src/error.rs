use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{message}")]
    Upstream { message: String, quota: bool },
    #[error("{0}")]
    Store(String),
}

impl ApiError {
    // full chain goes to the log, the caller sees only `message`
    pub fn store(err: anyhow::Error, message: &str) -> Self {
        tracing::error!("{message}: {err:#}");
        ApiError::Store(message.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::Upstream { message, quota: true } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "error": message, "isQuotaError": true }),
            ),
            ApiError::Upstream { message, quota: false } => {
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
            }
            ApiError::Store(msg) => (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": msg })),
        };
        (status, Json(body)).into_response()
    }
}
