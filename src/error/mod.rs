use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for rate limiter operations
pub type Result<T> = std::result::Result<T, LimiterError>;

/// Errors surfaced to callers of the rate limiter.
///
/// Store outages never show up here: they are absorbed by the local fallback
/// and only ever resolve to a [`Decision`](crate::rate_limit::Decision).
#[derive(Error, Debug)]
pub enum LimiterError {
    #[error("Invalid rate limit policy: {0}")]
    InvalidPolicy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LimiterError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            LimiterError::InvalidPolicy(_) => StatusCode::BAD_REQUEST,
            LimiterError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LimiterError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LimiterError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<::config::ConfigError> for LimiterError {
    fn from(err: ::config::ConfigError) -> Self {
        LimiterError::Config(err.to_string())
    }
}

impl IntoResponse for LimiterError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
