//! Transport error type and its HTTP mapping.
//!
//! Every failure leaves the API as
//! ```json
//! { "error": { "code": "not_found", "message": "thread 3f… not found" } }
//! ```

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tof_sync::EngineError;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    /// Malformed path, query string or body, rejected before the engine runs.
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Engine(err) => err.code(),
            ApiError::BadRequest(_) => "validation_error",
            ApiError::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(err) => match err {
                EngineError::Validation(_) => StatusCode::BAD_REQUEST,
                EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
                EngineError::CrawlInProgress => StatusCode::CONFLICT,
                EngineError::ExternalUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::Scheduler(_) | EngineError::Store(_) | EngineError::Config(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(code = self.code(), error = %self, "request failed");
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn engine_errors_map_to_statuses() {
        let cases = [
            (EngineError::validation("empty source list"), StatusCode::BAD_REQUEST),
            (EngineError::not_found("thread", Uuid::nil()), StatusCode::NOT_FOUND),
            (EngineError::CrawlInProgress, StatusCode::CONFLICT),
            (
                EngineError::ExternalUnavailable {
                    collaborator: "search",
                    reason: "timed out".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (EngineError::Config("bad weight".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }

    #[test]
    fn bad_requests_share_the_validation_code() {
        let err = ApiError::bad_request("limit must be a number");
        assert_eq!(err.code(), "validation_error");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
