//! HTTP error mapping
//!
//! Translates `TapeflowError` kinds to response codes: caller errors map to
//! 4xx, everything else is a 500 with the message preserved in the body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tapeflow_core::TapeflowError;
use tracing::warn;

/// Error wrapper returned by every handler
#[derive(Debug)]
pub struct ApiError(pub TapeflowError);

impl From<TapeflowError> for ApiError {
    fn from(err: TapeflowError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TapeflowError::Validation(_) => StatusCode::BAD_REQUEST,
            TapeflowError::NotFound(_) => StatusCode::NOT_FOUND,
            TapeflowError::Conflict(_) => StatusCode::CONFLICT,
            TapeflowError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            warn!("⚠️ Request failed: {}", self.0);
        }

        let body = Json(json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Handler result alias
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (TapeflowError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (TapeflowError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (TapeflowError::Conflict("x".into()), StatusCode::CONFLICT),
            (TapeflowError::Database("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (TapeflowError::Timeout("x".into()), StatusCode::GATEWAY_TIMEOUT),
        ];
        for (err, expected) in cases {
            let response = ApiError(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
