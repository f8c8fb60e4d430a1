//! API error types and JSON error response formatting.
//!
//! Every refusal the HTTP surface produces goes through `ApiError`, so error
//! bodies share one shape: `{error, message, details?}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use switchboard_action::rate_limit::WINDOW;
use switchboard_action::{DispatchError, JobError, ValidationError};

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "missing_field", "not_found").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured details about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 - request failed schema or identity validation.
    Validation(ValidationError),
    /// 429 - per-action rate limit reached.
    RateLimited(DispatchError),
    /// 400 - body or path could not be parsed.
    BadRequest(String),
    /// 404 - resource does not exist.
    NotFound(String),
    /// 500 - unexpected server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            ApiError::Validation(err) => (
                StatusCode::BAD_REQUEST,
                err.code(),
                err.to_string(),
                Some(json!({ "accepted": false })),
            ),
            ApiError::RateLimited(err) => {
                let details = match &err {
                    DispatchError::RateLimited { action, limit } => json!({
                        "accepted": false,
                        "action": action,
                        "limit": limit,
                        "window_secs": WINDOW.as_secs(),
                    }),
                    DispatchError::Validation(_) => json!({ "accepted": false }),
                };
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limited",
                    err.to_string(),
                    Some(details),
                )
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg, None),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg, None),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg, None)
            }
        };

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Validation(inner) => ApiError::Validation(inner),
            limited @ DispatchError::RateLimited { .. } => ApiError::RateLimited(limited),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NotFound(_) => ApiError::NotFound(err.to_string()),
            JobError::InvalidTransition(..) => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_action::ActionName;
    use uuid::Uuid;

    #[test]
    fn test_validation_maps_to_400() {
        let err: ApiError = DispatchError::Validation(ValidationError::ArgsNotObject).into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_rate_limited_maps_to_429() {
        let err: ApiError = DispatchError::RateLimited {
            action: ActionName::SendChat,
            limit: 5,
        }
        .into();
        assert_eq!(err.into_response().status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn test_job_not_found_maps_to_404() {
        let err: ApiError = JobError::NotFound(Uuid::new_v4()).into();
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }
}
