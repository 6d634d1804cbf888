//! API error type with HTTP response mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dsdk::SdkError;

/// API-level error wrapping the SDK error kinds.
///
/// Validation problems map to 400, unknown flows to 404, rejected
/// transitions and racing inserts to 409, everything else to 500. The body
/// carries the error kind and message.
#[derive(Debug)]
pub struct ApiError(SdkError);

impl From<SdkError> for ApiError {
    fn from(err: SdkError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            SdkError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            SdkError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION"),
            SdkError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            SdkError::TransitionForbidden { .. } => (StatusCode::CONFLICT, "TRANSITION_FORBIDDEN"),
            SdkError::AlreadyExists(_) => (StatusCode::CONFLICT, "CONFLICT"),
            SdkError::Handler { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "HANDLER"),
            SdkError::Cancelled => (StatusCode::INTERNAL_SERVER_ERROR, "CANCELLED"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal server error");
        }

        let body = serde_json::json!({ "kind": kind, "error": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsdk::DataFlowState;

    fn status_of(err: SdkError) -> StatusCode {
        ApiError(err).into_response().status()
    }

    #[test]
    fn validation_errors_are_bad_requests() {
        assert_eq!(
            status_of(SdkError::Validation("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SdkError::InvalidInput("x".to_string())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn missing_flows_are_not_found() {
        assert_eq!(
            status_of(SdkError::NotFound("p1".to_string())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn rejected_transitions_are_conflicts() {
        let err = SdkError::TransitionForbidden {
            id: "p1".to_string(),
            from: DataFlowState::Terminated,
            to: DataFlowState::Started,
        };
        assert_eq!(status_of(err), StatusCode::CONFLICT);
        assert_eq!(
            status_of(SdkError::AlreadyExists("p1".to_string())),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn handler_failures_are_internal() {
        let err = SdkError::handler("p1", "boom");
        assert_eq!(status_of(err), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
