use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use impair_core::error::ImpairError;

// ---------------------------------------------------------------------------
// Internal sentinel for explicit 400 errors
// ---------------------------------------------------------------------------

/// Carries a request-shape problem (bad query parameter, mismatched id)
/// through the `anyhow::Error` chain.
#[derive(Debug)]
struct BadRequestError(String);

impl std::fmt::Display for BadRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadRequestError {}

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequestError(msg.into()).into())
    }
}

fn status_for(e: &ImpairError) -> StatusCode {
    match e {
        ImpairError::RouterNotFound(_) | ImpairError::SequenceNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        ImpairError::RouterExists(_)
        | ImpairError::SequenceExists(_)
        | ImpairError::AlreadyRunning(_) => StatusCode::CONFLICT,
        ImpairError::NotInitialized
        | ImpairError::InvalidId(_)
        | ImpairError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
        ImpairError::NodeUnreachable(_)
        | ImpairError::AuthRejected(_)
        | ImpairError::CommandRejected(_) => StatusCode::BAD_GATEWAY,
        ImpairError::AdapterTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ImpairError::ControlLoopStopped => StatusCode::SERVICE_UNAVAILABLE,
        ImpairError::AdapterFault(_)
        | ImpairError::Ledger(_)
        | ImpairError::Io(_)
        | ImpairError::Yaml(_)
        | ImpairError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = if self.0.downcast_ref::<BadRequestError>().is_some() {
            StatusCode::BAD_REQUEST
        } else if let Some(e) = self.0.downcast_ref::<ImpairError>() {
            status_for(e)
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn status(e: ImpairError) -> StatusCode {
        AppError(e.into()).into_response().status()
    }

    #[test]
    fn not_found_kinds_map_to_404() {
        assert_eq!(status(ImpairError::RouterNotFound("r".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(ImpairError::SequenceNotFound("s".into())), StatusCode::NOT_FOUND);
    }

    #[test]
    fn already_running_maps_to_409() {
        assert_eq!(status(ImpairError::AlreadyRunning("wan".into())), StatusCode::CONFLICT);
    }

    #[test]
    fn validation_maps_to_400() {
        assert_eq!(
            status(ImpairError::validation("offset 12 exceeds cycle 10")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status(ImpairError::InvalidId("BAD ID".into())), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn device_failures_map_to_gateway_statuses() {
        assert_eq!(status(ImpairError::NodeUnreachable("edge".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(status(ImpairError::AuthRejected("edge".into())), StatusCode::BAD_GATEWAY);
        assert_eq!(
            status(ImpairError::AdapterTimeout(Duration::from_secs(30))),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn storage_errors_map_to_500() {
        assert_eq!(
            status(ImpairError::Io(std::io::Error::other("disk full"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(ImpairError::Ledger("corrupt".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(ImpairError::AdapterFault("task aborted".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn foreign_error_maps_to_500() {
        let err = AppError(anyhow::anyhow!("something unexpected"));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn bad_request_constructor_maps_to_400() {
        let err = AppError::bad_request("limit must be a number");
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn response_body_is_json() {
        let response = AppError(ImpairError::SequenceNotFound("x".into()).into()).into_response();
        let ct = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .expect("should have content-type");
        assert!(ct.to_str().unwrap().contains("application/json"));
    }
}
