//! Error bridge between the issuance domain and HTTP responses.

use crate::error::IssueError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// HTTP-facing error carrying a status, a client-safe message and a stable
/// error code. The optional source is logged, never sent to the client.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: &'static str,
    source: Option<anyhow::Error>,
}

impl AppError {
    const fn new(status: StatusCode, message: String, code: &'static str) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Attach the underlying error for server-side logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "BAD_REQUEST")
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND",
        )
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE",
        )
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR",
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    message = %self.message,
                    "request failed"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<IssueError> for AppError {
    fn from(err: IssueError) -> Self {
        match err {
            IssueError::Validation(msg) => Self::bad_request(msg),
            IssueError::StockNotInitialized(event_id) => {
                Self::unavailable(format!("stock not initialized for event {event_id}"))
            }
            IssueError::Store(e) => Self::unavailable(e.to_string()),
            IssueError::PublishFailed { .. } => {
                Self::unavailable("issuance could not be made durable, please retry")
            }
            IssueError::DeadlineExceeded => Self::unavailable("request deadline exceeded"),
            IssueError::Internal(msg) => Self::internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProduceError, StoreError};
    use crate::types::EventId;

    #[test]
    fn issue_errors_map_to_their_status_codes() {
        let cases: Vec<(IssueError, StatusCode)> = vec![
            (
                IssueError::Validation("empty".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                IssueError::StockNotInitialized(EventId::new("e1")),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                IssueError::Store(StoreError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                IssueError::PublishFailed {
                    compensated: true,
                    source: ProduceError::Delivery {
                        topic: "t".into(),
                        reason: "broker down".into(),
                    },
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (IssueError::DeadlineExceeded, StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (err, expected) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status, expected);
        }
    }
}
