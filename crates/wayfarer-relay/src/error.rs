//! Error types for the relay HTTP layer.
//!
//! [`RelayError`] converts into an Axum response with a JSON body of the
//! form `{"error": "...", "status": 400}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors surfaced by relay HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The request body could not be parsed.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// The request parsed but failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// A required query parameter was missing or empty.
    #[error("missing query parameter: {0}")]
    MissingParameter(&'static str),

    /// The route exists but not for this method.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidBody(_) | Self::Validation(_) | Self::MissingParameter(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });
        if let Self::Validation(errors) = &self {
            body["fields"] = serde_json::to_value(errors.field_errors()).unwrap_or_default();
        }

        (status, axum::Json(body)).into_response()
    }
}
