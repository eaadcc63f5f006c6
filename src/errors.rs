use crate::services::gateway_service::GatewayError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// An HTTP error carrying the status and the human-readable message sent to
/// the caller.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::EmptyKey => AppError::not_found("Not found"),
            GatewayError::MissingCredentials => AppError::new(
                StatusCode::UNAUTHORIZED,
                "Unauthorized: Missing or invalid authorization header",
            ),
            GatewayError::Forbidden(reason) => {
                AppError::new(StatusCode::FORBIDDEN, format!("Forbidden: {}", reason))
            }
            GatewayError::ObjectNotFound(_) => AppError::not_found("Object Not Found"),
            // detail is logged by the gateway, not echoed
            GatewayError::Store { .. } => AppError::internal("Internal Server Error"),
        }
    }
}
