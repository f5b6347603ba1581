use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// HTTP-facing error. Webhook callers only ever see these; processing
/// failures after the 202 are reported through the audit and recovery ledgers.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Signature error: {0}")]
    Signature(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Signature(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ExternalService(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable identifier for clients that branch on the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Signature(_) => "invalid_signature",
            AppError::NotFound(_) => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::ValidationError(_) => "validation_failed",
            AppError::Unavailable(_) => "unavailable",
            AppError::ExternalService(_) => "upstream_error",
            AppError::Internal(_) => "internal",
        }
    }

    fn message(&self) -> &str {
        match self {
            AppError::Signature(msg)
            | AppError::NotFound(msg)
            | AppError::BadRequest(msg)
            | AppError::ValidationError(msg)
            | AppError::Unavailable(msg)
            | AppError::ExternalService(msg)
            | AppError::Internal(msg) => msg,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // rejected webhooks are routine; only our own failures are errors
        if status.is_server_error() {
            tracing::error!("Error: {}: {}", status, self.message());
        } else {
            tracing::warn!("Rejected request: {}: {}", status, self.message());
        }

        let body = Json(json!({
            "error": self.message(),
            "code": self.code(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}
