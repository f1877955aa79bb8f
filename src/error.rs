use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Display;
use tracing::error;

use crate::workflow::EngineError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    details: Option<Value>,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
            details: self.details,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl From<EngineError> for AppError {
    fn from(value: EngineError) -> Self {
        let message = value.to_string();
        match value {
            EngineError::NotFound(_) => AppError::new(StatusCode::NOT_FOUND, message),
            EngineError::PermissionDenied(_) => AppError::forbidden(message),
            EngineError::InvalidInput(_) => AppError::bad_request(message),
            EngineError::IllegalTransition { from, to, .. } => AppError::conflict(message)
                .with_details(json!({ "from": from.as_str(), "to": to.as_str() })),
            EngineError::DuplicateApprover(user_id) => {
                AppError::conflict(message).with_details(json!({ "user_id": user_id }))
            }
            EngineError::ConflictRequiresStrategy {
                existing,
                document_number,
            } => AppError::conflict(message).with_details(json!({
                "existing_version_id": existing,
                "document_number": document_number,
                "strategies": ["discard", "convert"],
            })),
            EngineError::InvalidState(_)
            | EngineError::DeletionNotAllowed(_)
            | EngineError::Inactive(_)
            | EngineError::SequenceExhausted(_)
            | EngineError::ConcurrencyConflict => AppError::conflict(message),
            EngineError::Queue(_) | EngineError::Database(_) => {
                error!(error = %message, "workflow operation failed");
                AppError::internal(message)
            }
        }
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::not_found(),
            _ => AppError::internal(value),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::internal(value)
    }
}
