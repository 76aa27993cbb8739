//! Error types for HTTP handlers.
//!
//! [`AppError`] carries ordinary HTTP failures. Pay-request failures are not
//! HTTP errors: [`ProtocolError`] renders as a `200 OK` envelope.

use crate::issuer::IssueError;
use crate::lightning::ProcessorError;
use crate::purchase::PurchaseError;
use crate::reconciler::ReconcileError;
use crate::store::StoreError;
use crate::uma::ProtocolError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;

/// Application error type for HTTP handlers.
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Internal error (logged, never sent to the client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Attach the underlying error.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// HTTP status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message.into(), "UNAUTHORIZED".to_string())
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} with id {id} not found"),
            "NOT_FOUND".to_string(),
        )
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message.into(), "CONFLICT".to_string())
    }

    /// Create a 422 Unprocessable Entity error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            message.into(),
            "VALIDATION_ERROR".to_string(),
        )
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE".to_string(),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: String,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Internal server error"
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

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::NotFound(what) => Self::new(
                StatusCode::NOT_FOUND,
                format!("{what} not found"),
                "NOT_FOUND".to_string(),
            ),
            StoreError::SoldOut(_) => Self::new(
                StatusCode::CONFLICT,
                err.to_string(),
                "SOLD_OUT".to_string(),
            ),
            StoreError::EventInactive(_) | StoreError::Conflict(_) => Self::conflict(err.to_string()),
            StoreError::Database(_) => Self::internal("Storage error").with_source(err),
        }
    }
}

impl From<PurchaseError> for AppError {
    fn from(err: PurchaseError) -> Self {
        match err {
            PurchaseError::InvalidAddress(_)
            | PurchaseError::MissingAddress
            | PurchaseError::Issuer(IssueError::InvalidAddress(_) | IssueError::ZeroAmount) => {
                Self::validation(err.to_string())
            },
            PurchaseError::EventNotFound(id) => Self::not_found("Event", id),
            PurchaseError::TicketNotFound(id) => Self::not_found("Ticket", id),
            PurchaseError::PaymentNotFound(id) => Self::not_found("Payment", id),
            PurchaseError::SoldOut(_) => Self::new(
                StatusCode::CONFLICT,
                err.to_string(),
                "SOLD_OUT".to_string(),
            ),
            PurchaseError::EventInactive(_) | PurchaseError::NotRetryable { .. } => {
                Self::conflict(err.to_string())
            },
            PurchaseError::Issuer(IssueError::Processor(ProcessorError::Unavailable(_))) => {
                Self::unavailable("Payment processor unavailable").with_source(err)
            },
            PurchaseError::Issuer(IssueError::Processor(_)) => Self::new(
                StatusCode::BAD_GATEWAY,
                "Payment processor rejected the invoice".to_string(),
                "PROCESSOR_ERROR".to_string(),
            )
            .with_source(err),
            PurchaseError::Store(store) => store.into(),
        }
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::InvalidSignature => Self::unauthorized(err.to_string()),
            other => Self::internal("Settlement could not be reconciled").with_source(other),
        }
    }
}

impl IntoResponse for ProtocolError {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}
