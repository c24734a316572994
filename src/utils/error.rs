use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::utils::response::error as error_response;

/// Error taxonomy of the reservation engine.
///
/// Gateway declines are deliberately *not* part of this enum: a declined
/// charge is a regular outcome (`PaymentResult::Unsuccessful`), not a fault.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not enough inventory to satisfy the requested quantity")]
    NotEnoughInventory,

    #[error("an access token is required for this restricted category")]
    MissingAccessToken,

    #[error("the presented access token is no longer valid")]
    InvalidAccessToken,

    #[error("offline payment is not available once the event has started")]
    OfflinePaymentNotAllowed,

    /// An update expected to affect exactly one row did not. Fatal, never
    /// retried: the persisted state no longer matches the lifecycle rules.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The gateway could not be reached or failed mid-call: the charge
    /// outcome is unknown, so the caller must not assume a decline.
    #[error("payment gateway failure")]
    Gateway(#[source] anyhow::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::NotEnoughInventory => StatusCode::CONFLICT,
            EngineError::MissingAccessToken => StatusCode::FORBIDDEN,
            EngineError::InvalidAccessToken => StatusCode::FORBIDDEN,
            EngineError::OfflinePaymentNotAllowed => StatusCode::BAD_REQUEST,
            EngineError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Gateway(_) => StatusCode::BAD_GATEWAY,
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NotEnoughInventory => "NOT_ENOUGH_INVENTORY",
            EngineError::MissingAccessToken => "MISSING_ACCESS_TOKEN",
            EngineError::InvalidAccessToken => "INVALID_ACCESS_TOKEN",
            EngineError::OfflinePaymentNotAllowed => "OFFLINE_PAYMENT_NOT_ALLOWED",
            EngineError::InvariantViolation(_) => "INVARIANT_VIOLATION",
            EngineError::Gateway(_) => "GATEWAY_ERROR",
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Database(_) => "DATABASE_ERROR",
        }
    }

    fn log(&self) {
        match self {
            EngineError::InvariantViolation(msg) => {
                error!(error = ?self, message = %msg, "Consistency violation");
            }
            EngineError::Database(e) => {
                error!(error = ?e, "Database error");
            }
            _ => {
                error!(error = ?self, "Engine error");
            }
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level messages to the client
        let public_message = match &self {
            EngineError::InvariantViolation(_) => {
                "An internal consistency error occurred".to_string()
            }
            EngineError::Database(_) => "A database error occurred".to_string(),
            other => other.to_string(),
        };

        error_response(code, public_message, status)
    }
}
