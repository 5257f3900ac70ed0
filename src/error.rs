use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::EvaluationStatus;
use crate::payments::GatewayError;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Cannot {action} an evaluation that is {from}")]
    InvalidTransition {
        from: EvaluationStatus,
        action: &'static str,
    },

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Payment gateway error: {message}")]
    PaymentGateway {
        message: String,
        funds_moved: bool,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    pub fn evaluation_not_found() -> Self {
        AppError::NotFound("Evaluation not found".to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Database(ref msg) => {
                tracing::error!("Database error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error occurred".to_string())
            }
            AppError::NotFound(ref msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            AppError::BadRequest(ref msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(ref msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::InvalidTransition { .. } => (StatusCode::CONFLICT, self.to_string()),
            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::PaymentGateway { ref message, funds_moved } => {
                tracing::error!(funds_moved, "Payment gateway error: {}", message);
                let message = if funds_moved {
                    "The payment went through but the evaluation could not be updated. Support has been alerted."
                } else {
                    "Payment processing failed. Please try again."
                };
                (StatusCode::BAD_GATEWAY, message.to_string())
            }
            AppError::Validation(ref msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::ServiceUnavailable(ref msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidSignature(msg) => {
                AppError::BadRequest(format!("Invalid webhook signature: {}", msg))
            }
            GatewayError::Malformed(msg) => {
                AppError::BadRequest(format!("Malformed webhook payload: {}", msg))
            }
            GatewayError::NotConfigured => {
                AppError::ServiceUnavailable("Payment processing is not configured".to_string())
            }
            GatewayError::Api(msg) => AppError::PaymentGateway {
                message: msg,
                funds_moved: false,
            },
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}
