use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("CRM error: {0}")]
    Crm(#[from] CrmError),

    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotifyError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External error: {0}")]
    ExternalError(String),
}

/// Deal-source (CRM) errors
#[derive(Error, Debug)]
pub enum CrmError {
    #[error("CRM API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("CRM unreachable: {0}")]
    Unreachable(String),

    #[error("Malformed deal {deal_id}: {message}")]
    MalformedDeal { deal_id: i64, message: String },
}

/// Payment-processor (hosted checkout) errors
#[derive(Error, Debug)]
pub enum CheckoutError {
    #[error("Checkout API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Checkout API unreachable: {0}")]
    Unreachable(String),

    #[error("Malformed session payload: {0}")]
    MalformedSession(String),
}

/// Notification-channel errors
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Messenger API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Messenger unreachable: {0}")]
    Unreachable(String),

    #[error("Deal {0} has no reachable recipient")]
    NoRecipient(i64),
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            AppError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Not found: {}", what),
            ),
            AppError::InvalidInput(what) => (
                StatusCode::BAD_REQUEST,
                "INVALID_INPUT",
                format!("Invalid input: {}", what),
            ),
            AppError::Crm(e) => (
                StatusCode::BAD_GATEWAY,
                "CRM_ERROR",
                e.to_string(),
            ),
            AppError::Checkout(e) => (
                StatusCode::BAD_GATEWAY,
                "CHECKOUT_ERROR",
                e.to_string(),
            ),
            AppError::Notification(e) => (
                StatusCode::BAD_GATEWAY,
                "NOTIFICATION_ERROR",
                e.to_string(),
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::InvalidInput(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(error: reqwest::Error) -> Self {
        AppError::ExternalError(format!("HTTP request error: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
