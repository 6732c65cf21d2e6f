use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown notification type: {0}")]
    UnknownNotificationType(String),

    #[error("No phone verification is pending")]
    NoVerificationPending,

    #[error("Verification code has expired")]
    VerificationExpired,

    #[error("Incorrect verification code")]
    VerificationMismatch,

    #[error("Twilio error: {0}")]
    Twilio(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
                msg.clone(),
            ),
            AppError::UnknownNotificationType(t) => {
                // A caller asked for a type that has no renderer. That is a
                // programming error on the caller's side, so it gets logged
                // loudly instead of silently dropped.
                tracing::error!("Unknown notification type requested: {}", t);
                (
                    StatusCode::BAD_REQUEST,
                    "UNKNOWN_NOTIFICATION_TYPE",
                    self.to_string(),
                )
            }
            AppError::NoVerificationPending => (
                StatusCode::BAD_REQUEST,
                "VERIFICATION_NOT_PENDING",
                self.to_string(),
            ),
            AppError::VerificationExpired => (
                StatusCode::BAD_REQUEST,
                "VERIFICATION_EXPIRED",
                self.to_string(),
            ),
            AppError::VerificationMismatch => (
                StatusCode::BAD_REQUEST,
                "VERIFICATION_INCORRECT",
                self.to_string(),
            ),
            AppError::Twilio(msg) => {
                tracing::error!("Twilio error: {}", msg);
                (StatusCode::BAD_GATEWAY, "TWILIO_ERROR", msg.clone())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Jwt(e) => {
                tracing::warn!("JWT error: {:?}", e);
                (
                    StatusCode::UNAUTHORIZED,
                    "INVALID_TOKEN",
                    "Invalid or expired token".to_string(),
                )
            }
            AppError::Config(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "Server configuration error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
