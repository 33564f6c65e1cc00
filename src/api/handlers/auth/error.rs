//! Error taxonomy for the auth endpoints.
//!
//! Every failure surfaced to a client maps to a stable `reason_code` string
//! and an HTTP status. Storage failures are logged server-side and reported
//! as an opaque 500.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials { remaining_attempts: Option<u32> },
    #[error("account locked")]
    AccountLocked { retry_in_seconds: i64 },
    #[error("email verification required")]
    EmailVerificationRequired,
    #[error("access token expired")]
    TokenExpired,
    #[error("access token malformed")]
    TokenMalformed,
    #[error("session not found")]
    SessionNotFound,
    #[error("session expired")]
    SessionExpired,
    #[error("refresh token reuse detected")]
    TokenReuseDetected,
    #[error("verification code invalid")]
    VerificationCodeInvalid,
    #[error("verification code expired")]
    VerificationCodeExpired,
    #[error("verification code already consumed")]
    VerificationCodeAlreadyConsumed,
    #[error("storage unavailable")]
    StorageUnavailable(#[source] anyhow::Error),
    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl AuthError {
    #[must_use]
    pub const fn reason_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials { .. } => "invalid_credentials",
            Self::AccountLocked { .. } => "account_locked",
            Self::EmailVerificationRequired => "email_verification_required",
            Self::TokenExpired => "token_expired",
            Self::TokenMalformed => "token_malformed",
            Self::SessionNotFound => "session_not_found",
            Self::SessionExpired => "session_expired",
            Self::TokenReuseDetected => "token_reuse_detected",
            Self::VerificationCodeInvalid => "verification_code_invalid",
            Self::VerificationCodeExpired => "verification_code_expired",
            Self::VerificationCodeAlreadyConsumed => "verification_code_already_consumed",
            Self::StorageUnavailable(_) => "storage_unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials { .. } => StatusCode::UNAUTHORIZED,
            Self::AccountLocked { .. } => StatusCode::LOCKED,
            Self::EmailVerificationRequired => StatusCode::FORBIDDEN,
            Self::TokenExpired
            | Self::TokenMalformed
            | Self::SessionNotFound
            | Self::SessionExpired
            | Self::TokenReuseDetected => StatusCode::UNAUTHORIZED,
            Self::VerificationCodeInvalid => StatusCode::BAD_REQUEST,
            Self::VerificationCodeExpired => StatusCode::GONE,
            Self::VerificationCodeAlreadyConsumed => StatusCode::CONFLICT,
            Self::StorageUnavailable(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.reason_code(),
            "message": self.to_string(),
        });

        match &self {
            Self::InvalidCredentials {
                remaining_attempts: Some(remaining),
            } => {
                body["remaining_attempts"] = json!(remaining);
            }
            Self::AccountLocked { retry_in_seconds } => {
                body["lockout_seconds"] = json!(retry_in_seconds);
            }
            Self::StorageUnavailable(err) | Self::Internal(err) => {
                error!("Request failed: {err:#}");
                // Internal details never reach the client.
                body["message"] = json!("internal error");
            }
            _ => {}
        }

        (self.status(), Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageUnavailable(err.into())
    }
}
