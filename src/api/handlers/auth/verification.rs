//! Verification-code endpoints: request, verify, password reset.

use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

use super::error::AuthError;
use super::service::{self, ClientMeta};
use super::session::issued_response;
use super::state::AuthState;
use super::store::CodePurpose;
use super::types::{
    ResetPasswordRequest, VerificationRequest, VerificationRequestedResponse, VerifyCodeRequest,
};
use super::utils::{extract_client_ip, extract_user_agent, normalize_email, valid_email};

const MIN_PASSWORD_LENGTH: usize = 12;

/// 400 with a stable reason code for purposes this endpoint does not consume.
fn unsupported_purpose_response() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": "unsupported_purpose",
            "message": "reset-password codes are consumed by the password reset endpoint",
        })),
    )
        .into_response()
}

fn parse_purpose(purpose: &str) -> Option<CodePurpose> {
    match purpose {
        "verify-email" => Some(CodePurpose::VerifyEmail),
        "reset-password" => Some(CodePurpose::ResetPassword),
        _ => None,
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/verification/request",
    request_body = VerificationRequest,
    responses(
        (status = 202, description = "Code issued if the address exists", body = VerificationRequestedResponse),
        (status = 400, description = "Malformed request")
    ),
    tag = "verification"
)]
pub async fn request(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerificationRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let Some(purpose) = parse_purpose(&request.purpose) else {
        return (StatusCode::BAD_REQUEST, "Unknown purpose".to_string()).into_response();
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        // Invalid addresses get the same opaque answer as unknown ones.
        return (
            StatusCode::ACCEPTED,
            Json(VerificationRequestedResponse {
                expires_in: auth_state.config().code_ttl_seconds(),
            }),
        )
            .into_response();
    }

    match service::request_code(&auth_state, &email, purpose, Utc::now()).await {
        Ok(expires_in) => (
            StatusCode::ACCEPTED,
            Json(VerificationRequestedResponse { expires_in }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/verification/verify",
    request_body = VerifyCodeRequest,
    responses(
        (status = 204, description = "Code consumed"),
        (status = 400, description = "Invalid code or malformed request"),
        (status = 409, description = "Code already consumed"),
        (status = 410, description = "Code expired")
    ),
    tag = "verification"
)]
pub async fn verify(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyCodeRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let Some(purpose) = parse_purpose(&request.purpose) else {
        return (StatusCode::BAD_REQUEST, "Unknown purpose".to_string()).into_response();
    };

    let email = normalize_email(&request.email);
    let now = Utc::now();
    let result = match purpose {
        CodePurpose::VerifyEmail => service::verify_email(&auth_state, &email, &request.code, now).await,
        // Reset codes are only consumed together with a new password, so a
        // standalone verify cannot burn one.
        CodePurpose::ResetPassword => return unsupported_purpose_response(),
    };

    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/password/reset",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password replaced; fresh session issued", body = super::types::SessionTokensResponse),
        (status = 400, description = "Invalid code or weak password"),
        (status = 409, description = "Code already consumed"),
        (status = 410, description = "Code expired")
    ),
    tag = "verification"
)]
pub async fn reset_password(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    if request.new_password.len() < MIN_PASSWORD_LENGTH {
        return (
            StatusCode::BAD_REQUEST,
            format!("Password must be at least {MIN_PASSWORD_LENGTH} characters"),
        )
            .into_response();
    }

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return AuthError::VerificationCodeInvalid.into_response();
    }

    let meta = ClientMeta {
        ip: extract_client_ip(&headers),
        user_agent: extract_user_agent(&headers),
    };

    match service::reset_password(
        &auth_state,
        &email,
        &request.code,
        &request.new_password,
        meta,
        Utc::now(),
    )
    .await
    {
        Ok(issued) => issued_response(&auth_state, issued),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::email::LogEmailSender;
    use crate::api::handlers::auth::state::AuthConfig;
    use crate::api::handlers::auth::store::{AuthStore, MemoryAuthStore};
    use secrecy::SecretString;

    #[tokio::test]
    async fn verify_rejects_reset_codes_with_a_reason_code() {
        use crate::api::handlers::auth::store::CodeOutcome;
        use crate::api::handlers::auth::utils::hash_verification_code;
        use chrono::Duration;

        let store = Arc::new(MemoryAuthStore::new());
        let config =
            AuthConfig::new(SecretString::from("0123456789abcdef0123456789abcdef")).unwrap();
        let state = Arc::new(AuthState::new(
            config,
            Arc::clone(&store) as Arc<dyn AuthStore>,
            Arc::new(LogEmailSender),
        ));

        let now = Utc::now();
        let code_hash = hash_verification_code("123456");
        store
            .store_verification_code(
                "a@test",
                CodePurpose::ResetPassword,
                &code_hash,
                now + Duration::seconds(600),
                now,
            )
            .await
            .unwrap();

        let response = verify(
            Extension(state),
            Some(Json(VerifyCodeRequest {
                email: "a@test".to_string(),
                purpose: "reset-password".to_string(),
                code: "123456".to_string(),
            })),
        )
        .await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["error"], "unsupported_purpose");

        // The stored code must survive the rejected attempt.
        let outcome = store
            .consume_verification_code("a@test", CodePurpose::ResetPassword, &code_hash, now)
            .await
            .unwrap();
        assert_eq!(outcome, CodeOutcome::Consumed);
    }

    #[test]
    fn purposes_parse_exactly() {
        assert_eq!(parse_purpose("verify-email"), Some(CodePurpose::VerifyEmail));
        assert_eq!(
            parse_purpose("reset-password"),
            Some(CodePurpose::ResetPassword)
        );
        assert_eq!(parse_purpose("Verify-Email"), None);
        assert_eq!(parse_purpose(""), None);
    }
}
