//! Credential sign-in endpoint.

use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use std::sync::Arc;

use super::error::AuthError;
use super::service::{self, ClientMeta};
use super::session::issued_response;
use super::state::AuthState;
use super::types::SignInRequest;
use super::utils::{extract_client_ip, extract_user_agent, normalize_email, valid_email};

#[utoipa::path(
    post,
    path = "/v1/auth/sign-in",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Session opened", body = super::types::SessionTokensResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Email verification required"),
        (status = 423, description = "Account locked")
    ),
    tag = "auth"
)]
pub async fn sign_in(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignInRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) || request.password.is_empty() {
        // Malformed input gets the same answer as a wrong password.
        return AuthError::InvalidCredentials {
            remaining_attempts: None,
        }
        .into_response();
    }

    let meta = ClientMeta {
        ip: extract_client_ip(&headers),
        user_agent: extract_user_agent(&headers),
    };

    match service::sign_in(&auth_state, &email, &request.password, meta, Utc::now()).await {
        Ok(issued) => issued_response(&auth_state, issued),
        Err(err) => err.into_response(),
    }
}
