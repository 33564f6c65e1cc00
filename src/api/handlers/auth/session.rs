//! Session endpoints: refresh, introspection, listing and logout.

use axum::extract::Extension;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use super::cookies::{
    REFRESH_COOKIE_NAME, SESSION_COOKIE_NAME, clear_session_cookies, extract_access_token,
    extract_cookie, set_session_cookies,
};
use super::error::AuthError;
use super::service::{self, IssuedSession};
use super::state::AuthState;
use super::types::{SessionInfoResponse, SessionListResponse, SessionSummary, SessionTokensResponse};

/// 200 response carrying the issued triple in the body and as cookies.
pub(super) fn issued_response(auth_state: &AuthState, issued: IssuedSession) -> Response {
    let mut headers = HeaderMap::new();
    if let Err(err) = set_session_cookies(
        &mut headers,
        auth_state.config(),
        &issued.access_token,
        &issued.refresh_token,
        &issued.session_id.to_string(),
    ) {
        error!("Failed to build session cookies: {err}");
        return AuthError::Internal(err.into()).into_response();
    }

    let body = SessionTokensResponse {
        access_token: issued.access_token,
        refresh_token: issued.refresh_token,
        session_id: issued.session_id,
        expires_in: issued.expires_in,
        expires_at: issued.expires_at,
        principal: issued.principal,
    };
    (StatusCode::OK, headers, Json(body)).into_response()
}

/// Attach cookie-clearing headers to an auth error response.
fn denied_clearing_cookies(auth_state: &AuthState, err: AuthError) -> Response {
    let mut response = err.into_response();
    let mut headers = HeaderMap::new();
    if clear_session_cookies(&mut headers, auth_state.config()).is_ok() {
        for value in headers.get_all(axum::http::header::SET_COOKIE) {
            response
                .headers_mut()
                .append(axum::http::header::SET_COOKIE, value.clone());
        }
    }
    response
}

fn refresh_credentials(headers: &HeaderMap) -> Option<(Uuid, String)> {
    let session_id = extract_cookie(headers, SESSION_COOKIE_NAME)?;
    let session_id = Uuid::parse_str(&session_id).ok()?;
    let refresh_token = extract_cookie(headers, REFRESH_COOKIE_NAME)?;
    Some((session_id, refresh_token))
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    responses(
        (status = 200, description = "Session rotated", body = SessionTokensResponse),
        (status = 401, description = "Session invalid; auth cookies cleared")
    ),
    tag = "auth"
)]
pub async fn refresh(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    let Some((session_id, refresh_token)) = refresh_credentials(&headers) else {
        return denied_clearing_cookies(&auth_state, AuthError::SessionNotFound);
    };

    match service::refresh(&auth_state, session_id, &refresh_token, Utc::now()).await {
        Ok(issued) => issued_response(&auth_state, issued),
        Err(err) => denied_clearing_cookies(&auth_state, err),
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionInfoResponse),
        (status = 401, description = "No usable session; auth cookies cleared")
    ),
    tag = "auth"
)]
pub async fn session(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    let now = Utc::now();

    // A live access token answers without touching storage beyond the
    // activity bump.
    if let Some(token) = extract_access_token(&headers) {
        match service::verify_access(&auth_state, &token, now) {
            Ok(claims) => {
                let account = match auth_state.store().find_account_by_id(claims.sub).await {
                    Ok(account) => account,
                    Err(err) => {
                        return AuthError::StorageUnavailable(err).into_response();
                    }
                };
                let Some(account) = account.filter(|account| account.active) else {
                    return denied_clearing_cookies(&auth_state, AuthError::SessionNotFound);
                };
                if let Err(err) = auth_state.store().touch_session(claims.sid, now).await {
                    error!("Failed to touch session: {err:#}");
                }
                let body = SessionInfoResponse {
                    session_id: claims.sid,
                    principal: super::service::principal_of(&account),
                };
                return (StatusCode::OK, Json(body)).into_response();
            }
            Err(AuthError::TokenExpired) => {}
            Err(err) => return denied_clearing_cookies(&auth_state, err),
        }
    }

    // Token missing or expired: try a transparent refresh before declaring
    // the session dead.
    let Some((session_id, refresh_token)) = refresh_credentials(&headers) else {
        return denied_clearing_cookies(&auth_state, AuthError::SessionNotFound);
    };
    match service::refresh(&auth_state, session_id, &refresh_token, now).await {
        Ok(issued) => {
            let mut response_headers = HeaderMap::new();
            if let Err(err) = set_session_cookies(
                &mut response_headers,
                auth_state.config(),
                &issued.access_token,
                &issued.refresh_token,
                &issued.session_id.to_string(),
            ) {
                error!("Failed to build session cookies: {err}");
                return AuthError::Internal(err.into()).into_response();
            }
            let body = SessionInfoResponse {
                session_id: issued.session_id,
                principal: issued.principal,
            };
            (StatusCode::OK, response_headers, Json(body)).into_response()
        }
        Err(err) => denied_clearing_cookies(&auth_state, err),
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/sessions",
    responses(
        (status = 200, description = "Active sessions of the caller", body = SessionListResponse),
        (status = 401, description = "Not authenticated")
    ),
    tag = "auth"
)]
pub async fn sessions(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    let Some(token) = extract_access_token(&headers) else {
        return AuthError::TokenMalformed.into_response();
    };
    let claims = match service::verify_access(&auth_state, &token, Utc::now()) {
        Ok(claims) => claims,
        Err(err) => return err.into_response(),
    };

    match auth_state.store().list_sessions(claims.sub).await {
        Ok(sessions) => {
            let sessions = sessions
                .into_iter()
                .map(|record| SessionSummary {
                    session_id: record.id,
                    ip: record.ip,
                    user_agent: record.user_agent,
                    created_at: record.created_at,
                    last_activity_at: record.last_activity_at,
                    expires_at: record.expires_at,
                    current: record.id == claims.sid,
                })
                .collect();
            (StatusCode::OK, Json(SessionListResponse { sessions })).into_response()
        }
        Err(err) => AuthError::StorageUnavailable(err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    // Prefer the session cookie; fall back to the sid claim of a still-valid
    // access token.
    let session_id = extract_cookie(&headers, SESSION_COOKIE_NAME)
        .and_then(|raw| Uuid::parse_str(&raw).ok())
        .or_else(|| {
            extract_access_token(&headers)
                .and_then(|token| service::verify_access(&auth_state, &token, Utc::now()).ok())
                .map(|claims| claims.sid)
        });

    if let Some(session_id) = session_id {
        if let Err(err) = auth_state.store().deactivate_session(session_id).await {
            error!("Failed to deactivate session: {err:#}");
        }
    }

    // Always clear the cookies, even if the session record was missing.
    let mut headers = HeaderMap::new();
    let _ = clear_session_cookies(&mut headers, auth_state.config());
    (StatusCode::NO_CONTENT, headers).into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout-all",
    responses(
        (status = 204, description = "All sessions of the caller cleared"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "auth"
)]
pub async fn logout_all(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> Response {
    let Some(token) = extract_access_token(&headers) else {
        return AuthError::TokenMalformed.into_response();
    };
    let claims = match service::verify_access(&auth_state, &token, Utc::now()) {
        Ok(claims) => claims,
        Err(err) => return err.into_response(),
    };

    if let Err(err) = auth_state.store().deactivate_all(claims.sub).await {
        return AuthError::StorageUnavailable(err).into_response();
    }

    let mut headers = HeaderMap::new();
    let _ = clear_session_cookies(&mut headers, auth_state.config());
    (StatusCode::NO_CONTENT, headers).into_response()
}
