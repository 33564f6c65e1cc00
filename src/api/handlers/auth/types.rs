//! Request/response types for auth endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::principal::Principal;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// Body returned whenever a session is issued or rotated; the same values
/// also travel as `Set-Cookie` headers for browser clients.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionTokensResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: Uuid,
    /// Seconds until the access token expires.
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
    pub principal: Principal,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionInfoResponse {
    pub session_id: Uuid,
    pub principal: Principal,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// True for the session the request was authenticated under.
    pub current: bool,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionSummary>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerificationRequest {
    pub email: String,
    /// `verify-email` or `reset-password`.
    pub purpose: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerificationRequestedResponse {
    /// Seconds until the code expires. Returned regardless of whether an
    /// account exists for the address.
    pub expires_in: i64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyCodeRequest {
    pub email: String,
    /// `verify-email` or `reset-password`.
    pub purpose: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}
