//! # Custodia (Authentication & Session Core)
//!
//! `custodia` is the authentication and session-management authority for the
//! surrounding workforce-management system. It owns credential verification
//! with brute-force lockout, dual-token (access/refresh) session issuance and
//! rotation, single-use email verification codes, background session expiry
//! sweeping, and an authenticated realtime push channel.
//!
//! ## Sessions & Tokens
//!
//! Every sign-in creates one session row per device/browser. The access token
//! is a short-lived signed assertion verified without a storage lookup; the
//! refresh token is a high-entropy opaque secret stored only as a SHA-256
//! fingerprint. Refreshing rotates the fingerprint in place (the session id is
//! stable), and reuse of an already-rotated refresh token revokes the session.
//!
//! ## Lockout
//!
//! Failed sign-ins increment a per-account counter atomically at the storage
//! layer. Reaching the configured threshold locks the account for the lockout
//! window; a success or an elapsed window resets the counter to zero.
//!
//! Resource CRUD (employees, departments, projects, ...) lives in sibling
//! services. They call into this core only to obtain an authenticated
//! principal (account id, role, capability set).

pub mod api;
pub mod cli;

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
