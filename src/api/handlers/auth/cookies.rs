//! Session cookie construction and extraction.
//!
//! Three cookies travel together: the access token, the opaque refresh token
//! and the session id. All are `HttpOnly`; browsers never need script access
//! to any of them. API clients may send the access token as a bearer header
//! instead.

use axum::http::header::{AUTHORIZATION, COOKIE, InvalidHeaderValue, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue};

use super::state::AuthConfig;

pub(super) const ACCESS_COOKIE_NAME: &str = "custodia_access";
pub(super) const REFRESH_COOKIE_NAME: &str = "custodia_refresh";
pub(super) const SESSION_COOKIE_NAME: &str = "custodia_session";

/// Build a single `HttpOnly` cookie with the configured domain/secure flags.
pub(super) fn build_cookie(
    config: &AuthConfig,
    name: &str,
    value: &str,
    max_age_seconds: i64,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_seconds}");
    if let Some(domain) = config.cookie_domain() {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_cookie(config: &AuthConfig, name: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    build_cookie(config, name, "", 0)
}

/// Append `Set-Cookie` headers carrying a freshly issued token triple.
pub(super) fn set_session_cookies(
    headers: &mut HeaderMap,
    config: &AuthConfig,
    access_token: &str,
    refresh_token: &str,
    session_id: &str,
) -> Result<(), InvalidHeaderValue> {
    headers.append(
        SET_COOKIE,
        build_cookie(
            config,
            ACCESS_COOKIE_NAME,
            access_token,
            config.access_ttl_seconds(),
        )?,
    );
    headers.append(
        SET_COOKIE,
        build_cookie(
            config,
            REFRESH_COOKIE_NAME,
            refresh_token,
            config.refresh_ttl_seconds(),
        )?,
    );
    headers.append(
        SET_COOKIE,
        build_cookie(
            config,
            SESSION_COOKIE_NAME,
            session_id,
            config.refresh_ttl_seconds(),
        )?,
    );
    Ok(())
}

/// Append `Set-Cookie` headers clearing all three cookies.
pub(super) fn clear_session_cookies(
    headers: &mut HeaderMap,
    config: &AuthConfig,
) -> Result<(), InvalidHeaderValue> {
    for name in [ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, SESSION_COOKIE_NAME] {
        headers.append(SET_COOKIE, clear_cookie(config, name)?);
    }
    Ok(())
}

/// Read a named cookie out of the `Cookie` request header.
pub(super) fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

/// The access token travels either as the access cookie or a bearer header.
pub(crate) fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    extract_cookie(headers, ACCESS_COOKIE_NAME)
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config() -> AuthConfig {
        AuthConfig::new(SecretString::from("0123456789abcdef0123456789abcdef")).unwrap()
    }

    #[test]
    fn cookie_carries_expected_attributes() {
        let config = config().with_access_ttl_seconds(900);
        let cookie = build_cookie(&config, ACCESS_COOKIE_NAME, "tok", 900).unwrap();
        let cookie = cookie.to_str().unwrap();
        assert_eq!(
            cookie,
            "custodia_access=tok; Path=/; HttpOnly; SameSite=Lax; Max-Age=900"
        );
    }

    #[test]
    fn secure_and_domain_flags_are_appended() {
        let config = config()
            .with_cookie_domain(Some("api.test".to_string()))
            .with_cookie_secure(true);
        let cookie = build_cookie(&config, SESSION_COOKIE_NAME, "sid", 60).unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.ends_with("; Domain=api.test; Secure"));
    }

    #[test]
    fn set_and_clear_emit_three_cookies() {
        let config = config();
        let mut headers = HeaderMap::new();
        set_session_cookies(&mut headers, &config, "a", "r", "s").unwrap();
        assert_eq!(headers.get_all(SET_COOKIE).iter().count(), 3);

        let mut headers = HeaderMap::new();
        clear_session_cookies(&mut headers, &config).unwrap();
        let cleared: Vec<_> = headers
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(cleared.len(), 3);
        assert!(cleared.iter().all(|c| c.contains("Max-Age=0")));
    }

    #[test]
    fn extract_cookie_finds_named_pair() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("custodia_session=sid-1; custodia_refresh=ref-1"),
        );
        assert_eq!(
            extract_cookie(&headers, SESSION_COOKIE_NAME).as_deref(),
            Some("sid-1")
        );
        assert_eq!(
            extract_cookie(&headers, REFRESH_COOKIE_NAME).as_deref(),
            Some("ref-1")
        );
        assert_eq!(extract_cookie(&headers, ACCESS_COOKIE_NAME), None);
    }

    #[test]
    fn bearer_header_wins_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(COOKIE, HeaderValue::from_static("custodia_access=def"));
        assert_eq!(extract_access_token(&headers).as_deref(), Some("abc"));
    }

    #[test]
    fn empty_bearer_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_access_token(&headers), None);
    }
}
