//! Session token and client origin extraction, plus cookie builders.
//!
//! The HTTP handlers and the WebSocket upgrade both go through
//! [`extract_session_token`], so a key minted by one layer is read the same
//! way by the other.

use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};
use std::net::SocketAddr;

use crate::auth::{AuthConfig, SessionKey, UNKNOWN_ORIGIN};

pub const SESSION_COOKIE_NAME: &str = "gatehouse_session";

/// Bearer token first, then the session cookie.
pub fn extract_session_token(headers: &HeaderMap) -> Option<SessionKey> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(SessionKey::from_client(token));
    }
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
                continue;
            };
            let val = val.trim();
            if key.trim() == SESSION_COOKIE_NAME && !val.is_empty() {
                return Some(SessionKey::from_client(val));
            }
        }
    }
    None
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

/// Client address used as the lockout origin.
///
/// `x-forwarded-for` (first hop), then `x-real-ip`, then the socket peer.
pub fn client_origin(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(forwarded) = forwarded {
        return forwarded.to_string();
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| UNKNOWN_ORIGIN.to_string())
}

/// `HttpOnly` session cookie living as long as the session TTL.
pub fn session_cookie(
    config: &AuthConfig,
    key: &SessionKey,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = config.session_ttl().as_secs();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}",
        key.expose()
    );
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub fn clear_session_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn bearer_wins_over_cookie() {
        let headers = headers(&[
            ("authorization", "Bearer from-bearer"),
            ("cookie", "gatehouse_session=from-cookie"),
        ]);
        assert_eq!(
            extract_session_token(&headers).map(|k| k.expose().to_string()),
            Some("from-bearer".to_string())
        );
    }

    #[test]
    fn cookie_is_found_among_others() {
        let headers = headers(&[("cookie", "theme=dark; gatehouse_session=abc123 ; lang=en")]);
        assert_eq!(
            extract_session_token(&headers).map(|k| k.expose().to_string()),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn empty_or_missing_tokens_are_ignored() {
        assert!(extract_session_token(&headers(&[("authorization", "Bearer   ")])).is_none());
        assert!(extract_session_token(&headers(&[("cookie", "gatehouse_session=")])).is_none());
        assert!(extract_session_token(&headers(&[("cookie", "other=1")])).is_none());
        assert!(extract_session_token(&HeaderMap::new()).is_none());
    }

    #[test]
    fn origin_prefers_forwarded_then_real_ip_then_peer() {
        let peer: Option<SocketAddr> = "192.0.2.7:5555".parse().ok();

        let forwarded = headers(&[
            ("x-forwarded-for", "203.0.113.1, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_origin(&forwarded, peer), "203.0.113.1");

        let real_ip = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_origin(&real_ip, peer), "198.51.100.2");

        assert_eq!(client_origin(&HeaderMap::new(), peer), "192.0.2.7");
        assert_eq!(client_origin(&HeaderMap::new(), None), UNKNOWN_ORIGIN);
    }

    #[test]
    fn cookies_carry_ttl_and_secure_flag() -> Result<(), InvalidHeaderValue> {
        let key = SessionKey::from_client("tok");
        let config = AuthConfig::new().with_session_ttl(Duration::from_secs(3600));
        assert_eq!(
            session_cookie(&config, &key)?,
            "gatehouse_session=tok; Path=/; HttpOnly; SameSite=Lax; Max-Age=3600"
        );

        let secure = config.with_session_cookie_secure(true);
        assert!(session_cookie(&secure, &key)?
            .to_str()
            .is_ok_and(|value| value.ends_with("; Secure")));
        assert_eq!(
            clear_session_cookie(&secure)?,
            "gatehouse_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Secure"
        );
        Ok(())
    }
}
