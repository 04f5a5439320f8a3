//! Group and user identity resolution
//!
//! The core never looks at HTTP: the transport resolves a group ID and a
//! user ID per request through two callbacks. The defaults are a
//! `lvt_group` cookie for the group and anonymous (`""`) for the user;
//! applications swap in their own resolution (signed cookies, sessions,
//! auth headers) without touching the wire code.

use std::sync::Arc;

use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use uuid::Uuid;

/// The cookie carrying the group identity.
pub const GROUP_COOKIE: &str = "lvt_group";

/// Callback producing a group ID from the request headers, or `None` when
/// the request carries no identity yet.
pub type GroupIdentity = Arc<dyn Fn(&HeaderMap) -> Option<String> + Send + Sync>;

/// Callback producing a user ID from the request headers; `""` groups all
/// anonymous connections.
pub type Authenticator = Arc<dyn Fn(&HeaderMap) -> String + Send + Sync>;

/// The default group identity: the `lvt_group` cookie.
pub fn cookie_group_identity() -> GroupIdentity {
    Arc::new(|headers| cookie_value(headers, GROUP_COOKIE))
}

/// The default authenticator: everyone is anonymous.
pub fn anonymous_authenticator() -> Authenticator {
    Arc::new(|_headers| String::new())
}

/// Generate a fresh group ID for a first-time visitor.
pub fn generate_group_id() -> String {
    Uuid::new_v4().to_string()
}

/// The `Set-Cookie` value planting a group identity.
pub fn group_cookie(group: &str) -> String {
    format!("{GROUP_COOKIE}={group}; Path=/; HttpOnly; SameSite=Lax")
}

/// Extract one cookie's value from the `Cookie` header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?.to_str().ok()?;
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_cookie_value_parsing() {
        let headers = headers_with_cookie("a=1; lvt_group=g-42; b=2");
        assert_eq!(cookie_value(&headers, "lvt_group"), Some("g-42".into()));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_default_identity_reads_the_group_cookie() {
        let identity = cookie_group_identity();
        let headers = headers_with_cookie("lvt_group=abc");
        assert_eq!(identity(&headers), Some("abc".into()));
        assert_eq!(identity(&HeaderMap::new()), None);
    }

    #[test]
    fn test_group_cookie_shape() {
        let cookie = group_cookie("g1");
        assert!(cookie.starts_with("lvt_group=g1"));
        assert!(cookie.contains("HttpOnly"));
    }
}
