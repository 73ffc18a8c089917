//! Session identity at the HTTP boundary.
//!
//! Session management proper (issuing, signing, persisting) belongs to the
//! surrounding deployment; the core only consumes a stable per-client
//! session id. It is read from the `x-mws-session-id` header, with a
//! `mws-session-id` cookie accepted as a fallback for browser shells.

use axum::http::header::COOKIE;
use axum::http::HeaderMap;

use crate::error::{MwsError, Result};

pub const SESSION_HEADER: &str = "x-mws-session-id";
pub const SESSION_COOKIE: &str = "mws-session-id";

/// The session id attached to a request, if any.
pub fn session_id(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        if !value.is_empty() {
            return Some(value.to_string());
        }
    }
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == SESSION_COOKIE && !value.is_empty()).then(|| value.to_string())
        })
        .next()
}

/// Session id for an operation that cannot proceed anonymously.
pub fn require_session(headers: &HeaderMap) -> Result<String> {
    session_id(headers)
        .ok_or_else(|| MwsError::unauthorized("There is no session_id on the request"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_header_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(SESSION_HEADER, HeaderValue::from_static("from-header"));
        headers.insert(
            COOKIE,
            HeaderValue::from_static("mws-session-id=from-cookie"),
        );
        assert_eq!(session_id(&headers), Some("from-header".to_string()));
    }

    #[test]
    fn test_cookie_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("other=1; mws-session-id=abc; theme=dark"),
        );
        assert_eq!(session_id(&headers), Some("abc".to_string()));
    }

    #[test]
    fn test_missing_session_is_unauthorized() {
        let headers = HeaderMap::new();
        let err = require_session(&headers).unwrap_err();
        assert_eq!(err.status(), 401);
    }
}
