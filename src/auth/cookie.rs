//! Session cookie parsing and writing.

use axum::http::{HeaderMap, HeaderValue, header};

use crate::session::TokenPair;

/// Cookie name for the access token.
pub const ACCESS_COOKIE_NAME: &str = "access_token";

/// Cookie name for the refresh token.
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// Access cookie max-age: 15 minutes
pub const ACCESS_COOKIE_MAX_AGE_SECS: u64 = 15 * 60;

/// Refresh cookie max-age: 30 days, longer than the token it carries
pub const REFRESH_COOKIE_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

/// Writes the session cookies onto responses.
///
/// Cookies are always `HttpOnly; SameSite=Lax; Path=/`. In production they
/// are also `Secure` and scoped to the shared parent domain.
#[derive(Debug, Clone, Default)]
pub struct CookieBinder {
    secure: bool,
    domain: Option<String>,
}

impl CookieBinder {
    pub fn new(production: bool, domain: Option<String>) -> Self {
        Self {
            secure: production,
            domain: domain.filter(|_| production),
        }
    }

    fn cookie(&self, name: &str, value: &str, max_age: u64) -> String {
        let mut cookie = format!(
            "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
            name, value, max_age
        );
        if let Some(ref domain) = self.domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }

    /// The two `Set-Cookie` values for `tokens`, or the clearing pair for `None`.
    pub fn cookies(&self, tokens: Option<&TokenPair>) -> [String; 2] {
        match tokens {
            Some(tokens) => [
                self.cookie(
                    ACCESS_COOKIE_NAME,
                    &tokens.access_token,
                    ACCESS_COOKIE_MAX_AGE_SECS,
                ),
                self.cookie(
                    REFRESH_COOKIE_NAME,
                    &tokens.refresh_token,
                    REFRESH_COOKIE_MAX_AGE_SECS,
                ),
            ],
            None => [
                self.cookie(ACCESS_COOKIE_NAME, "", 0),
                self.cookie(REFRESH_COOKIE_NAME, "", 0),
            ],
        }
    }

    /// Append both session cookies to `headers`; `None` clears them.
    pub fn bind(&self, headers: &mut HeaderMap, tokens: Option<&TokenPair>) {
        for cookie in self.cookies(tokens) {
            if let Ok(value) = HeaderValue::from_str(&cookie) {
                headers.append(header::SET_COOKIE, value);
            }
        }
    }
}

/// Whether `headers` already set either session cookie.
pub fn sets_session_cookie(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| {
            v.split_once('=').is_some_and(|(name, _)| {
                name == ACCESS_COOKIE_NAME || name == REFRESH_COOKIE_NAME
            })
        })
}
