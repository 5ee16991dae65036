//! Cookie-based JWT sessions.
//!
//! Dual-token system: short-lived access tokens (15 min, stateless) and
//! long-lived refresh tokens (15 days, backed by a store record). The
//! [`authenticate`] middleware renews sessions as they near expiry; the
//! extractors gate routes on the identity it attaches.

mod cookie;
mod errors;
mod extractors;
mod ip;
mod middleware;
mod state;

pub use cookie::{
    ACCESS_COOKIE_MAX_AGE_SECS, ACCESS_COOKIE_NAME, CookieBinder, REFRESH_COOKIE_MAX_AGE_SECS,
    REFRESH_COOKIE_NAME, get_cookie, sets_session_cookie,
};
pub use errors::AuthError;
pub use extractors::{AdminUser, AuthUser};
pub use ip::{HasHeadersAndExtensions, UNKNOWN_CLIENT, extract_client_ip};
pub use middleware::{AuthOutcome, Authenticator, RequestIdentity, authenticate};
pub use state::HasAuthBackend;
