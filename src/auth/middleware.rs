//! Request authenticator.
//!
//! Runs on every request and resolves the session cookies to an identity.
//! The session is renewed when the refresh token is close to expiry or the
//! access cookie is gone. Failures degrade to anonymous; the gates in
//! [`super::extractors`] decide what that means for a route.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, error};

use super::cookie::{
    ACCESS_COOKIE_NAME, CookieBinder, REFRESH_COOKIE_NAME, get_cookie, sets_session_cookie,
};
use crate::jwt::Identity;
use crate::session::{SessionService, TokenPair};

/// Identity attached to every request by [`authenticate`].
#[derive(Debug, Clone, Default)]
pub struct RequestIdentity(pub Option<Identity>);

/// What the authenticator decided for one request.
#[derive(Debug)]
pub enum AuthOutcome {
    /// No session cookies at all
    Anonymous,
    /// Valid session, no renewal needed
    Authenticated(Identity),
    /// Session refreshed; new cookies go out with the response
    Renewed { identity: Identity, tokens: TokenPair },
    /// Unusable session; cookies are cleared
    Rejected,
}

impl AuthOutcome {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Authenticated(identity) | Self::Renewed { identity, .. } => Some(identity),
            Self::Anonymous | Self::Rejected => None,
        }
    }
}

/// State for the [`authenticate`] middleware.
#[derive(Clone, Debug)]
pub struct Authenticator {
    sessions: Arc<SessionService>,
    cookies: CookieBinder,
}

impl Authenticator {
    pub fn new(sessions: Arc<SessionService>, cookies: CookieBinder) -> Self {
        Self { sessions, cookies }
    }

    /// Resolve the session carried by `headers`.
    pub async fn resolve(&self, headers: &HeaderMap) -> AuthOutcome {
        let access = get_cookie(headers, ACCESS_COOKIE_NAME).filter(|v| !v.is_empty());
        let refresh = get_cookie(headers, REFRESH_COOKIE_NAME).filter(|v| !v.is_empty());

        let refresh = match (access, refresh) {
            (None, None) => return AuthOutcome::Anonymous,
            (Some(_), None) => return AuthOutcome::Rejected,
            (_, Some(refresh)) => refresh,
        };

        let codec = self.sessions.codec();
        let claims = match codec.verify_refresh(refresh) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(error = %e, "Rejecting refresh cookie");
                return AuthOutcome::Rejected;
            }
        };

        match self.sessions.is_live(&claims).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(token_id = %claims.payload.token_id, "Refresh token revoked");
                return AuthOutcome::Rejected;
            }
            Err(e) => {
                error!(error = %e, "Failed to look up refresh token");
                return AuthOutcome::Rejected;
            }
        }

        // An access cookie only counts if it verifies and belongs to the same user.
        let has_access_token = access
            .and_then(|token| codec.verify_access(token).ok())
            .is_some_and(|access| access.payload.user_id == claims.payload.identity.user_id);

        if !self.sessions.needs_renewal(&claims, has_access_token) {
            return AuthOutcome::Authenticated(claims.payload.identity);
        }

        match self.sessions.refresh(refresh).await {
            Ok(outcome) => AuthOutcome::Renewed {
                identity: outcome.identity,
                tokens: outcome.tokens,
            },
            Err(e) if e.is_client_error() => {
                debug!(error = %e, "Session renewal refused");
                AuthOutcome::Rejected
            }
            Err(e) => {
                error!(error = %e, "Session renewal failed");
                AuthOutcome::Rejected
            }
        }
    }
}

/// Middleware that attaches [`RequestIdentity`] and keeps session cookies in step.
///
/// Cookies are written after the handler runs, unless the handler already set
/// session cookies itself (login and logout).
pub async fn authenticate(
    State(auth): State<Authenticator>,
    mut request: Request,
    next: Next,
) -> Response {
    let outcome = auth.resolve(request.headers()).await;

    request
        .extensions_mut()
        .insert(RequestIdentity(outcome.identity().cloned()));

    let mut response = next.run(request).await;

    if sets_session_cookie(response.headers()) {
        return response;
    }

    match outcome {
        AuthOutcome::Renewed { ref tokens, .. } => {
            auth.cookies.bind(response.headers_mut(), Some(tokens));
        }
        AuthOutcome::Rejected => auth.cookies.bind(response.headers_mut(), None),
        AuthOutcome::Anonymous | AuthOutcome::Authenticated(_) => {}
    }

    response
}
