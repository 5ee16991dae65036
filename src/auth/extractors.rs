//! Axum extractors that gate routes on the request identity.

use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::error;

use super::errors::AuthError;
use super::middleware::RequestIdentity;
use super::state::HasAuthBackend;
use crate::db::User;
use crate::jwt::Identity;

/// Extractor for endpoints that require a logged-in user.
///
/// The identity comes from the authenticator middleware; the user is
/// re-read so a deleted account stops working immediately.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub identity: Identity,
    pub user: User,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let identity = parts
            .extensions
            .get::<RequestIdentity>()
            .and_then(|RequestIdentity(identity)| identity.clone())
            .ok_or(AuthError::NotAuthenticated)?;

        let user = state
            .db()
            .users()
            .get_by_id(&identity.user_id)
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to get user");
                AuthError::Database
            })?
            .ok_or(AuthError::UserNotFound)?;

        Ok(AuthUser { identity, user })
    }
}

/// Extractor for endpoints that require an admin.
///
/// The admin flag is read from the stored user, not from the token.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

impl<S> FromRequestParts<S> for AdminUser
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth = AuthUser::from_request_parts(parts, state).await?;
        if !auth.user.admin {
            return Err(AuthError::InsufficientRole);
        }
        Ok(AdminUser(auth))
    }
}
