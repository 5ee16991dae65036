//! Session issuance and refresh.
//!
//! A session is an access/refresh token pair. The refresh token points at a
//! record in the token store; deleting that record revokes the session.

use axum::http::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::db::{Database, User};
use crate::jwt::{
    Identity, JwtError, RefreshClaims, RefreshPayload, SignOptions, TokenCodec, TokenSubject,
};

/// Access token lifetime: 15 minutes
pub const ACCESS_TOKEN_LIFETIME: Duration = Duration::from_secs(15 * 60);

/// Refresh token lifetime: 15 days
pub const REFRESH_TOKEN_LIFETIME: Duration = Duration::from_secs(15 * 24 * 60 * 60);

/// A refresh with less remaining lifetime than this re-signs the refresh token.
/// Equal to the full refresh lifetime, so in practice every refresh rotates.
pub const REFRESH_ROTATION_THRESHOLD: Duration = REFRESH_TOKEN_LIFETIME;

/// The authenticator refreshes proactively once the refresh token has less
/// than this left.
pub const RENEWAL_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Lifetimes and thresholds driving the session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub access_lifetime: Duration,
    pub refresh_lifetime: Duration,
    /// Rotate when remaining lifetime is strictly below this
    pub rotation_threshold: Duration,
    /// Refresh when remaining lifetime is strictly below this
    pub renewal_window: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            access_lifetime: ACCESS_TOKEN_LIFETIME,
            refresh_lifetime: REFRESH_TOKEN_LIFETIME,
            rotation_threshold: REFRESH_ROTATION_THRESHOLD,
            renewal_window: RENEWAL_WINDOW,
        }
    }
}

/// Signed token strings handed to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Result of a successful refresh.
#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub user_id: String,
    /// Identity as currently stored, not as it was when the token was signed
    pub identity: Identity,
    pub tokens: TokenPair,
    /// Whether the refresh token was re-signed
    pub rotated: bool,
}

#[derive(Debug, Error)]
pub enum SessionIssueError {
    #[error("Failed to sign session token: {0}")]
    Token(#[from] JwtError),
    #[error("Failed to persist session: {0}")]
    Store(#[from] sqlx::Error),
}

/// Why a refresh failed.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Refresh token has expired")]
    Expired,
    #[error("Invalid refresh token: {0}")]
    InvalidToken(String),
    #[error("Refresh token is not active yet")]
    NotYetValid,
    #[error("Refresh token has been revoked")]
    Revoked,
    #[error("User not found for token")]
    UserNotFound,
    #[error("Failed to sign token: {0}")]
    Signing(#[source] JwtError),
    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),
}

impl From<JwtError> for RefreshError {
    fn from(e: JwtError) -> Self {
        match e {
            JwtError::Expired => Self::Expired,
            JwtError::NotYetValid => Self::NotYetValid,
            JwtError::Malformed(reason) => Self::InvalidToken(reason),
            other => Self::Signing(other),
        }
    }
}

impl RefreshError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Expired
            | Self::InvalidToken(_)
            | Self::NotYetValid
            | Self::Revoked
            | Self::UserNotFound => StatusCode::UNAUTHORIZED,
            Self::Signing(_) | Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-class failures just mean "logged out".
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Issues and refreshes sessions.
#[derive(Clone, Debug)]
pub struct SessionService {
    codec: TokenCodec,
    db: Database,
    settings: SessionSettings,
}

impl SessionService {
    pub fn new(codec: TokenCodec, db: Database, settings: SessionSettings) -> Self {
        Self {
            codec,
            db,
            settings,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Start a new session for `user`, replacing any previous one.
    pub async fn issue(&self, user: &User) -> Result<TokenPair, SessionIssueError> {
        let store = self.db.tokens();
        let token_id = store.create(&user.id).await?;

        let identity = Identity::from(user);
        let access_token = self.sign_access(&identity)?;
        let refresh_token = self.sign_refresh(&identity, &token_id)?;

        if !store.set_token(&token_id, &refresh_token).await? {
            return Err(SessionIssueError::Store(sqlx::Error::RowNotFound));
        }

        info!(user_id = %user.id, token_id = %token_id, "Session issued");

        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Exchange a valid refresh token for a new access token, rotating the
    /// refresh token when its remaining lifetime is below the threshold.
    pub async fn refresh(&self, previous_refresh_token: &str) -> Result<RefreshOutcome, RefreshError> {
        let claims = self.codec.verify_refresh(previous_refresh_token)?;
        let token_id = claims.payload.token_id.as_str();

        let store = self.db.tokens();
        if store.find_by_id(token_id).await?.is_none() {
            return Err(RefreshError::Revoked);
        }

        let user = self
            .db
            .users()
            .get_by_id(&claims.payload.identity.user_id)
            .await?
            .ok_or(RefreshError::UserNotFound)?;
        let identity = Identity::from(&user);

        let rotated = self.should_rotate(&claims);
        let refresh_token = if rotated {
            self.sign_refresh(&identity, token_id)?
        } else {
            previous_refresh_token.to_string()
        };

        let access_token = self.sign_access(&identity)?;

        // Read-then-write with no lock; a concurrent refresh may overwrite this.
        // A record deleted since the check above means a concurrent logout.
        if !store.set_token(token_id, &refresh_token).await? {
            return Err(RefreshError::Revoked);
        }

        debug!(user_id = %user.id, token_id = %token_id, rotated, "Session refreshed");

        Ok(RefreshOutcome {
            user_id: user.id,
            identity,
            tokens: TokenPair {
                access_token,
                refresh_token,
            },
            rotated,
        })
    }

    /// Revoke the session of `user_id`. Returns false if there was none.
    pub async fn revoke(&self, user_id: &str) -> Result<bool, sqlx::Error> {
        let store = self.db.tokens();
        match store.find_by_user(user_id).await? {
            Some(record) => {
                let deleted = store.delete(&record.id).await?;
                info!(user_id = %user_id, token_id = %record.id, "Session revoked");
                Ok(deleted)
            }
            None => Ok(false),
        }
    }

    /// Whether the record behind a refresh token still exists.
    pub async fn is_live(&self, claims: &RefreshClaims) -> Result<bool, sqlx::Error> {
        Ok(self
            .db
            .tokens()
            .find_by_id(&claims.payload.token_id)
            .await?
            .is_some())
    }

    /// Time left before the refresh token expires, zero once expired.
    pub fn remaining(&self, claims: &RefreshClaims) -> Duration {
        Duration::from_secs(claims.exp.saturating_sub(self.codec.now()))
    }

    pub fn should_rotate(&self, claims: &RefreshClaims) -> bool {
        self.remaining(claims) < self.settings.rotation_threshold
    }

    /// Whether the authenticator should refresh before serving the request.
    pub fn needs_renewal(&self, claims: &RefreshClaims, has_access_token: bool) -> bool {
        !has_access_token || self.remaining(claims) < self.settings.renewal_window
    }

    fn sign_access(&self, identity: &Identity) -> Result<String, JwtError> {
        self.codec.sign(
            identity.clone(),
            &SignOptions::new(TokenSubject::AccessToken, self.settings.access_lifetime),
        )
    }

    fn sign_refresh(&self, identity: &Identity, token_id: &str) -> Result<String, JwtError> {
        self.codec.sign(
            RefreshPayload {
                identity: identity.clone(),
                token_id: token_id.to_string(),
            },
            &SignOptions::new(TokenSubject::RefreshToken, self.settings.refresh_lifetime),
        )
    }
}
