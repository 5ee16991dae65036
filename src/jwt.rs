//! JWT token generation and validation.
//!
//! Every token is HS256-signed with the single shared secret the codec was
//! built with. Temporal claims are checked against an injected [`Clock`] so
//! expiry behaviour can be driven from tests.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::db::User;

/// Issuer written into tokens unless a sign call overrides it.
pub const DEFAULT_ISSUER: &str = "paysys.kr";

/// Source of the current Unix time in seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self(AtomicU64::new(start))
    }

    pub fn set(&self, secs: u64) {
        self.0.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.0.fetch_add(by.as_secs(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Subject claim, distinguishing access tokens from refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSubject {
    AccessToken,
    RefreshToken,
}

/// Who a session belongs to. This is the access token payload and the shape
/// handlers receive for the current request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
    pub admin: bool,
}

impl From<&User> for Identity {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id.clone(),
            username: user.username.clone(),
            admin: user.admin,
        }
    }
}

/// Refresh token payload: the identity plus the id of its store record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshPayload {
    #[serde(flatten)]
    pub identity: Identity,
    /// Id of the `tokens` row backing this refresh token
    pub token_id: String,
}

/// Decoded token: the caller's payload plus the registered claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims<T> {
    #[serde(flatten)]
    pub payload: T,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Not before (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    pub iss: String,
    pub sub: TokenSubject,
}

pub type AccessClaims = Claims<Identity>;
pub type RefreshClaims = Claims<RefreshPayload>;

/// Per-call signing options.
#[derive(Debug, Clone)]
pub struct SignOptions {
    pub subject: TokenSubject,
    pub expires_in: Duration,
    /// Overrides the codec's issuer
    pub issuer: Option<String>,
    /// Delay before the token becomes valid
    pub not_before: Option<Duration>,
}

impl SignOptions {
    pub fn new(subject: TokenSubject, expires_in: Duration) -> Self {
        Self {
            subject,
            expires_in,
            issuer: None,
            not_before: None,
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    pub fn with_not_before(mut self, delay: Duration) -> Self {
        self.not_before = Some(delay);
        self
    }
}

/// Signs and verifies tokens against one shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .finish()
    }
}

impl TokenCodec {
    /// Build a codec. An empty secret is a configuration error.
    pub fn new(
        secret: &[u8],
        issuer: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, JwtError> {
        if secret.is_empty() {
            return Err(JwtError::Configuration);
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            clock,
        })
    }

    /// Codec with the default issuer and the wall clock.
    pub fn with_secret(secret: &[u8]) -> Result<Self, JwtError> {
        Self::new(secret, DEFAULT_ISSUER, Arc::new(SystemClock))
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Current time according to the codec's clock.
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Sign `payload`, adding `iat`, `exp`, `iss`, `sub` and optionally `nbf`.
    pub fn sign<T: Serialize>(&self, payload: T, options: &SignOptions) -> Result<String, JwtError> {
        let now = self.now();

        let claims = Claims {
            payload,
            iat: now,
            exp: now + options.expires_in.as_secs(),
            nbf: options.not_before.map(|delay| now + delay.as_secs()),
            iss: options
                .issuer
                .clone()
                .unwrap_or_else(|| self.issuer.clone()),
            sub: options.subject,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(JwtError::Signing)
    }

    /// Verify the signature and temporal claims of `token`.
    pub fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<Claims<T>, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // exp/nbf are checked below against our own clock
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        let token_data = jsonwebtoken::decode::<Claims<T>>(token, &self.decoding_key, &validation)
            .map_err(|e| JwtError::Malformed(e.to_string()))?;
        let claims = token_data.claims;

        let now = self.now();
        if now >= claims.exp {
            return Err(JwtError::Expired);
        }
        if claims.nbf.is_some_and(|nbf| nbf > now) {
            return Err(JwtError::NotYetValid);
        }

        Ok(claims)
    }

    /// Verify `token` and require a specific subject.
    pub fn verify_as<T: DeserializeOwned>(
        &self,
        token: &str,
        subject: TokenSubject,
    ) -> Result<Claims<T>, JwtError> {
        let claims = self.verify::<T>(token)?;
        if claims.sub != subject {
            return Err(JwtError::Malformed(format!(
                "expected subject {:?}, got {:?}",
                subject, claims.sub
            )));
        }
        Ok(claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, JwtError> {
        self.verify_as(token, TokenSubject::AccessToken)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, JwtError> {
        self.verify_as(token, TokenSubject::RefreshToken)
    }
}

/// Errors that can occur during JWT operations.
#[derive(Debug, Error)]
pub enum JwtError {
    /// No signing secret was provided
    #[error("JWT signing secret is not configured")]
    Configuration,
    #[error("Failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error("Token has expired")]
    Expired,
    #[error("Token is not active yet")]
    NotYetValid,
    /// Bad signature, bad encoding, missing claims or wrong subject
    #[error("Malformed token: {0}")]
    Malformed(String),
}
