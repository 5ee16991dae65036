//! Registration, login, logout and session check.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::error::{ApiError, ResultExt, validate_credentials};
use crate::auth::{AuthUser, CookieBinder};
use crate::db::{Database, UserSummary};
use crate::impl_has_auth_backend;
use crate::jwt::Identity;
use crate::password::{hash_password, verify_password};
use crate::rate_limit::{RateLimitConfig, rate_limit_login, rate_limit_register};
use crate::session::SessionService;

#[derive(Clone)]
pub struct AuthApiState {
    pub db: Database,
    pub sessions: Arc<SessionService>,
    pub cookies: CookieBinder,
    pub rate_limit: Arc<RateLimitConfig>,
}

impl_has_auth_backend!(AuthApiState);

pub fn router(state: AuthApiState) -> Router {
    let register_router = Router::new()
        .route("/register", post(register))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limit.clone(),
            rate_limit_register,
        ));

    let login_router = Router::new()
        .route("/login", post(login))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limit.clone(),
            rate_limit_login,
        ));

    let session_router = Router::new()
        .route("/logout", post(logout))
        .route("/check", get(check))
        .with_state(state);

    Router::new()
        .merge(register_router)
        .merge(login_router)
        .merge(session_router)
}

/// Body for register and login. Missing fields deserialize as empty so
/// they are reported by validation rather than rejected by the extractor.
#[derive(Deserialize)]
struct CredentialsRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

async fn register(
    State(state): State<AuthApiState>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_credentials(&payload.username, &payload.password)?;

    let available = state
        .db
        .users()
        .is_username_available(&payload.username)
        .await
        .db_err("Failed to check username")?;
    if !available {
        return Err(ApiError::conflict("Username already exists"));
    }

    let password_hash =
        hash_password(&payload.password).internal_err("Failed to hash password")?;

    // The availability check above can race another registration; the
    // UNIQUE constraint settles it.
    let user = state
        .db
        .users()
        .create(&payload.username, &password_hash)
        .await
        .map_err(create_user_error)?;

    info!(user_id = %user.id, username = %user.username, "User registered");

    Ok(Json(UserSummary::from(user)))
}

fn create_user_error(e: sqlx::Error) -> ApiError {
    let duplicate = e
        .as_database_error()
        .is_some_and(|d| d.is_unique_violation());
    if duplicate {
        ApiError::conflict("Username already exists")
    } else {
        ApiError::db_error("Failed to create user", e)
    }
}

async fn login(
    State(state): State<AuthApiState>,
    Json(payload): Json<CredentialsRequest>,
) -> Result<Response, ApiError> {
    validate_credentials(&payload.username, &payload.password)?;

    let invalid = || ApiError::unauthorized("Invalid username or password");

    let user = state
        .db
        .users()
        .get_by_username(&payload.username)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(invalid)?;

    let matches = verify_password(&payload.password, &user.password_hash)
        .internal_err("Failed to verify password")?;
    if !matches {
        return Err(invalid());
    }

    let tokens = state.sessions.issue(&user).await?;

    let mut response = Json(Identity::from(&user)).into_response();
    state.cookies.bind(response.headers_mut(), Some(&tokens));
    Ok(response)
}

async fn logout(
    State(state): State<AuthApiState>,
    auth: AuthUser,
) -> Result<Response, ApiError> {
    let revoked = state
        .sessions
        .revoke(&auth.user.id)
        .await
        .db_err("Failed to revoke session")?;
    if !revoked {
        return Err(ApiError::unauthorized("No active session"));
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    state.cookies.bind(response.headers_mut(), None);
    Ok(response)
}

async fn check(
    State(state): State<AuthApiState>,
    auth: AuthUser,
) -> Result<Json<Identity>, ApiError> {
    state
        .db
        .tokens()
        .find_by_user(&auth.user.id)
        .await
        .db_err("Failed to get session")?
        .ok_or_else(|| ApiError::unauthorized("No active session"))?;

    Ok(Json(Identity::from(&auth.user)))
}
