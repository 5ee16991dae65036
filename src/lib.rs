pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod db;
pub mod jwt;
pub mod password;
pub mod rate_limit;
pub mod session;

use api::create_api_router;
use auth::{Authenticator, CookieBinder, authenticate};
use axum::{Router, middleware};
use db::Database;
use jwt::{Clock, DEFAULT_ISSUER, JwtError, SystemClock, TokenCodec};
use rate_limit::RateLimitConfig;
use session::{SessionService, SessionSettings};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::error;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// JWT secret for signing tokens
    pub jwt_secret: Vec<u8>,
    /// Issuer written into every token
    pub issuer: String,
    /// Production mode: `Secure` cookies scoped to `cookie_domain`
    pub production: bool,
    /// Cookie domain, only applied in production
    pub cookie_domain: Option<String>,
    /// Token lifetimes and renewal thresholds
    pub session: SessionSettings,
    /// Time source for token validation
    pub clock: Arc<dyn Clock>,
    /// Login and register rate limiters, shared with cleanup
    pub rate_limit: Arc<RateLimitConfig>,
}

impl ServerConfig {
    /// Development defaults around a database and secret.
    pub fn new(db: Database, jwt_secret: Vec<u8>) -> Self {
        Self {
            db,
            jwt_secret,
            issuer: DEFAULT_ISSUER.to_string(),
            production: false,
            cookie_domain: None,
            session: SessionSettings::default(),
            clock: Arc::new(SystemClock),
            rate_limit: Arc::new(RateLimitConfig::new(false)),
        }
    }
}

/// Create the application router with the given configuration.
///
/// Fails only if the token codec cannot be built (empty secret).
pub fn create_app(config: &ServerConfig) -> Result<Router, JwtError> {
    let codec = TokenCodec::new(&config.jwt_secret, &config.issuer, config.clock.clone())?;
    let sessions = Arc::new(SessionService::new(
        codec,
        config.db.clone(),
        config.session,
    ));
    let cookies = CookieBinder::new(config.production, config.cookie_domain.clone());
    let api_router = create_api_router(
        config.db.clone(),
        sessions.clone(),
        cookies.clone(),
        config.rate_limit.clone(),
    );

    let authenticator = Authenticator::new(sessions, cookies);

    Ok(Router::new()
        .nest("/api", api_router)
        .layer(middleware::from_fn_with_state(authenticator, authenticate)))
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(db: &Database, rate_limit: &Arc<RateLimitConfig>) {
    cleanup::run_cleanup(db, rate_limit).await;
    cleanup::spawn_cleanup_scheduler(db.clone(), rate_limit.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config).map_err(std::io::Error::other)?;
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    // Run cleanup tasks on startup
    init_cleanup(&config.db, &config.rate_limit).await;

    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
