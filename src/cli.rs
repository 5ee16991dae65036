//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::db::Database;
use crate::jwt::DEFAULT_ISSUER;
use crate::rate_limit::RateLimitConfig;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

const MIN_JWT_SECRET_LENGTH: usize = 32;

/// Cookie domain used in production when none is given.
pub const DEFAULT_COOKIE_DOMAIN: &str = ".paysys.kr";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

/// Deployment environment. Production turns on `Secure` cookies and the
/// shared cookie domain.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "paysys", about = "Payment system API with JWT cookie sessions")]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "4000")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "DATABASE", default_value = "paysys.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Deployment environment
    #[arg(short, long, env = "APP_ENV", default_value = "development")]
    pub environment: Environment,

    /// Domain attribute for session cookies (production only)
    #[arg(long, default_value = DEFAULT_COOKIE_DOMAIN)]
    pub cookie_domain: String,

    /// Issuer written into every token
    #[arg(long, default_value = DEFAULT_ISSUER)]
    pub issuer: String,

    /// Key rate limits on X-Forwarded-For (only behind a trusted proxy)
    #[arg(long)]
    pub trust_proxy: bool,

    /// Grant admin to an existing user on startup
    #[arg(long, value_name = "USERNAME")]
    pub grant_admin: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Handle the --grant-admin flag. Returns false if the user could not be promoted.
pub async fn handle_grant_admin(db: &Database, username: &str) -> bool {
    let user = match db.users().get_by_username(username).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            error!(username = %username, "Cannot grant admin: no such user");
            return false;
        }
        Err(e) => {
            error!(error = %e, "Failed to look up user");
            return false;
        }
    };

    match db.users().set_admin(&user.id, true).await {
        Ok(_) => {
            info!(username = %username, user_id = %user.id, "Admin granted");
            true
        }
        Err(e) => {
            error!(error = %e, "Failed to grant admin");
            false
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: &Args, db: Database, jwt_secret: String) -> ServerConfig {
    let production = args.environment == Environment::Production;

    ServerConfig {
        issuer: args.issuer.clone(),
        production,
        cookie_domain: Some(args.cookie_domain.clone()).filter(|d| !d.is_empty()),
        rate_limit: Arc::new(RateLimitConfig::new(args.trust_proxy)),
        ..ServerConfig::new(db, jwt_secret.into_bytes())
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
