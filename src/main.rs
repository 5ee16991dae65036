use std::net::SocketAddr;

use clap::Parser;
use paysys::cli::{
    Args, build_config, handle_grant_admin, init_logging, load_jwt_secret, open_database,
};
use paysys::{create_app, init_cleanup};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(jwt_secret) = load_jwt_secret(args.jwt_secret_file.as_deref()) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    if let Some(username) = args.grant_admin.as_deref()
        && !handle_grant_admin(&db, username).await
    {
        std::process::exit(1);
    }

    let config = build_config(&args, db, jwt_secret);
    init_cleanup(&config.db, &config.rate_limit).await;
    let app = create_app(&config).unwrap_or_else(|e| {
        error!(error = %e, "Failed to build application");
        std::process::exit(1);
    });

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    match listener.local_addr() {
        Ok(local_addr) => info!(
            address = %local_addr,
            environment = ?args.environment,
            "Listening"
        ),
        Err(e) => error!(error = %e, "Failed to read local address"),
    }

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, make_service).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
