use std::net::SocketAddr;

use clap::Parser;
use tracing::{error, info};
use waypoint::cli::{
    Args, build_config, handle_create_admin, init_logging, load_secrets, open_database,
    validate_frontend_url,
};
use waypoint::{create_app, init_cleanup};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(secrets) = load_secrets(&args) else {
        std::process::exit(1);
    };

    let Some(cors_origin) = validate_frontend_url(&args.frontend_url) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    if let Some(username) = args.create_admin.as_deref() {
        handle_create_admin(&db, username).await;
    }

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    let local_addr = listener.local_addr().unwrap_or_else(|e| {
        error!(error = %e, "Failed to get local address");
        std::process::exit(1);
    });

    let config = build_config(
        db,
        secrets,
        args.environment,
        cors_origin,
        args.login_rate_limit,
        args.purge_expired_sessions,
    );
    init_cleanup(&config).await;
    let app = create_app(&config);

    info!(address = %local_addr, environment = ?args.environment, "Listening");

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, make_service).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
