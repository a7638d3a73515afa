pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod client;
pub mod db;
pub mod jwt;
pub mod password;
pub mod rate_limit;
pub mod session;

use api::create_api_router;
use auth::RefreshCookie;
use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::get,
};
use db::Database;
use jwt::JwtConfig;
use rate_limit::RateLimitConfig;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Prefix every API route is mounted under.
pub const API_PREFIX: &str = "/api/v1";

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Secret for signing access tokens
    pub access_secret: Vec<u8>,
    /// Secret for signing refresh tokens
    pub refresh_secret: Vec<u8>,
    /// Secret for signing the refresh cookie
    pub cookie_secret: Vec<u8>,
    /// Production cookies are `Secure; SameSite=None`
    pub production: bool,
    /// Origin allowed by CORS, with credentials. None disables the CORS layer
    pub cors_origin: Option<HeaderValue>,
    /// Login/register attempts per minute per IP. None disables limiting
    pub login_rate_limit: Option<NonZeroU32>,
    /// Whether a background task purges expired refresh tokens
    pub purge_expired_sessions: bool,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let jwt = Arc::new(JwtConfig::new(
        &config.access_secret,
        &config.refresh_secret,
    ));
    let cookie = Arc::new(RefreshCookie::new(&config.cookie_secret, config.production));
    let rate_limit = config
        .login_rate_limit
        .map(|per_minute| Arc::new(RateLimitConfig::per_minute(per_minute)));

    let api_router = create_api_router(config.db.clone(), jwt, cookie, rate_limit);

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .nest(API_PREFIX, api_router);

    let app = match &config.cors_origin {
        Some(origin) => app.layer(
            CorsLayer::new()
                .allow_origin(origin.clone())
                .allow_credentials(true)
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        ),
        None => app,
    };

    app.layer(TraceLayer::new_for_http())
}

/// Spawn the expired session purge if enabled.
/// Call this before starting the server.
pub async fn init_cleanup(config: &ServerConfig) {
    if config.purge_expired_sessions {
        cleanup::run_cleanup(&config.db).await;
        cleanup::spawn_cleanup_scheduler(config.db.clone());
    }
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
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
    init_cleanup(&config).await;

    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = run_server(config, listener).await {
            tracing::error!(error = %e, "Server error");
        }
    });

    Ok((handle, local_addr))
}
