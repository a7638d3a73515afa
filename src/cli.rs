//! CLI argument parsing, validation, and startup helpers.

use crate::ServerConfig;
use crate::db::{Database, UserRole};
use crate::password;
use axum::http::HeaderValue;
use clap::Parser;
use rand::{Rng, distr::Alphanumeric};
use std::num::NonZeroU32;
use tracing::{error, info};
use url::Url;

const MIN_SECRET_LENGTH: usize = 32;
const ADMIN_PASSWORD_LENGTH: usize = 24;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "Waypoint", about = "Session and access control backend")]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "DATABASE_PATH", default_value = "waypoint.db")]
    pub database: String,

    /// Deployment environment. Production cookies are Secure and SameSite=None
    #[arg(short, long, env = "APP_ENV", default_value = "development")]
    pub environment: Environment,

    /// Frontend origin allowed by CORS
    #[arg(long, env = "FRONTEND_URL", default_value = "http://localhost:5173")]
    pub frontend_url: String,

    /// Path to file containing the access token secret. Prefer JWT_SECRET_AT
    #[arg(long)]
    pub access_secret_file: Option<String>,

    /// Path to file containing the refresh token secret. Prefer JWT_SECRET_RT
    #[arg(long)]
    pub refresh_secret_file: Option<String>,

    /// Path to file containing the cookie signing secret. Prefer COOKIE_SECRET
    #[arg(long)]
    pub cookie_secret_file: Option<String>,

    /// Create an admin with this username on startup and print its password
    #[arg(long, value_name = "USERNAME")]
    pub create_admin: Option<String>,

    /// Periodically delete expired refresh tokens
    #[arg(long)]
    pub purge_expired_sessions: bool,

    /// Login and registration attempts per minute per IP, 0 disables limiting
    #[arg(long, default_value = "10")]
    pub login_rate_limit: u32,

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

/// Load a secret from an environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_secret(env_var: &str, file: Option<&str>) -> Option<Vec<u8>> {
    let secret = if let Ok(secret) = std::env::var(env_var) {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(env_var) };
        secret
    } else if let Some(path) = file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, secret = %env_var, error = %e, "Failed to read secret file");
                return None;
            }
        }
    } else {
        error!(
            secret = %env_var,
            "Secret is required. Set the environment variable (recommended) or pass its --*-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_SECRET_LENGTH {
        error!(
            secret = %env_var,
            "Secret is shorter than {} characters. Use a longer secret",
            MIN_SECRET_LENGTH
        );
        return None;
    }

    Some(secret.into_bytes())
}

/// The three secrets used by the server.
pub struct Secrets {
    pub access: Vec<u8>,
    pub refresh: Vec<u8>,
    pub cookie: Vec<u8>,
}

/// Load all secrets and check that no two of them are equal.
pub fn load_secrets(args: &Args) -> Option<Secrets> {
    let access = load_secret("JWT_SECRET_AT", args.access_secret_file.as_deref());
    let refresh = load_secret("JWT_SECRET_RT", args.refresh_secret_file.as_deref());
    let cookie = load_secret("COOKIE_SECRET", args.cookie_secret_file.as_deref());
    let secrets = Secrets {
        access: access?,
        refresh: refresh?,
        cookie: cookie?,
    };

    if !secrets_distinct(&secrets) {
        error!("JWT_SECRET_AT, JWT_SECRET_RT and COOKIE_SECRET must all be different");
        return None;
    }

    Some(secrets)
}

fn secrets_distinct(secrets: &Secrets) -> bool {
    secrets.access != secrets.refresh
        && secrets.access != secrets.cookie
        && secrets.refresh != secrets.cookie
}

/// Parse the frontend URL into a CORS origin header value.
/// Returns None and logs an error if validation fails.
pub fn validate_frontend_url(frontend_url: &str) -> Option<HeaderValue> {
    let url = match Url::parse(frontend_url) {
        Ok(url) => url,
        Err(e) => {
            error!(origin = %frontend_url, error = %e, "Invalid frontend URL");
            return None;
        }
    };

    // An origin never carries a path or a trailing slash
    let origin = url.origin().ascii_serialization();
    match HeaderValue::from_str(&origin) {
        Ok(value) => Some(value),
        Err(e) => {
            error!(origin = %origin, error = %e, "Frontend URL is not a valid origin");
            None
        }
    }
}

/// Generate a random password for a newly created admin.
pub fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(ADMIN_PASSWORD_LENGTH)
        .map(char::from)
        .collect()
}

/// Handle the --create-admin flag: create the admin, or promote an existing user.
pub async fn handle_create_admin(db: &Database, username: &str) {
    match db.users().get_by_username(username).await {
        Ok(Some(existing)) => {
            if existing.role == UserRole::Admin {
                println!();
                println!("Admin already exists: {}", existing.username);
                println!();
                return;
            }
            match db.users().set_role(existing.id, UserRole::Admin).await {
                Ok(_) => {
                    info!(user_id = existing.id, "Existing user promoted to admin");
                    println!();
                    println!("User promoted to admin: {}", existing.username);
                    println!();
                }
                Err(e) => {
                    error!(error = %e, "Failed to promote user to admin");
                    std::process::exit(1);
                }
            }
        }
        Ok(None) => {
            let plain = generate_password();
            let hash = match password::hash(&plain) {
                Ok(hash) => hash,
                Err(e) => {
                    error!(error = %e, "Failed to hash admin password");
                    std::process::exit(1);
                }
            };

            match db.users().create(username, &hash, UserRole::Admin).await {
                Ok(id) => {
                    info!(user_id = id, "Admin user created");
                    println!();
                    println!("Admin user created: {}", username);
                    println!("Password: {}", plain);
                    println!();
                }
                Err(e) => {
                    error!(error = %e, "Failed to create admin user");
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to check for existing admin");
            std::process::exit(1);
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    db: Database,
    secrets: Secrets,
    environment: Environment,
    cors_origin: HeaderValue,
    login_rate_limit: u32,
    purge_expired_sessions: bool,
) -> ServerConfig {
    ServerConfig {
        db,
        access_secret: secrets.access,
        refresh_secret: secrets.refresh,
        cookie_secret: secrets.cookie,
        production: environment == Environment::Production,
        cors_origin: Some(cors_origin),
        login_rate_limit: NonZeroU32::new(login_rate_limit),
        purge_expired_sessions,
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

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(access: &str, refresh: &str, cookie: &str) -> Secrets {
        Secrets {
            access: access.as_bytes().to_vec(),
            refresh: refresh.as_bytes().to_vec(),
            cookie: cookie.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_secrets_must_differ() {
        assert!(secrets_distinct(&secrets("a", "b", "c")));
        assert!(!secrets_distinct(&secrets("a", "a", "c")));
        assert!(!secrets_distinct(&secrets("a", "b", "a")));
        assert!(!secrets_distinct(&secrets("a", "b", "b")));
    }

    #[test]
    fn test_validate_frontend_url() {
        assert_eq!(
            validate_frontend_url("http://localhost:5173/").unwrap(),
            "http://localhost:5173"
        );
        assert_eq!(
            validate_frontend_url("https://app.example.com/path").unwrap(),
            "https://app.example.com"
        );
        assert!(validate_frontend_url("not a url").is_none());
    }

    #[test]
    fn test_generate_password() {
        let a = generate_password();
        let b = generate_password();
        assert_eq!(a.len(), ADMIN_PASSWORD_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["waypoint"]).unwrap();
        assert_eq!(args.login_rate_limit, 10);
        assert!(!args.purge_expired_sessions);
        assert!(args.create_admin.is_none());
    }
}
