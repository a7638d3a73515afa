mod auth;
mod error;
mod users;

use axum::Router;
use std::sync::Arc;

use crate::auth::RefreshCookie;
use crate::db::Database;
use crate::jwt::JwtConfig;
use crate::rate_limit::RateLimitConfig;
use crate::session::SessionManager;

pub use auth::{AuthState, SessionResponse};
pub use error::{ApiError, MIN_PASSWORD_LENGTH, ResultExt};
pub use users::UsersState;

/// Create the API router.
pub fn create_api_router(
    db: Database,
    jwt: Arc<JwtConfig>,
    cookie: Arc<RefreshCookie>,
    rate_limit: Option<Arc<RateLimitConfig>>,
) -> Router {
    let auth_state = auth::AuthState {
        db: db.clone(),
        jwt: jwt.clone(),
        sessions: SessionManager::new(db.clone(), jwt.clone()),
        cookie,
    };

    let users_state = users::UsersState { db, jwt };

    Router::new()
        .nest("/auth", auth::router(auth_state, rate_limit))
        .nest("/users", users::router(users_state))
}
