//! Session lifecycle: login, refresh (with rotation) and logout.
//!
//! Per (user, device) a session moves Anonymous -> Authenticated on login,
//! loops through refresh, and returns to Anonymous on logout or expiry. The
//! refresh token store is the only shared state; every successful refresh
//! replaces the stored hash, so a refresh token is usable exactly once.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::db::{Database, UserRole};
use crate::jwt::{IssuedToken, JwtConfig, TokenKind, unix_now};
use crate::password;

/// Tokens handed back after a successful login or refresh.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub access_token: String,
    pub refresh: IssuedToken,
    pub user_id: i64,
    pub role: UserRole,
}

#[derive(Debug)]
pub enum SessionError {
    /// Unknown username or wrong password
    InvalidCredentials,
    /// No refresh token was presented
    MissingToken,
    /// Refresh token failed signature or expiry checks
    InvalidToken,
    /// No matching stored session (revoked, superseded or user deleted)
    UnknownSession,
    /// Stored session is past its expiry
    RefreshExpired,
    Internal(String),
}

impl SessionError {
    /// Whether the refresh cookie should be cleared along with the error.
    pub fn clears_cookie(&self) -> bool {
        matches!(self, Self::InvalidToken | Self::RefreshExpired)
    }

    fn internal(context: &str, e: impl std::fmt::Display) -> Self {
        error!(error = %e, "{}", context);
        Self::Internal(context.to_string())
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCredentials => write!(f, "Invalid credentials"),
            Self::MissingToken => write!(f, "No refresh token"),
            Self::InvalidToken => write!(f, "Invalid refresh token"),
            Self::UnknownSession => write!(f, "Unknown session"),
            Self::RefreshExpired => write!(f, "Refresh token expired"),
            Self::Internal(context) => write!(f, "{}", context),
        }
    }
}

impl std::error::Error for SessionError {}

#[derive(Clone)]
pub struct SessionManager {
    db: Database,
    jwt: Arc<JwtConfig>,
}

impl SessionManager {
    pub fn new(db: Database, jwt: Arc<JwtConfig>) -> Self {
        Self { db, jwt }
    }

    /// Check credentials and start a session on `device_id`.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        device_id: &str,
    ) -> Result<IssuedSession, SessionError> {
        let user = self
            .db
            .users()
            .get_by_username(username)
            .await
            .map_err(|e| SessionError::internal("Failed to get user", e))?
            .ok_or(SessionError::InvalidCredentials)?;

        let matches = password::verify(password, &user.password_hash)
            .map_err(|e| SessionError::internal("Failed to verify password", e))?;
        if !matches {
            debug!(user_id = user.id, "Password mismatch");
            return Err(SessionError::InvalidCredentials);
        }

        let session = self.issue(user.id, user.role, device_id).await?;
        info!(user_id = user.id, device_id = %device_id, "Login succeeded");
        Ok(session)
    }

    /// Exchange a refresh token for a new pair, rotating the stored token.
    pub async fn refresh(
        &self,
        device_id: &str,
        refresh_token: Option<&str>,
    ) -> Result<IssuedSession, SessionError> {
        let refresh_token = refresh_token.ok_or(SessionError::MissingToken)?;

        let payload = self
            .jwt
            .verify(refresh_token, TokenKind::Refresh)
            .map_err(|_| SessionError::InvalidToken)?;

        let record = self
            .db
            .refresh_tokens()
            .find(payload.sub, device_id)
            .await
            .map_err(|e| SessionError::internal("Failed to get refresh token", e))?
            .ok_or(SessionError::UnknownSession)?;

        let now = unix_now().map_err(|e| SessionError::internal("Failed to read clock", e))?;
        if record.is_expired(now) {
            debug!(user_id = payload.sub, device_id = %device_id, "Stored refresh token expired");
            return Err(SessionError::RefreshExpired);
        }

        let matches = record
            .matches(refresh_token)
            .map_err(|e| SessionError::internal("Failed to verify refresh token", e))?;
        if !matches {
            warn!(user_id = payload.sub, device_id = %device_id, "Superseded refresh token presented");
            return Err(SessionError::UnknownSession);
        }

        let user = self
            .db
            .users()
            .get_by_id(payload.sub)
            .await
            .map_err(|e| SessionError::internal("Failed to get user", e))?
            .ok_or(SessionError::UnknownSession)?;

        let session = self.issue(user.id, user.role, device_id).await?;
        debug!(user_id = user.id, device_id = %device_id, "Session refreshed");
        Ok(session)
    }

    /// Best-effort revocation of the session on `device_id`. Never fails.
    pub async fn logout(&self, device_id: &str, refresh_token: Option<&str>) {
        let Some(refresh_token) = refresh_token else {
            return;
        };

        let payload = match self.jwt.verify(refresh_token, TokenKind::Refresh) {
            Ok(payload) => payload,
            Err(_) => {
                debug!(device_id = %device_id, "Logout with invalid refresh token");
                return;
            }
        };

        match self
            .db
            .refresh_tokens()
            .delete(payload.sub, device_id)
            .await
        {
            Ok(true) => info!(user_id = payload.sub, device_id = %device_id, "Logged out"),
            Ok(false) => {}
            Err(e) => error!(error = %e, "Failed to delete refresh token"),
        }
    }

    /// Issue an access/refresh pair and persist the refresh token.
    async fn issue(
        &self,
        user_id: i64,
        role: UserRole,
        device_id: &str,
    ) -> Result<IssuedSession, SessionError> {
        let access = self
            .jwt
            .issue(user_id, role, TokenKind::Access)
            .map_err(|e| SessionError::internal("Failed to generate access token", e))?;
        let refresh = self
            .jwt
            .issue(user_id, role, TokenKind::Refresh)
            .map_err(|e| SessionError::internal("Failed to generate refresh token", e))?;

        self.db
            .refresh_tokens()
            .upsert(user_id, device_id, &refresh.token, refresh.expires_at)
            .await
            .map_err(|e| SessionError::internal("Failed to store refresh token", e))?;

        Ok(IssuedSession {
            access_token: access.token,
            refresh,
            user_id,
            role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> (SessionManager, Database, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let hash = password::hash("correct-pw").unwrap();
        let user_id = db
            .users()
            .create("alice", &hash, UserRole::User)
            .await
            .unwrap();
        let jwt = Arc::new(JwtConfig::new(b"access-secret", b"refresh-secret"));
        (SessionManager::new(db.clone(), jwt), db, user_id)
    }

    #[tokio::test]
    async fn test_login_issues_pair_and_stores_row() {
        let (sessions, db, user_id) = setup().await;

        let session = sessions
            .login("alice", "correct-pw", "device-1")
            .await
            .unwrap();
        assert_eq!(session.user_id, user_id);
        assert_eq!(session.role, UserRole::User);

        let record = db
            .refresh_tokens()
            .find(user_id, "device-1")
            .await
            .unwrap()
            .unwrap();
        assert!(record.matches(&session.refresh.token).unwrap());
        assert_eq!(record.expires_at, session.refresh.expires_at as i64);
    }

    #[tokio::test]
    async fn test_login_rejects_bad_credentials() {
        let (sessions, _, _) = setup().await;

        assert!(matches!(
            sessions.login("alice", "wrong-pw", "device-1").await,
            Err(SessionError::InvalidCredentials)
        ));
        assert!(matches!(
            sessions.login("bob", "correct-pw", "device-1").await,
            Err(SessionError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_rejects_replay() {
        let (sessions, _, _) = setup().await;
        let login = sessions
            .login("alice", "correct-pw", "device-1")
            .await
            .unwrap();

        let refreshed = sessions
            .refresh("device-1", Some(&login.refresh.token))
            .await
            .unwrap();
        assert_ne!(refreshed.access_token, login.access_token);
        assert_ne!(refreshed.refresh.token, login.refresh.token);

        let replay = sessions
            .refresh("device-1", Some(&login.refresh.token))
            .await;
        assert!(matches!(replay, Err(SessionError::UnknownSession)));
        assert!(!replay.unwrap_err().clears_cookie());
    }

    #[tokio::test]
    async fn test_refresh_missing_and_invalid_token() {
        let (sessions, _, _) = setup().await;

        assert!(matches!(
            sessions.refresh("device-1", None).await,
            Err(SessionError::MissingToken)
        ));

        let err = sessions
            .refresh("device-1", Some("garbage"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidToken));
        assert!(err.clears_cookie());
    }

    #[tokio::test]
    async fn test_refresh_on_other_device_is_unknown() {
        let (sessions, _, _) = setup().await;
        let login = sessions
            .login("alice", "correct-pw", "device-1")
            .await
            .unwrap();

        assert!(matches!(
            sessions
                .refresh("device-2", Some(&login.refresh.token))
                .await,
            Err(SessionError::UnknownSession)
        ));
    }

    #[tokio::test]
    async fn test_refresh_expired_record() {
        let (sessions, db, user_id) = setup().await;
        let login = sessions
            .login("alice", "correct-pw", "device-1")
            .await
            .unwrap();

        sqlx::query("UPDATE refresh_tokens SET expires_at = 1 WHERE user_id = ?")
            .bind(user_id)
            .execute(db.pool())
            .await
            .unwrap();

        let err = sessions
            .refresh("device-1", Some(&login.refresh.token))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::RefreshExpired));
        assert!(err.clears_cookie());
    }

    #[tokio::test]
    async fn test_refresh_picks_up_role_change() {
        let (sessions, db, user_id) = setup().await;
        let login = sessions
            .login("alice", "correct-pw", "device-1")
            .await
            .unwrap();

        db.users().set_role(user_id, UserRole::Admin).await.unwrap();

        let refreshed = sessions
            .refresh("device-1", Some(&login.refresh.token))
            .await
            .unwrap();
        assert_eq!(refreshed.role, UserRole::Admin);
    }

    #[tokio::test]
    async fn test_logout_deletes_row_and_is_idempotent() {
        let (sessions, db, user_id) = setup().await;
        let login = sessions
            .login("alice", "correct-pw", "device-1")
            .await
            .unwrap();

        sessions
            .logout("device-1", Some(&login.refresh.token))
            .await;
        assert!(
            db.refresh_tokens()
                .find(user_id, "device-1")
                .await
                .unwrap()
                .is_none()
        );

        sessions
            .logout("device-1", Some(&login.refresh.token))
            .await;
        sessions.logout("device-1", None).await;
        sessions.logout("device-1", Some("garbage")).await;

        assert!(matches!(
            sessions
                .refresh("device-1", Some(&login.refresh.token))
                .await,
            Err(SessionError::UnknownSession)
        ));
    }
}
