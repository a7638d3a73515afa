use std::sync::{Arc, RwLock};

use serde::Deserialize;

use crate::db::UserRole;

/// The signed-in user as last reported by login or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub user_id: i64,
    pub role: UserRole,
}

/// Shared handle to the current session. Clones see the same state.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    inner: Arc<RwLock<Option<Session>>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Session> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Current access token, if any.
    pub fn token(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|session| session.token.clone())
    }

    pub fn set(&self, session: Session) {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(session);
    }

    pub fn clear(&self) {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let context = SessionContext::new();
        let other = context.clone();
        assert!(!context.is_authenticated());

        other.set(Session {
            token: "abc".to_string(),
            user_id: 1,
            role: UserRole::User,
        });
        assert!(context.is_authenticated());
        assert_eq!(context.token().as_deref(), Some("abc"));
        assert_eq!(context.get().map(|s| s.user_id), Some(1));

        context.clear();
        assert!(!other.is_authenticated());
        assert!(other.token().is_none());
    }

    #[test]
    fn test_session_deserializes_api_body() {
        let session: Session =
            serde_json::from_str(r#"{"token":"t","userId":7,"role":"ADMIN"}"#).unwrap();
        assert_eq!(session.user_id, 7);
        assert_eq!(session.role, UserRole::Admin);
    }
}
