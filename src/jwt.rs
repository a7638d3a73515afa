//! JWT token generation and validation.
//!
//! Access and refresh tokens are signed with disjoint secrets, so a token of
//! one kind never validates as the other.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::db::UserRole;

/// Access token duration: 15 minutes
pub const ACCESS_TOKEN_DURATION_SECS: u64 = 15 * 60;

/// Refresh token duration: 7 days
pub const REFRESH_TOKEN_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Which of the two token flavours an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn duration_secs(self) -> u64 {
        match self {
            TokenKind::Access => ACCESS_TOKEN_DURATION_SECS,
            TokenKind::Refresh => REFRESH_TOKEN_DURATION_SECS,
        }
    }
}

/// Verified token claims, shared by both token kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    /// Subject (user id), encoded as a string claim on the wire
    #[serde(with = "subject")]
    pub sub: i64,
    pub role: UserRole,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Unique per issued token; rotation never reproduces an earlier token.
    pub jti: String,
}

mod subject {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(id: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&id.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// A freshly signed token along with its expiry.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
    /// Token duration in seconds
    pub duration: u64,
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

/// Signs and verifies access and refresh tokens.
pub struct JwtConfig {
    access: KeyPair,
    refresh: KeyPair,
}

impl JwtConfig {
    /// Create a codec from the access-token and refresh-token secrets.
    pub fn new(access_secret: &[u8], refresh_secret: &[u8]) -> Self {
        Self {
            access: KeyPair::new(access_secret),
            refresh: KeyPair::new(refresh_secret),
        }
    }

    fn keys(&self, kind: TokenKind) -> &KeyPair {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }

    /// Sign a new token of the given kind for a user.
    pub fn issue(
        &self,
        user_id: i64,
        role: UserRole,
        kind: TokenKind,
    ) -> Result<IssuedToken, JwtError> {
        let now = unix_now()?;
        let duration = kind.duration_secs();

        let claims = TokenPayload {
            sub: user_id,
            role,
            exp: now + duration,
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.keys(kind).encoding)
            .map_err(JwtError::Encoding)?;

        Ok(IssuedToken {
            token,
            expires_at: claims.exp,
            duration,
        })
    }

    /// Validate signature and expiry against the secret for `kind`.
    ///
    /// Every failure is reported as [`JwtError::InvalidToken`].
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<TokenPayload, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        jsonwebtoken::decode::<TokenPayload>(token, &self.keys(kind).decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(kind = ?kind, error = %e, "Token verification failed");
                JwtError::InvalidToken
            })
    }
}

/// Current wall-clock time in Unix seconds.
pub fn unix_now() -> Result<u64, JwtError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| JwtError::TimeError)
}

/// Errors that can occur during JWT operations.
#[derive(Debug)]
pub enum JwtError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// Bad signature, malformed structure or expired
    InvalidToken,
    /// System time error
    TimeError,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::InvalidToken => write!(f, "Invalid token"),
            JwtError::TimeError => write!(f, "System time error"),
        }
    }
}

impl std::error::Error for JwtError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> JwtConfig {
        JwtConfig::new(b"access-secret-for-testing", b"refresh-secret-for-testing")
    }

    #[test]
    fn test_issue_and_verify_access_token() {
        let config = codec();

        let result = config.issue(42, UserRole::User, TokenKind::Access).unwrap();
        assert_eq!(result.duration, ACCESS_TOKEN_DURATION_SECS);

        let claims = config.verify(&result.token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.role, UserRole::User);
        assert_eq!(claims.exp, result.expires_at);
    }

    #[test]
    fn test_refresh_token_lifetime() {
        let config = codec();
        let before = unix_now().unwrap();

        let result = config.issue(7, UserRole::Admin, TokenKind::Refresh).unwrap();
        assert_eq!(result.duration, REFRESH_TOKEN_DURATION_SECS);
        assert!(result.expires_at >= before + REFRESH_TOKEN_DURATION_SECS);

        let claims = config.verify(&result.token, TokenKind::Refresh).unwrap();
        assert_eq!(claims.role, UserRole::Admin);
    }

    #[test]
    fn test_kinds_use_disjoint_secrets() {
        let config = codec();

        let access = config.issue(1, UserRole::User, TokenKind::Access).unwrap();
        let refresh = config.issue(1, UserRole::User, TokenKind::Refresh).unwrap();

        assert!(config.verify(&access.token, TokenKind::Refresh).is_err());
        assert!(config.verify(&refresh.token, TokenKind::Access).is_err());
    }

    #[test]
    fn test_subject_is_string_claim() {
        let config = codec();
        let result = config.issue(99, UserRole::User, TokenKind::Access).unwrap();

        let key = DecodingKey::from_secret(b"access-secret-for-testing");
        let raw = jsonwebtoken::decode::<serde_json::Value>(
            &result.token,
            &key,
            &Validation::new(Algorithm::HS256),
        )
        .unwrap();
        assert_eq!(raw.claims["sub"], "99");
        assert_eq!(raw.claims["role"], "USER");
    }

    #[test]
    fn test_invalid_token() {
        let config = codec();

        assert!(matches!(
            config.verify("invalid-token", TokenKind::Access),
            Err(JwtError::InvalidToken)
        ));
    }

    #[test]
    fn test_wrong_secret() {
        let config1 = codec();
        let config2 = JwtConfig::new(b"other-access", b"other-refresh");

        let result = config1.issue(1, UserRole::User, TokenKind::Access).unwrap();
        assert!(config2.verify(&result.token, TokenKind::Access).is_err());
    }

    #[test]
    fn test_expired_token() {
        let now = unix_now().unwrap();

        let claims = TokenPayload {
            sub: 1,
            role: UserRole::User,
            exp: now - 50,
            jti: "expired".to_string(),
        };
        let token = jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"access-secret-for-testing"),
        )
        .unwrap();

        let result = codec().verify(&token, TokenKind::Access);
        assert!(matches!(result, Err(JwtError::InvalidToken)));
    }

    #[test]
    fn test_tokens_differ_within_same_second() {
        let config = codec();

        let first = config.issue(1, UserRole::User, TokenKind::Refresh).unwrap();
        let second = config.issue(1, UserRole::User, TokenKind::Refresh).unwrap();

        assert_ne!(first.token, second.token);
    }
}
