//! Salted slow hashing for passwords and refresh tokens at rest.

use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString, rand_core::OsRng},
};

/// Hash a secret with Argon2 and a fresh random salt.
/// Returns the PHC string (algorithm, parameters, salt and hash).
pub fn hash(secret: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError(e.to_string()))
}

/// Check a secret against a PHC hash string.
///
/// A malformed stored hash is an error; a mismatch is `Ok(false)`.
pub fn verify(secret: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(hash).map_err(|e| PasswordError(e.to_string()))?;
    Ok(Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok())
}

#[derive(Debug)]
pub struct PasswordError(String);

impl std::fmt::Display for PasswordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Password hashing failed: {}", self.0)
    }
}

impl std::error::Error for PasswordError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hashed = hash("correct-pw").unwrap();

        assert!(hashed.starts_with("$argon2"));
        assert!(verify("correct-pw", &hashed).unwrap());
        assert!(!verify("wrong-pw", &hashed).unwrap());
    }

    #[test]
    fn test_salted() {
        assert_ne!(hash("same").unwrap(), hash("same").unwrap());
    }

    #[test]
    fn test_malformed_hash() {
        assert!(verify("anything", "not-a-phc-string").is_err());
    }
}
