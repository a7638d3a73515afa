//! Signed refresh token cookie.
//!
//! The cookie value is `<token>.<signature>` where the signature is a
//! base64url HMAC-SHA256 of the token under the cookie secret. A cookie whose
//! signature does not match is treated as absent.

use axum::http::{HeaderMap, header};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Cookie name for the refresh token.
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

/// Reads, writes and clears the signed `refresh_token` cookie.
pub struct RefreshCookie {
    secret: Vec<u8>,
    /// Production cookies are `Secure; SameSite=None`, development ones `SameSite=Lax`.
    production: bool,
}

impl RefreshCookie {
    pub fn new(secret: &[u8], production: bool) -> Self {
        Self {
            secret: secret.to_vec(),
            production,
        }
    }

    fn mac(&self) -> HmacSha256 {
        <HmacSha256 as Mac>::new_from_slice(&self.secret).expect("HMAC accepts any key length")
    }

    fn sign(&self, value: &str) -> String {
        let mut mac = self.mac();
        mac.update(value.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        format!("{}.{}", value, signature)
    }

    fn unsign<'a>(&self, signed: &'a str) -> Option<&'a str> {
        let (value, signature) = signed.rsplit_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;
        let mut mac = self.mac();
        mac.update(value.as_bytes());
        mac.verify_slice(&signature).ok()?;
        Some(value)
    }

    /// The refresh token carried by the request, if present and correctly signed.
    pub fn read<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        let signed = get_cookie(headers, REFRESH_COOKIE_NAME)?;
        let value = self.unsign(signed);
        if value.is_none() {
            tracing::debug!("Refresh cookie signature mismatch");
        }
        value
    }

    fn attributes(&self) -> &'static str {
        if self.production {
            "HttpOnly; SameSite=None; Path=/; Secure"
        } else {
            "HttpOnly; SameSite=Lax; Path=/"
        }
    }

    /// `Set-Cookie` value carrying a freshly signed refresh token.
    pub fn set(&self, token: &str, max_age: u64) -> String {
        format!(
            "{}={}; Max-Age={}; {}",
            REFRESH_COOKIE_NAME,
            self.sign(token),
            max_age,
            self.attributes()
        )
    }

    /// `Set-Cookie` value that removes the refresh token.
    pub fn clear(&self) -> String {
        format!("{}=; Max-Age=0; {}", REFRESH_COOKIE_NAME, self.attributes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    /// The name=value part of a Set-Cookie header.
    fn pair(set_cookie: &str) -> &str {
        set_cookie.split(';').next().unwrap()
    }

    #[test]
    fn test_get_cookie_multiple() {
        let headers = headers_with("foo=bar; refresh_token=xyz789");

        assert_eq!(get_cookie(&headers, "refresh_token"), Some("xyz789"));
        assert_eq!(get_cookie(&headers, "foo"), Some("bar"));
        assert_eq!(get_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_get_cookie_no_header() {
        let headers = HeaderMap::new();
        assert_eq!(get_cookie(&headers, "refresh_token"), None);
    }

    #[test]
    fn test_signed_cookie_round_trip() {
        let cookie = RefreshCookie::new(b"cookie-secret", false);
        let set = cookie.set("header.payload.sig", 604800);

        let headers = headers_with(pair(&set));
        assert_eq!(cookie.read(&headers), Some("header.payload.sig"));
    }

    #[test]
    fn test_tampered_cookie_is_ignored() {
        let cookie = RefreshCookie::new(b"cookie-secret", false);
        let set = cookie.set("header.payload.sig", 604800);
        let tampered = pair(&set).replace("payload", "payl0ad");

        assert_eq!(cookie.read(&headers_with(&tampered)), None);
        assert_eq!(cookie.read(&headers_with("refresh_token=unsigned")), None);
    }

    #[test]
    fn test_other_secret_rejects_cookie() {
        let set = RefreshCookie::new(b"cookie-secret", false).set("a.b.c", 10);
        let other = RefreshCookie::new(b"another-secret", false);

        assert_eq!(other.read(&headers_with(pair(&set))), None);
    }

    #[test]
    fn test_cookie_attributes_follow_environment() {
        let dev = RefreshCookie::new(b"s", false);
        let set = dev.set("a.b.c", 604800);
        assert!(set.contains("HttpOnly"));
        assert!(set.contains("SameSite=Lax"));
        assert!(set.contains("Max-Age=604800"));
        assert!(!set.contains("Secure"));

        let prod = RefreshCookie::new(b"s", true);
        let set = prod.set("a.b.c", 604800);
        assert!(set.contains("SameSite=None"));
        assert!(set.contains("Secure"));

        let cleared = prod.clear();
        assert!(cleared.starts_with("refresh_token=;"));
        assert!(cleared.contains("Max-Age=0"));
    }
}
