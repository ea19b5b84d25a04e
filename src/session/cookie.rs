//! Signed session cookies.
//!
//! The cookie value is a 256-bit random id, signed with the `cookie` crate's
//! HMAC-SHA256 `SignedJar`. The signing key is derived from the configured
//! secret.

use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use cookie::{time::Duration, Cookie, CookieJar, Key, SameSite};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha512};

/// Encoded length of a 32-byte id.
const ID_LEN: usize = 43;

/// Fresh 256-bit session id.
pub fn generate_id() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn is_session_id(value: &str) -> bool {
    value.len() == ID_LEN && URL_SAFE_NO_PAD.decode(value).is_ok()
}

/// Reads and writes the session cookie.
#[derive(Clone)]
pub struct SessionCookie {
    name: String,
    key: Key,
    max_age: Duration,
    secure: bool,
}

impl SessionCookie {
    pub fn new(name: &str, secret: &str, max_age_secs: u64, secure: bool) -> Self {
        // `Key` needs 64 bytes of material; SHA-512 stretches short secrets.
        let material = Sha512::digest(secret.as_bytes());
        Self {
            name: name.to_string(),
            key: Key::from(material.as_slice()),
            max_age: Duration::seconds(i64::try_from(max_age_secs).unwrap_or(i64::MAX)),
            secure,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether issued cookies carry `Secure`.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// The session id in the request's cookie, if present and correctly signed.
    pub fn read(&self, headers: &HeaderMap) -> Option<String> {
        let cookie = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| Cookie::split_parse(v))
            .filter_map(Result::ok)
            .find(|c| c.name() == self.name)?
            .into_owned();

        let mut jar = CookieJar::new();
        jar.add_original(cookie);
        let verified = jar.signed(&self.key).get(&self.name)?;
        let id = verified.value();
        is_session_id(id).then(|| id.to_string())
    }

    /// Signed cookie carrying `id`.
    pub fn issue(&self, id: &str) -> Option<Cookie<'static>> {
        let mut jar = CookieJar::new();
        jar.signed_mut(&self.key)
            .add(self.build(id.to_string(), self.max_age));
        jar.get(&self.name).cloned()
    }

    /// Cookie that makes the browser forget the session.
    pub fn removal(&self) -> Cookie<'static> {
        self.build(String::new(), Duration::ZERO)
    }

    fn build(&self, value: String, max_age: Duration) -> Cookie<'static> {
        Cookie::build((self.name.clone(), value))
            .path("/")
            .max_age(max_age)
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.secure)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn cookie(secret: &str) -> SessionCookie {
        SessionCookie::new("sid", secret, 86_400, false)
    }

    fn headers(values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(header::COOKIE, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn test_ids_are_unique_and_sized() {
        let a = generate_id();
        let b = generate_id();
        assert_eq!(a.len(), ID_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn test_issue_and_read() {
        let jar = cookie("a-long-enough-secret-for-tests-0001");
        let id = generate_id();
        let issued = jar.issue(&id).unwrap();
        assert_ne!(issued.value(), id);

        let request = headers(&[&format!("theme=dark; {}", issued.stripped())]);
        assert_eq!(jar.read(&request), Some(id));
    }

    #[test]
    fn test_rejects_tampering() {
        let jar = cookie("secret-one");
        let other = cookie("secret-two");
        let issued = jar.issue(&generate_id()).unwrap();

        let replayed = headers(&[&issued.stripped().to_string()]);
        assert_eq!(other.read(&replayed), None);

        // Signature of one id glued onto another.
        let (signature, _) = issued.value().split_at(issued.value().len() - ID_LEN);
        let forged = headers(&[&format!("sid={signature}{}", generate_id())]);
        assert_eq!(jar.read(&forged), None);

        for garbage in ["sid=", "sid=abc", "sid=no-dot-here", "sid=%%%", "other=1", "garbage"] {
            assert_eq!(jar.read(&headers(&[garbage])), None, "{garbage}");
        }
    }

    #[test]
    fn test_cookie_attributes() {
        let dev = cookie("secret");
        let issued = dev.issue(&generate_id()).unwrap().to_string();
        assert!(issued.starts_with("sid="));
        assert!(issued.contains("Path=/"));
        assert!(issued.contains("Max-Age=86400"));
        assert!(issued.contains("HttpOnly"));
        assert!(issued.contains("SameSite=Lax"));
        assert!(!issued.contains("Secure"));

        let removal = dev.removal().to_string();
        assert!(removal.starts_with("sid=;"));
        assert!(removal.contains("Max-Age=0"));

        let prod = SessionCookie::new("sid", "secret", 60, true);
        assert!(prod.issue(&generate_id()).unwrap().to_string().contains("; Secure"));
    }
}
