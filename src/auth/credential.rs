//! Credentials attached to outgoing requests.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, COOKIE};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

use crate::errors::AuthenticationError;

/// Name of the session cookie issued by the session login endpoint.
pub const SESSION_COOKIE: &str = "JSESSIONID";

/// Bearer token with metadata.
#[derive(Debug, Clone)]
pub struct AccessToken {
    /// The token string.
    pub token: SecretString,
    /// Token type (usually "Bearer").
    pub token_type: String,
    /// Expiration time.
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Creates a token expiring `expires_in` from now.
    pub fn new(token: impl Into<String>, token_type: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            token: SecretString::new(token.into()),
            token_type: token_type.into(),
            expires_at: add_duration(Utc::now(), expires_in),
        }
    }

    /// Creates a token with an absolute expiry.
    pub fn with_expiry(
        token: impl Into<String>,
        token_type: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token: SecretString::new(token.into()),
            token_type: token_type.into(),
            expires_at,
        }
    }

    /// Value of the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        let token_type = if self.token_type.is_empty() {
            "Bearer"
        } else {
            self.token_type.as_str()
        };
        format!("{} {}", token_type, self.token.expose_secret())
    }
}

/// Cookie-based session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session identifier.
    pub session_id: SecretString,
    /// When the session was created or last refreshed.
    pub refreshed_at: DateTime<Utc>,
    /// Server-side idle timeout.
    pub timeout: Duration,
}

impl Session {
    /// Session refreshed now.
    pub fn new(session_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            session_id: SecretString::new(session_id.into()),
            refreshed_at: Utc::now(),
            timeout,
        }
    }

    /// `refreshed_at + timeout`.
    pub fn expires_at(&self) -> DateTime<Utc> {
        add_duration(self.refreshed_at, self.timeout)
    }

    /// Value of the `Cookie` header.
    pub fn cookie_header(&self) -> String {
        format!("{}={}", SESSION_COOKIE, self.session_id.expose_secret())
    }
}

/// A credential as consumed by request building.
#[derive(Debug, Clone)]
pub enum Credential {
    /// `Authorization: <type> <token>`.
    Bearer(AccessToken),
    /// `Cookie: JSESSIONID=<id>`.
    Cookie(Session),
}

impl Credential {
    /// Short variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Credential::Bearer(_) => "bearer",
            Credential::Cookie(_) => "session",
        }
    }

    /// Expiry instant.
    pub fn expires_at(&self) -> DateTime<Utc> {
        match self {
            Credential::Bearer(token) => token.expires_at,
            Credential::Cookie(session) => session.expires_at(),
        }
    }

    /// Whether the credential carries any material at all.
    pub fn has_material(&self) -> bool {
        match self {
            Credential::Bearer(token) => !token.token.expose_secret().is_empty(),
            Credential::Cookie(session) => !session.session_id.expose_secret().is_empty(),
        }
    }

    /// Non-empty and valid until at least `margin` from now.
    pub fn is_valid(&self, margin: Duration) -> bool {
        self.has_material() && add_duration(Utc::now(), margin) < self.expires_at()
    }

    /// Attaches the credential to request headers.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), AuthenticationError> {
        let (name, value) = match self {
            Credential::Bearer(token) => (AUTHORIZATION, token.authorization_header()),
            Credential::Cookie(session) => (COOKIE, session.cookie_header()),
        };
        let mut value = HeaderValue::from_str(&value)
            .map_err(|e| AuthenticationError::InvalidCredential(e.to_string()))?;
        value.set_sensitive(true);
        headers.insert(name, value);
        Ok(())
    }
}

fn add_duration(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MARGIN: Duration = Duration::from_secs(30);

    #[test]
    fn test_token_validity_against_margin() {
        let fresh = Credential::Bearer(AccessToken::new("t", "Bearer", Duration::from_secs(45)));
        let expiring = Credential::Bearer(AccessToken::new("t", "Bearer", Duration::from_secs(10)));
        assert!(fresh.is_valid(MARGIN));
        assert!(!expiring.is_valid(MARGIN));
    }

    #[test]
    fn test_empty_material_is_invalid() {
        let empty = Credential::Bearer(AccessToken::new("", "Bearer", Duration::from_secs(3600)));
        assert!(!empty.is_valid(MARGIN));
        let empty_session = Credential::Cookie(Session::new("", Duration::from_secs(3600)));
        assert!(!empty_session.is_valid(MARGIN));
    }

    #[test]
    fn test_session_expiry_follows_timeout() {
        let session = Session::new("abc", Duration::from_secs(1800));
        assert_eq!(
            session.expires_at() - session.refreshed_at,
            chrono::Duration::seconds(1800)
        );
        assert!(Credential::Cookie(session).is_valid(MARGIN));
    }

    #[test]
    fn test_apply_sets_matching_header() {
        let mut headers = HeaderMap::new();
        Credential::Bearer(AccessToken::new("tok", "Bearer", Duration::from_secs(60)))
            .apply(&mut headers)
            .unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer tok");
        assert!(headers.get(AUTHORIZATION).unwrap().is_sensitive());

        let mut headers = HeaderMap::new();
        Credential::Cookie(Session::new("s1", Duration::from_secs(60)))
            .apply(&mut headers)
            .unwrap();
        assert_eq!(headers.get(COOKIE).unwrap(), "JSESSIONID=s1");
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_debug_redacts_material() {
        let token = AccessToken::new("super-secret", "Bearer", Duration::from_secs(60));
        assert!(!format!("{:?}", token).contains("super-secret"));
    }
}
