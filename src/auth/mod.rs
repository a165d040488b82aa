//! Authentication for the Zscaler product-line APIs.
//!
//! Every product line authenticates differently, but the request executor
//! only ever sees a [`Credential`]:
//! - OAuth2 client credentials (client id + secret, bearer token)
//! - JWT-bearer assertion signed with an RSA private key (bearer token)
//! - API key/secret exchange, optionally with a hashed secret (bearer JWT)
//! - username + password + obfuscated API key (session cookie)
//!
//! [`TokenStore`] holds the current credential and guarantees a single login
//! in flight per client. [`spawn_renewal`] refreshes it in the background.

mod api_key;
mod client_credentials;
mod credential;
mod jwt_assertion;
mod renewal;
mod session;
mod store;

pub use api_key::{ApiKeyAuthenticator, ApiKeyScheme};
pub use client_credentials::ClientCredentialsAuthenticator;
pub use credential::{AccessToken, Credential, Session, SESSION_COOKIE};
pub use jwt_assertion::JwtAssertionAuthenticator;
pub use renewal::{spawn_renewal, RenewalHandle};
pub use session::{obfuscate_api_key, SessionAuthenticator, DEFAULT_SESSION_TIMEOUT};
pub use store::{CredentialLease, TokenStore, DEFAULT_EXPIRY_MARGIN};

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

use crate::errors::{AuthenticationError, ConfigurationError};
use crate::transport::{HttpResponse, HttpTransport};

/// Lifetime assumed when a login response does not state one.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Produces a credential from configured credentials.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Checks that every required credential field is present.
    fn validate(&self) -> Result<(), ConfigurationError>;

    /// Performs one login. Never retries internally.
    async fn login(&self, transport: &dyn HttpTransport) -> Result<Credential, AuthenticationError>;

    /// Ends the server-side session, if the scheme has one.
    async fn logout(
        &self,
        _transport: &dyn HttpTransport,
        _credential: &Credential,
    ) -> Result<(), AuthenticationError> {
        Ok(())
    }
}

pub(crate) fn require(
    value: Option<&str>,
    field: &'static str,
) -> Result<(), ConfigurationError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(()),
        _ => Err(ConfigurationError::MissingCredentials(field.to_string())),
    }
}

pub(crate) fn ensure_success(response: &HttpResponse) -> Result<(), AuthenticationError> {
    if response.status.is_success() {
        Ok(())
    } else {
        Err(AuthenticationError::LoginRejected {
            status: response.status.as_u16(),
            body: response.body_text(),
        })
    }
}

/// Token endpoint response shared by the bearer flows.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(alias = "jwtToken", alias = "token")]
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_seconds")]
    pub expires_in: Option<u64>,
}

impl TokenResponse {
    pub(crate) fn parse(response: &HttpResponse) -> Result<Self, AuthenticationError> {
        serde_json::from_slice(&response.body)
            .map_err(|e| AuthenticationError::InvalidResponse(e.to_string()))
    }

    /// Converts into a bearer credential, reading the lifetime from
    /// `expires_in`, then the JWT `exp` claim, then the default.
    pub(crate) fn into_credential(self) -> Result<Credential, AuthenticationError> {
        if self.access_token.is_empty() {
            return Err(AuthenticationError::InvalidResponse(
                "empty access token".to_string(),
            ));
        }
        let token_type = self
            .token_type
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "Bearer".to_string());

        let token = match self.expires_in.filter(|s| *s > 0) {
            Some(secs) => AccessToken::new(self.access_token, token_type, Duration::from_secs(secs)),
            None => match jwt_expiry(&self.access_token) {
                Some(at) => AccessToken::with_expiry(self.access_token, token_type, at),
                None => AccessToken::new(self.access_token, token_type, DEFAULT_TOKEN_LIFETIME),
            },
        };
        Ok(Credential::Bearer(token))
    }
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Seconds {
        Number(u64),
        Text(String),
    }

    Ok(match Option::<Seconds>::deserialize(deserializer)? {
        Some(Seconds::Number(n)) => Some(n),
        Some(Seconds::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

/// Reads the `exp` claim of a JWT without verifying it.
fn jwt_expiry(token: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    chrono::DateTime::from_timestamp(exp, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use bytes::Bytes;
    use reqwest::{header::HeaderMap, StatusCode};

    fn response(body: &str) -> HttpResponse {
        HttpResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from(body.to_string()))
    }

    #[test]
    fn test_expires_in_accepts_string_and_number() {
        let text = TokenResponse::parse(&response(
            r#"{"token_type":"Bearer","access_token":"a","expires_in":"3600"}"#,
        ))
        .unwrap();
        assert_eq!(text.expires_in, Some(3600));

        let number =
            TokenResponse::parse(&response(r#"{"access_token":"a","expires_in":60}"#)).unwrap();
        assert_eq!(number.expires_in, Some(60));
    }

    #[test]
    fn test_jwt_token_alias_and_exp_claim() {
        let exp = chrono::Utc::now().timestamp() + 900;
        let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"x","exp":{}}}"#, exp));
        let jwt = format!("eyJhbGciOiJIUzI1NiJ9.{}.sig", claims);

        let parsed =
            TokenResponse::parse(&response(&format!(r#"{{"jwtToken":"{}"}}"#, jwt))).unwrap();
        match parsed.into_credential().unwrap() {
            Credential::Bearer(token) => {
                assert_eq!(token.expires_at.timestamp(), exp);
                assert_eq!(token.token_type, "Bearer");
            }
            other => panic!("unexpected credential {:?}", other),
        }
    }

    #[test]
    fn test_missing_lifetime_uses_default() {
        let parsed = TokenResponse::parse(&response(r#"{"token":"opaque"}"#)).unwrap();
        let credential = parsed.into_credential().unwrap();
        let remaining = credential.expires_at() - chrono::Utc::now();
        assert!(remaining > chrono::Duration::minutes(29));
        assert!(remaining <= chrono::Duration::minutes(30));
    }

    #[test]
    fn test_empty_token_is_rejected() {
        let parsed = TokenResponse::parse(&response(r#"{"access_token":""}"#)).unwrap();
        assert!(matches!(
            parsed.into_credential(),
            Err(AuthenticationError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_require() {
        assert!(require(Some("x"), "client_id").is_ok());
        assert!(require(Some("  "), "client_id").is_err());
        assert!(require(None, "client_id").is_err());
    }
}
