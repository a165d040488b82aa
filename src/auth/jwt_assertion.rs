//! Client-credentials login authenticated with a signed JWT assertion
//! (`private_key_jwt`).

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use url::Url;

use super::client_credentials::FORM_CONTENT_TYPE;
use super::{ensure_success, require, Authenticator, Credential, TokenResponse};
use crate::errors::{AuthenticationError, ConfigurationError};
use crate::transport::{HttpMethod, HttpRequest, HttpTransport};

/// Lifetime of a signed assertion.
pub const ASSERTION_LIFETIME_SECONDS: i64 = 300;

const ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    jti: String,
}

/// Signs an RS256 assertion with a private key and exchanges it for a
/// bearer token.
pub struct JwtAssertionAuthenticator {
    token_url: Url,
    client_id: String,
    private_key: SecretString,
    audience: Option<String>,
}

impl JwtAssertionAuthenticator {
    /// Creates an authenticator. `private_key` is an RSA key in PEM form.
    pub fn new(token_url: Url, client_id: impl Into<String>, private_key: SecretString) -> Self {
        Self {
            token_url,
            client_id: client_id.into(),
            private_key,
            audience: None,
        }
    }

    /// Requests tokens for an audience.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Builds and signs a fresh assertion.
    pub fn create_assertion(&self) -> Result<String, AuthenticationError> {
        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.client_id,
            sub: &self.client_id,
            aud: self.token_url.as_str(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECONDS,
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let key = EncodingKey::from_rsa_pem(self.private_key.expose_secret().as_bytes())
            .map_err(|e| AuthenticationError::Assertion(format!("Invalid private key: {}", e)))?;

        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| AuthenticationError::Assertion(format!("JWT encoding failed: {}", e)))
    }
}

#[async_trait]
impl Authenticator for JwtAssertionAuthenticator {
    fn name(&self) -> &'static str {
        "jwt_assertion"
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        require(Some(self.client_id.as_str()), "client_id")?;
        require(Some(self.private_key.expose_secret().as_str()), "private_key")
    }

    async fn login(&self, transport: &dyn HttpTransport) -> Result<Credential, AuthenticationError> {
        let assertion = self.create_assertion()?;

        let mut params: Vec<(&str, &str)> = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_assertion_type", ASSERTION_TYPE),
            ("client_assertion", assertion.as_str()),
        ];
        if let Some(audience) = &self.audience {
            params.push(("audience", audience.as_str()));
        }
        let form = serde_urlencoded::to_string(params)
            .map_err(|e| AuthenticationError::Assertion(e.to_string()))?;

        let mut request = HttpRequest::new(HttpMethod::Post, self.token_url.clone());
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        request.body = Some(Bytes::from(form));

        let response = transport.send(request).await?;
        ensure_success(&response)?;
        TokenResponse::parse(&response)?.into_credential()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockTransport;
    use jsonwebtoken::{decode_header, Algorithm};
    use reqwest::StatusCode;

    const TEST_KEY: &str = include_str!("../../tests/fixtures/test_rsa_key.pem");

    fn authenticator(key: &str) -> JwtAssertionAuthenticator {
        JwtAssertionAuthenticator::new(
            Url::parse("https://acme.zslogin.net/oauth2/v1/token").unwrap(),
            "client-9",
            SecretString::new(key.to_string()),
        )
    }

    #[test]
    fn test_assertion_is_rs256_signed() {
        let jwt = authenticator(TEST_KEY).create_assertion().unwrap();
        let header = decode_header(&jwt).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(jwt.split('.').count(), 3);
    }

    #[test]
    fn test_invalid_key_is_assertion_error() {
        let err = authenticator("not a pem").create_assertion().unwrap_err();
        assert!(matches!(err, AuthenticationError::Assertion(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_login_sends_client_assertion() {
        let transport = MockTransport::new()
            .with_json(StatusCode::OK, r#"{"access_token":"tok","expires_in":3600}"#);

        let credential = authenticator(TEST_KEY)
            .with_audience("https://api.zscaler.com")
            .login(&transport)
            .await
            .unwrap();
        assert!(matches!(credential, Credential::Bearer(_)));

        let body = String::from_utf8(transport.last_request().unwrap().body.unwrap().to_vec()).unwrap();
        assert!(body.contains("client_assertion_type=urn%3Aietf%3Aparams%3Aoauth%3Aclient-assertion-type%3Ajwt-bearer"));
        assert!(body.contains("client_assertion=ey"));
        assert!(body.contains("audience=https%3A%2F%2Fapi.zscaler.com"));
    }

    #[test]
    fn test_validate_requires_key() {
        assert!(authenticator("").validate().is_err());
        assert!(authenticator(TEST_KEY).validate().is_ok());
    }
}
