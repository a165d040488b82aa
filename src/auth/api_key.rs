//! API key/secret exchange.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use sha2::{Digest, Sha256};
use url::Url;

use super::{ensure_success, require, Authenticator, Credential, TokenResponse};
use crate::errors::{AuthenticationError, ConfigurationError};
use crate::transport::{HttpMethod, HttpRequest, HttpTransport};

/// How the secret travels to the login endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyScheme {
    /// `{"apiKey", "secretKey"}` in clear.
    Plain,
    /// `{"key_id", "key_secret", "timestamp"}` where `key_secret` is
    /// `sha256_hex("<secret>:<timestamp>")`.
    HashedSecret,
}

/// Exchanges an API key and secret for a bearer JWT.
pub struct ApiKeyAuthenticator {
    login_url: Url,
    api_key: String,
    secret: SecretString,
    scheme: ApiKeyScheme,
}

impl ApiKeyAuthenticator {
    /// Creates an authenticator.
    pub fn new(
        login_url: Url,
        api_key: impl Into<String>,
        secret: SecretString,
        scheme: ApiKeyScheme,
    ) -> Self {
        Self {
            login_url,
            api_key: api_key.into(),
            secret,
            scheme,
        }
    }

    fn payload(&self, timestamp: i64) -> serde_json::Value {
        match self.scheme {
            ApiKeyScheme::Plain => json!({
                "apiKey": self.api_key,
                "secretKey": self.secret.expose_secret(),
            }),
            ApiKeyScheme::HashedSecret => json!({
                "key_id": self.api_key,
                "key_secret": hashed_secret(self.secret.expose_secret(), timestamp),
                "timestamp": timestamp,
            }),
        }
    }
}

/// `sha256_hex("<secret>:<timestamp>")`.
pub(crate) fn hashed_secret(secret: &str, timestamp: i64) -> String {
    hex::encode(Sha256::digest(format!("{}:{}", secret, timestamp).as_bytes()))
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    fn name(&self) -> &'static str {
        match self.scheme {
            ApiKeyScheme::Plain => "api_key",
            ApiKeyScheme::HashedSecret => "api_key_hashed",
        }
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        require(Some(self.api_key.as_str()), "api_key")?;
        require(Some(self.secret.expose_secret().as_str()), "api_secret")
    }

    async fn login(&self, transport: &dyn HttpTransport) -> Result<Credential, AuthenticationError> {
        let body = serde_json::to_vec(&self.payload(Utc::now().timestamp()))
            .map_err(|e| AuthenticationError::InvalidCredential(e.to_string()))?;

        let mut request = HttpRequest::new(HttpMethod::Post, self.login_url.clone());
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        request.body = Some(Bytes::from(body));

        let response = transport.send(request).await?;
        ensure_success(&response)?;
        TokenResponse::parse(&response)?.into_credential()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockTransport;
    use reqwest::StatusCode;

    fn authenticator(scheme: ApiKeyScheme) -> ApiKeyAuthenticator {
        ApiKeyAuthenticator::new(
            Url::parse("https://api-mobile.zscaler.net/papi/auth/v1/login").unwrap(),
            "key-1",
            SecretString::new("secret-1".to_string()),
            scheme,
        )
    }

    #[test]
    fn test_hashed_secret_is_sha256_of_secret_and_timestamp() {
        let expected = hex::encode(Sha256::digest(b"secret-1:1700000000"));
        assert_eq!(hashed_secret("secret-1", 1_700_000_000), expected);
        assert_eq!(expected.len(), 64);
    }

    #[test]
    fn test_payload_shapes() {
        let plain = authenticator(ApiKeyScheme::Plain).payload(1);
        assert_eq!(plain["apiKey"], "key-1");
        assert_eq!(plain["secretKey"], "secret-1");

        let hashed = authenticator(ApiKeyScheme::HashedSecret).payload(1_700_000_000);
        assert_eq!(hashed["key_id"], "key-1");
        assert_eq!(hashed["timestamp"], 1_700_000_000);
        assert_eq!(hashed["key_secret"], hashed_secret("secret-1", 1_700_000_000));
    }

    #[tokio::test]
    async fn test_login_reads_jwt_token_field() {
        let transport = MockTransport::new()
            .with_json(StatusCode::OK, r#"{"jwtToken":"opaque-token"}"#);

        let credential = authenticator(ApiKeyScheme::Plain)
            .login(&transport)
            .await
            .unwrap();
        match credential {
            Credential::Bearer(token) => assert_eq!(token.authorization_header(), "Bearer opaque-token"),
            other => panic!("unexpected credential {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_login_reads_token_field() {
        let transport = MockTransport::new().with_json(
            StatusCode::OK,
            r#"{"token":"zdx-token","token_type":"Bearer","expires_in":3600}"#,
        );
        let credential = authenticator(ApiKeyScheme::HashedSecret)
            .login(&transport)
            .await
            .unwrap();
        assert!(credential.is_valid(std::time::Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let transport = MockTransport::new().with_json(StatusCode::BAD_GATEWAY, "{}");
        let err = authenticator(ApiKeyScheme::Plain)
            .login(&transport)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
