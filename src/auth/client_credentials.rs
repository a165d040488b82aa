//! OAuth2 client-credentials login (RFC 6749 section 4.4).

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{ensure_success, require, Authenticator, Credential, TokenResponse};
use crate::errors::{AuthenticationError, ConfigurationError};
use crate::transport::{HttpMethod, HttpRequest, HttpTransport};

pub(crate) const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Exchanges a client id and secret for a bearer token.
///
/// Used directly against a product line's `/signin` endpoint and against the
/// identity tenant's token endpoint.
pub struct ClientCredentialsAuthenticator {
    token_url: Url,
    client_id: String,
    client_secret: SecretString,
    send_grant_type: bool,
    audience: Option<String>,
    scope: Option<String>,
}

impl ClientCredentialsAuthenticator {
    /// Creates an authenticator posting to `token_url`.
    pub fn new(token_url: Url, client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            token_url,
            client_id: client_id.into(),
            client_secret,
            send_grant_type: true,
            audience: None,
            scope: None,
        }
    }

    /// Omits `grant_type` from the form, for endpoints that reject it.
    pub fn without_grant_type(mut self) -> Self {
        self.send_grant_type = false;
        self
    }

    /// Requests tokens for an audience.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Requests a scope.
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    fn form(&self) -> Result<String, AuthenticationError> {
        let mut params: Vec<(&str, &str)> = Vec::with_capacity(5);
        if self.send_grant_type {
            params.push(("grant_type", "client_credentials"));
        }
        params.push(("client_id", self.client_id.as_str()));
        params.push(("client_secret", self.client_secret.expose_secret().as_str()));
        if let Some(audience) = &self.audience {
            params.push(("audience", audience.as_str()));
        }
        if let Some(scope) = &self.scope {
            params.push(("scope", scope.as_str()));
        }
        serde_urlencoded::to_string(params)
            .map_err(|e| AuthenticationError::InvalidCredential(e.to_string()))
    }
}

#[async_trait]
impl Authenticator for ClientCredentialsAuthenticator {
    fn name(&self) -> &'static str {
        "client_credentials"
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        require(Some(self.client_id.as_str()), "client_id")?;
        require(Some(self.client_secret.expose_secret().as_str()), "client_secret")
    }

    async fn login(&self, transport: &dyn HttpTransport) -> Result<Credential, AuthenticationError> {
        let mut request = HttpRequest::new(HttpMethod::Post, self.token_url.clone());
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        request.body = Some(Bytes::from(self.form()?));

        let response = transport.send(request).await?;
        ensure_success(&response)?;
        TokenResponse::parse(&response)?.into_credential()
    }
}
