//! Username/password login producing a session cookie.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_TYPE, SET_COOKIE};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::time::Duration;
use url::Url;

use super::{ensure_success, require, Authenticator, Credential, Session, SESSION_COOKIE};
use crate::errors::{AuthenticationError, ConfigurationError};
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};

/// Default server-side session idle timeout.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const SESSION_PATH: &str = "authenticatedSession";
const MIN_API_KEY_LEN: usize = 12;
const TIMESTAMP_DIGITS: usize = 6;

/// Obfuscates an API key with a millisecond timestamp.
///
/// The last six digits of the timestamp (`high`) and `high >> 1` padded to
/// six digits (`low`) select characters of the key: `key[d]` for each digit
/// of `high`, then `key[d + 2]` for each digit of `low`.
pub fn obfuscate_api_key(api_key: &str, timestamp: &str) -> Result<String, AuthenticationError> {
    let seed = api_key.as_bytes();
    if seed.len() < MIN_API_KEY_LEN {
        return Err(AuthenticationError::Obfuscation(format!(
            "API key must be at least {} characters",
            MIN_API_KEY_LEN
        )));
    }
    if timestamp.len() < TIMESTAMP_DIGITS {
        return Err(AuthenticationError::Obfuscation(format!(
            "timestamp must be at least {} digits",
            TIMESTAMP_DIGITS
        )));
    }

    if !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AuthenticationError::Obfuscation(format!(
            "non-numeric timestamp {:?}",
            timestamp
        )));
    }

    let high = &timestamp[timestamp.len() - TIMESTAMP_DIGITS..];
    let high_value: u32 = high
        .parse()
        .map_err(|_| AuthenticationError::Obfuscation(format!("bad timestamp {:?}", timestamp)))?;
    let low = format!("{:06}", high_value >> 1);

    let pick = |digit: char, offset: usize| -> Result<char, AuthenticationError> {
        let index = digit
            .to_digit(10)
            .ok_or_else(|| AuthenticationError::Obfuscation(format!("non-digit {:?}", digit)))?
            as usize;
        seed.get(index + offset)
            .map(|b| char::from(*b))
            .ok_or_else(|| AuthenticationError::Obfuscation("API key too short".to_string()))
    };

    let mut key = String::with_capacity(2 * TIMESTAMP_DIGITS);
    for digit in high.chars() {
        key.push(pick(digit, 0)?);
    }
    for digit in low.chars() {
        key.push(pick(digit, 2)?);
    }
    Ok(key)
}

/// Logs in with username, password and obfuscated API key; the server
/// answers with a `JSESSIONID` cookie.
pub struct SessionAuthenticator {
    base_url: Url,
    username: String,
    password: SecretString,
    api_key: SecretString,
    session_timeout: Duration,
}

impl SessionAuthenticator {
    /// Creates an authenticator for the API rooted at `base_url`.
    pub fn new(
        base_url: Url,
        username: impl Into<String>,
        password: SecretString,
        api_key: SecretString,
    ) -> Self {
        Self {
            base_url,
            username: username.into(),
            password,
            api_key,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }

    /// Overrides the assumed session idle timeout.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    fn session_url(&self) -> Result<Url, AuthenticationError> {
        let url = format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), SESSION_PATH);
        Url::parse(&url).map_err(|e| AuthenticationError::InvalidCredential(e.to_string()))
    }
}

fn session_cookie(response: &HttpResponse) -> Option<String> {
    response
        .headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|cookie| cookie.split(';').next())
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

#[async_trait]
impl Authenticator for SessionAuthenticator {
    fn name(&self) -> &'static str {
        "session"
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        require(Some(self.username.as_str()), "username")?;
        require(Some(self.password.expose_secret().as_str()), "password")?;
        require(Some(self.api_key.expose_secret().as_str()), "api_key")?;
        if self.api_key.expose_secret().len() < MIN_API_KEY_LEN {
            return Err(ConfigurationError::InvalidConfiguration(format!(
                "api_key must be at least {} characters",
                MIN_API_KEY_LEN
            )));
        }
        Ok(())
    }

    async fn login(&self, transport: &dyn HttpTransport) -> Result<Credential, AuthenticationError> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let obfuscated = obfuscate_api_key(self.api_key.expose_secret(), &timestamp)?;

        let body = json!({
            "apiKey": obfuscated,
            "username": self.username,
            "password": self.password.expose_secret(),
            "timestamp": timestamp,
        });

        let mut request = HttpRequest::new(HttpMethod::Post, self.session_url()?);
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        request
            .headers
            .insert(ACCEPT, HeaderValue::from_static("application/json"));
        request.body = Some(Bytes::from(body.to_string()));

        let response = transport.send(request).await?;
        ensure_success(&response)?;

        let session_id = session_cookie(&response).ok_or_else(|| {
            AuthenticationError::InvalidResponse(format!("no {} cookie in login response", SESSION_COOKIE))
        })?;
        Ok(Credential::Cookie(Session::new(session_id, self.session_timeout)))
    }

    async fn logout(
        &self,
        transport: &dyn HttpTransport,
        credential: &Credential,
    ) -> Result<(), AuthenticationError> {
        let mut request = HttpRequest::new(HttpMethod::Delete, self.session_url()?);
        credential.apply(&mut request.headers)?;

        let response = transport.send(request).await?;
        if let Err(e) = ensure_success(&response) {
            tracing::warn!(error = %e, "Session logout failed");
            return Err(e);
        }
        tracing::debug!("Session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockTransport;
    use reqwest::header::{HeaderMap, COOKIE};
    use reqwest::StatusCode;
    use test_case::test_case;

    const KEY: &str = "abcdefghijkl";

    #[test_case("1700000123456", "bcdefgcidjek"; "typical timestamp")]
    #[test_case("000000", "aaaaaacccccc"; "all zeros")]
    #[test_case("999999", "jjjjjjglllll"; "all nines")]
    fn test_obfuscation_vectors(timestamp: &str, expected: &str) {
        assert_eq!(obfuscate_api_key(KEY, timestamp).unwrap(), expected);
    }

    #[test]
    fn test_obfuscation_rejects_short_inputs() {
        assert!(matches!(
            obfuscate_api_key("short", "1700000123456"),
            Err(AuthenticationError::Obfuscation(_))
        ));
        assert!(matches!(
            obfuscate_api_key(KEY, "12345"),
            Err(AuthenticationError::Obfuscation(_))
        ));
        assert!(obfuscate_api_key(KEY, "12a456").is_err());
    }

    fn authenticator() -> SessionAuthenticator {
        SessionAuthenticator::new(
            Url::parse("https://zsapi.zscalertwo.net/api/v1").unwrap(),
            "admin@example.com",
            SecretString::new("hunter2".to_string()),
            SecretString::new(KEY.to_string()),
        )
    }

    fn login_response(cookie: &str) -> HttpResponse {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("AWSALB=xyz; Path=/"));
        headers.append(SET_COOKIE, HeaderValue::from_str(cookie).unwrap());
        HttpResponse::new(StatusCode::OK, headers, Bytes::from_static(b"{\"authType\":\"ADMIN_LOGIN\"}"))
    }

    #[tokio::test]
    async fn test_login_extracts_session_cookie() {
        let transport = MockTransport::new()
            .with_response(login_response("JSESSIONID=ABC123; Path=/; Secure; HttpOnly"));

        let credential = authenticator().login(&transport).await.unwrap();
        match &credential {
            Credential::Cookie(session) => assert_eq!(session.cookie_header(), "JSESSIONID=ABC123"),
            other => panic!("unexpected credential {:?}", other),
        }

        let sent = transport.last_request().unwrap();
        assert_eq!(sent.url.as_str(), "https://zsapi.zscalertwo.net/api/v1/authenticatedSession");
        let body: serde_json::Value = serde_json::from_slice(&sent.body.unwrap()).unwrap();
        assert_eq!(body["username"], "admin@example.com");
        assert_eq!(body["apiKey"].as_str().unwrap().len(), 12);
        let timestamp = body["timestamp"].as_str().unwrap();
        assert_eq!(
            body["apiKey"].as_str().unwrap(),
            obfuscate_api_key(KEY, timestamp).unwrap()
        );
    }

    #[tokio::test]
    async fn test_missing_cookie_is_invalid_response() {
        let transport = MockTransport::new().with_response(login_response("OTHER=1"));
        let err = authenticator().login(&transport).await.unwrap_err();
        assert!(matches!(err, AuthenticationError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_logout_deletes_session() {
        let transport = MockTransport::new().with_json(StatusCode::NO_CONTENT, "");
        let credential = Credential::Cookie(Session::new("ABC123", DEFAULT_SESSION_TIMEOUT));

        authenticator().logout(&transport, &credential).await.unwrap();

        let sent = transport.last_request().unwrap();
        assert_eq!(sent.method, HttpMethod::Delete);
        assert_eq!(sent.headers.get(COOKIE).unwrap(), "JSESSIONID=ABC123");
    }

    #[test]
    fn test_validate_rejects_short_api_key() {
        let auth = SessionAuthenticator::new(
            Url::parse("https://zsapi.zscaler.net/api/v1").unwrap(),
            "admin",
            SecretString::new("pw".to_string()),
            SecretString::new("short".to_string()),
        );
        assert!(matches!(
            auth.validate(),
            Err(ConfigurationError::InvalidConfiguration(_))
        ));
    }
}
