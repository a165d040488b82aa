//! Test doubles for the transport and authenticator seams.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::auth::{AccessToken, Authenticator, Credential, Session};
use crate::errors::{AuthenticationError, ConfigurationError, TransportError};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

/// Mock HTTP response.
#[derive(Debug, Clone)]
pub struct MockResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Bytes,
}

impl MockResponse {
    /// 200 with a JSON body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::json(200, body)
    }

    /// Response with a JSON body.
    pub fn json(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.into(),
        }
    }

    /// Add a header to the response.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

impl From<MockResponse> for HttpResponse {
    fn from(mock: MockResponse) -> Self {
        let mut headers = HeaderMap::new();
        for (key, value) in &mock.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(key.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        let status = StatusCode::from_u16(mock.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        HttpResponse::new(status, headers, mock.body)
    }
}

/// Mock HTTP transport for testing.
///
/// Replies from a FIFO queue, then from the default response; records every
/// request it receives.
#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
    default_response: Option<HttpResponse>,
    latency: Duration,
}

impl MockTransport {
    /// Create a new mock transport with no responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn with_response(self, response: impl Into<HttpResponse>) -> Self {
        self.queue_response(response);
        self
    }

    /// Queues a JSON response.
    pub fn with_json(self, status: StatusCode, body: &str) -> Self {
        self.with_response(MockResponse::json(status.as_u16(), body.to_string()))
    }

    /// Queues a network failure.
    pub fn with_error(self, error: TransportError) -> Self {
        self.queue_error(error);
        self
    }

    /// Response returned once the queue is empty.
    pub fn with_default(mut self, response: impl Into<HttpResponse>) -> Self {
        self.default_response = Some(response.into());
        self
    }

    /// Each send takes `latency` before replying.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a response to return.
    pub fn queue_response(&self, response: impl Into<HttpResponse>) {
        self.responses.lock().push_back(Ok(response.into()));
    }

    /// Queue a network failure.
    pub fn queue_error(&self, error: TransportError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Get all recorded requests.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Get the number of requests made.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Get the last request made.
    pub fn last_request(&self) -> Option<HttpRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let next = self.responses.lock().pop_front();
        match next {
            Some(result) => result,
            None => self
                .default_response
                .clone()
                .ok_or_else(|| TransportError::Network("no mock response queued".to_string())),
        }
    }
}

/// Authenticator issuing `token-<n>` credentials without any I/O.
pub struct MockAuthenticator {
    lifetime: Duration,
    delay: Duration,
    session: bool,
    failures: Mutex<VecDeque<AuthenticationError>>,
    logins: AtomicU64,
    logouts: AtomicU64,
}

impl MockAuthenticator {
    /// Credentials valid for `lifetime`.
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            delay: Duration::ZERO,
            session: false,
            failures: Mutex::new(VecDeque::new()),
            logins: AtomicU64::new(0),
            logouts: AtomicU64::new(0),
        }
    }

    /// Each login takes `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Issue session cookies instead of bearer tokens.
    pub fn with_sessions(mut self) -> Self {
        self.session = true;
        self
    }

    /// The next login fails with `error`.
    pub fn fail_next(&self, error: AuthenticationError) {
        self.failures.lock().push_back(error);
    }

    /// Successful logins so far.
    pub fn login_count(&self) -> u64 {
        self.logins.load(Ordering::SeqCst)
    }

    /// Logouts so far.
    pub fn logout_count(&self) -> u64 {
        self.logouts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for MockAuthenticator {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        Ok(())
    }

    async fn login(&self, _transport: &dyn HttpTransport) -> Result<Credential, AuthenticationError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failure = self.failures.lock().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let n = self.logins.fetch_add(1, Ordering::SeqCst) + 1;
        let material = format!("token-{}", n);
        Ok(if self.session {
            Credential::Cookie(Session::new(material, self.lifetime))
        } else {
            Credential::Bearer(AccessToken::new(material, "Bearer", self.lifetime))
        })
    }

    async fn logout(
        &self,
        _transport: &dyn HttpTransport,
        _credential: &Credential,
    ) -> Result<(), AuthenticationError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
