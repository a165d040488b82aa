//! Authenticated request execution with retry, rate limiting and caching.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::{CredentialLease, TokenStore};
use crate::cache::{cache_key, invalidation_prefixes, CachedResponse, ResponseCache};
use crate::config::ClientConfig;
use crate::errors::{
    AuthenticationError, ConfigurationError, TransportError, ZscalerError, ZscalerResult,
};
use crate::observability::{log_request, log_response, redact_url};
use crate::resilience::{
    rate_limit_reset, retry_after, RateLimitDecision, RateLimiter, RetryBudget,
};
use crate::services::SANDBOX_PREFIX;
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};

const JSON_CONTENT_TYPE: &str = "application/json";
const SANDBOX_TOKEN_PARAM: &str = "api_token";

/// A logical API call, before authentication and retries.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Path relative to the API root.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Request body.
    pub body: Option<Bytes>,
    /// `Content-Type` override; JSON otherwise.
    pub content_type: Option<String>,
    /// Whether a GET may be answered from the cache.
    pub use_cache: bool,
    /// Route to the sandbox endpoint family with its query token.
    pub sandbox: bool,
}

impl ApiRequest {
    /// Request with no query and no body.
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        let path = path.into();
        let sandbox = path.starts_with(SANDBOX_PREFIX);
        Self {
            method,
            path,
            query: Vec::new(),
            body: None,
            content_type: None,
            use_cache: true,
            sandbox,
        }
    }

    /// GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    /// POST request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    /// PUT request.
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    /// PATCH request.
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    /// DELETE request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, path)
    }

    /// Adds a query parameter.
    pub fn with_query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Serializes `body` as the JSON payload.
    pub fn with_json<B: Serialize + ?Sized>(mut self, body: &B) -> ZscalerResult<Self> {
        self.body = Some(Bytes::from(serde_json::to_vec(body)?));
        self.content_type = None;
        Ok(self)
    }

    /// Raw payload with its content type.
    pub fn with_body(mut self, body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self.content_type = Some(content_type.into());
        self
    }

    /// Always goes to the network.
    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Sends to the sandbox endpoint family.
    pub fn in_sandbox(mut self) -> Self {
        self.sandbox = true;
        self
    }
}

/// Successful response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
    /// Served from the response cache.
    pub from_cache: bool,
}

impl ApiResponse {
    /// Deserializes the JSON body.
    pub fn json<T: DeserializeOwned>(&self) -> ZscalerResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body decoded lossily as UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    fn fresh(response: HttpResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers,
            body: response.body,
            from_cache: false,
        }
    }

    fn cached(entry: CachedResponse) -> Self {
        Self {
            status: entry.status,
            headers: entry.headers,
            body: entry.body,
            from_cache: true,
        }
    }
}

/// Runs [`ApiRequest`]s through authentication, rate limiting, caching and
/// the retry loop. One executor is shared by every request of a client.
pub struct RequestExecutor {
    config: Arc<ClientConfig>,
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenStore>,
    limiter: Arc<RateLimiter>,
    cache: Arc<dyn ResponseCache>,
    shutdown: CancellationToken,
}

impl RequestExecutor {
    /// Assembles an executor from its collaborators.
    pub fn new(
        config: Arc<ClientConfig>,
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenStore>,
        limiter: Arc<RateLimiter>,
        cache: Arc<dyn ResponseCache>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            transport,
            tokens,
            limiter,
            cache,
            shutdown,
        }
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Credential store.
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// Rate limiter.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Response cache.
    pub fn cache(&self) -> &Arc<dyn ResponseCache> {
        &self.cache
    }

    /// Executes a request.
    pub async fn execute(&self, request: ApiRequest) -> ZscalerResult<ApiResponse> {
        self.execute_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Executes a request that `cancel` can abort. Cancellation interrupts
    /// sleeps and in-flight sends; a cancelled request is never resent.
    pub async fn execute_with_cancel(
        &self,
        request: ApiRequest,
        cancel: &CancellationToken,
    ) -> ZscalerResult<ApiResponse> {
        if cancel.is_cancelled() || self.shutdown.is_cancelled() {
            return Err(ZscalerError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ZscalerError::Cancelled),
            result = self.run(&request) => result,
        }
    }

    async fn run(&self, request: &ApiRequest) -> ZscalerResult<ApiResponse> {
        let url = self.resolve_url(request)?;
        let method = request.method;
        let key = cache_key(method, &url, request.body.as_deref());
        let cacheable = method == HttpMethod::Get && request.use_cache && self.cache.is_enabled();

        if cacheable {
            if let Some(entry) = self.cache.get(&key) {
                tracing::debug!(%method, url = %redact_url(&url), "Served from cache");
                return Ok(ApiResponse::cached(entry));
            }
        }
        if method.is_mutating() {
            for prefix in invalidation_prefixes(&url) {
                self.cache.clear_prefix(&prefix);
            }
        }

        let class = self.limiter.profile().classify(method, url.path());
        let retry = &self.config.retry;
        let mut budget = RetryBudget::new(retry.max_retries, retry.request_timeout);
        let mut session_retries = 0u32;
        let mut stale_generation: Option<u64> = None;

        loop {
            if self.shutdown.is_cancelled() {
                return Err(ZscalerError::Cancelled);
            }
            budget.check_deadline()?;
            self.throttle(&class, &mut budget).await?;

            let lease = match self.credential(request.sandbox, stale_generation).await {
                Ok(lease) => {
                    stale_generation = None;
                    lease
                }
                Err(e) => {
                    let attempt = budget.record_attempt();
                    if !e.is_retryable() {
                        return Err(e.into());
                    }
                    if !budget.can_retry() {
                        return Err(exhausted_by_login(attempt, e));
                    }
                    let delay = retry.backoff(budget.retries());
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Login failed, retrying"
                    );
                    budget.sleep(delay, &self.shutdown).await?;
                    continue;
                }
            };

            let outgoing = self.build_request(request, &url, lease.as_ref())?;
            let attempt = budget.record_attempt();
            tracing::debug!(%method, url = %redact_url(&outgoing.url), attempt, "Sending request");
            if self.config.debug {
                log_request(
                    method.as_str(),
                    &outgoing.url,
                    &outgoing.headers,
                    outgoing.body.as_deref(),
                );
            }

            let started = Instant::now();
            let sent = tokio::select! {
                _ = self.shutdown.cancelled() => return Err(ZscalerError::Cancelled),
                sent = self.transport.send(outgoing) => sent,
            };
            budget.check_deadline()?;

            let response = match sent {
                Ok(response) => response,
                Err(TransportError::InvalidRequest(msg)) => {
                    return Err(TransportError::InvalidRequest(msg).into());
                }
                Err(e) => {
                    if !budget.can_retry() {
                        return Err(ZscalerError::RetriesExhausted {
                            attempts: attempt,
                            status: None,
                            body: e.to_string(),
                        });
                    }
                    let delay = self
                        .limiter
                        .peek(&class)
                        .unwrap_or_else(|| retry.backoff(budget.retries()));
                    tracing::warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transport failure, retrying"
                    );
                    budget.sleep(delay, &self.shutdown).await?;
                    continue;
                }
            };

            if self.config.debug {
                log_response(
                    response.status.as_u16(),
                    started.elapsed(),
                    &response.headers,
                    &response.body,
                );
            }

            let status = response.status;
            if status.is_success() {
                if cacheable {
                    self.cache.set(
                        key,
                        CachedResponse::new(status, response.headers.clone(), response.body.clone()),
                    );
                }
                return Ok(ApiResponse::fresh(response));
            }

            let body = response.body_text();

            if let Some(lease) = &lease {
                if self.is_session_invalid(status, &body) {
                    if session_retries >= retry.max_session_retries {
                        return Err(ZscalerError::RetriesExhausted {
                            attempts: attempt,
                            status: Some(status),
                            body,
                        });
                    }
                    session_retries += 1;
                    stale_generation = Some(lease.generation);
                    tracing::info!(
                        status = status.as_u16(),
                        session_retries,
                        "Session rejected, authenticating again"
                    );
                    continue;
                }
            }

            let retryable = retry.is_retry_status(status.as_u16())
                || contains_marker(&self.config.retryable_markers, &body);
            if !retryable {
                return Err(ZscalerError::Api {
                    method: method.to_string(),
                    url: redact_url(&url),
                    status,
                    body,
                });
            }
            if !budget.can_retry() {
                return Err(ZscalerError::RetriesExhausted {
                    attempts: attempt,
                    status: Some(status),
                    body,
                });
            }

            let delay = self.retry_delay(&response.headers, &class, budget.retries());
            tracing::warn!(
                status = status.as_u16(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retryable response, backing off"
            );
            budget.sleep(delay, &self.shutdown).await?;
        }
    }

    /// Sleeps until the limiter grants a slot for `class`.
    async fn throttle(&self, class: &str, budget: &mut RetryBudget) -> ZscalerResult<()> {
        loop {
            match self.limiter.wait(class) {
                RateLimitDecision::Proceed => return Ok(()),
                RateLimitDecision::Wait(delay) => {
                    tracing::debug!(
                        class,
                        delay_ms = delay.as_millis() as u64,
                        "Client-side rate limit reached"
                    );
                    budget.sleep(delay, &self.shutdown).await?;
                }
            }
        }
    }

    async fn credential(
        &self,
        sandbox: bool,
        stale_generation: Option<u64>,
    ) -> Result<Option<CredentialLease>, AuthenticationError> {
        if sandbox {
            return Ok(None);
        }
        let lease = match stale_generation {
            Some(generation) => self.tokens.force_refresh(generation).await?,
            None => self.tokens.ensure_valid().await?,
        };
        Ok(Some(lease))
    }

    /// Server hints first, then the limiter, then exponential backoff. A
    /// `Retry-After` that cannot be read waits the minimum instead.
    fn retry_delay(&self, headers: &HeaderMap, class: &str, retry_number: u32) -> Duration {
        let retry = &self.config.retry;
        if headers.contains_key(RETRY_AFTER) {
            return retry_after(headers, retry.retry_after_padding)
                .unwrap_or(retry.min_wait + retry.retry_after_padding);
        }
        rate_limit_reset(headers)
            .or_else(|| self.limiter.peek(class))
            .unwrap_or_else(|| retry.backoff(retry_number))
    }

    fn is_session_invalid(&self, status: StatusCode, body: &str) -> bool {
        status == StatusCode::UNAUTHORIZED || contains_marker(&self.config.session_markers, body)
    }

    fn resolve_url(&self, request: &ApiRequest) -> ZscalerResult<Url> {
        let root = if request.sandbox {
            self.config.sandbox_url.as_ref().ok_or_else(|| {
                ConfigurationError::InvalidBaseUrl(format!(
                    "{} has no sandbox endpoint",
                    self.config.service
                ))
            })?
        } else {
            &self.config.base_url
        };

        let raw = format!(
            "{}/{}",
            root.as_str().trim_end_matches('/'),
            request.path.trim().trim_start_matches('/')
        );
        let mut url = Url::parse(&raw)
            .map_err(|e| ConfigurationError::InvalidBaseUrl(format!("{}: {}", raw, e)))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }
        Ok(url)
    }

    fn build_request(
        &self,
        request: &ApiRequest,
        url: &Url,
        lease: Option<&CredentialLease>,
    ) -> ZscalerResult<HttpRequest> {
        let mut url = url.clone();
        if request.sandbox {
            let token = self
                .config
                .credentials
                .sandbox_token
                .as_ref()
                .ok_or_else(|| ConfigurationError::MissingCredentials("sandbox_token".to_string()))?;
            url.query_pairs_mut()
                .append_pair(SANDBOX_TOKEN_PARAM, token.expose_secret());
        }

        let mut outgoing = HttpRequest::new(request.method, url);
        let content_type = request.content_type.as_deref().unwrap_or(JSON_CONTENT_TYPE);
        outgoing.headers.insert(CONTENT_TYPE, header_value(content_type)?);
        outgoing
            .headers
            .insert(ACCEPT, HeaderValue::from_static(JSON_CONTENT_TYPE));
        outgoing
            .headers
            .insert(USER_AGENT, header_value(&self.config.user_agent)?);
        if let Some(lease) = lease {
            lease.credential.apply(&mut outgoing.headers)?;
        }
        outgoing.body = request.body.clone();
        outgoing.timeout = Some(self.config.http_timeout);
        Ok(outgoing)
    }
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value).map_err(|e| TransportError::InvalidRequest(e.to_string()))
}

fn contains_marker(markers: &[String], body: &str) -> bool {
    markers.iter().any(|m| !m.is_empty() && body.contains(m.as_str()))
}

fn exhausted_by_login(attempts: u32, error: AuthenticationError) -> ZscalerError {
    let status = match &error {
        AuthenticationError::LoginRejected { status, .. } => StatusCode::from_u16(*status).ok(),
        _ => None,
    };
    ZscalerError::RetriesExhausted {
        attempts,
        status,
        body: error.to_string(),
    }
}
