//! HTTP transport layer.

use crate::errors::{ConfigurationError, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header::HeaderMap, Client, Method, StatusCode};
use std::fmt;
use std::time::Duration;
use url::Url;

/// HTTP transport abstraction for testability.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send an HTTP request and receive a response.
    ///
    /// Non-2xx statuses are returned as responses; only network-level
    /// failures are errors.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// HTTP request representation.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Request URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body.
    pub body: Option<Bytes>,
    /// Per-attempt timeout.
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Creates a request with no headers and no body.
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }
}

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// GET method.
    Get,
    /// HEAD method.
    Head,
    /// POST method.
    Post,
    /// PUT method.
    Put,
    /// PATCH method.
    Patch,
    /// DELETE method.
    Delete,
}

impl HttpMethod {
    /// Upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// True for methods that change server state.
    pub fn is_mutating(&self) -> bool {
        !matches!(self, HttpMethod::Get | HttpMethod::Head)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Head => Method::HEAD,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }
}

/// HTTP response representation.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Response status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a new HTTP response.
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Header value as a string. Lookup is case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body decoded lossily as UTF-8.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Outbound proxy settings.
#[derive(Clone)]
pub struct ProxyConfig {
    /// Proxy host name or address.
    pub host: String,
    /// Proxy port.
    pub port: u16,
    /// Optional basic-auth user.
    pub username: Option<String>,
    /// Optional basic-auth password.
    pub password: Option<secrecy::SecretString>,
}

impl fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl ProxyConfig {
    /// Proxy URL without credentials.
    pub fn url(&self) -> String {
        if self.host.contains("://") {
            format!("{}:{}", self.host, self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

/// Reqwest-based HTTP transport implementation.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Creates a new reqwest transport.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a transport with connect timeout and optional proxy.
    pub fn with_options(
        connect_timeout: Duration,
        proxy: Option<&ProxyConfig>,
    ) -> Result<Self, ConfigurationError> {
        let mut builder = Client::builder().connect_timeout(connect_timeout);

        if let Some(proxy) = proxy {
            let mut p = reqwest::Proxy::all(proxy.url())
                .map_err(|e| ConfigurationError::InvalidProxy(e.to_string()))?;
            if let Some(user) = &proxy.username {
                use secrecy::ExposeSecret;
                let password = proxy
                    .password
                    .as_ref()
                    .map(|p| p.expose_secret().as_str())
                    .unwrap_or("");
                p = p.basic_auth(user, password);
            }
            builder = builder.proxy(p);
        }

        let client = builder
            .build()
            .map_err(|e| ConfigurationError::InvalidConfiguration(format!("Failed to create client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let method: Method = request.method.into();
        let mut req = self.client.request(method, request.url);

        req = req.headers(request.headers);

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        if let Some(body) = request.body {
            req = req.body(body);
        }

        let response = req.send().await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(HttpResponse::new(status, headers, body))
    }
}

/// Composes the `User-Agent` sent with every request.
pub fn user_agent(extra: Option<&str>) -> String {
    let base = format!(
        "{}/{} (rust; {}; {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    match extra.map(str::trim).filter(|s| !s.is_empty()) {
        Some(suffix) => format!("{} {}", base, suffix),
        None => base,
    }
}
