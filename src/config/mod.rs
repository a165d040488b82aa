//! Configuration for the Zscaler client.
//!
//! Values are layered: the YAML file, then environment variables (both via
//! [`ConfigLoader`]), then builder calls made by the caller.

mod loader;

pub use loader::{
    default_config_path, CacheSection, ConfigLoader, DurationValue, FileConfig, ProxySection,
    RateLimitSection,
};

use secrecy::SecretString;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::auth::{Authenticator, DEFAULT_EXPIRY_MARGIN, DEFAULT_SESSION_TIMEOUT};
use crate::cache::{CacheConfig, ResponseCache};
use crate::errors::{ConfigurationError, ZscalerResult};
use crate::resilience::{RateLimitProfile, RetryConfig};
use crate::services::Service;
use crate::transport::{user_agent, HttpTransport, ProxyConfig};

/// Default per-attempt HTTP timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);
/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Credential fields. Which ones are required depends on the product line.
#[derive(Clone, Default)]
pub struct Credentials {
    /// OAuth2 client id.
    pub client_id: Option<String>,
    /// OAuth2 client secret.
    pub client_secret: Option<SecretString>,
    /// PEM private key for JWT assertions.
    pub private_key: Option<SecretString>,
    /// Identity tenant vanity domain.
    pub vanity_domain: Option<String>,
    /// Admin user name.
    pub username: Option<String>,
    /// Admin password.
    pub password: Option<SecretString>,
    /// API key (or key id).
    pub api_key: Option<SecretString>,
    /// API secret.
    pub api_secret: Option<SecretString>,
    /// Query token for the sandbox endpoint family.
    pub sandbox_token: Option<SecretString>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = |v: &Option<SecretString>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &set(&self.client_secret))
            .field("private_key", &set(&self.private_key))
            .field("vanity_domain", &self.vanity_domain)
            .field("username", &self.username)
            .field("password", &set(&self.password))
            .field("api_key", &set(&self.api_key))
            .field("api_secret", &set(&self.api_secret))
            .field("sandbox_token", &set(&self.sandbox_token))
            .finish()
    }
}

/// Configuration for one product-line client.
#[derive(Clone)]
pub struct ClientConfig {
    /// Product line.
    pub service: Service,
    /// Cloud name used to derive URLs.
    pub cloud: String,
    /// API root.
    pub base_url: Url,
    /// Sandbox API root, if any.
    pub sandbox_url: Option<Url>,
    /// Credential fields.
    pub credentials: Credentials,
    /// Outbound proxy.
    pub proxy: Option<ProxyConfig>,
    /// Response cache settings.
    pub cache: CacheConfig,
    /// Retry settings.
    pub retry: RetryConfig,
    /// Client-side rate limits.
    pub rate_limits: RateLimitProfile,
    /// Per-attempt HTTP timeout.
    pub http_timeout: Duration,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// Assumed session idle timeout for cookie sessions.
    pub session_timeout: Duration,
    /// Credentials expiring within this margin are renewed.
    pub expiry_margin: Duration,
    /// Whether a background task renews credentials before they expire.
    pub background_renewal: bool,
    /// Log request and response lines (secrets redacted).
    pub debug: bool,
    /// Composed `User-Agent`.
    pub user_agent: String,
    /// Body markers meaning the session is no longer valid.
    pub session_markers: Vec<String>,
    /// Body markers that make a non-2xx response retryable.
    pub retryable_markers: Vec<String>,
    /// Custom transport.
    pub transport: Option<Arc<dyn HttpTransport>>,
    /// Custom cache.
    pub cache_override: Option<Arc<dyn ResponseCache>>,
    /// Custom authenticator.
    pub authenticator: Option<Arc<dyn Authenticator>>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("service", &self.service)
            .field("cloud", &self.cloud)
            .field("base_url", &self.base_url.as_str())
            .field("sandbox_url", &self.sandbox_url.as_ref().map(Url::as_str))
            .field("credentials", &self.credentials)
            .field("proxy", &self.proxy)
            .field("cache", &self.cache)
            .field("retry", &self.retry)
            .field("http_timeout", &self.http_timeout)
            .field("background_renewal", &self.background_renewal)
            .field("debug", &self.debug)
            .field("user_agent", &self.user_agent)
            .field("custom_transport", &self.transport.is_some())
            .field("custom_cache", &self.cache_override.is_some())
            .field("custom_authenticator", &self.authenticator.is_some())
            .finish()
    }
}

impl ClientConfig {
    /// Creates a builder for a product line.
    pub fn builder(service: Service) -> ClientConfigBuilder {
        ClientConfigBuilder::new(service)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ZscalerResult<()> {
        check_api_url(&self.base_url)?;
        if let Some(sandbox) = &self.sandbox_url {
            check_api_url(sandbox)?;
        }

        if self.retry.min_wait > self.retry.max_wait {
            return Err(ConfigurationError::InvalidConfiguration(
                "min_wait must not exceed max_wait".to_string(),
            )
            .into());
        }

        if self.http_timeout.is_zero() {
            return Err(ConfigurationError::InvalidConfiguration(
                "http_timeout must be positive".to_string(),
            )
            .into());
        }

        if let Some(proxy) = &self.proxy {
            if proxy.host.trim().is_empty() || proxy.port == 0 {
                return Err(ConfigurationError::InvalidProxy(
                    "proxy host and port are required".to_string(),
                )
                .into());
            }
        }

        Ok(())
    }
}

fn check_api_url(url: &Url) -> Result<(), ConfigurationError> {
    if !matches!(url.scheme(), "https" | "http") || url.host_str().is_none() {
        return Err(ConfigurationError::InvalidBaseUrl(format!(
            "{} must be an absolute http(s) URL",
            url
        )));
    }
    Ok(())
}

fn parse_api_url(raw: &str) -> Result<Url, ConfigurationError> {
    Url::parse(raw.trim()).map_err(|e| ConfigurationError::InvalidBaseUrl(format!("{}: {}", raw, e)))
}

/// Builder for [`ClientConfig`].
#[derive(Clone)]
pub struct ClientConfigBuilder {
    service: Service,
    cloud: Option<String>,
    base_url: Option<String>,
    sandbox_url: Option<String>,
    credentials: Credentials,
    proxy: Option<ProxyConfig>,
    cache_enabled: Option<bool>,
    cache_ttl: Option<Duration>,
    cache_idle: Option<Duration>,
    cache_max_size_mb: Option<u64>,
    retry: Option<RetryConfig>,
    min_wait: Option<Duration>,
    max_wait: Option<Duration>,
    max_retries: Option<u32>,
    request_timeout: Option<Duration>,
    rate_limits: Option<RateLimitProfile>,
    http_timeout: Duration,
    connect_timeout: Duration,
    session_timeout: Duration,
    expiry_margin: Duration,
    background_renewal: bool,
    debug: bool,
    user_agent_extra: Option<String>,
    transport: Option<Arc<dyn HttpTransport>>,
    cache_override: Option<Arc<dyn ResponseCache>>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl ClientConfigBuilder {
    /// Creates a new builder with defaults.
    pub fn new(service: Service) -> Self {
        Self {
            service,
            cloud: None,
            base_url: None,
            sandbox_url: None,
            credentials: Credentials::default(),
            proxy: None,
            cache_enabled: None,
            cache_ttl: None,
            cache_idle: None,
            cache_max_size_mb: None,
            retry: None,
            min_wait: None,
            max_wait: None,
            max_retries: None,
            request_timeout: None,
            rate_limits: None,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            expiry_margin: DEFAULT_EXPIRY_MARGIN,
            background_renewal: true,
            debug: false,
            user_agent_extra: None,
            transport: None,
            cache_override: None,
            authenticator: None,
        }
    }

    /// Product line this builder configures.
    pub fn service(&self) -> Service {
        self.service
    }

    /// Sets the cloud name.
    pub fn cloud(mut self, cloud: impl Into<String>) -> Self {
        self.cloud = Some(cloud.into());
        self
    }

    /// Overrides the API root derived from the cloud.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Overrides the sandbox API root.
    pub fn sandbox_url(mut self, url: impl Into<String>) -> Self {
        self.sandbox_url = Some(url.into());
        self
    }

    /// Sets the OAuth2 client id.
    pub fn client_id(mut self, value: impl Into<String>) -> Self {
        self.credentials.client_id = Some(value.into());
        self
    }

    /// Sets the OAuth2 client secret.
    pub fn client_secret(mut self, value: impl Into<String>) -> Self {
        self.credentials.client_secret = Some(SecretString::new(value.into()));
        self
    }

    /// Sets the PEM private key for JWT assertions.
    pub fn private_key(mut self, value: impl Into<String>) -> Self {
        self.credentials.private_key = Some(SecretString::new(value.into()));
        self
    }

    /// Sets the identity tenant vanity domain.
    pub fn vanity_domain(mut self, value: impl Into<String>) -> Self {
        self.credentials.vanity_domain = Some(value.into());
        self
    }

    /// Sets the admin user name.
    pub fn username(mut self, value: impl Into<String>) -> Self {
        self.credentials.username = Some(value.into());
        self
    }

    /// Sets the admin password.
    pub fn password(mut self, value: impl Into<String>) -> Self {
        self.credentials.password = Some(SecretString::new(value.into()));
        self
    }

    /// Sets the API key.
    pub fn api_key(mut self, value: impl Into<String>) -> Self {
        self.credentials.api_key = Some(SecretString::new(value.into()));
        self
    }

    /// Sets the API secret.
    pub fn api_secret(mut self, value: impl Into<String>) -> Self {
        self.credentials.api_secret = Some(SecretString::new(value.into()));
        self
    }

    /// Sets the sandbox query token.
    pub fn sandbox_token(mut self, value: impl Into<String>) -> Self {
        self.credentials.sandbox_token = Some(SecretString::new(value.into()));
        self
    }

    /// Sets the outbound proxy.
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Enables or disables the response cache.
    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = Some(enabled);
        self
    }

    /// Sets the cache entry lifetime.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Sets the cache idle lifetime.
    pub fn cache_idle(mut self, idle: Duration) -> Self {
        self.cache_idle = Some(idle);
        self
    }

    /// Sets the cache capacity in megabytes.
    pub fn cache_max_size_mb(mut self, size: u64) -> Self {
        self.cache_max_size_mb = Some(size);
        self
    }

    /// Replaces the whole retry configuration.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Sets the backoff base.
    pub fn min_wait(mut self, wait: Duration) -> Self {
        self.min_wait = Some(wait);
        self
    }

    /// Sets the backoff ceiling.
    pub fn max_wait(mut self, wait: Duration) -> Self {
        self.max_wait = Some(wait);
        self
    }

    /// Sets the retry limit; 0 means unbounded.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Sets the active-time limit per request.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Replaces the client-side rate limits.
    pub fn rate_limits(mut self, profile: RateLimitProfile) -> Self {
        self.rate_limits = Some(profile);
        self
    }

    /// Sets the per-attempt HTTP timeout.
    pub fn http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the assumed session idle timeout.
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Sets the credential expiry margin.
    pub fn expiry_margin(mut self, margin: Duration) -> Self {
        self.expiry_margin = margin;
        self
    }

    /// Enables or disables background credential renewal.
    pub fn background_renewal(mut self, enabled: bool) -> Self {
        self.background_renewal = enabled;
        self
    }

    /// Enables request/response logging.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Appends a suffix to the `User-Agent`.
    pub fn user_agent_extra(mut self, extra: impl Into<String>) -> Self {
        self.user_agent_extra = Some(extra.into());
        self
    }

    /// Uses a custom transport.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Uses a custom response cache.
    pub fn cache(mut self, cache: Arc<dyn ResponseCache>) -> Self {
        self.cache_override = Some(cache);
        self
    }

    /// Uses a custom authenticator instead of the product line's own.
    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ZscalerResult<ClientConfig> {
        let service = self.service;
        let cloud = self
            .cloud
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| service.default_cloud().to_string());

        let base_url = match &self.base_url {
            Some(raw) => parse_api_url(raw)?,
            None => service.base_url(&cloud)?,
        };
        let sandbox_url = match &self.sandbox_url {
            Some(raw) => Some(parse_api_url(raw)?),
            None => service.sandbox_url(&cloud),
        };

        let mut retry = self.retry.unwrap_or_else(|| service.retry_defaults());
        if let Some(v) = self.min_wait {
            retry.min_wait = v;
        }
        if let Some(v) = self.max_wait {
            retry.max_wait = v;
        }
        if let Some(v) = self.max_retries {
            retry.max_retries = v;
        }
        if let Some(v) = self.request_timeout {
            retry.request_timeout = v;
        }

        let defaults = CacheConfig::default();
        let cache = CacheConfig {
            enabled: self.cache_enabled.unwrap_or(defaults.enabled),
            ttl: self.cache_ttl.unwrap_or(defaults.ttl),
            idle: self.cache_idle.unwrap_or(defaults.idle),
            max_size_mb: self.cache_max_size_mb.unwrap_or(defaults.max_size_mb),
        };

        let config = ClientConfig {
            service,
            cloud,
            base_url,
            sandbox_url,
            credentials: self.credentials,
            proxy: self.proxy,
            cache,
            retry,
            rate_limits: self.rate_limits.unwrap_or_else(|| service.rate_limits()),
            http_timeout: self.http_timeout,
            connect_timeout: self.connect_timeout,
            session_timeout: self.session_timeout,
            expiry_margin: self.expiry_margin,
            background_renewal: self.background_renewal,
            debug: self.debug,
            user_agent: user_agent(self.user_agent_extra.as_deref()),
            session_markers: service.session_markers(),
            retryable_markers: service.retryable_markers(),
            transport: self.transport,
            cache_override: self.cache_override,
            authenticator: self.authenticator,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ZscalerError;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_follow_service_profile() {
        let config = ClientConfig::builder(Service::Zpa)
            .client_id("id")
            .client_secret("secret")
            .build()
            .unwrap();

        assert_eq!(config.cloud, "PRODUCTION");
        assert_eq!(config.base_url.as_str(), "https://config.private.zscaler.com/");
        assert_eq!(config.retry, Service::Zpa.retry_defaults());
        assert_eq!(config.rate_limits, Service::Zpa.rate_limits());
        assert!(!config.cache.enabled);
        assert!(config.user_agent.starts_with("integrations-zscaler/"));
    }

    #[test]
    fn test_individual_retry_overrides() {
        let config = ClientConfig::builder(Service::Zia)
            .min_wait(Duration::from_millis(100))
            .max_retries(0)
            .request_timeout(Duration::from_secs(30))
            .build()
            .unwrap();

        assert_eq!(config.retry.min_wait, Duration::from_millis(100));
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.retry.request_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.retry_after_padding, Duration::from_secs(1));
    }

    #[test]
    fn test_rejects_bad_base_url() {
        let err = ClientConfig::builder(Service::Zdx)
            .base_url("ftp://example.net")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ZscalerError::Configuration(ConfigurationError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn test_rejects_inverted_wait_bounds() {
        let err = ClientConfig::builder(Service::Zcc)
            .min_wait(Duration::from_secs(20))
            .max_wait(Duration::from_secs(5))
            .build()
            .unwrap_err();
        assert!(matches!(err, ZscalerError::Configuration(_)));
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let config = ClientConfig::builder(Service::Zia)
            .username("admin@example.com")
            .password("hunter2")
            .api_key("abcdefghijkl")
            .build()
            .unwrap();
        let rendered = format!("{:?}", config);
        assert!(rendered.contains("admin@example.com"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("abcdefghijkl"));
    }
}
