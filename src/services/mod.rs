//! Product-line profiles.
//!
//! Each product line differs only in data: where its API lives, how it
//! authenticates, which limits it publishes and how it reports an expired
//! session.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::auth::{
    ApiKeyAuthenticator, ApiKeyScheme, Authenticator, ClientCredentialsAuthenticator,
    JwtAssertionAuthenticator, SessionAuthenticator,
};
use crate::config::{ClientConfig, Credentials};
use crate::errors::ConfigurationError;
use crate::resilience::{RateLimitProfile, RetryConfig, READ_CLASS, WRITE_CLASS};

/// Marker the APIs put in bodies of requests made with a dead session.
pub const SESSION_NOT_VALID: &str = "SESSION_NOT_VALID";

/// Audience of tokens issued by the identity tenant.
pub const ONEAPI_AUDIENCE: &str = "https://api.zscaler.com";

/// Path prefix of the sandbox endpoint family.
pub const SANDBOX_PREFIX: &str = "/zscsb";

const DOWNLOAD_CLASS: &str = "download";

/// Product lines served by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    /// Internet access (session cookie).
    Zia,
    /// Private access (client credentials).
    Zpa,
    /// Client connector (API key exchange).
    Zcc,
    /// Digital experience (hashed API key exchange).
    Zdx,
    /// Unified API behind the identity tenant.
    OneApi,
}

impl Service {
    /// All product lines.
    pub const ALL: [Service; 5] = [
        Service::Zia,
        Service::Zpa,
        Service::Zcc,
        Service::Zdx,
        Service::OneApi,
    ];

    /// Lower-case name, also the prefix of its environment variables.
    pub fn name(&self) -> &'static str {
        match self {
            Service::Zia => "zia",
            Service::Zpa => "zpa",
            Service::Zcc => "zcc",
            Service::Zdx => "zdx",
            Service::OneApi => "oneapi",
        }
    }

    /// Cloud used when none is configured.
    pub fn default_cloud(&self) -> &'static str {
        match self {
            Service::Zia | Service::Zcc => "zscaler",
            Service::Zpa => "PRODUCTION",
            Service::Zdx => "zdxcloud",
            Service::OneApi => "production",
        }
    }

    /// API root for a cloud.
    pub fn base_url(&self, cloud: &str) -> Result<Url, ConfigurationError> {
        let cloud = checked_cloud(cloud)?;
        let url = match self {
            Service::Zia => format!("https://zsapi.{}.net/api/v1", cloud),
            Service::Zpa => match cloud.to_ascii_uppercase().as_str() {
                "PRODUCTION" => "https://config.private.zscaler.com".to_string(),
                "ZPATWO" => "https://config.zpatwo.net".to_string(),
                "BETA" => "https://config.zpabeta.net".to_string(),
                "GOV" => "https://zpagov.net".to_string(),
                "GOVUS" => "https://zpagov.us".to_string(),
                other => {
                    return Err(ConfigurationError::InvalidBaseUrl(format!(
                        "unknown private access cloud {}",
                        other
                    )))
                }
            },
            Service::Zcc => format!("https://api-mobile.{}.net/papi", cloud),
            Service::Zdx => format!("https://api.{}.net", cloud),
            Service::OneApi => {
                if cloud.eq_ignore_ascii_case("production") {
                    "https://api.zsapi.net".to_string()
                } else {
                    format!("https://api.{}.zsapi.net", cloud.to_ascii_lowercase())
                }
            }
        };
        Url::parse(&url).map_err(|e| ConfigurationError::InvalidBaseUrl(e.to_string()))
    }

    /// Root of the sandbox endpoint family, where the product line has one.
    pub fn sandbox_url(&self, cloud: &str) -> Option<Url> {
        match self {
            Service::Zia => checked_cloud(cloud)
                .ok()
                .and_then(|c| Url::parse(&format!("https://csbapi.{}.net", c)).ok()),
            _ => None,
        }
    }

    /// Published request limits.
    pub fn rate_limits(&self) -> RateLimitProfile {
        match self {
            Service::Zia => RateLimitProfile::unlimited()
                .with_rule(READ_CLASS, 2, Duration::from_secs(1))
                .with_rule(WRITE_CLASS, 1, Duration::from_secs(1)),
            Service::Zpa | Service::OneApi => RateLimitProfile::unlimited()
                .with_rule(READ_CLASS, 20, Duration::from_secs(10))
                .with_rule(WRITE_CLASS, 10, Duration::from_secs(10)),
            Service::Zcc => RateLimitProfile::unlimited()
                .with_rule(READ_CLASS, 100, Duration::from_secs(3600))
                .with_rule(WRITE_CLASS, 100, Duration::from_secs(3600))
                .with_rule(DOWNLOAD_CLASS, 3, Duration::from_secs(86_400))
                .with_path_override("/downloadDevices", DOWNLOAD_CLASS)
                .with_path_override("/downloadServiceStatus", DOWNLOAD_CLASS),
            Service::Zdx => RateLimitProfile::unlimited()
                .with_rule(READ_CLASS, 5, Duration::from_secs(1))
                .with_rule(WRITE_CLASS, 5, Duration::from_secs(1)),
        }
    }

    /// Retry defaults.
    pub fn retry_defaults(&self) -> RetryConfig {
        let padding = match self {
            Service::Zia | Service::Zcc | Service::OneApi => Duration::from_secs(1),
            Service::Zpa | Service::Zdx => Duration::ZERO,
        };
        let max_retries = match self {
            Service::Zpa => 10,
            _ => 5,
        };
        RetryConfig {
            max_retries,
            retry_after_padding: padding,
            ..RetryConfig::default()
        }
    }

    /// Body markers meaning "log in again".
    pub fn session_markers(&self) -> Vec<String> {
        vec![SESSION_NOT_VALID.to_string()]
    }

    /// Body markers that make any non-2xx response retryable.
    pub fn retryable_markers(&self) -> Vec<String> {
        match self {
            Service::Zia => vec!["EDIT_LOCK_NOT_AVAILABLE".to_string()],
            _ => Vec::new(),
        }
    }

    /// Builds the authenticator configured for this product line.
    pub fn authenticator(
        &self,
        config: &ClientConfig,
    ) -> Result<Arc<dyn Authenticator>, ConfigurationError> {
        let creds = &config.credentials;
        let auth: Arc<dyn Authenticator> = match self {
            Service::Zia => Arc::new(
                SessionAuthenticator::new(
                    config.base_url.clone(),
                    required(&creds.username, "username")?,
                    required_secret(&creds.password, "password")?,
                    required_secret(&creds.api_key, "api_key")?,
                )
                .with_session_timeout(config.session_timeout),
            ),
            Service::Zpa => Arc::new(
                ClientCredentialsAuthenticator::new(
                    join(&config.base_url, "signin")?,
                    required(&creds.client_id, "client_id")?,
                    required_secret(&creds.client_secret, "client_secret")?,
                )
                .without_grant_type(),
            ),
            Service::Zcc => Arc::new(ApiKeyAuthenticator::new(
                join(&config.base_url, "auth/v1/login")?,
                required_secret(&creds.api_key, "api_key")?
                    .expose_secret()
                    .clone(),
                required_secret(&creds.api_secret, "api_secret")?,
                ApiKeyScheme::Plain,
            )),
            Service::Zdx => Arc::new(ApiKeyAuthenticator::new(
                join(&config.base_url, "v1/oauth/token")?,
                required_secret(&creds.api_key, "api_key")?
                    .expose_secret()
                    .clone(),
                required_secret(&creds.api_secret, "api_secret")?,
                ApiKeyScheme::HashedSecret,
            )),
            Service::OneApi => oneapi_authenticator(&config.cloud, creds)?,
        };
        auth.validate()?;
        Ok(auth)
    }
}

fn oneapi_authenticator(
    cloud: &str,
    creds: &Credentials,
) -> Result<Arc<dyn Authenticator>, ConfigurationError> {
    let vanity = required(&creds.vanity_domain, "vanity_domain")?;
    let cloud = checked_cloud(cloud)?;
    let client_id = required(&creds.client_id, "client_id")?;

    let host = if cloud.eq_ignore_ascii_case("production") {
        format!("https://{}.zslogin.net", vanity)
    } else {
        format!("https://{}.zslogin{}.net", vanity, cloud.to_ascii_lowercase())
    };
    let token_url = Url::parse(&format!("{}/oauth2/v1/token", host))
        .map_err(|e| ConfigurationError::InvalidBaseUrl(e.to_string()))?;

    match (&creds.private_key, &creds.client_secret) {
        (Some(key), _) if !key.expose_secret().trim().is_empty() => Ok(Arc::new(
            JwtAssertionAuthenticator::new(token_url, client_id, key.clone())
                .with_audience(ONEAPI_AUDIENCE),
        )),
        (_, Some(secret)) if !secret.expose_secret().trim().is_empty() => Ok(Arc::new(
            ClientCredentialsAuthenticator::new(token_url, client_id, secret.clone())
                .with_audience(ONEAPI_AUDIENCE),
        )),
        _ => Err(ConfigurationError::MissingCredentials(
            "client_secret or private_key".to_string(),
        )),
    }
}

fn checked_cloud(cloud: &str) -> Result<&str, ConfigurationError> {
    let cloud = cloud.trim();
    if cloud.is_empty() || !cloud.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ConfigurationError::InvalidBaseUrl(format!(
            "invalid cloud name {:?}",
            cloud
        )));
    }
    Ok(cloud)
}

fn join(base: &Url, path: &str) -> Result<Url, ConfigurationError> {
    Url::parse(&format!("{}/{}", base.as_str().trim_end_matches('/'), path))
        .map_err(|e| ConfigurationError::InvalidBaseUrl(e.to_string()))
}

fn required(value: &Option<String>, field: &str) -> Result<String, ConfigurationError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ConfigurationError::MissingCredentials(field.to_string()))
}

fn required_secret(
    value: &Option<SecretString>,
    field: &str,
) -> Result<SecretString, ConfigurationError> {
    value
        .as_ref()
        .filter(|v| !v.expose_secret().trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigurationError::MissingCredentials(field.to_string()))
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Service {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Service::ALL
            .iter()
            .copied()
            .find(|service| service.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigurationError::InvalidConfiguration(format!("unknown service {}", s)))
    }
}
