//! # Zscaler API Client Core
//!
//! Authenticated request pipeline shared by the Zscaler product-line clients
//! (internet access, private access, client connector, digital experience and
//! the unified API behind the identity tenant).
//!
//! ## Features
//!
//! - One request executor for every product line, parameterized by an
//!   [`Authenticator`](auth::Authenticator) and a rate-limit profile
//! - OAuth2 client credentials, JWT assertions, API key exchange and
//!   session cookies with single-flight login and background renewal
//! - Client-side rate limiting per method class
//! - Retries driven by `Retry-After` and rate-limit reset headers, falling
//!   back to exponential backoff; sleeps do not count against the timeout
//! - Optional response cache with prefix invalidation on writes
//! - Secure credential handling with `SecretString`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_zscaler::{ConfigLoader, LoggingConfig, Service, ZscalerClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // File and environment first, then explicit overrides.
//!     let config = ConfigLoader::new(Service::Zpa)
//!         .load()?
//!         .cloud("PRODUCTION")
//!         .build()?;
//!
//!     // `ZSCALER_SDK_DEBUG=true` turns on debug logging.
//!     LoggingConfig::for_debug(config.debug).init().ok();
//!
//!     let client = ZscalerClient::new(config)?;
//!     let apps: serde_json::Value = client
//!         .get("/mgmtconfig/v1/admin/customers/123/application")
//!         .await?;
//!     println!("{}", apps);
//!
//!     client.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - `client` - Client facade and the request executor
//! - `config` - Configuration types, builder and file/env loader
//! - `auth` - Authenticators, credentials, token store and renewal
//! - `resilience` - Rate limiter, backoff and retry budget
//! - `cache` - Response cache
//! - `services` - Product-line profiles
//! - `transport` - HTTP transport seam
//! - `errors` - Error types
//! - `observability` - Logging setup and redaction
//! - `mocks` - Mock transport and authenticator for tests (`test-util` feature)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod errors;
#[cfg(any(test, feature = "test-util"))]
pub mod mocks;
pub mod observability;
pub mod resilience;
pub mod services;
pub mod transport;

pub use auth::{Authenticator, Credential, TokenStore};
pub use cache::{CacheConfig, ResponseCache};
pub use client::{ApiRequest, ApiResponse, RequestExecutor, ZscalerClient};
pub use config::{ClientConfig, ClientConfigBuilder, ConfigLoader};
pub use errors::{ZscalerError, ZscalerResult};
pub use observability::{LogFormat, LogLevel, LoggingConfig};
pub use resilience::{RateLimitProfile, RateLimiter, RetryConfig};
pub use services::Service;
pub use transport::{HttpMethod, HttpTransport, ReqwestTransport};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::client::{ApiRequest, ApiResponse, ZscalerClient};
    pub use crate::config::{ClientConfig, ConfigLoader};
    pub use crate::errors::{ZscalerError, ZscalerResult};
    pub use crate::services::Service;
}
