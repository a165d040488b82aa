//! Error types for the Zscaler request pipeline.

use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Result type for Zscaler operations.
pub type ZscalerResult<T> = Result<T, ZscalerError>;

/// Top-level error type returned by the request executor and client.
#[derive(Debug, Error)]
pub enum ZscalerError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Authentication error.
    #[error("Authentication error: {0}")]
    Authentication(#[from] AuthenticationError),

    /// Network-level failure that escaped the retry loop.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Non-retryable, non-2xx response.
    #[error("{method} {url} failed with status {status}: {body}")]
    Api {
        /// Request method.
        method: String,
        /// Request URL (sandbox tokens redacted).
        url: String,
        /// Response status.
        status: StatusCode,
        /// Response body.
        body: String,
    },

    /// The retry policy gave up.
    #[error("Retries exhausted after {attempts} attempts (last status: {status:?}): {body}")]
    RetriesExhausted {
        /// Total number of attempts made.
        attempts: u32,
        /// Last observed status, if a response was received.
        status: Option<StatusCode>,
        /// Last observed body or transport error message.
        body: String,
    },

    /// Active (non-waiting) time exceeded the request timeout.
    #[error("Request timed out after {elapsed:?} of active time (limit {timeout:?})")]
    Timeout {
        /// Active time spent on the request.
        elapsed: Duration,
        /// Configured request timeout.
        timeout: Duration,
    },

    /// The request was cancelled by the caller or by client shutdown.
    #[error("Request cancelled")]
    Cancelled,

    /// Response body could not be (de)serialized.
    #[error("Response error: {0}")]
    Response(String),
}

impl ZscalerError {
    /// Creates a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        ZscalerError::Configuration(ConfigurationError::InvalidConfiguration(msg.into()))
    }

    /// Returns true if repeating the whole request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ZscalerError::Transport(_) | ZscalerError::Timeout { .. } => true,
            ZscalerError::Authentication(err) => err.is_retryable(),
            ZscalerError::RetriesExhausted { .. } => true,
            ZscalerError::Api { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            _ => false,
        }
    }

    /// Returns the HTTP status associated with the error, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            ZscalerError::Api { status, .. } => Some(*status),
            ZscalerError::RetriesExhausted { status, .. } => *status,
            ZscalerError::Authentication(AuthenticationError::LoginRejected { status, .. }) => {
                StatusCode::from_u16(*status).ok()
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ZscalerError {
    fn from(err: serde_json::Error) -> Self {
        ZscalerError::Response(err.to_string())
    }
}

/// Configuration errors, surfaced synchronously at client construction.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A credential field required by the selected authenticator is missing.
    #[error("Missing credential: {0}")]
    MissingCredentials(String),

    /// Base URL could not be parsed or uses an unsupported scheme.
    #[error("Invalid base URL: {0}")]
    InvalidBaseUrl(String),

    /// Proxy settings are invalid.
    #[error("Invalid proxy: {0}")]
    InvalidProxy(String),

    /// Config file could not be read or parsed.
    #[error("Invalid config file {path}: {message}")]
    InvalidConfigFile {
        /// Path of the offending file.
        path: String,
        /// Parser or I/O message.
        message: String,
    },

    /// Any other invalid setting.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Errors produced while obtaining or attaching a credential.
#[derive(Debug, Error)]
pub enum AuthenticationError {
    /// The identity endpoint answered with a non-2xx status.
    #[error("Login rejected with status {status}: {body}")]
    LoginRejected {
        /// Response status.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The login response could not be understood.
    #[error("Invalid login response: {0}")]
    InvalidResponse(String),

    /// The JWT assertion could not be built or signed.
    #[error("JWT assertion error: {0}")]
    Assertion(String),

    /// The API key could not be obfuscated.
    #[error("API key obfuscation failed: {0}")]
    Obfuscation(String),

    /// Credential material could not be encoded into a header.
    #[error("Invalid credential material: {0}")]
    InvalidCredential(String),

    /// Network failure while talking to the identity endpoint.
    #[error("Login transport failure: {0}")]
    Transport(#[from] TransportError),
}

impl AuthenticationError {
    /// Network failures and 5xx/429 login responses are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            AuthenticationError::Transport(_) => true,
            AuthenticationError::LoginRejected { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network error.
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout error.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Request could not be built.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Network(err.to_string())
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Http(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_rejection_retryability() {
        let server = AuthenticationError::LoginRejected {
            status: 503,
            body: String::new(),
        };
        let denied = AuthenticationError::LoginRejected {
            status: 401,
            body: "bad secret".to_string(),
        };
        assert!(server.is_retryable());
        assert!(!denied.is_retryable());
        assert!(AuthenticationError::Transport(TransportError::Network("reset".into())).is_retryable());
    }

    #[test]
    fn test_status_code_extraction() {
        let err = ZscalerError::Api {
            method: "GET".to_string(),
            url: "https://example.net/api/v1/users".to_string(),
            status: StatusCode::NOT_FOUND,
            body: "{}".to_string(),
        };
        assert_eq!(err.status_code(), Some(StatusCode::NOT_FOUND));
        assert!(!err.is_retryable());

        let exhausted = ZscalerError::RetriesExhausted {
            attempts: 4,
            status: None,
            body: "connection reset".to_string(),
        };
        assert_eq!(exhausted.status_code(), None);
    }

    #[test]
    fn test_configuration_errors_are_fatal() {
        let err: ZscalerError =
            ConfigurationError::MissingCredentials("client_secret".to_string()).into();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("client_secret"));
    }
}
