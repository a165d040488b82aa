//! Logging configuration and request/response debug lines.
//!
//! The library itself only emits `tracing` events; applications that want to
//! see them install a subscriber, for example through [`LoggingConfig::init`].

use reqwest::header::{HeaderMap, AUTHORIZATION, COOKIE, SET_COOKIE};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

/// Placeholder written instead of secret values.
pub const REDACTED: &str = "[REDACTED]";

/// Query parameters whose values never reach the logs.
const SECRET_QUERY_PARAMS: &[&str] = &["api_token"];

/// Longest body prefix written to a debug line.
const MAX_LOGGED_BODY: usize = 1000;

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The minimum log level to capture
    pub level: LogLevel,
    /// The output format for log messages
    pub format: LogFormat,
    /// Whether to include the module target in log output
    pub include_target: bool,
    /// Whether to include file and line number in log output
    pub include_file_line: bool,
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Trace-level logging (most verbose)
    Trace,
    /// Debug-level logging
    Debug,
    /// Info-level logging
    Info,
    /// Warning-level logging
    Warn,
    /// Error-level logging (least verbose)
    Error,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<LogLevel> for tracing::level_filters::LevelFilter {
    fn from(level: LogLevel) -> Self {
        Level::from(level).into()
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format with colors (for development)
    Pretty,
    /// JSON format (for structured logging in production)
    Json,
    /// Compact format (for space-constrained environments)
    Compact,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Pretty,
            include_target: true,
            include_file_line: false,
        }
    }
}

impl LoggingConfig {
    /// Creates a new logging configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration matching the client's `debug` flag.
    pub fn for_debug(debug: bool) -> Self {
        let level = if debug { LogLevel::Debug } else { LogLevel::Info };
        Self::default().with_level(level)
    }

    /// Sets the log level.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Sets the log format.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets whether to include the module target.
    pub fn with_target(mut self, include: bool) -> Self {
        self.include_target = include;
        self
    }

    /// Sets whether to include file and line number.
    pub fn with_file_line(mut self, include: bool) -> Self {
        self.include_file_line = include;
        self
    }

    /// Installs a global subscriber. `RUST_LOG` directives are honoured on
    /// top of the configured level.
    ///
    /// # Errors
    ///
    /// Returns an error if a global subscriber is already installed.
    pub fn init(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let filter = EnvFilter::from_default_env()
            .add_directive(tracing::level_filters::LevelFilter::from(self.level).into());

        match self.format {
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(
                        fmt::layer()
                            .with_ansi(true)
                            .with_target(self.include_target)
                            .with_file(self.include_file_line)
                            .with_line_number(self.include_file_line),
                    )
                    .try_init()?;
            }
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json().with_target(self.include_target))
                    .try_init()?;
            }
            LogFormat::Compact => {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().compact().with_target(self.include_target))
                    .try_init()?;
            }
        }

        Ok(())
    }
}

/// URL with secret query values replaced.
pub fn redact_url(url: &Url) -> String {
    if !url
        .query_pairs()
        .any(|(k, _)| SECRET_QUERY_PARAMS.contains(&k.as_ref()))
    {
        return url.to_string();
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if SECRET_QUERY_PARAMS.contains(&k.as_ref()) {
                REDACTED.to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), value)
        })
        .collect();

    let mut redacted = url.clone();
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}

/// Header list with credential-bearing values replaced.
pub fn redact_headers(headers: &HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| {
            let secret = value.is_sensitive()
                || name == AUTHORIZATION
                || name == COOKIE
                || name == SET_COOKIE;
            let shown = if secret {
                REDACTED
            } else {
                value.to_str().unwrap_or("<binary>")
            };
            format!("{}: {}", name, shown)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn truncate(body: &str) -> &str {
    if body.len() <= MAX_LOGGED_BODY {
        return body;
    }
    let mut end = MAX_LOGGED_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

/// Logs an outgoing request with secrets redacted.
pub fn log_request(method: &str, url: &Url, headers: &HeaderMap, body: Option<&[u8]>) {
    let body = body.map(String::from_utf8_lossy);
    tracing::debug!(
        method = method,
        url = %redact_url(url),
        headers = %redact_headers(headers),
        body = body.as_deref().map(truncate).unwrap_or("<empty>"),
        "Outgoing request"
    );
}

/// Logs an incoming response with secrets redacted.
pub fn log_response(status: u16, elapsed: Duration, headers: &HeaderMap, body: &[u8]) {
    let body = String::from_utf8_lossy(body);
    tracing::debug!(
        status = status,
        duration_ms = elapsed.as_millis() as u64,
        headers = %redact_headers(headers),
        body = if body.is_empty() { "<empty>" } else { truncate(&body) },
        "Incoming response"
    );
}
