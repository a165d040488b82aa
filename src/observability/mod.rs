//! Logging setup and secret-redacting debug output.
//!
//! ```rust,no_run
//! use integrations_zscaler::observability::{LogFormat, LogLevel, LoggingConfig};
//!
//! LoggingConfig::new()
//!     .with_level(LogLevel::Debug)
//!     .with_format(LogFormat::Json)
//!     .init()
//!     .expect("subscriber already installed");
//! ```

mod logging;

pub use logging::*;
