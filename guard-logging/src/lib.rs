//! Structured logging support for the aixgo-guard security layer
//!
//! This crate provides the ambient observability pieces shared by every
//! other guard crate:
//! - Tracing subscriber setup driven by configuration or environment
//! - Redaction of credentials, file paths, IP addresses and stack traces
//!   from error messages before they are logged or returned
//! - Request-scoped correlation identifiers (request, trace and span ids)
//!
//! # Example
//!
//! ```rust,no_run
//! use aixgo_guard_logging::{CorrelationContext, LoggingConfig, correlation, init_tracing};
//!
//! #[tokio::main]
//! async fn main() {
//!     init_tracing(&LoggingConfig::from_env()).expect("Failed to initialize logging");
//!
//!     let ctx = CorrelationContext::new();
//!     correlation::scope(ctx, async {
//!         tracing::info!("handling request");
//!     })
//!     .await;
//! }
//! ```

pub mod correlation;
pub mod sanitization;
pub mod structured;

// Re-export main types for convenience
pub use correlation::{CorrelationContext, CorrelationHeaders};
pub use sanitization::{LogSanitizer, SanitizationConfig, get_sanitizer, sanitize_error_message};
pub use structured::{LogFormat, LoggingConfig, init_tracing};

/// Result type for logging operations
pub type Result<T> = std::result::Result<T, LoggingError>;

/// Logging error types
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tracing error: {0}")]
    Tracing(String),
}
