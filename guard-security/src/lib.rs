//! Content and target screening for the aixgo-guard security layer
//!
//! This crate holds the checks applied to anything a caller hands us:
//! - Generic string/number constraints, SQL/command/XSS pattern rejection
//!   and traversal-safe path resolution ([`validation`])
//! - Configuration decoding with hard ceilings on size, depth, node count
//!   and alias use ([`safe_config`])
//! - Outbound URL, host and IP screening with dial-time re-validation
//!   ([`ssrf`])
//! - Heuristic prompt-injection detection ([`prompt_injection`])
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use aixgo_guard_security::{PromptInjectionDetector, SsrfConfig, SsrfValidator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ssrf = SsrfValidator::new(SsrfConfig::default())?;
//!     let url = ssrf.validate_url("https://api.example.com/v1").await?;
//!
//!     let detector = PromptInjectionDetector::default();
//!     let verdict = detector.detect("What is the weather today?");
//!     assert!(!verdict.detected);
//!
//!     let client = ssrf.create_secure_client()?;
//!     let _ = client.get(url).send().await?;
//!     Ok(())
//! }
//! ```

pub mod prompt_injection;
pub mod safe_config;
pub mod ssrf;
pub mod validation;

pub use prompt_injection::{
    DetectionResult, DetectorConfig, InjectionCategory, PromptInjectionDetector, Sensitivity,
};
pub use safe_config::{ParserLimits, SafeConfigError, SafeConfigParser};
pub use ssrf::{SecureDialer, SsrfConfig, SsrfError, SsrfValidator};
pub use validation::{InjectionKind, InputSanitizer, StringConstraints, ValidationError};
