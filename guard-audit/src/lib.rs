//! Structured audit logging for the aixgo-guard security layer
//!
//! [`AuditLogger`] turns authentication, authorization, rate-limit,
//! validation and tool-execution outcomes into [`StructuredAuditEvent`]s and
//! fans them out to [`AuditBackend`]s:
//! - [`MemoryBackend`] for tests
//! - [`FileBackend`] appending NDJSON to an owner-only file
//! - [`BatchingBackend`] delivering batches to Elasticsearch, Splunk HEC or
//!   a generic webhook
//!
//! Delivery failures never fail the audited request; they are handed to a
//! [`FallbackReporter`] instead.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use aixgo_guard_audit::{AuditLogger, AuditMiddleware};
//! use aixgo_guard_auth::SecurityConfig;
//! use aixgo_guard_security::{SsrfConfig, SsrfValidator};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SecurityConfig::load_from_env()?;
//!     let ssrf = SsrfValidator::new(SsrfConfig::from_env())?;
//!     let logger = Arc::new(AuditLogger::from_settings(&config.audit, &ssrf).await?);
//!
//!     let audit = AuditMiddleware::new(logger.clone());
//!     let answer = audit
//!         .execute("search", &json!({ "query": "rust" }), async { Ok::<_, String>(42) })
//!         .await?;
//!
//!     logger.close().await;
//!     println!("{answer}");
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod event;
pub mod file;
pub mod logger;
pub mod memory;
pub mod middleware;
pub mod siem;

pub use backend::{AuditBackend, AuditError, FallbackReporter, build_backends, stderr_reporter};
pub use event::{AuditEventType, AuditResult, PrincipalSnapshot, StructuredAuditEvent};
pub use file::{FileBackend, FileBackendConfig};
pub use logger::AuditLogger;
pub use memory::MemoryBackend;
pub use middleware::AuditMiddleware;
pub use siem::{BatchConfig, BatchStats, BatchingBackend, SiemConfig, SiemSink};
