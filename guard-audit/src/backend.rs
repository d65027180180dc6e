//! Audit backend abstraction and configuration-driven construction

use crate::event::StructuredAuditEvent;
use crate::file::FileBackend;
use crate::memory::MemoryBackend;
use crate::siem::{BatchingBackend, SiemConfig};
use aixgo_guard_auth::{AuditBackendKind, AuditSettings};
use aixgo_guard_logging::sanitize_error_message;
use aixgo_guard_security::{SsrfError, SsrfValidator, ValidationError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Audit delivery errors
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid audit path: {0}")]
    Path(#[from] ValidationError),

    #[error("SIEM endpoint rejected: {0}")]
    Ssrf(#[from] SsrfError),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Audit backend is closed")]
    Closed,
}

/// Destination for audit events
#[async_trait]
pub trait AuditBackend: Send + Sync {
    /// Record one event
    async fn write(&self, event: &StructuredAuditEvent) -> Result<(), AuditError>;

    /// Deliver anything buffered and release resources
    async fn close(&self) -> Result<(), AuditError>;

    /// Short name for diagnostics
    fn name(&self) -> &str;
}

/// Receives audit delivery failures that must not reach the caller
pub type FallbackReporter = Arc<dyn Fn(&str, &AuditError) + Send + Sync>;

/// Reporter writing one line per failure to the process error stream
pub fn stderr_reporter() -> FallbackReporter {
    Arc::new(|backend: &str, error: &AuditError| {
        eprintln!(
            "audit delivery failed backend={backend} error={}",
            sanitize_error_message(&error.to_string())
        );
    })
}

/// Build the backends selected by `settings`.
///
/// Returns no backends when auditing is disabled. SIEM endpoints are
/// checked against `validator` before any connection is made.
pub async fn build_backends(
    settings: &AuditSettings,
    validator: &SsrfValidator,
) -> Result<Vec<Arc<dyn AuditBackend>>, AuditError> {
    if !settings.enabled {
        info!("Audit logging disabled");
        return Ok(Vec::new());
    }

    let backend: Arc<dyn AuditBackend> = match settings.backend {
        AuditBackendKind::Memory => Arc::new(MemoryBackend::new()),
        AuditBackendKind::File => {
            let path = settings.file_path.as_ref().ok_or_else(|| {
                AuditError::Configuration("audit.file_path is required for the file backend".into())
            })?;
            Arc::new(FileBackend::open(path).await?)
        }
        AuditBackendKind::Siem => {
            let siem = settings.siem.as_ref().ok_or_else(|| {
                AuditError::Configuration("audit.siem is required for the siem backend".into())
            })?;
            let config = SiemConfig::from_settings(siem)?;
            Arc::new(BatchingBackend::for_siem(config, validator).await?)
        }
    };

    info!(backend = backend.name(), "Audit backend ready");
    Ok(vec![backend])
}

#[cfg(test)]
mod tests {
    use super::*;
    use aixgo_guard_auth::{SiemKind, SiemSettings};
    use aixgo_guard_security::SsrfConfig;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn validator() -> SsrfValidator {
        SsrfValidator::new(SsrfConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_disabled_builds_nothing() {
        let settings = AuditSettings {
            enabled: false,
            ..Default::default()
        };
        assert!(build_backends(&settings, &validator()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_default() {
        let backends = build_backends(&AuditSettings::default(), &validator())
            .await
            .unwrap();
        assert_eq!(backends.len(), 1);
        assert_eq!(backends[0].name(), "memory");
    }

    #[tokio::test]
    async fn test_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AuditSettings {
            backend: AuditBackendKind::File,
            file_path: Some(dir.path().join("audit.jsonl")),
            ..Default::default()
        };
        let backends = build_backends(&settings, &validator()).await.unwrap();
        assert_eq!(backends[0].name(), "file");

        let missing = AuditSettings {
            backend: AuditBackendKind::File,
            ..Default::default()
        };
        assert_matches!(
            build_backends(&missing, &validator()).await.err(),
            Some(AuditError::Configuration(_))
        );
    }

    #[tokio::test]
    async fn test_siem_endpoint_is_screened() {
        let settings = AuditSettings {
            backend: AuditBackendKind::Siem,
            siem: Some(SiemSettings {
                kind: SiemKind::Webhook,
                url: "http://169.254.169.254/latest/meta-data".to_string(),
                index: None,
                token: None,
                method: None,
                headers: HashMap::new(),
                batch_size: 10,
                flush_interval_ms: 1_000,
                max_attempts: 1,
            }),
            ..Default::default()
        };
        assert_matches!(
            build_backends(&settings, &validator()).await.err(),
            Some(AuditError::Ssrf(_))
        );
    }
}
