//! Audit logger fanning events out to the configured backends
//!
//! Every event is enriched from the ambient request scope before delivery:
//! request, trace and span ids from the correlation context, and the
//! principal and client details from the authentication context. Delivery
//! failures never reach the caller; they go to the fallback reporter.

use crate::backend::{AuditBackend, AuditError, FallbackReporter, build_backends, stderr_reporter};
use crate::event::{AuditEventType, AuditResult, StructuredAuditEvent};
use aixgo_guard_auth::{AuditSettings, AuthMode, ClientInfo, Permission, Principal};
use aixgo_guard_logging::{LogSanitizer, correlation, get_sanitizer};
use aixgo_guard_security::SsrfValidator;
use futures::future::join_all;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Records security-relevant events
pub struct AuditLogger {
    backends: Vec<Arc<dyn AuditBackend>>,
    reporter: FallbackReporter,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("AuditLogger")
            .field("backends", &names)
            .finish_non_exhaustive()
    }
}

impl AuditLogger {
    /// Create a logger writing to `backends`; an empty list disables auditing
    pub fn new(backends: Vec<Arc<dyn AuditBackend>>) -> Self {
        Self {
            backends,
            reporter: stderr_reporter(),
        }
    }

    /// A logger that records nothing
    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    /// Build the backends selected by `settings`
    pub async fn from_settings(
        settings: &AuditSettings,
        validator: &SsrfValidator,
    ) -> Result<Self, AuditError> {
        let logger = Self::new(build_backends(settings, validator).await?);
        info!(backends = logger.backend_count(), "Audit logger initialized");
        Ok(logger)
    }

    /// Replace the fallback reporter
    pub fn with_reporter(mut self, reporter: FallbackReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Number of registered backends
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Whether any backend is registered
    pub fn is_enabled(&self) -> bool {
        !self.backends.is_empty()
    }

    /// Enrich `event` from the current scope and deliver it to every backend
    pub async fn log(&self, event: StructuredAuditEvent) {
        if self.backends.is_empty() {
            return;
        }

        let event = redact_metadata(enrich(event));
        let writes = self.backends.iter().map(|backend| {
            let event = &event;
            async move { (backend, backend.write(event).await) }
        });

        for (backend, outcome) in join_all(writes).await {
            if let Err(e) = outcome {
                debug!(backend = backend.name(), event_id = %event.id, "Audit write failed");
                (self.reporter)(backend.name(), &e);
            }
        }
    }

    /// Record a tool call. Only the number and names of the arguments are kept.
    pub async fn log_tool_execution(
        &self,
        tool: &str,
        arguments: &Value,
        error: Option<&str>,
        duration: Duration,
    ) {
        let (arg_count, arg_keys) = describe_arguments(arguments);
        let result = if error.is_some() {
            AuditResult::Failure
        } else {
            AuditResult::Success
        };

        let mut event =
            StructuredAuditEvent::new(AuditEventType::ToolExecution, tool, "execute", result)
                .with_duration(duration)
                .with_metadata("arg_count", arg_count)
                .with_metadata("arg_keys", arg_keys);
        if let Some(error) = error {
            event = event.with_error(error);
        }
        self.log(event).await;
    }

    /// Record an authentication attempt
    pub async fn log_auth_attempt(
        &self,
        mode: AuthMode,
        principal: Option<&Principal>,
        error: Option<&str>,
    ) {
        let result = if error.is_none() && principal.is_some() {
            AuditResult::Success
        } else {
            AuditResult::Failure
        };

        let mut event = StructuredAuditEvent::new(
            AuditEventType::Authentication,
            "authentication",
            "authenticate",
            result,
        )
        .with_metadata("auth_mode", mode.as_str());
        if let Some(principal) = principal {
            event = event.with_principal(principal);
        }
        if let Some(error) = error {
            event = event.with_error(error);
        }
        self.log(event).await;
    }

    /// Record an authorization decision
    pub async fn log_authorization_check(
        &self,
        principal: Option<&Principal>,
        resource: &str,
        permission: Permission,
        allowed: bool,
        reason: Option<&str>,
    ) {
        let result = if allowed {
            AuditResult::Allowed
        } else {
            AuditResult::Denied
        };

        let mut event = StructuredAuditEvent::new(
            AuditEventType::Authorization,
            resource,
            permission.as_str(),
            result,
        );
        if let Some(principal) = principal {
            event = event.with_principal(principal);
        }
        if let Some(reason) = reason {
            event = event.with_error(reason);
        }
        self.log(event).await;
    }

    /// Record a request rejected by a rate limit
    pub async fn log_rate_limit_exceeded(&self, resource: &str, limit_key: &str) {
        let event = StructuredAuditEvent::new(
            AuditEventType::RateLimit,
            resource,
            "throttle",
            AuditResult::Denied,
        )
        .with_metadata("limit_key", limit_key);
        self.log(event).await;
    }

    /// Record rejected input
    pub async fn log_validation_error(&self, resource: &str, field: &str, error: &str) {
        let event = StructuredAuditEvent::new(
            AuditEventType::Validation,
            resource,
            "validate",
            AuditResult::Failure,
        )
        .with_metadata("field", field)
        .with_error(error);
        self.log(event).await;
    }

    /// Close every backend, flushing buffered events
    pub async fn close(&self) {
        let closes = self
            .backends
            .iter()
            .map(|backend| async move { (backend, backend.close().await) });

        for (backend, outcome) in join_all(closes).await {
            if let Err(e) = outcome {
                (self.reporter)(backend.name(), &e);
            }
        }
        info!(backends = self.backends.len(), "Audit logger closed");
    }
}

/// Fill correlation ids, principal and client from the current scope
fn enrich(mut event: StructuredAuditEvent) -> StructuredAuditEvent {
    if event.request_id.is_none()
        && let Some(ctx) = correlation::current()
    {
        event = event.with_correlation(&ctx);
    }

    if let Some(auth) = aixgo_guard_auth::context::current() {
        if event.principal.is_none() {
            event = event.with_principal(&auth.principal);
        }
        if event.client_info.is_none() && auth.client != ClientInfo::default() {
            event = event.with_client(auth.client);
        }
    }
    event
}

/// Metadata written by the logger itself, exempt from redaction
const LOGGER_FIELDS: &[&str] = &["auth_mode", "arg_count", "arg_keys"];

fn redact_metadata(mut event: StructuredAuditEvent) -> StructuredAuditEvent {
    let replacement = &get_sanitizer().config().replacement;
    for (key, value) in event.metadata.iter_mut() {
        if !LOGGER_FIELDS.contains(&key.as_str()) && LogSanitizer::is_sensitive_field(key) {
            *value = Value::String(replacement.clone());
        }
    }
    event
}

/// Argument count and sorted top-level keys
fn describe_arguments(arguments: &Value) -> (usize, Value) {
    match arguments {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            (map.len(), json!(keys))
        }
        Value::Array(items) => (items.len(), json!([])),
        Value::Null => (0, json!([])),
        _ => (1, json!([])),
    }
}

#[cfg(test)]
#[path = "logger_tests.rs"]
mod logger_tests;
