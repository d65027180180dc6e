//! Audit middleware for tool calls

use crate::logger::AuditLogger;
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{Instrument, debug, info_span};

/// Wraps tool calls and records their outcome and duration
#[derive(Debug, Clone)]
pub struct AuditMiddleware {
    logger: Arc<AuditLogger>,
}

impl AuditMiddleware {
    /// Create middleware recording through `logger`
    pub fn new(logger: Arc<AuditLogger>) -> Self {
        Self { logger }
    }

    /// The underlying logger
    pub fn logger(&self) -> &Arc<AuditLogger> {
        &self.logger
    }

    /// Run `call` and record one tool-execution event.
    ///
    /// The call's result is returned unchanged. Only the shape of
    /// `arguments` is recorded, and a failure is recorded through its
    /// sanitized `Display` text.
    pub async fn execute<F, T, E>(&self, tool: &str, arguments: &Value, call: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let span = info_span!("tool_call", tool = %tool);
        let started = Instant::now();
        let result = call.instrument(span).await;
        let elapsed = started.elapsed();

        let error = result.as_ref().err().map(ToString::to_string);
        debug!(
            tool,
            success = error.is_none(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Tool call finished"
        );
        self.logger
            .log_tool_execution(tool, arguments, error.as_deref(), elapsed)
            .await;
        result
    }
}
