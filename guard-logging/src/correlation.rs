//! Request correlation for the guard layer
//!
//! Every request handled by the guard carries a [`CorrelationContext`]. The
//! context is installed for the duration of the request with [`scope`] and
//! read back anywhere below it with [`current`], which is how audit events
//! pick up request, trace and span identifiers without threading them
//! through every call.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use uuid::Uuid;

tokio::task_local! {
    static CURRENT: CorrelationContext;
}

/// Request correlation context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationContext {
    /// Request ID for this specific request
    pub request_id: String,

    /// W3C trace id (32 lowercase hex characters)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// W3C span id (16 lowercase hex characters)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
}

/// HTTP headers used for correlation propagation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationHeaders {
    /// Request ID header
    pub request_id: String,

    /// W3C trace context header
    pub traceparent: String,
}

impl Default for CorrelationHeaders {
    fn default() -> Self {
        Self {
            request_id: "x-request-id".to_string(),
            traceparent: "traceparent".to_string(),
        }
    }
}

impl CorrelationContext {
    /// Create a context with a fresh request id and no trace
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            trace_id: None,
            span_id: None,
        }
    }

    /// Attach trace and span identifiers
    pub fn with_trace(mut self, trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self.span_id = Some(span_id.into());
        self
    }

    /// Use a caller-provided request id
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// Build a context from inbound request headers.
    ///
    /// Header lookup is case-insensitive. A missing or blank request id
    /// header gets a fresh UUID; a malformed `traceparent` is ignored.
    pub fn from_headers(headers: &HashMap<String, String>, names: &CorrelationHeaders) -> Self {
        let lookup = |name: &str| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.trim())
        };

        let mut ctx = match lookup(&names.request_id) {
            Some(id) if !id.is_empty() && id.len() <= 128 => Self::new().with_request_id(id),
            _ => Self::new(),
        };

        if let Some((trace_id, span_id)) = lookup(&names.traceparent).and_then(parse_traceparent) {
            ctx = ctx.with_trace(trace_id, span_id);
        }

        ctx
    }

    /// Write this context into outbound headers
    pub fn inject_into_headers(
        &self,
        headers: &mut HashMap<String, String>,
        names: &CorrelationHeaders,
    ) {
        headers.insert(names.request_id.clone(), self.request_id.clone());

        if let (Some(trace_id), Some(span_id)) = (&self.trace_id, &self.span_id) {
            headers.insert(
                names.traceparent.clone(),
                format!("00-{trace_id}-{span_id}-01"),
            );
        }
    }

    /// Create a tracing span carrying the correlation fields
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "request",
            request_id = %self.request_id,
            trace_id = self.trace_id.as_deref().unwrap_or(""),
            span_id = self.span_id.as_deref().unwrap_or("")
        )
    }
}

impl Default for CorrelationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a W3C `traceparent` value into `(trace_id, span_id)`
pub fn parse_traceparent(value: &str) -> Option<(String, String)> {
    let mut parts = value.trim().split('-');
    let version = parts.next()?;
    let trace_id = parts.next()?;
    let span_id = parts.next()?;
    let flags = parts.next()?;

    if parts.next().is_some() && version == "00" {
        return None;
    }

    let is_hex = |s: &str, len: usize| {
        s.len() == len && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    };
    let all_zero = |s: &str| s.bytes().all(|b| b == b'0');

    if !is_hex(version, 2) || version == "ff" || !is_hex(flags, 2) {
        return None;
    }
    if !is_hex(trace_id, 32) || all_zero(trace_id) {
        return None;
    }
    if !is_hex(span_id, 16) || all_zero(span_id) {
        return None;
    }

    Some((trace_id.to_string(), span_id.to_string()))
}

/// Run `fut` with `ctx` installed as the current correlation context
pub async fn scope<F>(ctx: CorrelationContext, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT.scope(ctx, fut).await
}

/// Correlation context of the running task, if one was installed
pub fn current() -> Option<CorrelationContext> {
    CURRENT.try_with(Clone::clone).ok()
}
