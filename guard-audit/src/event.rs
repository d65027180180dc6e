//! Audit event record and wire format

use aixgo_guard_auth::{ClientInfo, Principal};
use aixgo_guard_logging::{CorrelationContext, sanitize_error_message};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Audit event category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A tool was invoked
    ToolExecution,
    /// Credentials were checked
    Authentication,
    /// A permission was checked
    Authorization,
    /// A request was throttled
    RateLimit,
    /// Input was rejected
    Validation,
    /// Something suspicious, e.g. a blocked outbound target
    Security,
    /// Lifecycle or configuration change
    System,
}

impl AuditEventType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolExecution => "tool_execution",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::RateLimit => "rate_limit",
            Self::Validation => "validation",
            Self::Security => "security",
            Self::System => "system",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    /// Action completed
    Success,
    /// Action failed
    Failure,
    /// Check passed
    Allowed,
    /// Check refused
    Denied,
}

impl AuditResult {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Allowed => "allowed",
            Self::Denied => "denied",
        }
    }
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Principal as recorded in an audit event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalSnapshot {
    /// Principal id
    pub id: String,
    /// `user`, `service` or `anonymous`
    #[serde(rename = "type")]
    pub kind: String,
    /// Roles at the time of the event
    #[serde(default)]
    pub roles: Vec<String>,
}

impl From<&Principal> for PrincipalSnapshot {
    fn from(principal: &Principal) -> Self {
        let kind = match principal.metadata.get("auth_mode").map(String::as_str) {
            Some("builtin") => "service",
            Some("disabled") => "anonymous",
            _ => "user",
        };
        Self {
            id: principal.id.clone(),
            kind: kind.to_string(),
            roles: principal.roles.clone(),
        }
    }
}

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredAuditEvent {
    /// Unique event id
    pub id: String,
    /// When the audited action completed
    pub timestamp: DateTime<Utc>,
    /// Category
    #[serde(rename = "type")]
    pub event_type: AuditEventType,
    /// Request id from the correlation scope
    #[serde(default)]
    pub request_id: Option<String>,
    /// W3C trace id
    #[serde(default)]
    pub trace_id: Option<String>,
    /// W3C span id
    #[serde(default)]
    pub span_id: Option<String>,
    /// Acting principal
    #[serde(default)]
    pub principal: Option<PrincipalSnapshot>,
    /// Target, e.g. a tool name
    pub resource: String,
    /// Operation on the target
    pub action: String,
    /// Outcome
    pub result: AuditResult,
    /// Sanitized failure description
    #[serde(default)]
    pub error: Option<String>,
    /// Wall time of the action
    #[serde(default)]
    pub duration_ns: Option<u64>,
    /// Free-form details; never raw tool arguments
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Caller address and user agent
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

impl StructuredAuditEvent {
    /// Create an event stamped with a fresh id and the current time
    pub fn new(
        event_type: AuditEventType,
        resource: impl Into<String>,
        action: impl Into<String>,
        result: AuditResult,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            request_id: None,
            trace_id: None,
            span_id: None,
            principal: None,
            resource: resource.into(),
            action: action.into(),
            result,
            error: None,
            duration_ns: None,
            metadata: BTreeMap::new(),
            client_info: None,
        }
    }

    /// Attach an error message after redacting paths, addresses and secrets
    pub fn with_error(mut self, error: impl AsRef<str>) -> Self {
        self.error = Some(sanitize_error_message(error.as_ref()));
        self
    }

    /// Record how long the action took
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ns = Some(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX));
        self
    }

    /// Snapshot the acting principal
    pub fn with_principal(mut self, principal: &Principal) -> Self {
        self.principal = Some(PrincipalSnapshot::from(principal));
        self
    }

    /// Record client details
    pub fn with_client(mut self, client: ClientInfo) -> Self {
        self.client_info = Some(client);
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Copy request, trace and span ids
    pub fn with_correlation(mut self, ctx: &CorrelationContext) -> Self {
        self.request_id = Some(ctx.request_id.clone());
        self.trace_id = ctx.trace_id.clone();
        self.span_id = ctx.span_id.clone();
        self
    }

    /// Serialize to the wire format
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from the wire format
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StructuredAuditEvent {
        let principal = Principal::new("alice@example.com")
            .with_roles(["editor"])
            .with_metadata("auth_mode", "delegated");
        StructuredAuditEvent::new(
            AuditEventType::ToolExecution,
            "search",
            "execute",
            AuditResult::Success,
        )
        .with_principal(&principal)
        .with_client(ClientInfo {
            ip_address: Some("203.0.113.7".to_string()),
            user_agent: Some("agent/1.0".to_string()),
        })
        .with_duration(Duration::from_millis(12))
        .with_metadata("arg_count", 2)
    }

    #[test]
    fn test_wire_field_names() {
        let value: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        for field in [
            "id",
            "timestamp",
            "type",
            "request_id",
            "trace_id",
            "span_id",
            "principal",
            "resource",
            "action",
            "result",
            "error",
            "duration_ns",
            "metadata",
            "client_info",
        ] {
            assert!(value.get(field).is_some(), "missing {field}");
        }
        assert_eq!(value["type"], "tool_execution");
        assert_eq!(value["result"], "success");
        assert_eq!(value["principal"]["type"], "user");
        assert_eq!(value["principal"]["roles"][0], "editor");
        assert_eq!(value["client_info"]["ip_address"], "203.0.113.7");
        assert_eq!(value["duration_ns"], 12_000_000);
    }

    #[test]
    fn test_wire_json_preserves_fields() {
        let event = sample().with_error("backend timed out");
        let parsed = StructuredAuditEvent::from_json(&event.to_json().unwrap()).unwrap();

        assert_eq!(parsed.timestamp, event.timestamp);
        assert_eq!(parsed.resource, event.resource);
        assert_eq!(parsed.action, event.action);
        assert_eq!(parsed.result, event.result);
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_error_is_sanitized() {
        let event = StructuredAuditEvent::new(
            AuditEventType::Authentication,
            "api",
            "authenticate",
            AuditResult::Failure,
        )
        .with_error("failed reading /etc/aixgo/keys from 10.1.2.3");

        let error = event.error.unwrap();
        assert!(!error.contains("/etc/aixgo/keys"));
        assert!(!error.contains("10.1.2.3"));
    }

    #[test]
    fn test_principal_kind() {
        let service = Principal::new("ci").with_metadata("auth_mode", "builtin");
        assert_eq!(PrincipalSnapshot::from(&service).kind, "service");

        let anonymous = Principal::new("anonymous").with_metadata("auth_mode", "disabled");
        assert_eq!(PrincipalSnapshot::from(&anonymous).kind, "anonymous");
    }

    #[test]
    fn test_correlation_copied() {
        let ctx = CorrelationContext::new().with_trace(
            "4bf92f3577b34da6a3ce929d0e0e4736",
            "00f067aa0ba902b7",
        );
        let event = sample().with_correlation(&ctx);
        assert_eq!(event.request_id.as_deref(), Some(ctx.request_id.as_str()));
        assert_eq!(event.trace_id.as_deref(), Some("4bf92f3577b34da6a3ce929d0e0e4736"));
        assert_eq!(event.span_id.as_deref(), Some("00f067aa0ba902b7"));
    }
}
