//! Integration tests for aixgo-guard
//!
//! These scenarios drive complete tool calls through [`gateway::GuardedGateway`],
//! which wires authentication, authorization, flow control, argument
//! screening and auditing together the way a serving process would.

pub mod gateway;

#[cfg(test)]
mod audit_delivery;
#[cfg(test)]
mod auth_flow;
#[cfg(test)]
mod content_screening;
#[cfg(test)]
mod resilience_flow;

/// Common helpers for scenarios
pub mod test_utils {
    use crate::gateway::{GatewaySettings, GuardedGateway};
    use aixgo_guard_audit::{AuditBackend, AuditLogger, MemoryBackend, StructuredAuditEvent};
    use aixgo_guard_auth::{
        ApiKeyAuthenticator, AuthRequest, AuthorizationConfig, BuiltinExtractor, Principal,
        RbacAuthorizer,
    };
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;

    /// Key held by `alice`, who has the `user` role
    pub const USER_KEY: &str = "user-key-0001";
    /// Key held by `auditor`, who has the `readonly` role
    pub const READONLY_KEY: &str = "readonly-key-0002";
    /// Key held by `root`, who has the `admin` role
    pub const ADMIN_KEY: &str = "admin-key-0003";

    /// Gateway authenticating the fixed API keys above, auditing to memory
    pub fn api_key_gateway(settings: GatewaySettings) -> (GuardedGateway, Arc<MemoryBackend>) {
        let authenticator = ApiKeyAuthenticator::new()
            .with_key(USER_KEY, service("alice", "user"))
            .with_key(READONLY_KEY, service("auditor", "readonly"))
            .with_key(ADMIN_KEY, service("root", "admin"));

        let memory = Arc::new(MemoryBackend::new());
        let logger = AuditLogger::new(vec![memory.clone() as Arc<dyn AuditBackend>]);
        let gateway = GuardedGateway::new(
            Arc::new(BuiltinExtractor::new(Arc::new(authenticator))),
            Arc::new(RbacAuthorizer::new(AuthorizationConfig::default())),
            Arc::new(logger),
            settings,
        );
        (gateway, memory)
    }

    fn service(id: &str, role: &str) -> Principal {
        Principal::new(id).with_name(id).with_roles([role])
    }

    /// Request presenting `key` as a bearer token
    pub fn bearer(key: &str) -> AuthRequest {
        AuthRequest::new()
            .with_header("Authorization", format!("Bearer {key}"))
            .with_client_ip("198.51.100.7")
    }

    /// Tool handler echoing its arguments
    pub async fn echo(arguments: Value) -> Result<Value, String> {
        Ok(arguments)
    }

    /// Events of one type, in write order
    pub fn events_of(memory: &MemoryBackend, kind: &str) -> Vec<StructuredAuditEvent> {
        memory
            .events()
            .into_iter()
            .filter(|e| e.event_type.as_str() == kind)
            .collect()
    }

    /// Wait for a condition with timeout
    pub async fn wait_for_condition<F, Fut>(
        mut condition: F,
        timeout_duration: Duration,
        check_interval: Duration,
    ) -> Result<(), Box<dyn std::error::Error>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = tokio::time::Instant::now();
        while start.elapsed() < timeout_duration {
            if condition().await {
                return Ok(());
            }
            tokio::time::sleep(check_interval).await;
        }
        Err("Condition timeout".into())
    }
}
