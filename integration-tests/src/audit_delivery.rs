//! Audit trails produced by configured backends

use crate::gateway::{GatewaySettings, GuardedGateway};
use crate::test_utils::*;
use aixgo_guard_audit::{AuditError, StructuredAuditEvent};
use aixgo_guard_auth::{
    AuditBackendKind, AuditSettings, AuthMode, BuiltinAuthConfig, KeySourceConfig, Permission,
    SecurityConfig, SiemKind, SiemSettings,
};
use aixgo_guard_security::{SsrfConfig, SsrfValidator};
use serde_json::json;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use tempfile::{NamedTempFile, TempDir};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn key_file() -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "alice={USER_KEY}").unwrap();
    file
}

fn builtin_config(keys: &Path, audit: AuditSettings) -> SecurityConfig {
    SecurityConfig {
        auth_mode: AuthMode::Builtin,
        builtin_auth: Some(BuiltinAuthConfig {
            key_source: KeySourceConfig::File {
                path: keys.to_path_buf(),
            },
        }),
        audit,
        ..Default::default()
    }
}

fn webhook_settings(url: String, batch_size: usize, max_attempts: u32) -> SiemSettings {
    SiemSettings {
        kind: SiemKind::Webhook,
        url,
        index: None,
        token: Some("hook-token".to_string()),
        method: None,
        headers: HashMap::from([("X-Source".to_string(), "gateway".to_string())]),
        batch_size,
        flush_interval_ms: 60_000,
        max_attempts,
    }
}

fn local_ssrf() -> SsrfValidator {
    SsrfValidator::new(SsrfConfig::default().with_localhost(true)).unwrap()
}

#[tokio::test]
async fn test_file_backend_records_ndjson_trail() {
    let keys = key_file();
    let dir = TempDir::new().unwrap();
    let trail = dir.path().join("audit").join("trail.ndjson");

    let config = builtin_config(
        keys.path(),
        AuditSettings {
            enabled: true,
            backend: AuditBackendKind::File,
            file_path: Some(trail.clone()),
            siem: None,
        },
    );
    config.validate().unwrap();

    let gateway = GuardedGateway::from_config(&config, &local_ssrf(), GatewaySettings::default())
        .await
        .unwrap();
    assert_eq!(gateway.logger().backend_count(), 1);

    gateway
        .call_tool(&bearer(USER_KEY), "search", Permission::Execute, json!({ "q": "audit" }), echo)
        .await
        .unwrap();
    gateway.shutdown().await;

    let content = std::fs::read_to_string(&trail).unwrap();
    let events: Vec<StructuredAuditEvent> = content
        .lines()
        .map(|line| StructuredAuditEvent::from_json(line).unwrap())
        .collect();
    let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(kinds, ["authentication", "authorization", "tool_execution"]);
    assert_eq!(events[0].principal.as_ref().unwrap().id, "alice");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&trail).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[tokio::test]
async fn test_webhook_receives_batched_events() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/audit"))
        .respond_with(ResponseTemplate::new(202))
        .expect(3)
        .mount(&server)
        .await;

    let keys = key_file();
    let config = builtin_config(
        keys.path(),
        AuditSettings {
            enabled: true,
            backend: AuditBackendKind::Siem,
            file_path: None,
            siem: Some(webhook_settings(format!("{}/audit", server.uri()), 2, 3)),
        },
    );
    config.validate().unwrap();

    let gateway = GuardedGateway::from_config(&config, &local_ssrf(), GatewaySettings::default())
        .await
        .unwrap();
    for _ in 0..2 {
        gateway
            .call_tool(&bearer(USER_KEY), "search", Permission::Execute, json!({}), echo)
            .await
            .unwrap();
    }
    gateway.shutdown().await;

    let requests = server.received_requests().await.unwrap();
    let mut delivered = 0;
    for request in &requests {
        assert_eq!(request.headers.get("x-source").unwrap(), "gateway");
        assert_eq!(request.headers.get("authorization").unwrap(), "Bearer hook-token");
        let payload: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        delivered += payload["count"].as_u64().unwrap();
    }
    assert_eq!(delivered, 6);
}

#[tokio::test]
async fn test_collector_outage_does_not_fail_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let keys = key_file();
    let config = builtin_config(
        keys.path(),
        AuditSettings {
            enabled: true,
            backend: AuditBackendKind::Siem,
            file_path: None,
            siem: Some(webhook_settings(format!("{}/audit", server.uri()), 1, 1)),
        },
    );

    let gateway = GuardedGateway::from_config(&config, &local_ssrf(), GatewaySettings::default())
        .await
        .unwrap();
    let value = gateway
        .call_tool(&bearer(USER_KEY), "search", Permission::Execute, json!({ "q": 1 }), echo)
        .await
        .unwrap();
    assert_eq!(value, json!({ "q": 1 }));
    gateway.shutdown().await;

    assert!(!server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_private_collector_rejected_at_startup() {
    let keys = key_file();
    let config = builtin_config(
        keys.path(),
        AuditSettings {
            enabled: true,
            backend: AuditBackendKind::Siem,
            file_path: None,
            siem: Some(webhook_settings("http://10.20.30.40/audit".to_string(), 10, 3)),
        },
    );

    let err = GuardedGateway::from_config(&config, &local_ssrf(), GatewaySettings::default())
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err.downcast_ref::<AuditError>(),
        Some(AuditError::Ssrf(_))
    ));
}
