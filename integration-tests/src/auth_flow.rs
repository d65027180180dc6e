//! Authentication and authorization through the full gateway

use crate::gateway::{GatewayError, GatewaySettings, GuardedGateway};
use crate::test_utils::*;
use aixgo_guard_audit::{AuditBackend, AuditLogger, AuditResult, MemoryBackend};
use aixgo_guard_auth::jwt::{IAP_ISSUER, IapClaims};
use aixgo_guard_auth::{
    AuthExtractionError, AuthMode, AuthRequest, AuthorizationConfig, AuthorizationError,
    BuiltinAuthConfig, DelegatedAuthConfig, ExtractorDeps, JwtError, KeySourceConfig, Permission,
    RbacAuthorizer, SecurityConfig, build_extractor,
};
use aixgo_guard_security::{SsrfConfig, SsrfValidator};
use assert_matches::assert_matches;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const JWKS: &str = include_str!("../../guard-auth/tests/fixtures/jwks.json");
const SIGNING_KEY: &[u8] = include_bytes!("../../guard-auth/tests/fixtures/rsa_2048.pem");
const ROTATED_KEY: &[u8] = include_bytes!("../../guard-auth/tests/fixtures/rsa_2048_rotated.pem");
const IDENTITY: &str = "X-Goog-Authenticated-User-Email";
const ASSERTION: &str = "X-Goog-IAP-JWT-Assertion";

fn assertion_for(email: &str, pem: &[u8]) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = IapClaims {
        email: email.to_string(),
        iss: IAP_ISSUER.to_string(),
        aud: "/projects/1/global/backendServices/2".to_string(),
        sub: "accounts.google.com:7".to_string(),
        iat: now - 5,
        exp: now + 300,
    };
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some("test-key-2048".to_string());
    encode(&header, &claims, &EncodingKey::from_rsa_pem(pem).unwrap()).unwrap()
}

fn local_ssrf() -> SsrfValidator {
    SsrfValidator::new(SsrfConfig::default().with_localhost(true)).unwrap()
}

/// Gateway built from `config`, auditing into the returned memory backend
async fn configured_gateway(config: &SecurityConfig) -> (GuardedGateway, Arc<MemoryBackend>) {
    let deps = ExtractorDeps::from_config(config, &local_ssrf()).await.unwrap();
    let extractor = build_extractor(config, deps).unwrap();
    let memory = Arc::new(MemoryBackend::new());
    let logger = AuditLogger::new(vec![memory.clone() as Arc<dyn AuditBackend>]);
    let gateway = GuardedGateway::new(
        extractor,
        Arc::new(RbacAuthorizer::new(config.authorization.clone())),
        Arc::new(logger),
        GatewaySettings::default(),
    );
    (gateway, memory)
}

#[tokio::test]
async fn test_api_key_call_is_authorized_and_audited() {
    let (gateway, memory) = api_key_gateway(GatewaySettings::default());
    let request = bearer(USER_KEY).with_header("X-Request-ID", "req-int-1");

    let result = gateway
        .call_tool(&request, "search", Permission::Execute, json!({ "query": "rust" }), echo)
        .await
        .unwrap();
    assert_eq!(result, json!({ "query": "rust" }));

    let events = memory.events();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.request_id.as_deref() == Some("req-int-1")));

    let auth = &events_of(&memory, "authentication")[0];
    assert_eq!(auth.result, AuditResult::Success);
    assert_eq!(auth.metadata["auth_mode"], json!("builtin"));
    let principal = auth.principal.as_ref().unwrap();
    assert_eq!(principal.id, "alice");
    assert_eq!(principal.kind, "service");

    let authz = &events_of(&memory, "authorization")[0];
    assert_eq!(authz.result, AuditResult::Allowed);
    assert_eq!(authz.action, "execute");

    let tool = &events_of(&memory, "tool_execution")[0];
    assert_eq!(tool.result, AuditResult::Success);
    assert_eq!(tool.metadata["arg_keys"], json!(["query"]));
    assert_eq!(
        tool.client_info.as_ref().unwrap().ip_address.as_deref(),
        Some("198.51.100.7")
    );
    assert!(!tool.to_json().unwrap().contains("rust"));
}

#[tokio::test]
async fn test_missing_credentials_never_reach_tool() {
    let (gateway, memory) = api_key_gateway(GatewaySettings::default());
    let invoked = AtomicBool::new(false);

    let err = gateway
        .call_tool(&AuthRequest::new(), "search", Permission::Execute, json!({}), |args| {
            invoked.store(true, Ordering::SeqCst);
            echo(args)
        })
        .await
        .unwrap_err();

    assert_matches!(
        err,
        GatewayError::Unauthenticated(AuthExtractionError::MissingCredentials(_))
    );
    assert_eq!(err.public_message(), "unauthorized");
    assert!(!invoked.load(Ordering::SeqCst));

    let events = memory.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].result, AuditResult::Failure);
    assert!(events[0].principal.is_none());
}

#[tokio::test]
async fn test_unknown_key_rejected() {
    let (gateway, memory) = api_key_gateway(GatewaySettings::default());

    let err = gateway
        .call_tool(&bearer("not-a-key"), "search", Permission::Read, json!({}), echo)
        .await
        .unwrap_err();

    assert_eq!(err.public_message(), "unauthorized");
    assert!(!err.public_message().contains("not-a-key"));
    assert_eq!(events_of(&memory, "authentication")[0].result, AuditResult::Failure);
}

#[tokio::test]
async fn test_readonly_principal_cannot_write() {
    let (gateway, memory) = api_key_gateway(GatewaySettings::default());
    let request = bearer(READONLY_KEY);

    gateway
        .call_tool(&request, "notes", Permission::Read, json!({}), echo)
        .await
        .unwrap();

    let err = gateway
        .call_tool(&request, "notes", Permission::Write, json!({ "text": "hi" }), echo)
        .await
        .unwrap_err();
    assert_matches!(err, GatewayError::Forbidden(AuthorizationError::Denied { .. }));
    assert_eq!(err.public_message(), "forbidden");

    let decisions = events_of(&memory, "authorization");
    assert_eq!(decisions.len(), 2);
    assert_eq!(decisions[0].result, AuditResult::Allowed);
    assert_eq!(decisions[1].result, AuditResult::Denied);
    assert_eq!(decisions[1].principal.as_ref().unwrap().id, "auditor");
    assert_eq!(events_of(&memory, "tool_execution").len(), 1);
}

#[tokio::test]
async fn test_admin_holds_every_permission() {
    let (gateway, _memory) = api_key_gateway(GatewaySettings::default());
    let request = bearer(ADMIN_KEY);

    let every = [
        Permission::Read,
        Permission::Write,
        Permission::Execute,
        Permission::Admin,
    ];
    for permission in every {
        gateway
            .call_tool(&request, "ops", permission, json!({}), echo)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_delegated_assertion_verified_against_published_keys() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_string(JWKS))
        .expect(1)
        .mount(&server)
        .await;

    let config = SecurityConfig {
        auth_mode: AuthMode::Delegated,
        delegated_auth: Some(DelegatedAuthConfig {
            jwks_url: format!("{}/jwks", server.uri()),
            ..Default::default()
        }),
        builtin_auth: None,
        ..Default::default()
    };
    config.validate().unwrap();
    let (gateway, memory) = configured_gateway(&config).await;

    let request = AuthRequest::new()
        .with_header(IDENTITY, "accounts.google.com:carol@example.com")
        .with_header(ASSERTION, assertion_for("Carol@Example.com", SIGNING_KEY));

    for _ in 0..2 {
        gateway
            .call_tool(&request, "search", Permission::Execute, json!({}), echo)
            .await
            .unwrap();
    }

    let auth = &events_of(&memory, "authentication")[0];
    let principal = auth.principal.as_ref().unwrap();
    assert_eq!(principal.id, "carol@example.com");
    assert_eq!(principal.kind, "user");
    assert_eq!(principal.roles, vec!["user"]);
}

#[tokio::test]
async fn test_delegated_forged_assertion_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_string(JWKS))
        .mount(&server)
        .await;

    let config = SecurityConfig {
        auth_mode: AuthMode::Delegated,
        delegated_auth: Some(DelegatedAuthConfig {
            jwks_url: format!("{}/jwks", server.uri()),
            ..Default::default()
        }),
        builtin_auth: None,
        ..Default::default()
    };
    let (gateway, memory) = configured_gateway(&config).await;

    let request = AuthRequest::new()
        .with_header(IDENTITY, "accounts.google.com:mallory@example.com")
        .with_header(ASSERTION, assertion_for("mallory@example.com", ROTATED_KEY));

    let err = gateway
        .call_tool(&request, "search", Permission::Execute, json!({}), echo)
        .await
        .unwrap_err();

    assert_matches!(
        err,
        GatewayError::Unauthenticated(AuthExtractionError::Token(JwtError::InvalidSignature))
    );
    assert_eq!(err.public_message(), "unauthorized");
    assert!(events_of(&memory, "tool_execution").is_empty());
}

#[tokio::test]
async fn test_hybrid_falls_back_to_api_keys_from_file() {
    let mut key_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(key_file, "# deploy keys").unwrap();
    writeln!(key_file, "ci=ci-key-123").unwrap();

    let config = SecurityConfig {
        auth_mode: AuthMode::Hybrid,
        delegated_auth: Some(DelegatedAuthConfig {
            verify_jwt: false,
            ..Default::default()
        }),
        builtin_auth: Some(BuiltinAuthConfig {
            key_source: KeySourceConfig::File {
                path: key_file.path().to_path_buf(),
            },
        }),
        authorization: AuthorizationConfig::default(),
        ..Default::default()
    };
    config.validate().unwrap();
    let (gateway, memory) = configured_gateway(&config).await;

    gateway
        .call_tool(&bearer("ci-key-123"), "build", Permission::Execute, json!({}), echo)
        .await
        .unwrap();
    gateway
        .call_tool(
            &AuthRequest::new().with_header(IDENTITY, "dana@example.com"),
            "build",
            Permission::Execute,
            json!({}),
            echo,
        )
        .await
        .unwrap();

    let logins = events_of(&memory, "authentication");
    assert_eq!(logins.len(), 2);
    let service = logins[0].principal.as_ref().unwrap();
    assert_eq!((service.id.as_str(), service.kind.as_str()), ("ci", "service"));
    let person = logins[1].principal.as_ref().unwrap();
    assert_eq!((person.id.as_str(), person.kind.as_str()), ("dana@example.com", "user"));
    assert!(logins.iter().all(|e| e.metadata["auth_mode"] == json!("hybrid")));
}
