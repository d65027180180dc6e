//! Authentication and authorization for the aixgo-guard security layer
//!
//! Requests are turned into a [`Principal`] by one of four strategies
//! selected by [`AuthMode`]:
//! - `disabled`: a fixed read-only anonymous principal (never in production)
//! - `delegated`: identity asserted by a fronting proxy, optionally backed
//!   by an RS256 assertion verified against a rotating key cache
//! - `builtin`: `Authorization: Bearer` API keys compared in constant time
//! - `hybrid`: delegated first, API keys as fallback
//!
//! Authorization is role based ([`RbacAuthorizer`]), and the authenticated
//! [`AuthContext`] travels with the request future ([`context::scope`]).
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use aixgo_guard_auth::{
//!     AuthExtractor, AuthRequest, Authorizer, ExtractorDeps, Permission, RbacAuthorizer,
//!     SecurityConfig, build_extractor,
//! };
//! use aixgo_guard_security::{SsrfConfig, SsrfValidator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SecurityConfig::load_from_env()?;
//!     let ssrf = SsrfValidator::new(SsrfConfig::from_env())?;
//!     let deps = ExtractorDeps::from_config(&config, &ssrf).await?;
//!     let extractor = build_extractor(&config, deps)?;
//!
//!     let request = AuthRequest::new().with_header("Authorization", "Bearer my-key");
//!     let principal = extractor.extract_auth(&request).await?;
//!
//!     let authz = RbacAuthorizer::new(config.authorization.clone());
//!     authz.authorize(Some(&principal), "search", Permission::Execute)?;
//!     Ok(())
//! }
//! ```

pub mod authenticator;
pub mod config;
pub mod context;
pub mod extractors;
pub mod jwk_cache;
pub mod jwt;
pub mod models;
pub mod permissions;
pub mod roles;
pub mod storage;

pub use authenticator::{ApiKeyAuthenticator, AuthenticationError, Authenticator};
pub use config::{
    AuditBackendKind, AuditSettings, AuthMode, BuiltinAuthConfig, ConfigError,
    DelegatedAuthConfig, Environment, KeySourceConfig, SecurityConfig, SiemKind, SiemSettings,
};
pub use extractors::{
    AuthExtractionError, AuthExtractor, AuthRequest, BuiltinExtractor, DelegatedExtractor,
    DisabledExtractor, ExtractorDeps, HybridExtractor, build_extractor, extract_context,
};
pub use jwk_cache::{HttpKeySetFetcher, JwkCache, JwkCacheConfig, JwkError, KeySetFetcher};
pub use jwt::{IapClaims, JwtError, JwtVerifier};
pub use models::{AuthContext, ClientInfo, Permission, Principal};
pub use permissions::{AuthorizationConfig, AuthorizationError, Authorizer, RbacAuthorizer};
pub use roles::sanitize_roles;
pub use storage::{EnvironmentKeyStore, FileKeyStore, KeyStore, StorageError};
