//! Request authentication strategies
//!
//! Each strategy turns the headers of an inbound request into a
//! [`Principal`]. The strategy is chosen by [`AuthMode`] in
//! [`build_extractor`].

pub mod builtin;
pub mod delegated;
pub mod disabled;
pub mod hybrid;

pub use builtin::BuiltinExtractor;
pub use delegated::DelegatedExtractor;
pub use disabled::DisabledExtractor;
pub use hybrid::HybridExtractor;

use crate::authenticator::{ApiKeyAuthenticator, AuthenticationError, Authenticator};
use crate::config::{AuthMode, Environment, KeySourceConfig, SecurityConfig};
use crate::jwk_cache::{HttpKeySetFetcher, JwkCache, JwkCacheConfig};
use crate::jwt::{JwtError, JwtVerifier};
use crate::models::{AuthContext, ClientInfo, Principal};
use crate::storage::{EnvironmentKeyStore, FileKeyStore, KeyStore};
use aixgo_guard_security::SsrfValidator;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Metadata key recording which strategy authenticated the principal
pub const AUTH_MODE_METADATA_KEY: &str = "auth_mode";

/// Errors that can occur while authenticating a request
#[derive(Debug, Error)]
pub enum AuthExtractionError {
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Identity token rejected: {0}")]
    Token(#[from] JwtError),

    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthenticationError),

    #[error("Authentication misconfigured: {0}")]
    Configuration(String),
}

impl AuthExtractionError {
    /// Message safe to return to clients
    pub fn public_message(&self) -> &'static str {
        "unauthorized"
    }
}

/// Transport-neutral view of an inbound request
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    headers: HashMap<String, String>,
    client_ip: Option<String>,
}

impl AuthRequest {
    /// Create an empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from header pairs; names are case-insensitive
    pub fn from_headers<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut request = Self::new();
        for (name, value) in headers {
            request
                .headers
                .insert(name.as_ref().to_ascii_lowercase(), value.into());
        }
        request
    }

    /// Add a header
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set the remote address
    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// All headers with lower-cased names
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Client details for audit records
    pub fn client_info(&self) -> ClientInfo {
        ClientInfo {
            ip_address: self.client_ip.clone(),
            user_agent: self.header("user-agent").map(str::to_string),
        }
    }
}

/// Authentication strategy
#[async_trait]
pub trait AuthExtractor: Send + Sync {
    /// Authenticate a request
    async fn extract_auth(&self, request: &AuthRequest) -> Result<Principal, AuthExtractionError>;

    /// Mode this strategy implements
    fn mode(&self) -> AuthMode;
}

/// Authenticate a request and wrap the principal in a request context
pub async fn extract_context(
    extractor: &dyn AuthExtractor,
    request: &AuthRequest,
) -> Result<AuthContext, AuthExtractionError> {
    let principal = extractor.extract_auth(request).await?;
    Ok(AuthContext::new(principal).with_client(request.client_info()))
}

/// Collaborators needed by the configured strategy
#[derive(Default, Clone)]
pub struct ExtractorDeps {
    /// Used by builtin and hybrid modes
    pub authenticator: Option<Arc<dyn Authenticator>>,
    /// Used by delegated and hybrid modes when assertions are verified
    pub verifier: Option<JwtVerifier>,
}

impl std::fmt::Debug for ExtractorDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorDeps")
            .field("authenticator", &self.authenticator.is_some())
            .field("verifier", &self.verifier)
            .finish()
    }
}

impl ExtractorDeps {
    /// Build the collaborators the configuration calls for: load API keys
    /// from the configured source and set up a key cache for the signed
    /// assertion issuer.
    pub async fn from_config(
        config: &SecurityConfig,
        validator: &SsrfValidator,
    ) -> Result<Self, AuthExtractionError> {
        let mut deps = Self::default();

        if let Some(builtin) = &config.builtin_auth
            && matches!(config.auth_mode, AuthMode::Builtin | AuthMode::Hybrid)
        {
            let store: Box<dyn KeyStore> = match &builtin.key_source {
                KeySourceConfig::Environment { prefix } => {
                    Box::new(EnvironmentKeyStore::new(prefix.clone()))
                }
                KeySourceConfig::File { path } => Box::new(FileKeyStore::new(path.clone())),
            };
            let authenticator = ApiKeyAuthenticator::from_store(store.as_ref()).await?;
            deps.authenticator = Some(Arc::new(authenticator));
        }

        if let Some(delegated) = &config.delegated_auth
            && delegated.verify_jwt
            && matches!(config.auth_mode, AuthMode::Delegated | AuthMode::Hybrid)
        {
            let fetcher = HttpKeySetFetcher::new(&delegated.jwks_url, validator)
                .await
                .map_err(|e| AuthExtractionError::Configuration(e.to_string()))?;
            let cache = JwkCache::new(
                Arc::new(fetcher),
                JwkCacheConfig {
                    ttl: Duration::from_secs(delegated.jwks_cache_ttl_secs),
                    ..Default::default()
                },
            );

            let mut verifier = JwtVerifier::new(Arc::new(cache))
                .with_unverified_fallback(config.unverified_claims_allowed());
            if let Some(audience) = &delegated.audience {
                verifier = verifier.with_audience(audience.clone());
            }
            deps.verifier = Some(verifier);
        }

        Ok(deps)
    }
}

/// Build the strategy selected by `config.auth_mode`
pub fn build_extractor(
    config: &SecurityConfig,
    deps: ExtractorDeps,
) -> Result<Arc<dyn AuthExtractor>, AuthExtractionError> {
    let extractor: Arc<dyn AuthExtractor> = match config.auth_mode {
        AuthMode::Disabled => {
            if config.environment == Environment::Production {
                return Err(AuthExtractionError::Configuration(
                    "authentication cannot be disabled in production".to_string(),
                ));
            }
            Arc::new(DisabledExtractor::new())
        }
        AuthMode::Delegated => Arc::new(delegated_extractor(config, deps.verifier)?),
        AuthMode::Builtin => Arc::new(builtin_extractor(deps.authenticator)?),
        AuthMode::Hybrid => Arc::new(HybridExtractor::new(
            delegated_extractor(config, deps.verifier)?,
            builtin_extractor(deps.authenticator)?,
        )),
    };

    info!(
        mode = %config.auth_mode,
        environment = %config.environment,
        "Authentication strategy ready"
    );
    Ok(extractor)
}

fn delegated_extractor(
    config: &SecurityConfig,
    verifier: Option<JwtVerifier>,
) -> Result<DelegatedExtractor, AuthExtractionError> {
    let delegated = config.delegated_auth.clone().ok_or_else(|| {
        AuthExtractionError::Configuration("delegated_auth is not configured".to_string())
    })?;
    DelegatedExtractor::new(delegated, verifier)
}

fn builtin_extractor(
    authenticator: Option<Arc<dyn Authenticator>>,
) -> Result<BuiltinExtractor, AuthExtractionError> {
    let authenticator = authenticator.ok_or_else(|| {
        AuthExtractionError::Configuration("no authenticator for builtin auth".to_string())
    })?;
    debug!("Builtin extractor configured");
    Ok(BuiltinExtractor::new(authenticator))
}
