//! Security configuration
//!
//! Loaded once at startup from YAML/JSON (through the bounded parser) or
//! from the environment, validated, and then treated as read-only.

use crate::jwk_cache::DEFAULT_IAP_JWKS_URL;
use crate::permissions::AuthorizationConfig;
use crate::storage::DEFAULT_ENV_PREFIX;
use aixgo_guard_security::{ParserLimits, SafeConfigError, SafeConfigParser};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{info, warn};

/// Deployment environment variable
pub const ENV_ENVIRONMENT: &str = "AIXGO_ENVIRONMENT";
/// Authentication mode variable
pub const ENV_AUTH_MODE: &str = "AIXGO_AUTH_MODE";
/// Strict identity-token verification switch, `true` unless set otherwise
pub const ENV_JWT_STRICT_VERIFICATION: &str = "AIXGO_JWT_STRICT_VERIFICATION";

/// Default header carrying the proxy-authenticated identity
pub const DEFAULT_IDENTITY_HEADER: &str = "X-Goog-Authenticated-User-Email";
/// Default header carrying the signed identity assertion
pub const DEFAULT_ASSERTION_HEADER: &str = "X-Goog-IAP-JWT-Assertion";

static PRODUCTION_LATCH: AtomicBool = AtomicBool::new(false);

/// Whether a production configuration has been validated in this process
pub fn production_latched() -> bool {
    PRODUCTION_LATCH.load(Ordering::SeqCst)
}

fn latch_production() {
    if !PRODUCTION_LATCH.swap(true, Ordering::SeqCst) {
        info!("Production configuration validated; development overrides disabled");
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },

    #[error("Configuration parse error: {0}")]
    Parse(#[from] SafeConfigError),
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        })
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" | "local" => Ok(Self::Development),
            "stage" | "staging" => Ok(Self::Staging),
            "prod" | "production" => Ok(Self::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// How inbound requests are authenticated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Every request is the anonymous read-only principal
    Disabled,
    /// Identity asserted by a fronting proxy
    Delegated,
    /// Bearer API keys
    #[default]
    Builtin,
    /// Delegated first, builtin fallback
    Hybrid,
}

impl AuthMode {
    /// Lower-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Delegated => "delegated",
            Self::Builtin => "builtin",
            Self::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "none" => Ok(Self::Disabled),
            "delegated" | "iap" => Ok(Self::Delegated),
            "builtin" | "api_key" => Ok(Self::Builtin),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown auth mode '{other}'")),
        }
    }
}

/// Proxy-delegated authentication settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelegatedAuthConfig {
    /// Header holding `issuer:email` or a bare e-mail
    pub identity_header: String,
    /// Header holding the signed assertion
    pub assertion_header: String,
    /// Require and verify the signed assertion
    pub verify_jwt: bool,
    /// Expected `aud` claim
    pub audience: Option<String>,
    /// Published signing key set
    pub jwks_url: String,
    /// Key set cache lifetime in seconds
    pub jwks_cache_ttl_secs: u64,
    /// Extra request header -> principal field (`name`, `roles` or a metadata key)
    pub header_mapping: HashMap<String, String>,
}

impl Default for DelegatedAuthConfig {
    fn default() -> Self {
        Self {
            identity_header: DEFAULT_IDENTITY_HEADER.to_string(),
            assertion_header: DEFAULT_ASSERTION_HEADER.to_string(),
            verify_jwt: true,
            audience: None,
            jwks_url: DEFAULT_IAP_JWKS_URL.to_string(),
            jwks_cache_ttl_secs: 3600,
            header_mapping: HashMap::new(),
        }
    }
}

/// Where API keys are loaded from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KeySourceConfig {
    /// `<prefix><USER>=<key>` variables
    Environment {
        /// Variable prefix
        prefix: String,
    },
    /// JSON object or `user=key` lines
    File {
        /// Path to the key file
        path: PathBuf,
    },
}

impl Default for KeySourceConfig {
    fn default() -> Self {
        Self::Environment {
            prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }
}

/// Built-in API key authentication settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuiltinAuthConfig {
    /// Key source
    pub key_source: KeySourceConfig,
}

/// Audit backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditBackendKind {
    /// In-process buffer
    #[default]
    Memory,
    /// NDJSON file
    File,
    /// External SIEM
    Siem,
}

/// SIEM product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiemKind {
    /// Elasticsearch bulk API
    Elasticsearch,
    /// Splunk HTTP Event Collector
    Splunk,
    /// Generic JSON webhook
    Webhook,
}

/// SIEM delivery settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiemSettings {
    /// Product
    pub kind: SiemKind,
    /// Endpoint base URL
    pub url: String,
    /// Elasticsearch index or Splunk index
    #[serde(default)]
    pub index: Option<String>,
    /// Splunk HEC token or webhook bearer token
    #[serde(default)]
    pub token: Option<String>,
    /// Webhook HTTP method
    #[serde(default)]
    pub method: Option<String>,
    /// Extra webhook headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Events per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Periodic flush interval in milliseconds
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Delivery attempts per batch
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval_ms() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    3
}

/// Audit settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Record audit events
    pub enabled: bool,
    /// Backend kind
    pub backend: AuditBackendKind,
    /// File path for the file backend
    pub file_path: Option<PathBuf>,
    /// SIEM settings for the siem backend
    pub siem: Option<SiemSettings>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: AuditBackendKind::Memory,
            file_path: None,
            siem: None,
        }
    }
}

/// Top-level security configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Deployment environment
    pub environment: Environment,
    /// Authentication mode
    pub auth_mode: AuthMode,
    /// Required for delegated and hybrid modes
    pub delegated_auth: Option<DelegatedAuthConfig>,
    /// Required for builtin and hybrid modes
    pub builtin_auth: Option<BuiltinAuthConfig>,
    /// Authorization settings
    pub authorization: AuthorizationConfig,
    /// Audit settings
    pub audit: AuditSettings,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            auth_mode: AuthMode::Builtin,
            delegated_auth: None,
            builtin_auth: Some(BuiltinAuthConfig::default()),
            authorization: AuthorizationConfig::default(),
            audit: AuditSettings::default(),
        }
    }
}

impl SecurityConfig {
    /// Parse and validate YAML or JSON
    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = SafeConfigParser::new(ParserLimits::default()).parse(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = SafeConfigParser::new(ParserLimits::default()).parse_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden from the process environment, validated
    pub fn load_from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden from an arbitrary lookup, validated
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::default().with_env_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AIXGO_ENVIRONMENT` and `AIXGO_AUTH_MODE`, filling in default
    /// sub-configurations the selected mode needs
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_ENVIRONMENT) {
            self.environment = value.parse().map_err(|_| ConfigError::Env {
                var: ENV_ENVIRONMENT,
                value,
            })?;
        }

        if let Some(value) = lookup(ENV_AUTH_MODE) {
            self.auth_mode = value.parse().map_err(|_| ConfigError::Env {
                var: ENV_AUTH_MODE,
                value,
            })?;
        }

        if matches!(self.auth_mode, AuthMode::Delegated | AuthMode::Hybrid)
            && self.delegated_auth.is_none()
        {
            self.delegated_auth = Some(DelegatedAuthConfig::default());
        }
        if matches!(self.auth_mode, AuthMode::Builtin | AuthMode::Hybrid)
            && self.builtin_auth.is_none()
        {
            self.builtin_auth = Some(BuiltinAuthConfig::default());
        }

        Ok(self)
    }

    /// Check cross-field invariants.
    ///
    /// A valid production configuration permanently disables the
    /// unverified-claims development override for this process.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let production = self.environment == Environment::Production;

        if production && self.auth_mode == AuthMode::Disabled {
            return Err(ConfigError::Invalid(
                "auth_mode 'disabled' is not allowed in production".to_string(),
            ));
        }

        let needs_delegated = matches!(self.auth_mode, AuthMode::Delegated | AuthMode::Hybrid);
        let needs_builtin = matches!(self.auth_mode, AuthMode::Builtin | AuthMode::Hybrid);

        if needs_delegated && self.delegated_auth.is_none() {
            return Err(ConfigError::Invalid(format!(
                "auth_mode '{}' requires delegated_auth",
                self.auth_mode
            )));
        }
        if needs_builtin && self.builtin_auth.is_none() {
            return Err(ConfigError::Invalid(format!(
                "auth_mode '{}' requires builtin_auth",
                self.auth_mode
            )));
        }

        if let Some(delegated) = &self.delegated_auth {
            if delegated.identity_header.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "delegated_auth.identity_header must not be empty".to_string(),
                ));
            }
            if delegated.verify_jwt && delegated.assertion_header.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "delegated_auth.assertion_header must not be empty".to_string(),
                ));
            }
            if production && needs_delegated && !delegated.verify_jwt {
                return Err(ConfigError::Invalid(
                    "delegated_auth.verify_jwt must be enabled in production".to_string(),
                ));
            }
        }

        if self.audit.enabled {
            match self.audit.backend {
                AuditBackendKind::Siem if self.audit.siem.is_none() => {
                    return Err(ConfigError::Invalid(
                        "audit.backend 'siem' requires audit.siem".to_string(),
                    ));
                }
                AuditBackendKind::File if self.audit.file_path.is_none() => {
                    return Err(ConfigError::Invalid(
                        "audit.backend 'file' requires audit.file_path".to_string(),
                    ));
                }
                _ => {}
            }
            if let Some(siem) = &self.audit.siem
                && (siem.batch_size == 0 || siem.flush_interval_ms == 0)
            {
                return Err(ConfigError::Invalid(
                    "audit.siem batch_size and flush_interval_ms must be positive".to_string(),
                ));
            }
        }

        if production {
            latch_production();
        }
        Ok(())
    }

    /// Whether unverified identity claims may be accepted when signing
    /// keys cannot be fetched
    pub fn unverified_claims_allowed(&self) -> bool {
        self.unverified_claims_allowed_with(|key| std::env::var(key).ok())
    }

    /// [`Self::unverified_claims_allowed`] with an explicit variable lookup
    pub fn unverified_claims_allowed_with<F>(&self, lookup: F) -> bool
    where
        F: Fn(&str) -> Option<String>,
    {
        let allowed = override_permitted(
            cfg!(feature = "insecure-dev-override"),
            lookup(ENV_JWT_STRICT_VERIFICATION).as_deref(),
            self.environment,
            production_latched(),
        );
        if allowed {
            warn!(
                environment = %self.environment,
                "Unverified identity claims permitted when signing keys are unavailable"
            );
        }
        allowed
    }
}

/// All conditions for the development override must hold at once
fn override_permitted(
    feature_enabled: bool,
    strict_verification: Option<&str>,
    environment: Environment,
    latched: bool,
) -> bool {
    let strict_disabled = strict_verification
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "false" | "0" | "no"))
        .unwrap_or(false);

    feature_enabled && strict_disabled && environment != Environment::Production && !latched
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
