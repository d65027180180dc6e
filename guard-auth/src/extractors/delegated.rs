//! Identity asserted by a fronting proxy
//!
//! The proxy places the user's address in an identity header, formatted
//! either as `issuer:email` or as a bare address, and optionally a signed
//! assertion that is verified against the issuer's published keys.
//! Additional headers may be mapped onto the principal's name, roles or
//! metadata.

use super::{AUTH_MODE_METADATA_KEY, AuthExtractionError, AuthExtractor, AuthRequest};
use crate::config::{AuthMode, DelegatedAuthConfig};
use crate::jwt::JwtVerifier;
use crate::models::Principal;
use crate::roles::{parse_role_list, sanitize_roles};
use aixgo_guard_security::validation::default_sanitizer;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Mapping target that sets the display name
pub const FIELD_NAME: &str = "name";

/// Mapping target that sets the roles
pub const FIELD_ROLES: &str = "roles";

/// Metadata key holding the identity issuer
pub const ISSUER_METADATA_KEY: &str = "issuer";

const MAX_EMAIL_LEN: usize = 254;
const MAX_MAPPED_VALUE_LEN: usize = 256;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9\-]*[A-Za-z0-9])?)+$")
        .expect("valid email regex")
});

/// Split an identity header value into `(issuer, email)`.
///
/// `accounts.google.com:alice@example.com` splits at the first colon;
/// a value without a colon is a bare address.
pub fn parse_identity(value: &str) -> (Option<&str>, &str) {
    let value = value.trim();
    match value.split_once(':') {
        Some((issuer, email)) => (Some(issuer.trim()), email.trim()),
        None => (None, value),
    }
}

/// Whether `email` is a plausible mailbox address
pub fn is_valid_email(email: &str) -> bool {
    email.len() <= MAX_EMAIL_LEN && EMAIL_PATTERN.is_match(email)
}

/// Authenticates identities asserted by a fronting proxy
#[derive(Debug, Clone)]
pub struct DelegatedExtractor {
    config: DelegatedAuthConfig,
    verifier: Option<JwtVerifier>,
}

impl DelegatedExtractor {
    /// Create the extractor; a verifier is required when `verify_jwt` is set
    pub fn new(
        config: DelegatedAuthConfig,
        verifier: Option<JwtVerifier>,
    ) -> Result<Self, AuthExtractionError> {
        if config.verify_jwt && verifier.is_none() {
            return Err(AuthExtractionError::Configuration(
                "verify_jwt is enabled but no token verifier was provided".to_string(),
            ));
        }
        if config.identity_header.trim().is_empty() {
            return Err(AuthExtractionError::Configuration(
                "identity_header must not be empty".to_string(),
            ));
        }
        Ok(Self { config, verifier })
    }

    /// Extractor settings
    pub fn config(&self) -> &DelegatedAuthConfig {
        &self.config
    }

    /// Resolve `(email, issuer)` for the request
    async fn resolve_identity(
        &self,
        request: &AuthRequest,
    ) -> Result<(String, Option<String>), AuthExtractionError> {
        let identity = request.header(&self.config.identity_header).ok_or_else(|| {
            AuthExtractionError::MissingCredentials(format!(
                "{} header",
                self.config.identity_header
            ))
        })?;
        let (issuer, header_email) = parse_identity(identity);

        if !self.config.verify_jwt {
            return Ok((header_email.to_string(), issuer.map(str::to_string)));
        }

        let assertion = request.header(&self.config.assertion_header).ok_or_else(|| {
            AuthExtractionError::MissingCredentials(format!(
                "{} header",
                self.config.assertion_header
            ))
        })?;
        let verifier = self.verifier.as_ref().ok_or_else(|| {
            AuthExtractionError::Configuration("no token verifier".to_string())
        })?;

        let claims = verifier.verify(assertion.trim()).await?;
        if !claims.email.eq_ignore_ascii_case(header_email) {
            debug!("Identity header differs from verified assertion; using assertion");
        }
        Ok((claims.email, Some(claims.iss)))
    }

    fn apply_mapping(&self, mut principal: Principal, request: &AuthRequest) -> Principal {
        let mut roles: Option<Vec<String>> = None;

        // Sorted so that repeated targets resolve the same way every time
        let mut mapping: Vec<_> = self.config.header_mapping.iter().collect();
        mapping.sort();

        for (header, field) in mapping {
            let Some(value) = request.header(header) else {
                continue;
            };
            match field.as_str() {
                FIELD_ROLES => {
                    roles = Some(parse_role_list(value));
                }
                FIELD_NAME => {
                    principal.name = clean_mapped_value(value);
                }
                key => {
                    if key == AUTH_MODE_METADATA_KEY || key == ISSUER_METADATA_KEY {
                        warn!(
                            header = %header,
                            field = key,
                            "Header mapping cannot override a reserved field"
                        );
                        continue;
                    }
                    principal
                        .metadata
                        .insert(key.to_string(), clean_mapped_value(value));
                }
            }
        }

        let roles = roles.unwrap_or_else(|| sanitize_roles(std::iter::empty::<&str>()));
        principal.with_roles(roles)
    }
}

fn clean_mapped_value(value: &str) -> String {
    let cleaned = default_sanitizer().sanitize_string(value.trim());
    cleaned.chars().take(MAX_MAPPED_VALUE_LEN).collect()
}

#[async_trait]
impl AuthExtractor for DelegatedExtractor {
    async fn extract_auth(&self, request: &AuthRequest) -> Result<Principal, AuthExtractionError> {
        let (email, issuer) = self.resolve_identity(request).await?;
        if !is_valid_email(&email) {
            return Err(AuthExtractionError::InvalidCredentials(
                "identity is not a valid email address".to_string(),
            ));
        }

        let mut principal = Principal::new(email.to_ascii_lowercase())
            .with_name(email)
            .with_metadata(AUTH_MODE_METADATA_KEY, AuthMode::Delegated.as_str());
        if let Some(issuer) = issuer.filter(|i| !i.is_empty()) {
            principal = principal.with_metadata(ISSUER_METADATA_KEY, clean_mapped_value(&issuer));
        }
        Ok(self.apply_mapping(principal, request))
    }

    fn mode(&self) -> AuthMode {
        AuthMode::Delegated
    }
}

#[cfg(test)]
#[path = "delegated_tests.rs"]
mod delegated_tests;
