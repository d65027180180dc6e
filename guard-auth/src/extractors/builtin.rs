//! Bearer API key authentication

use super::{AUTH_MODE_METADATA_KEY, AuthExtractionError, AuthExtractor, AuthRequest};
use crate::authenticator::Authenticator;
use crate::config::AuthMode;
use crate::models::Principal;
use async_trait::async_trait;
use std::sync::Arc;

/// Authenticates `Authorization: Bearer <api-key>`
#[derive(Clone)]
pub struct BuiltinExtractor {
    authenticator: Arc<dyn Authenticator>,
}

impl std::fmt::Debug for BuiltinExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinExtractor").finish_non_exhaustive()
    }
}

impl BuiltinExtractor {
    /// Create the extractor
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

/// Extract the token from a bearer authorization value
pub fn bearer_token(value: &str) -> Result<&str, AuthExtractionError> {
    let value = value.trim();
    let (scheme, token) = value.split_once(' ').ok_or_else(|| {
        AuthExtractionError::InvalidCredentials("expected bearer credentials".to_string())
    })?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthExtractionError::InvalidCredentials(
            "unsupported authorization scheme".to_string(),
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthExtractionError::MissingCredentials(
            "empty bearer token".to_string(),
        ));
    }
    Ok(token)
}

#[async_trait]
impl AuthExtractor for BuiltinExtractor {
    async fn extract_auth(&self, request: &AuthRequest) -> Result<Principal, AuthExtractionError> {
        let header = request.header("authorization").ok_or_else(|| {
            AuthExtractionError::MissingCredentials("authorization header".to_string())
        })?;
        let token = bearer_token(header)?;

        let principal = self.authenticator.authenticate(token)?;
        Ok(principal.with_metadata(AUTH_MODE_METADATA_KEY, AuthMode::Builtin.as_str()))
    }

    fn mode(&self) -> AuthMode {
        AuthMode::Builtin
    }
}
