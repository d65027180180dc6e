//! Delegated identity with API key fallback

use super::{
    AUTH_MODE_METADATA_KEY, AuthExtractionError, AuthExtractor, AuthRequest, BuiltinExtractor,
    DelegatedExtractor,
};
use crate::config::AuthMode;
use crate::models::Principal;
use async_trait::async_trait;
use tracing::debug;

/// Tries delegated authentication first and falls back to API keys.
///
/// The resulting principal's `auth_mode` metadata names the strategy that
/// succeeded. When both fail, the error from a strategy whose credentials
/// were actually presented is preferred over a plain "missing" error.
#[derive(Debug, Clone)]
pub struct HybridExtractor {
    delegated: DelegatedExtractor,
    builtin: BuiltinExtractor,
}

impl HybridExtractor {
    /// Combine the two strategies
    pub fn new(delegated: DelegatedExtractor, builtin: BuiltinExtractor) -> Self {
        Self { delegated, builtin }
    }
}

#[async_trait]
impl AuthExtractor for HybridExtractor {
    async fn extract_auth(&self, request: &AuthRequest) -> Result<Principal, AuthExtractionError> {
        let delegated_err = match self.delegated.extract_auth(request).await {
            Ok(principal) => return Ok(principal),
            Err(e) => e,
        };
        debug!(error = %delegated_err, "Delegated authentication failed, trying API key");

        match self.builtin.extract_auth(request).await {
            Ok(principal) => {
                Ok(principal.with_metadata(AUTH_MODE_METADATA_KEY, AuthMode::Builtin.as_str()))
            }
            Err(AuthExtractionError::MissingCredentials(_))
                if !matches!(delegated_err, AuthExtractionError::MissingCredentials(_)) =>
            {
                Err(delegated_err)
            }
            Err(e) => Err(e),
        }
    }

    fn mode(&self) -> AuthMode {
        AuthMode::Hybrid
    }
}
