//! Authentication disabled: every request is the anonymous reader

use super::{AUTH_MODE_METADATA_KEY, AuthExtractionError, AuthExtractor, AuthRequest};
use crate::config::AuthMode;
use crate::models::{Permission, Principal};
use async_trait::async_trait;

/// Identifier of the anonymous principal
pub const ANONYMOUS_ID: &str = "anonymous";

/// Yields a fixed anonymous principal holding only `read`
#[derive(Debug, Clone, Default)]
pub struct DisabledExtractor;

impl DisabledExtractor {
    /// Create the extractor
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuthExtractor for DisabledExtractor {
    async fn extract_auth(&self, _request: &AuthRequest) -> Result<Principal, AuthExtractionError> {
        Ok(Principal::new(ANONYMOUS_ID)
            .with_name("Anonymous")
            .with_permission(Permission::Read)
            .with_metadata(AUTH_MODE_METADATA_KEY, AuthMode::Disabled.as_str()))
    }

    fn mode(&self) -> AuthMode {
        AuthMode::Disabled
    }
}
