//! Credential authentication
//!
//! [`ApiKeyAuthenticator`] keeps only SHA-256 digests of the configured
//! keys. A presented credential is digested once and compared against every
//! stored digest in constant time; the scan never stops early, so timing
//! does not reveal which entry matched or how many keys exist before it.

use crate::models::Principal;
use crate::storage::{KeyStore, StorageError};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use subtle::{Choice, ConditionallySelectable, ConstantTimeEq};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum AuthenticationError {
    #[error("Missing credential")]
    MissingCredential,

    #[error("Invalid credential")]
    InvalidCredential,

    #[error("Key store error: {0}")]
    Storage(#[from] StorageError),
}

/// Turns a raw credential into a principal
pub trait Authenticator: Send + Sync {
    /// Authenticate a credential
    fn authenticate(&self, credential: &str) -> Result<Principal, AuthenticationError>;
}

struct KeyEntry {
    digest: [u8; 32],
    principal: Principal,
}

/// API key authenticator backed by key digests
#[derive(Default)]
pub struct ApiKeyAuthenticator {
    entries: Vec<KeyEntry>,
}

impl fmt::Debug for ApiKeyAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyAuthenticator")
            .field("keys", &self.entries.len())
            .finish()
    }
}

impl ApiKeyAuthenticator {
    /// Create an authenticator with no keys
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` for `principal`; empty keys are ignored
    pub fn add_key(&mut self, key: &str, principal: Principal) {
        if key.is_empty() {
            return;
        }
        self.entries.push(KeyEntry {
            digest: digest(key),
            principal,
        });
    }

    /// Builder form of [`Self::add_key`]
    pub fn with_key(mut self, key: &str, principal: Principal) -> Self {
        self.add_key(key, principal);
        self
    }

    /// Build from `user -> key` pairs, giving each user the `user` role
    pub fn from_keys(keys: &HashMap<String, String>) -> Self {
        let mut authenticator = Self::new();
        for (user, key) in keys {
            authenticator.add_key(key, api_key_principal(user));
        }
        authenticator
    }

    /// Build from a key store
    pub async fn from_store(store: &dyn KeyStore) -> Result<Self, AuthenticationError> {
        let keys = store.load_keys().await?;
        info!(store = store.name(), count = keys.len(), "API keys loaded");
        Ok(Self::from_keys(&keys))
    }

    /// Number of registered keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no keys are registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Authenticator for ApiKeyAuthenticator {
    fn authenticate(&self, credential: &str) -> Result<Principal, AuthenticationError> {
        if credential.is_empty() {
            return Err(AuthenticationError::MissingCredential);
        }

        let presented = digest(credential);
        let mut found = Choice::from(0);
        let mut index = 0u32;

        for (i, entry) in self.entries.iter().enumerate() {
            let matches = entry.digest[..].ct_eq(&presented[..]);
            let candidate = u32::try_from(i).unwrap_or(u32::MAX);
            index.conditional_assign(&candidate, matches & !found);
            found |= matches;
        }

        if bool::from(found) {
            let entry = usize::try_from(index)
                .ok()
                .and_then(|i| self.entries.get(i))
                .ok_or(AuthenticationError::InvalidCredential)?;
            debug!(principal = %entry.principal.id, "API key accepted");
            Ok(entry.principal.clone())
        } else {
            debug!("API key rejected");
            Err(AuthenticationError::InvalidCredential)
        }
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

fn api_key_principal(user: &str) -> Principal {
    Principal::new(user)
        .with_roles(["user"])
        .with_metadata("auth_method", "api_key")
}
