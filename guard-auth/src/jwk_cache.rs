//! Cached RSA signing keys for identity-token verification
//!
//! The cache holds the issuer's published key set keyed by `kid`. Keys are
//! validated when ingested: only RSA keys of at least 2048 bits with a
//! public exponent of at least 3 are kept. A failed refresh leaves the
//! previous keys in place so verification can continue on stale keys;
//! a cache that has never loaded any key fails closed.

use async_trait::async_trait;
use aixgo_guard_security::{SsrfError, SsrfValidator};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Published key set for Identity-Aware Proxy assertions
pub const DEFAULT_IAP_JWKS_URL: &str = "https://www.gstatic.com/iap/verify/public_key-jwk";

/// Smallest accepted RSA modulus
pub const MIN_RSA_BITS: usize = 2048;

/// Smallest accepted RSA public exponent
pub const MIN_RSA_EXPONENT: u64 = 3;

#[derive(Debug, Error)]
pub enum JwkError {
    #[error("Key set fetch failed: {0}")]
    Fetch(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Key set contained no usable keys")]
    NoUsableKeys,

    #[error("Signing key not found: {0}")]
    KeyNotFound(String),

    #[error("Signing keys unavailable")]
    Unavailable,

    #[error("Key set URL rejected: {0}")]
    Ssrf(#[from] SsrfError),
}

/// JSON Web Key Set document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    /// Keys in the set
    pub keys: Vec<Jwk>,
}

/// Single JSON Web Key; only RSA members are modelled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type
    pub kty: String,
    /// Key id
    #[serde(default)]
    pub kid: Option<String>,
    /// Intended algorithm
    #[serde(default)]
    pub alg: Option<String>,
    /// Intended use
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,
    /// Modulus, base64url
    #[serde(default)]
    pub n: Option<String>,
    /// Exponent, base64url
    #[serde(default)]
    pub e: Option<String>,
}

/// Validated RSA verification key
#[derive(Clone)]
pub struct RsaPublicKey {
    kid: String,
    bits: usize,
    key: DecodingKey,
}

impl RsaPublicKey {
    /// Key id
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Modulus size in bits
    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Key for signature verification
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl fmt::Debug for RsaPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaPublicKey")
            .field("kid", &self.kid)
            .field("bits", &self.bits)
            .finish_non_exhaustive()
    }
}

/// Validate one JWK and turn it into a verification key
pub fn validate_jwk(jwk: &Jwk) -> Result<RsaPublicKey, JwkError> {
    let kid = jwk
        .kid
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| JwkError::InvalidKey("missing kid".to_string()))?;

    if jwk.kty != "RSA" {
        return Err(JwkError::InvalidKey(format!("{kid}: key type {}", jwk.kty)));
    }
    if let Some(alg) = jwk.alg.as_deref()
        && alg != "RS256"
    {
        return Err(JwkError::InvalidKey(format!("{kid}: algorithm {alg}")));
    }
    if let Some(key_use) = jwk.key_use.as_deref()
        && key_use != "sig"
    {
        return Err(JwkError::InvalidKey(format!("{kid}: use {key_use}")));
    }

    let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
        return Err(JwkError::InvalidKey(format!("{kid}: missing modulus or exponent")));
    };
    let n_bytes = decode_component(kid, "modulus", n)?;
    let e_bytes = decode_component(kid, "exponent", e)?;

    let bits = bit_length(&n_bytes);
    if bits < MIN_RSA_BITS {
        return Err(JwkError::InvalidKey(format!(
            "{kid}: {bits}-bit modulus below {MIN_RSA_BITS}"
        )));
    }
    if !exponent_at_least(&e_bytes, MIN_RSA_EXPONENT) {
        return Err(JwkError::InvalidKey(format!(
            "{kid}: exponent below {MIN_RSA_EXPONENT}"
        )));
    }

    let key = DecodingKey::from_rsa_raw_components(&n_bytes, &e_bytes);
    Ok(RsaPublicKey {
        kid: kid.to_string(),
        bits,
        key,
    })
}

fn decode_component(kid: &str, what: &str, value: &str) -> Result<Vec<u8>, JwkError> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| JwkError::InvalidKey(format!("{kid}: {what} is not base64url: {e}")))
}

fn bit_length(bytes: &[u8]) -> usize {
    let trimmed: &[u8] = match bytes.iter().position(|b| *b != 0) {
        Some(start) => &bytes[start..],
        None => return 0,
    };
    let leading = trimmed[0].leading_zeros() as usize;
    trimmed.len() * 8 - leading
}

fn exponent_at_least(bytes: &[u8], min: u64) -> bool {
    let significant: Vec<u8> = bytes.iter().copied().skip_while(|b| *b == 0).collect();
    if significant.len() > 8 {
        return true;
    }
    let value = significant
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
    value >= min
}

/// Source of the published key set
#[async_trait]
pub trait KeySetFetcher: Send + Sync {
    /// Fetch the current key set
    async fn fetch(&self) -> Result<JwkSet, JwkError>;
}

/// Fetches the key set over HTTPS through an SSRF-validated client
#[derive(Debug, Clone)]
pub struct HttpKeySetFetcher {
    client: reqwest::Client,
    url: Url,
}

impl HttpKeySetFetcher {
    /// Validate `url` and build a fetcher for it
    pub async fn new(url: &str, validator: &SsrfValidator) -> Result<Self, JwkError> {
        let url = validator.validate_url(url).await?;
        let client = validator
            .secure_client_builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| JwkError::Fetch(e.to_string()))?;
        Ok(Self { client, url })
    }

    /// Key set URL
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl KeySetFetcher for HttpKeySetFetcher {
    async fn fetch(&self) -> Result<JwkSet, JwkError> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| JwkError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(JwkError::Fetch(format!("HTTP {status}")));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| JwkError::Fetch(e.to_string()))
    }
}

/// Cache timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JwkCacheConfig {
    /// How long a fetched key set is considered fresh
    pub ttl: Duration,
    /// Minimum spacing between fetch attempts
    pub min_refresh_interval: Duration,
}

impl Default for JwkCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            min_refresh_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default)]
struct KeyState {
    keys: HashMap<String, Arc<RsaPublicKey>>,
    fetched_at: Option<Instant>,
    last_attempt: Option<Instant>,
    attempts: u64,
}

/// Key cache shared by token verifiers
pub struct JwkCache {
    fetcher: Arc<dyn KeySetFetcher>,
    config: JwkCacheConfig,
    state: RwLock<KeyState>,
    refresh_lock: Mutex<()>,
}

impl fmt::Debug for JwkCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwkCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JwkCache {
    /// Create an empty cache; keys are fetched on first use
    pub fn new(fetcher: Arc<dyn KeySetFetcher>, config: JwkCacheConfig) -> Self {
        Self {
            fetcher,
            config,
            state: RwLock::new(KeyState::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Cache timing
    pub fn config(&self) -> &JwkCacheConfig {
        &self.config
    }

    /// Ids of the cached keys, sorted
    pub async fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.read().await.keys.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether any key has ever been loaded
    pub async fn is_populated(&self) -> bool {
        !self.state.read().await.keys.is_empty()
    }

    /// Look up a key, refreshing when the set is stale or the id is unknown.
    ///
    /// Concurrent lookups share one fetch: callers that queued behind an
    /// attempt use its outcome instead of fetching again.
    pub async fn get_key(&self, kid: &str) -> Result<Arc<RsaPublicKey>, JwkError> {
        let observed = {
            let state = self.state.read().await;
            if let Some(key) = self.fresh_key(&state, kid) {
                return Ok(key);
            }
            state.attempts
        };

        let _guard = self.refresh_lock.lock().await;
        let should_fetch = {
            let state = self.state.read().await;
            if let Some(key) = self.fresh_key(&state, kid) {
                return Ok(key);
            }
            state.attempts == observed && self.may_attempt(&state)
        };

        if should_fetch && let Err(e) = self.fetch_and_swap().await {
            if self.is_populated().await {
                warn!(error = %e, "Key set refresh failed, serving cached keys");
            } else {
                return Err(e);
            }
        }

        let state = self.state.read().await;
        if state.keys.is_empty() {
            return Err(JwkError::Unavailable);
        }
        state
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| JwkError::KeyNotFound(kid.to_string()))
    }

    /// Fetch the key set and swap it in, returning the number of usable keys.
    ///
    /// Invalid keys are skipped. A set with no usable keys is rejected and
    /// the previous keys are kept.
    pub async fn refresh(&self) -> Result<usize, JwkError> {
        let _guard = self.refresh_lock.lock().await;
        self.fetch_and_swap().await
    }

    /// Caller holds `refresh_lock`
    async fn fetch_and_swap(&self) -> Result<usize, JwkError> {
        let fetched = self.fetcher.fetch().await.and_then(|set| {
            let mut keys = HashMap::new();
            for jwk in &set.keys {
                match validate_jwk(jwk) {
                    Ok(key) => {
                        keys.insert(key.kid.clone(), Arc::new(key));
                    }
                    Err(e) => warn!(error = %e, "Rejected key from key set"),
                }
            }
            if keys.is_empty() {
                Err(JwkError::NoUsableKeys)
            } else {
                Ok(keys)
            }
        });

        let mut state = self.state.write().await;
        let now = Instant::now();
        state.last_attempt = Some(now);
        state.attempts += 1;
        let keys = fetched?;

        let count = keys.len();
        state.keys = keys;
        state.fetched_at = Some(now);
        info!(keys = count, "Key set refreshed");
        Ok(count)
    }

    /// Refresh in the background every TTL until `cancel` fires
    pub fn spawn_refresh_task(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Key set refresh task stopped");
                        break;
                    }
                    _ = tokio::time::sleep(cache.config.ttl) => {
                        if let Err(e) = cache.refresh().await {
                            warn!(error = %e, "Background key set refresh failed");
                        }
                    }
                }
            }
        })
    }

    fn fresh_key(&self, state: &KeyState, kid: &str) -> Option<Arc<RsaPublicKey>> {
        let fresh = state
            .fetched_at
            .is_some_and(|at| at.elapsed() < self.config.ttl);
        if fresh {
            state.keys.get(kid).cloned()
        } else {
            None
        }
    }

    fn may_attempt(&self, state: &KeyState) -> bool {
        state
            .last_attempt
            .is_none_or(|at| at.elapsed() >= self.config.min_refresh_interval)
    }
}

#[cfg(test)]
#[path = "jwk_cache_tests.rs"]
mod jwk_cache_tests;
