//! Token-bucket rate limiting
//!
//! Buckets exist at three independent scopes: one global bucket, one per
//! client id and one per tool name. Keyed buckets are created lazily on
//! first use. The key map takes its write lock only to insert a new key;
//! every bucket has its own mutex so unrelated keys never contend.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Rate limiting errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded for {scope}; retry after {retry_after:?}")]
    Exceeded { scope: String, retry_after: Duration },

    #[error("Wait for rate limit token cancelled")]
    Cancelled,
}

/// Rate and burst for one bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Tokens added per second
    pub rate_per_second: f64,
    /// Bucket capacity; a fresh bucket starts full
    pub burst: u32,
}

impl BucketConfig {
    /// Create a bucket configuration
    pub fn new(rate_per_second: f64, burst: u32) -> Self {
        Self {
            rate_per_second,
            burst,
        }
    }
}

/// Rate limiter configuration; `None` disables a scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Bucket shared by every request
    pub global: Option<BucketConfig>,
    /// One bucket per client id
    pub per_client: Option<BucketConfig>,
    /// One bucket per tool name
    pub per_tool: Option<BucketConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global: Some(BucketConfig::new(100.0, 200)),
            per_client: Some(BucketConfig::new(10.0, 20)),
            per_tool: None,
        }
    }
}

/// Which bucket a check applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitScope<'a> {
    Global,
    Client(&'a str),
    Tool(&'a str),
}

impl fmt::Display for LimitScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Client(id) => write!(f, "client:{id}"),
            Self::Tool(name) => write!(f, "tool:{name}"),
        }
    }
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(config: BucketConfig) -> Self {
        let capacity = f64::from(config.burst);
        Self {
            capacity,
            rate: config.rate_per_second.max(0.0),
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available
    fn try_acquire(&mut self) -> Result<(), Duration> {
        self.refill(Instant::now());

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }

        if self.rate <= 0.0 || self.capacity < 1.0 {
            return Err(Duration::MAX);
        }
        let wait = (1.0 - self.tokens) / self.rate;
        Err(Duration::try_from_secs_f64(wait).unwrap_or(Duration::MAX))
    }

    fn refund(&mut self) {
        self.tokens = (self.tokens + 1.0).min(self.capacity);
    }
}

/// Lazily populated map of per-key buckets
#[derive(Debug)]
struct KeyedBuckets {
    config: BucketConfig,
    buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
}

impl KeyedBuckets {
    fn new(config: BucketConfig) -> Self {
        Self {
            config,
            buckets: RwLock::new(HashMap::new()),
        }
    }

    fn bucket(&self, key: &str) -> Arc<Mutex<TokenBucket>> {
        if let Some(bucket) = self
            .buckets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
        {
            return Arc::clone(bucket);
        }

        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            buckets
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(TokenBucket::new(self.config)))),
        )
    }

    fn try_acquire(&self, key: &str) -> Result<(), Duration> {
        let bucket = self.bucket(key);
        let mut bucket = bucket.lock().unwrap_or_else(|e| e.into_inner());
        bucket.try_acquire()
    }

    fn refund(&self, key: &str) {
        let bucket = self.bucket(key);
        bucket.lock().unwrap_or_else(|e| e.into_inner()).refund();
    }

    fn len(&self) -> usize {
        self.buckets.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Token-bucket rate limiter with global, per-client and per-tool scopes
#[derive(Debug)]
pub struct RateLimiter {
    global: Option<Mutex<TokenBucket>>,
    clients: Option<KeyedBuckets>,
    tools: Option<KeyedBuckets>,
}

impl RateLimiter {
    /// Create a rate limiter
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            global: config.global.map(|c| Mutex::new(TokenBucket::new(c))),
            clients: config.per_client.map(KeyedBuckets::new),
            tools: config.per_tool.map(KeyedBuckets::new),
        }
    }

    /// Non-blocking check of the global bucket
    pub fn allow(&self) -> bool {
        self.try_scope(LimitScope::Global).is_ok()
    }

    /// Non-blocking check of a client's bucket
    pub fn allow_client(&self, client_id: &str) -> bool {
        self.try_scope(LimitScope::Client(client_id)).is_ok()
    }

    /// Non-blocking check of a tool's bucket
    pub fn allow_tool(&self, tool: &str) -> bool {
        self.try_scope(LimitScope::Tool(tool)).is_ok()
    }

    /// Check global, client and tool buckets together.
    ///
    /// Tokens taken from earlier scopes are returned when a later scope
    /// denies, so a rejected request costs nothing.
    pub fn allow_request(&self, client_id: &str, tool: &str) -> Result<(), RateLimitError> {
        let scopes = [
            LimitScope::Global,
            LimitScope::Client(client_id),
            LimitScope::Tool(tool),
        ];

        for (index, scope) in scopes.iter().enumerate() {
            if let Err(retry_after) = self.try_scope(*scope) {
                for taken in &scopes[..index] {
                    self.refund(*taken);
                }
                debug!(scope = %scope, ?retry_after, "Rate limit exceeded");
                return Err(RateLimitError::Exceeded {
                    scope: scope.to_string(),
                    retry_after,
                });
            }
        }

        Ok(())
    }

    /// Wait until a token is available in `scope` or `cancel` fires
    pub async fn wait(
        &self,
        scope: LimitScope<'_>,
        cancel: &CancellationToken,
    ) -> Result<(), RateLimitError> {
        loop {
            let delay = match self.try_scope(scope) {
                Ok(()) => return Ok(()),
                Err(delay) => delay,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RateLimitError::Cancelled),
                _ = sleep_for(delay) => {}
            }
        }
    }

    /// Number of per-client buckets created so far
    pub fn client_count(&self) -> usize {
        self.clients.as_ref().map_or(0, KeyedBuckets::len)
    }

    /// Number of per-tool buckets created so far
    pub fn tool_count(&self) -> usize {
        self.tools.as_ref().map_or(0, KeyedBuckets::len)
    }

    fn try_scope(&self, scope: LimitScope<'_>) -> Result<(), Duration> {
        match scope {
            LimitScope::Global => match &self.global {
                Some(bucket) => bucket.lock().unwrap_or_else(|e| e.into_inner()).try_acquire(),
                None => Ok(()),
            },
            LimitScope::Client(id) => match &self.clients {
                Some(buckets) => buckets.try_acquire(id),
                None => Ok(()),
            },
            LimitScope::Tool(name) => match &self.tools {
                Some(buckets) => buckets.try_acquire(name),
                None => Ok(()),
            },
        }
    }

    fn refund(&self, scope: LimitScope<'_>) {
        match scope {
            LimitScope::Global => {
                if let Some(bucket) = &self.global {
                    bucket.lock().unwrap_or_else(|e| e.into_inner()).refund();
                }
            }
            LimitScope::Client(id) => {
                if let Some(buckets) = &self.clients {
                    buckets.refund(id);
                }
            }
            LimitScope::Tool(name) => {
                if let Some(buckets) = &self.tools {
                    buckets.refund(name);
                }
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Sleep for `delay`, treating an unbounded delay as "until cancelled"
async fn sleep_for(delay: Duration) {
    match Instant::now().checked_add(delay) {
        Some(deadline) if delay != Duration::MAX => tokio::time::sleep_until(deadline).await,
        _ => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod rate_limit_tests;
