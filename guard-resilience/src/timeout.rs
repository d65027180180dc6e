//! Per-operation deadlines with cooperative cancellation
//!
//! Every operation gets an [`OperationContext`] carrying a deadline and a
//! child of the caller's [`CancellationToken`]. Cancelling the parent
//! cancels every context derived from it; cancelling a context never
//! affects its parent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Timeout errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeoutError {
    #[error("Operation '{operation}' timed out after {timeout:?}")]
    Elapsed {
        operation: String,
        timeout: Duration,
    },

    #[error("Operation '{operation}' was cancelled")]
    Cancelled { operation: String },
}

/// Timeout configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Timeout for operations without an override
    pub default_timeout_ms: u64,
    /// Per-tool overrides keyed by tool name
    pub tool_timeouts_ms: HashMap<String, u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            tool_timeouts_ms: HashMap::new(),
        }
    }
}

impl TimeoutConfig {
    /// Set the default timeout
    pub fn with_default(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = duration_to_millis(timeout);
        self
    }

    /// Override the timeout for one tool
    pub fn with_tool_timeout(mut self, tool: impl Into<String>, timeout: Duration) -> Self {
        self.tool_timeouts_ms
            .insert(tool.into(), duration_to_millis(timeout));
        self
    }
}

/// Hands out operation contexts using configured timeouts
#[derive(Debug, Clone, Default)]
pub struct TimeoutManager {
    config: TimeoutConfig,
}

impl TimeoutManager {
    /// Create a timeout manager
    pub fn new(config: TimeoutConfig) -> Self {
        Self { config }
    }

    /// Timeout that applies to `operation`
    pub fn timeout_for(&self, operation: &str) -> Duration {
        let millis = self
            .config
            .tool_timeouts_ms
            .get(operation)
            .copied()
            .unwrap_or(self.config.default_timeout_ms);
        Duration::from_millis(millis)
    }

    /// Derive a context for `operation` from `parent`
    pub fn context(&self, operation: &str, parent: &CancellationToken) -> OperationContext {
        OperationContext::new(operation, self.timeout_for(operation), parent)
    }

    /// Run `future` under the timeout configured for `operation`
    pub async fn run<F, T>(
        &self,
        operation: &str,
        parent: &CancellationToken,
        future: F,
    ) -> Result<T, TimeoutError>
    where
        F: Future<Output = T>,
    {
        self.context(operation, parent).run(future).await
    }
}

/// Deadline and cancellation scope for one operation
#[derive(Debug, Clone)]
pub struct OperationContext {
    operation: String,
    timeout: Duration,
    deadline: Instant,
    token: CancellationToken,
}

impl OperationContext {
    /// Create a context that expires `timeout` from now
    pub fn new(operation: &str, timeout: Duration, parent: &CancellationToken) -> Self {
        let now = Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or(now + Duration::from_secs(86_400 * 365));
        Self {
            operation: operation.to_string(),
            timeout,
            deadline,
            token: parent.child_token(),
        }
    }

    /// Operation name
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Absolute deadline
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Cancellation token scoped to this operation
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Whether the deadline passed or the context was cancelled
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || Instant::now() >= self.deadline
    }

    /// Cancel this operation and anything derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Resolve once the deadline passes or the context is cancelled
    pub async fn done(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = tokio::time::sleep_until(self.deadline) => {}
        }
    }

    /// Run `future`, abandoning it on deadline or cancellation
    pub async fn run<F, T>(&self, future: F) -> Result<T, TimeoutError>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                debug!(operation = %self.operation, "Operation cancelled");
                Err(TimeoutError::Cancelled {
                    operation: self.operation.clone(),
                })
            }
            result = tokio::time::timeout_at(self.deadline, future) => match result {
                Ok(value) => Ok(value),
                Err(_) => {
                    warn!(
                        operation = %self.operation,
                        timeout_ms = duration_to_millis(self.timeout),
                        "Operation timed out"
                    );
                    self.token.cancel();
                    Err(TimeoutError::Elapsed {
                        operation: self.operation.clone(),
                        timeout: self.timeout,
                    })
                }
            },
        }
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn manager() -> TimeoutManager {
        TimeoutManager::new(
            TimeoutConfig::default()
                .with_default(Duration::from_secs(5))
                .with_tool_timeout("slow_report", Duration::from_secs(60)),
        )
    }

    #[test]
    fn test_timeout_for_uses_override() {
        let manager = manager();
        assert_eq!(manager.timeout_for("slow_report"), Duration::from_secs(60));
        assert_eq!(manager.timeout_for("search"), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_completes_within_deadline() {
        let parent = CancellationToken::new();
        let result = manager()
            .run("search", &parent, async {
                tokio::time::sleep(Duration::from_secs(4)).await;
                42
            })
            .await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out() {
        let parent = CancellationToken::new();
        let ctx = manager().context("search", &parent);

        let result = ctx.run(tokio::time::sleep(Duration::from_secs(6))).await;
        assert_matches!(
            result,
            Err(TimeoutError::Elapsed { operation, timeout })
                if operation == "search" && timeout == Duration::from_secs(5)
        );
        assert!(ctx.is_done());
        assert!(ctx.token().is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_propagates() {
        let parent = CancellationToken::new();
        let ctx = manager().context("search", &parent);

        let canceller = parent.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let result = ctx.run(std::future::pending::<()>()).await;
        assert_matches!(result, Err(TimeoutError::Cancelled { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_cancel_leaves_parent() {
        let parent = CancellationToken::new();
        let ctx = manager().context("search", &parent);

        ctx.cancel();
        assert!(ctx.is_done());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_and_done() {
        let parent = CancellationToken::new();
        let ctx = manager().context("search", &parent);
        assert_eq!(ctx.remaining(), Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(ctx.remaining(), Duration::from_secs(3));
        assert!(!ctx.is_done());

        ctx.done().await;
        assert_eq!(ctx.remaining(), Duration::ZERO);
        assert!(ctx.is_done());
    }

    #[test]
    fn test_config_deserializes_overrides() {
        let config: TimeoutConfig =
            serde_json::from_str(r#"{"tool_timeouts_ms": {"export": 120000}}"#).unwrap();
        assert_eq!(config.default_timeout_ms, 30_000);
        assert_eq!(
            TimeoutManager::new(config).timeout_for("export"),
            Duration::from_secs(120)
        );
    }
}
