//! Tests for token-bucket rate limiting

#[cfg(test)]
mod tests {
    use super::super::*;
    use assert_matches::assert_matches;

    fn client_only(rate: f64, burst: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            global: None,
            per_client: Some(BucketConfig::new(rate, burst)),
            per_tool: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill() {
        let limiter = client_only(1.0, 3);

        for _ in 0..3 {
            assert!(limiter.allow_client("alice"));
        }
        assert!(!limiter.allow_client("alice"));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(limiter.allow_client("alice"));
        assert!(!limiter.allow_client("alice"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped_at_burst() {
        let limiter = client_only(10.0, 2);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.allow_client("bob"));
        assert!(limiter.allow_client("bob"));
        assert!(!limiter.allow_client("bob"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clients_are_independent() {
        let limiter = client_only(1.0, 1);

        assert!(limiter.allow_client("alice"));
        assert!(!limiter.allow_client("alice"));
        assert!(limiter.allow_client("bob"));
        assert_eq!(limiter.client_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_and_tool_scopes() {
        let limiter = RateLimiter::new(RateLimitConfig {
            global: Some(BucketConfig::new(1.0, 2)),
            per_client: None,
            per_tool: Some(BucketConfig::new(1.0, 1)),
        });

        assert!(limiter.allow_tool("search"));
        assert!(!limiter.allow_tool("search"));
        assert!(limiter.allow_tool("fetch"));
        assert_eq!(limiter.tool_count(), 2);

        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_scopes_always_allow() {
        let limiter = RateLimiter::new(RateLimitConfig {
            global: None,
            per_client: None,
            per_tool: None,
        });

        for _ in 0..1000 {
            assert!(limiter.allow());
            assert!(limiter.allow_request("c", "t").is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_allow_request_refunds_on_denial() {
        let limiter = RateLimiter::new(RateLimitConfig {
            global: Some(BucketConfig::new(1.0, 2)),
            per_client: Some(BucketConfig::new(1.0, 1)),
            per_tool: None,
        });

        assert!(limiter.allow_request("alice", "search").is_ok());
        assert_matches!(
            limiter.allow_request("alice", "search"),
            Err(RateLimitError::Exceeded { scope, .. }) if scope == "client:alice"
        );

        // The denied request must not have consumed the remaining global token
        assert!(limiter.allow_request("bob", "search").is_ok());
        assert_matches!(
            limiter.allow_request("carol", "search"),
            Err(RateLimitError::Exceeded { scope, .. }) if scope == "global"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_reports_refill_time() {
        let limiter = client_only(2.0, 1);
        assert!(limiter.allow_request("alice", "t").is_ok());

        let err = limiter.allow_request("alice", "t").unwrap_err();
        assert_matches!(
            err,
            RateLimitError::Exceeded { retry_after, .. }
                if retry_after == Duration::from_millis(500)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_blocks_until_token_available() {
        let limiter = client_only(1.0, 1);
        let cancel = CancellationToken::new();
        assert!(limiter.allow_client("alice"));

        let start = Instant::now();
        limiter
            .wait(LimitScope::Client("alice"), &cancel)
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_observes_cancellation() {
        let limiter = client_only(0.0, 1);
        let cancel = CancellationToken::new();
        assert!(limiter.allow_client("alice"));

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        assert_matches!(
            limiter.wait(LimitScope::Client("alice"), &cancel).await,
            Err(RateLimitError::Cancelled)
        );
    }

    #[test]
    fn test_config_serde_defaults() {
        let config: RateLimitConfig =
            serde_json::from_str(r#"{"per_tool": {"rate_per_second": 5.0, "burst": 10}}"#)
                .unwrap();

        assert_eq!(config.per_tool, Some(BucketConfig::new(5.0, 10)));
        assert_eq!(config.global, RateLimitConfig::default().global);
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(LimitScope::Global.to_string(), "global");
        assert_eq!(LimitScope::Client("a").to_string(), "client:a");
        assert_eq!(LimitScope::Tool("t").to_string(), "tool:t");
    }
}
