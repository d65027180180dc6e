//! Rate limiting, circuit breaking and deadlines around tool calls

use crate::gateway::{GatewayError, GatewaySettings};
use crate::test_utils::*;
use aixgo_guard_audit::AuditResult;
use aixgo_guard_auth::Permission;
use aixgo_guard_resilience::{
    BucketConfig, CircuitBreakerConfig, CircuitState, RateLimitConfig, RateLimitError,
    TimeoutConfig,
};
use assert_matches::assert_matches;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_per_client_rate_limit() {
    let settings = GatewaySettings {
        rate_limit: RateLimitConfig {
            global: None,
            per_client: Some(BucketConfig::new(1.0, 2)),
            per_tool: None,
        },
        ..Default::default()
    };
    let (gateway, memory) = api_key_gateway(settings);
    let alice = bearer(USER_KEY);

    for _ in 0..2 {
        gateway
            .call_tool(&alice, "search", Permission::Execute, json!({}), echo)
            .await
            .unwrap();
    }
    let err = gateway
        .call_tool(&alice, "search", Permission::Execute, json!({}), echo)
        .await
        .unwrap_err();
    assert_matches!(err, GatewayError::RateLimited(RateLimitError::Exceeded { .. }));
    assert_eq!(err.public_message(), "rate limited");

    // Other clients have their own bucket
    gateway
        .call_tool(&bearer(ADMIN_KEY), "search", Permission::Execute, json!({}), echo)
        .await
        .unwrap();

    let throttled = events_of(&memory, "rate_limit");
    assert_eq!(throttled.len(), 1);
    assert_eq!(throttled[0].metadata["limit_key"], json!("alice"));
    assert_eq!(throttled[0].result, AuditResult::Denied);

    tokio::time::advance(Duration::from_secs(1)).await;
    gateway
        .call_tool(&alice, "search", Permission::Execute, json!({}), echo)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_breaker_isolates_failing_tool() {
    let settings = GatewaySettings {
        breaker: CircuitBreakerConfig::new(2, Duration::from_secs(10)),
        ..Default::default()
    };
    let (gateway, memory) = api_key_gateway(settings);
    let request = bearer(USER_KEY);
    let invocations = AtomicU32::new(0);
    let healthy = std::sync::atomic::AtomicBool::new(false);

    let flaky = |_: Value| {
        invocations.fetch_add(1, Ordering::SeqCst);
        let ok = healthy.load(Ordering::SeqCst);
        async move {
            if ok {
                Ok(json!("pong"))
            } else {
                Err("backend unavailable".to_string())
            }
        }
    };

    for _ in 0..2 {
        let err = gateway
            .call_tool(&request, "ping", Permission::Execute, json!({}), flaky)
            .await
            .unwrap_err();
        assert_matches!(err, GatewayError::Tool(_));
    }
    assert_eq!(gateway.breaker().state(), CircuitState::Open);

    let err = gateway
        .call_tool(&request, "ping", Permission::Execute, json!({}), flaky)
        .await
        .unwrap_err();
    assert_matches!(err, GatewayError::Unavailable(_));
    assert_eq!(err.public_message(), "service unavailable");
    assert_eq!(invocations.load(Ordering::SeqCst), 2);

    let tool_events = events_of(&memory, "tool_execution");
    assert_eq!(tool_events.len(), 3);
    assert_eq!(tool_events[2].result, AuditResult::Denied);
    assert_eq!(tool_events[2].metadata["circuit"], json!("tools"));

    tokio::time::advance(Duration::from_secs(10)).await;
    healthy.store(true, Ordering::SeqCst);
    let value = gateway
        .call_tool(&request, "ping", Permission::Execute, json!({}), flaky)
        .await
        .unwrap();
    assert_eq!(value, json!("pong"));
    assert_eq!(gateway.breaker().state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_slow_tool_times_out() {
    let settings = GatewaySettings {
        timeouts: TimeoutConfig::default().with_tool_timeout("slow", Duration::from_millis(100)),
        ..Default::default()
    };
    let (gateway, memory) = api_key_gateway(settings);

    let err = gateway
        .call_tool(&bearer(USER_KEY), "slow", Permission::Execute, json!({}), |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!("late"))
        })
        .await
        .unwrap_err();

    assert_matches!(&err, GatewayError::Tool(msg) if msg.contains("timed out"));
    let tool = &events_of(&memory, "tool_execution")[0];
    assert_eq!(tool.result, AuditResult::Failure);
    assert!(tool.duration_ns.unwrap() >= 100_000_000);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_in_flight_calls() {
    let (gateway, _memory) = api_key_gateway(GatewaySettings::default());
    let request = bearer(USER_KEY);

    let call = gateway.call_tool(&request, "long", Permission::Execute, json!({}), |_| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(json!("done"))
    });
    let stop = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        gateway.shutdown().await;
    };

    let (outcome, ()) = tokio::join!(call, stop);
    assert_matches!(outcome, Err(GatewayError::Tool(msg)) if msg.contains("cancelled"));
}
