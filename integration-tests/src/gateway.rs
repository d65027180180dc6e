//! A tool gateway wiring every guard together in request order
//!
//! authenticate → authorize → rate limit → screen arguments → circuit
//! breaker → timeout → tool, with each decision recorded by the audit
//! logger. Scenarios drive this type instead of a real transport.

use aixgo_guard_audit::{
    AuditEventType, AuditLogger, AuditMiddleware, AuditResult, StructuredAuditEvent,
};
use aixgo_guard_auth::{
    AuthExtractionError, AuthExtractor, AuthRequest, AuthorizationError, Authorizer, ExtractorDeps,
    Permission, RbacAuthorizer, SecurityConfig, build_extractor, context, extract_context,
};
use aixgo_guard_logging::{CorrelationContext, CorrelationHeaders, correlation};
use aixgo_guard_resilience::{
    CancellationToken, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, RateLimitConfig,
    RateLimitError, RateLimiter, TimeoutConfig, TimeoutManager,
};
use aixgo_guard_security::{
    DetectorConfig, InjectionCategory, PromptInjectionDetector, SsrfValidator,
};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tracing::{Instrument, debug, info};

/// Why a tool call was refused or failed
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Unauthenticated(#[from] AuthExtractionError),

    #[error(transparent)]
    Forbidden(#[from] AuthorizationError),

    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    #[error("Circuit '{0}' is open")]
    Unavailable(String),

    #[error("Prompt injection in '{field}' ({category:?})")]
    Injection {
        field: String,
        category: InjectionCategory,
    },

    #[error("Tool failed: {0}")]
    Tool(String),
}

impl GatewayError {
    /// Text that may be returned to the caller
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::Unauthenticated(e) => e.public_message(),
            Self::Forbidden(e) => e.public_message(),
            Self::RateLimited(_) => "rate limited",
            Self::Unavailable(_) => "service unavailable",
            Self::Injection { .. } => "rejected input",
            Self::Tool(_) => "tool execution failed",
        }
    }
}

/// Flow-control and screening settings
#[derive(Debug, Clone, Default)]
pub struct GatewaySettings {
    /// Token buckets
    pub rate_limit: RateLimitConfig,
    /// Downstream failure isolation
    pub breaker: CircuitBreakerConfig,
    /// Per-tool deadlines
    pub timeouts: TimeoutConfig,
    /// Argument screening
    pub detector: DetectorConfig,
}

/// Guards and audits tool calls
pub struct GuardedGateway {
    extractor: Arc<dyn AuthExtractor>,
    authorizer: Arc<dyn Authorizer>,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    timeouts: TimeoutManager,
    detector: PromptInjectionDetector,
    audit: AuditMiddleware,
    shutdown: CancellationToken,
}

impl GuardedGateway {
    /// Assemble a gateway from ready-made parts
    pub fn new(
        extractor: Arc<dyn AuthExtractor>,
        authorizer: Arc<dyn Authorizer>,
        logger: Arc<AuditLogger>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            extractor,
            authorizer,
            limiter: RateLimiter::new(settings.rate_limit),
            breaker: CircuitBreaker::new("tools", settings.breaker),
            timeouts: TimeoutManager::new(settings.timeouts),
            detector: PromptInjectionDetector::new(settings.detector),
            audit: AuditMiddleware::new(logger),
            shutdown: CancellationToken::new(),
        }
    }

    /// Build every part from a validated security configuration
    pub async fn from_config(
        config: &SecurityConfig,
        ssrf: &SsrfValidator,
        settings: GatewaySettings,
    ) -> anyhow::Result<Self> {
        let deps = ExtractorDeps::from_config(config, ssrf).await?;
        let extractor = build_extractor(config, deps)?;
        let authorizer = Arc::new(RbacAuthorizer::new(config.authorization.clone()));
        let logger = Arc::new(AuditLogger::from_settings(&config.audit, ssrf).await?);

        info!(auth_mode = %config.auth_mode, "Gateway assembled");
        Ok(Self::new(extractor, authorizer, logger, settings))
    }

    /// The audit logger
    pub fn logger(&self) -> &Arc<AuditLogger> {
        self.audit.logger()
    }

    /// The downstream circuit breaker
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Cancel in-flight tool calls and flush the audit trail
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.logger().close().await;
    }

    /// Run `handler` for `tool` once every guard has passed
    pub async fn call_tool<F, Fut>(
        &self,
        request: &AuthRequest,
        tool: &str,
        permission: Permission,
        arguments: Value,
        handler: F,
    ) -> Result<Value, GatewayError>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, String>>,
    {
        let ids =
            CorrelationContext::from_headers(request.headers(), &CorrelationHeaders::default());
        let span = ids.span();

        correlation::scope(ids, async {
            let logger = self.logger();
            let auth = match extract_context(self.extractor.as_ref(), request).await {
                Ok(auth) => auth,
                Err(e) => {
                    logger
                        .log_auth_attempt(self.extractor.mode(), None, Some(&e.to_string()))
                        .await;
                    return Err(GatewayError::from(e));
                }
            };
            logger
                .log_auth_attempt(self.extractor.mode(), Some(&auth.principal), None)
                .await;

            context::scope(auth, self.guarded(tool, permission, arguments, handler)).await
        }
        .instrument(span))
        .await
    }

    async fn guarded<F, Fut>(
        &self,
        tool: &str,
        permission: Permission,
        arguments: Value,
        handler: F,
    ) -> Result<Value, GatewayError>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Result<Value, String>>,
    {
        let logger = self.logger();
        let principal = context::current_principal();

        let decision = self.authorizer.authorize(principal.as_ref(), tool, permission);
        logger
            .log_authorization_check(
                principal.as_ref(),
                tool,
                permission,
                decision.is_ok(),
                decision.as_ref().err().map(ToString::to_string).as_deref(),
            )
            .await;
        decision?;

        let client_id = principal.as_ref().map_or("anonymous", |p| p.id.as_str());
        if let Err(e) = self.limiter.allow_request(client_id, tool) {
            logger.log_rate_limit_exceeded(tool, client_id).await;
            return Err(e.into());
        }

        if let Some((field, category)) = self.screen(&arguments) {
            logger
                .log_validation_error(tool, &field, "prompt injection detected")
                .await;
            return Err(GatewayError::Injection { field, category });
        }

        let call = async {
            match self
                .timeouts
                .run(tool, &self.shutdown, handler(arguments.clone()))
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => Err(e.to_string()),
            }
        };

        match self
            .breaker
            .call(|| self.audit.execute(tool, &arguments, call))
            .await
        {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::Open { name }) => {
                debug!(tool, breaker = %name, "Tool call short-circuited");
                let event = StructuredAuditEvent::new(
                    AuditEventType::ToolExecution,
                    tool,
                    "execute",
                    AuditResult::Denied,
                )
                .with_metadata("circuit", name.clone());
                logger.log(event).await;
                Err(GatewayError::Unavailable(name))
            }
            Err(CircuitBreakerError::Inner(e)) => Err(GatewayError::Tool(e)),
        }
    }

    /// First string argument flagged by the detector, with its JSON path
    fn screen(&self, arguments: &Value) -> Option<(String, InjectionCategory)> {
        let mut fields = Vec::new();
        collect_strings(arguments, "$", &mut fields);
        fields.into_iter().find_map(|(path, text)| {
            let result = self.detector.detect(text);
            result.detected.then_some((path, result.category))
        })
    }
}

fn collect_strings<'a>(value: &'a Value, path: &str, out: &mut Vec<(String, &'a str)>) {
    match value {
        Value::String(text) => out.push((path.to_string(), text.as_str())),
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_strings(item, &format!("{path}[{index}]"), out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                collect_strings(item, &format!("{path}.{key}"), out);
            }
        }
        _ => {}
    }
}
