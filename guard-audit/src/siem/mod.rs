//! Batched delivery to SIEM products
//!
//! [`BatchingBackend`] buffers events and hands full batches to a
//! [`SiemSink`]. A batch is sent when the buffer reaches `batch_size` or
//! when the periodic flush timer fires. The buffer is swapped out under
//! its lock and the network send runs on a tracked task, so a slow sink
//! never blocks producers. Failed batches are retried with backoff and
//! finally reported to the fallback reporter.

pub mod elasticsearch;
pub mod splunk;
pub mod webhook;

pub use elasticsearch::ElasticsearchSink;
pub use splunk::SplunkSink;
pub use webhook::WebhookSink;

use crate::backend::{AuditBackend, AuditError, FallbackReporter, stderr_reporter};
use crate::event::StructuredAuditEvent;
use aixgo_guard_auth::{SiemKind, SiemSettings};
use aixgo_guard_resilience::{RetryError, RetryPolicy, retry_with_backoff};
use aixgo_guard_security::SsrfValidator;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Default Elasticsearch index
pub const DEFAULT_INDEX: &str = "aixgo-audit";

/// Delivery target for batches of events
#[async_trait]
pub trait SiemSink: Send + Sync {
    /// Deliver one batch
    async fn send(&self, events: &[StructuredAuditEvent]) -> Result<(), AuditError>;

    /// Product name for diagnostics
    fn name(&self) -> &'static str;
}

/// Runtime SIEM settings
#[derive(Debug, Clone, PartialEq)]
pub struct SiemConfig {
    /// Product
    pub kind: SiemKind,
    /// Endpoint base URL
    pub url: String,
    /// Target index
    pub index: Option<String>,
    /// Credential sent with every request
    pub token: Option<String>,
    /// Webhook method
    pub method: String,
    /// Extra webhook headers
    pub headers: HashMap<String, String>,
    /// Events per batch
    pub batch_size: usize,
    /// Periodic flush interval
    pub flush_interval: Duration,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Backoff for failed batches
    pub retry: RetryPolicy,
}

impl SiemConfig {
    /// Settings with defaults for `kind` at `url`
    pub fn new(kind: SiemKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            index: None,
            token: None,
            method: "POST".to_string(),
            headers: HashMap::new(),
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }

    /// Convert and check the configuration-file form
    pub fn from_settings(settings: &SiemSettings) -> Result<Self, AuditError> {
        let config = Self {
            index: settings.index.clone(),
            token: settings.token.clone(),
            method: settings
                .method
                .clone()
                .unwrap_or_else(|| "POST".to_string())
                .to_ascii_uppercase(),
            headers: settings.headers.clone(),
            batch_size: settings.batch_size,
            flush_interval: Duration::from_millis(settings.flush_interval_ms),
            retry: RetryPolicy {
                max_attempts: settings.max_attempts,
                ..RetryPolicy::default()
            },
            ..Self::new(settings.kind, settings.url.clone())
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject unusable settings
    pub fn validate(&self) -> Result<(), AuditError> {
        if self.batch_size == 0 {
            return Err(AuditError::Configuration("batch_size must be positive".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(AuditError::Configuration(
                "flush interval must be positive".into(),
            ));
        }
        if self.kind == SiemKind::Splunk && self.token.as_deref().is_none_or(str::is_empty) {
            return Err(AuditError::Configuration(
                "Splunk HEC requires a token".into(),
            ));
        }
        Ok(())
    }

    /// Client for a sink, installing the validating resolver
    fn client(&self, validator: &SsrfValidator) -> Result<reqwest::Client, AuditError> {
        validator
            .secure_client_builder()
            .timeout(self.request_timeout)
            .build()
            .map_err(|e| AuditError::Configuration(e.to_string()))
    }

    #[cfg(test)]
    fn unchecked_client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()
            .unwrap()
    }
}

/// Build the sink for `config.kind` after screening its endpoint
pub async fn build_sink(
    config: &SiemConfig,
    validator: &SsrfValidator,
) -> Result<Arc<dyn SiemSink>, AuditError> {
    let url = validator.validate_url(&config.url).await?;
    let client = config.client(validator)?;
    sink_for(config, url, client)
}

#[cfg(test)]
pub(crate) fn build_sink_unchecked(config: &SiemConfig) -> Result<Arc<dyn SiemSink>, AuditError> {
    let url = url::Url::parse(&config.url).map_err(|e| AuditError::Configuration(e.to_string()))?;
    sink_for(config, url, config.unchecked_client())
}

fn sink_for(
    config: &SiemConfig,
    url: url::Url,
    client: reqwest::Client,
) -> Result<Arc<dyn SiemSink>, AuditError> {
    Ok(match config.kind {
        SiemKind::Elasticsearch => Arc::new(ElasticsearchSink::new(client, &url, config)?),
        SiemKind::Splunk => Arc::new(SplunkSink::new(client, &url, config)?),
        SiemKind::Webhook => Arc::new(WebhookSink::new(client, url, config)?),
    })
}

/// Append `segment` to the path of `base`
pub(crate) fn endpoint(base: &url::Url, segment: &str) -> Result<url::Url, AuditError> {
    let joined = format!("{}/{}", base.as_str().trim_end_matches('/'), segment);
    url::Url::parse(&joined).map_err(|e| AuditError::Configuration(e.to_string()))
}

/// Map a non-2xx response to a delivery error
pub(crate) fn check_response(
    sink: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, AuditError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(AuditError::Delivery(format!("{sink} returned HTTP {status}")))
}

/// Batching limits
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Events per batch
    pub batch_size: usize,
    /// Periodic flush interval
    pub flush_interval: Duration,
    /// Backoff for failed batches
    pub retry: RetryPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&SiemConfig> for BatchConfig {
    fn from(config: &SiemConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            flush_interval: config.flush_interval,
            retry: config.retry.clone(),
        }
    }
}

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Events accepted by the sink
    pub delivered: u64,
    /// Events dropped after retries ran out
    pub dropped: u64,
    /// Events waiting in the buffer
    pub pending: usize,
}

#[derive(Default)]
struct Buffer {
    events: Vec<StructuredAuditEvent>,
    closed: bool,
}

struct Shared {
    sink: Arc<dyn SiemSink>,
    config: BatchConfig,
    buffer: Mutex<Buffer>,
    tracker: TaskTracker,
    abort: CancellationToken,
    reporter: FallbackReporter,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn take_batch(&self) -> Vec<StructuredAuditEvent> {
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut buffer.events)
    }

    fn spawn_send(self: &Arc<Self>, batch: Vec<StructuredAuditEvent>) {
        if batch.is_empty() {
            return;
        }
        let shared = Arc::clone(self);
        self.tracker.spawn(async move {
            // Failures are already reported
            let _ = shared.send(batch).await;
        });
    }

    async fn send(&self, batch: Vec<StructuredAuditEvent>) -> Result<(), AuditError> {
        let count = batch.len() as u64;
        let started = Instant::now();

        let outcome = retry_with_backoff(&self.config.retry, &self.abort, |attempt| {
            let batch = &batch;
            async move {
                if attempt > 1 {
                    debug!(sink = self.sink.name(), attempt, "Retrying audit batch");
                }
                self.sink.send(batch).await
            }
        })
        .await;

        match outcome {
            Ok(()) => {
                self.delivered.fetch_add(count, Ordering::Relaxed);
                debug!(
                    sink = self.sink.name(),
                    events = count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Audit batch delivered"
                );
                Ok(())
            }
            Err(e) => {
                self.dropped.fetch_add(count, Ordering::Relaxed);
                let error = match e {
                    RetryError::Exhausted { last, .. } => last,
                    RetryError::Cancelled => AuditError::Delivery("delivery aborted".into()),
                };
                warn!(sink = self.sink.name(), events = count, "Audit batch dropped");
                (self.reporter)(self.sink.name(), &error);
                Err(error)
            }
        }
    }
}

/// Buffers events and delivers them to a [`SiemSink`] in batches
pub struct BatchingBackend {
    shared: Arc<Shared>,
    name: String,
    stop_timer: CancellationToken,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BatchingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchingBackend")
            .field("name", &self.name)
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl BatchingBackend {
    /// Start batching into `sink`; must be called inside a tokio runtime
    pub fn new(sink: Arc<dyn SiemSink>, config: BatchConfig) -> Self {
        Self::with_reporter(sink, config, stderr_reporter())
    }

    /// Like [`Self::new`] with a custom failure reporter
    pub fn with_reporter(
        sink: Arc<dyn SiemSink>,
        config: BatchConfig,
        reporter: FallbackReporter,
    ) -> Self {
        let name = format!("siem:{}", sink.name());
        let shared = Arc::new(Shared {
            sink,
            config: BatchConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
            buffer: Mutex::new(Buffer::default()),
            tracker: TaskTracker::new(),
            abort: CancellationToken::new(),
            reporter,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let stop_timer = CancellationToken::new();
        let timer = tokio::spawn(flush_loop(Arc::clone(&shared), stop_timer.clone()));

        Self {
            shared,
            name,
            stop_timer,
            timer: Mutex::new(Some(timer)),
        }
    }

    /// Screen the endpoint, build the sink for `config.kind` and start batching
    pub async fn for_siem(
        config: SiemConfig,
        validator: &SsrfValidator,
    ) -> Result<Self, AuditError> {
        config.validate()?;
        let sink = build_sink(&config, validator).await?;
        info!(sink = sink.name(), batch_size = config.batch_size, "SIEM delivery configured");
        Ok(Self::new(sink, BatchConfig::from(&config)))
    }

    /// Send whatever is buffered now, without waiting for delivery
    pub fn flush(&self) {
        let batch = self.shared.take_batch();
        self.shared.spawn_send(batch);
    }

    /// Delivery counters
    pub fn stats(&self) -> BatchStats {
        let pending = self
            .shared
            .buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .events
            .len();
        BatchStats {
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            pending,
        }
    }
}

async fn flush_loop(shared: Arc<Shared>, stop: CancellationToken) {
    let period = shared.config.flush_interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                let batch = shared.take_batch();
                if !batch.is_empty() {
                    debug!(events = batch.len(), "Periodic audit flush");
                }
                shared.spawn_send(batch);
            }
        }
    }
}

#[async_trait]
impl AuditBackend for BatchingBackend {
    async fn write(&self, event: &StructuredAuditEvent) -> Result<(), AuditError> {
        let full = {
            let mut buffer = self.shared.buffer.lock().unwrap_or_else(|e| e.into_inner());
            if buffer.closed {
                return Err(AuditError::Closed);
            }
            buffer.events.push(event.clone());
            if buffer.events.len() >= self.shared.config.batch_size {
                std::mem::take(&mut buffer.events)
            } else {
                Vec::new()
            }
        };
        self.shared.spawn_send(full);
        Ok(())
    }

    async fn close(&self) -> Result<(), AuditError> {
        let remaining = {
            let mut buffer = self.shared.buffer.lock().unwrap_or_else(|e| e.into_inner());
            if buffer.closed {
                return Ok(());
            }
            buffer.closed = true;
            std::mem::take(&mut buffer.events)
        };

        self.stop_timer.cancel();
        let timer = self.timer.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(timer) = timer {
            let _ = timer.await;
        }

        let result = if remaining.is_empty() {
            Ok(())
        } else {
            self.shared.send(remaining).await
        };

        self.shared.tracker.close();
        self.shared.tracker.wait().await;
        info!(backend = %self.name, "Audit backend closed");
        result
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for BatchingBackend {
    fn drop(&mut self) {
        self.stop_timer.cancel();
        self.shared.abort.cancel();
    }
}
