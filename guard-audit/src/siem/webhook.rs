//! Generic JSON webhook sink

use super::{SiemConfig, SiemSink, check_response};
use crate::backend::AuditError;
use crate::event::StructuredAuditEvent;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use url::Url;

/// Body posted for each batch
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    /// The batch
    pub events: &'a [StructuredAuditEvent],
    /// Send time
    pub timestamp: chrono::DateTime<Utc>,
    /// `events.len()`
    pub count: usize,
}

/// Sends `{events, timestamp, count}` with a configurable method and headers
#[derive(Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    url: Url,
    method: Method,
    headers: HeaderMap,
}

impl std::fmt::Debug for WebhookSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSink")
            .field("url", &self.url)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

impl WebhookSink {
    /// Create a sink for an already validated URL
    pub fn new(client: reqwest::Client, url: Url, config: &SiemConfig) -> Result<Self, AuditError> {
        let method = Method::from_bytes(config.method.as_bytes())
            .map_err(|_| AuditError::Configuration(format!("invalid method '{}'", config.method)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| AuditError::Configuration(format!("invalid header name '{name}'")))?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                AuditError::Configuration(format!("invalid value for header '{name}'"))
            })?;
            headers.insert(name, value);
        }
        if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| AuditError::Configuration("invalid webhook token".into()))?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        Ok(Self {
            client,
            url,
            method,
            headers,
        })
    }
}

#[async_trait]
impl SiemSink for WebhookSink {
    async fn send(&self, events: &[StructuredAuditEvent]) -> Result<(), AuditError> {
        let payload = WebhookPayload {
            events,
            timestamp: Utc::now(),
            count: events.len(),
        };

        let response = self
            .client
            .request(self.method.clone(), self.url.clone())
            .headers(self.headers.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| AuditError::Delivery(e.to_string()))?;
        check_response(self.name(), response)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}
