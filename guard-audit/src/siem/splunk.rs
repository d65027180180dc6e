//! Splunk HTTP Event Collector sink

use super::{SiemConfig, SiemSink, check_response, endpoint};
use crate::backend::AuditError;
use crate::event::StructuredAuditEvent;
use async_trait::async_trait;
use serde_json::json;
use url::Url;

/// HEC path appended to the configured URL
pub const HEC_PATH: &str = "services/collector/event";

/// Source type stamped on every event
pub const SOURCE_TYPE: &str = "aixgo:audit";

/// Posts batches to the HEC endpoint with `Authorization: Splunk <token>`
#[derive(Clone)]
pub struct SplunkSink {
    client: reqwest::Client,
    hec_url: Url,
    token: String,
    index: Option<String>,
}

impl std::fmt::Debug for SplunkSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplunkSink")
            .field("hec_url", &self.hec_url)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl SplunkSink {
    /// Create a sink for an already validated base URL
    pub fn new(
        client: reqwest::Client,
        base: &Url,
        config: &SiemConfig,
    ) -> Result<Self, AuditError> {
        let token = config
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuditError::Configuration("Splunk HEC requires a token".into()))?;

        let hec_url = if base.path().trim_end_matches('/').ends_with(HEC_PATH) {
            base.clone()
        } else {
            endpoint(base, HEC_PATH)?
        };

        Ok(Self {
            client,
            hec_url,
            token,
            index: config.index.clone(),
        })
    }

    /// HEC body: one event envelope per line
    pub fn hec_body(&self, events: &[StructuredAuditEvent]) -> Result<String, AuditError> {
        let mut body = String::new();
        for event in events {
            let mut envelope = json!({
                "time": event.timestamp.timestamp_millis() as f64 / 1000.0,
                "sourcetype": SOURCE_TYPE,
                "event": event,
            });
            if let Some(index) = &self.index {
                envelope["index"] = json!(index);
            }
            body.push_str(&serde_json::to_string(&envelope)?);
            body.push('\n');
        }
        Ok(body)
    }
}

#[async_trait]
impl SiemSink for SplunkSink {
    async fn send(&self, events: &[StructuredAuditEvent]) -> Result<(), AuditError> {
        let response = self
            .client
            .post(self.hec_url.clone())
            .header(reqwest::header::AUTHORIZATION, format!("Splunk {}", self.token))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(self.hec_body(events)?)
            .send()
            .await
            .map_err(|e| AuditError::Delivery(e.to_string()))?;
        check_response(self.name(), response)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "splunk"
    }
}
