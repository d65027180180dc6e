//! Elasticsearch bulk API sink

use super::{DEFAULT_INDEX, SiemConfig, SiemSink, check_response, endpoint};
use crate::backend::AuditError;
use crate::event::StructuredAuditEvent;
use async_trait::async_trait;
use serde_json::json;
use url::Url;

/// Posts batches to `<url>/_bulk` as NDJSON action/document pairs
#[derive(Debug, Clone)]
pub struct ElasticsearchSink {
    client: reqwest::Client,
    bulk_url: Url,
    index: String,
    api_key: Option<String>,
}

impl ElasticsearchSink {
    /// Create a sink for an already validated base URL
    pub fn new(
        client: reqwest::Client,
        base: &Url,
        config: &SiemConfig,
    ) -> Result<Self, AuditError> {
        Ok(Self {
            client,
            bulk_url: endpoint(base, "_bulk")?,
            index: config
                .index
                .clone()
                .unwrap_or_else(|| DEFAULT_INDEX.to_string()),
            api_key: config.token.clone(),
        })
    }

    /// Bulk request body for `events`
    pub fn bulk_body(&self, events: &[StructuredAuditEvent]) -> Result<String, AuditError> {
        let action = serde_json::to_string(&json!({ "index": { "_index": self.index } }))?;
        let mut body = String::new();
        for event in events {
            body.push_str(&action);
            body.push('\n');
            body.push_str(&event.to_json()?);
            body.push('\n');
        }
        Ok(body)
    }
}

#[async_trait]
impl SiemSink for ElasticsearchSink {
    async fn send(&self, events: &[StructuredAuditEvent]) -> Result<(), AuditError> {
        let mut request = self
            .client
            .post(self.bulk_url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(self.bulk_body(events)?);
        if let Some(key) = &self.api_key {
            request = request.header(reqwest::header::AUTHORIZATION, format!("ApiKey {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuditError::Delivery(e.to_string()))?;
        let response = check_response(self.name(), response)?;

        // The bulk API reports per-item failures with a 200 status
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AuditError::Delivery(e.to_string()))?;
        if body.get("errors").and_then(serde_json::Value::as_bool) == Some(true) {
            return Err(AuditError::Delivery(
                "elasticsearch rejected one or more documents".into(),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "elasticsearch"
    }
}
