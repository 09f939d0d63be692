//! Remote log/config sink.

use crate::core::AggregatedResult;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

/// Remote sink failure.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The request could not be sent or the server was unreachable.
    #[error("sink unreachable: {0}")]
    Unreachable(String),

    /// The server answered with an error status.
    #[error("sink rejected the request: status {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },

    /// The response body could not be decoded.
    #[error("sink response malformed: {0}")]
    Malformed(String),
}

/// Remote log/config server.
///
/// One push per sealed phase record; the engine never pushes partial
/// aggregates. Both operations are request/response and tolerant of
/// transient unavailability; boot-wait blocks until [`health_check`]
/// succeeds rather than failing hard.
///
/// [`health_check`]: LogSink::health_check
#[async_trait]
pub trait LogSink: Send + Sync {
    /// True if the server is reachable and healthy.
    async fn health_check(&self) -> bool;

    /// Pushes one sealed phase record.
    async fn push(&self, record: &AggregatedResult) -> Result<(), SinkError>;

    /// Fetches the current jig configuration document, if one exists.
    async fn fetch_jig_config(&self, jig_id: &str)
        -> Result<Option<serde_json::Value>, SinkError>;
}

/// HTTP implementation against the factory record server.
pub struct HttpLogSink {
    base_url: String,
    log_collection: String,
    jig_collection: String,
    jig_id: String,
    http: reqwest::Client,
}

impl HttpLogSink {
    /// Creates a sink for one jig.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        log_collection: impl Into<String>,
        jig_collection: impl Into<String>,
        jig_id: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            log_collection: log_collection.into(),
            jig_collection: jig_collection.into(),
            jig_id: jig_id.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LogSink for HttpLogSink {
    async fn health_check(&self) -> bool {
        let endpoint = format!("{}/api/health", self.base_url);
        match self.http.get(&endpoint).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(error = %e, "health check failed");
                false
            }
        }
    }

    async fn push(&self, record: &AggregatedResult) -> Result<(), SinkError> {
        let endpoint =
            format!("{}/api/collections/{}/records", self.base_url, self.log_collection);
        let payload = serde_json::json!({
            "jig": self.jig_id,
            "deviceid": record.combined_device_id(),
            "message": record.message(),
            "log": record.to_record(),
        });

        let response = self
            .http
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SinkError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(code = record.code, "phase record pushed");
            Ok(())
        } else {
            Err(SinkError::Rejected { status: status.as_u16() })
        }
    }

    async fn fetch_jig_config(
        &self,
        jig_id: &str,
    ) -> Result<Option<serde_json::Value>, SinkError> {
        let endpoint =
            format!("{}/api/collections/{}/records", self.base_url, self.jig_collection);
        let filter = format!("jig_id = \"{jig_id}\"");

        let response = self
            .http
            .get(&endpoint)
            .query(&[("filter", filter.as_str()), ("perPage", "1")])
            .send()
            .await
            .map_err(|e| SinkError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected { status: status.as_u16() });
        }

        let body: serde_json::Value =
            response.json().await.map_err(|e| SinkError::Malformed(e.to_string()))?;
        Ok(body
            .get("items")
            .and_then(serde_json::Value::as_array)
            .and_then(|items| items.first())
            .cloned())
    }
}
