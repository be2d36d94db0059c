//! Metric sinks: where round and run measurements are reported.
//!
//! A sink is an external, append-only collaborator.  Failures surface as
//! [`ProbeError::SinkUnavailable`] and the orchestrator only logs them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::info;

use super::Direction;
use crate::config::{SinkConfig, SinkKind};
use crate::error::ProbeError;

#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn record(&self, metric_name: &str, value: f64) -> Result<(), ProbeError>;
}

/// Build the sink described by `config`.
pub fn from_config(config: &SinkConfig) -> Result<Arc<dyn MetricSink>, ProbeError> {
    match config.kind {
        SinkKind::Log => Ok(Arc::new(TracingSink)),
        SinkKind::Http => {
            let endpoint = config.endpoint.clone().ok_or_else(|| {
                ProbeError::InvalidParameter("http sink requires an endpoint".to_string())
            })?;
            Ok(Arc::new(HttpSink::new(endpoint)?))
        }
    }
}

// ---------------------------------------------------------------------------
// Metric names
// ---------------------------------------------------------------------------

/// Name for a per-round metric, e.g.
/// `network_test_round_throughput_bps{direction="upload",round="2"}`.
pub fn round_metric(name: &str, direction: Direction, round: u32) -> String {
    format!(
        "network_test_round_{}{{direction=\"{}\",round=\"{}\"}}",
        name, direction, round
    )
}

/// Name for a per-run metric, tagged with direction and round count.
pub fn run_metric(name: &str, direction: Direction, round_count: u32) -> String {
    format!(
        "network_test_{}{{direction=\"{}\",rounds=\"{}\"}}",
        name, direction, round_count
    )
}

// ---------------------------------------------------------------------------
// TracingSink
// ---------------------------------------------------------------------------

/// Emits every metric as a structured `info` event.
pub struct TracingSink;

#[async_trait]
impl MetricSink for TracingSink {
    async fn record(&self, metric_name: &str, value: f64) -> Result<(), ProbeError> {
        info!(target: "speedprobe::metrics", metric = metric_name, value, "metric");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HttpSink
// ---------------------------------------------------------------------------

/// POSTs `{name, value, timestamp}` JSON to a collector endpoint.
pub struct HttpSink {
    client: Client,
    endpoint: String,
}

impl HttpSink {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ProbeError::SinkUnavailable(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl MetricSink for HttpSink {
    async fn record(&self, metric_name: &str, value: f64) -> Result<(), ProbeError> {
        let body = json!({
            "name": metric_name,
            "value": value,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProbeError::SinkUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProbeError::SinkUnavailable(format!(
                "collector responded with HTTP {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names() {
        assert_eq!(
            round_metric("throughput_bps", Direction::Upload, 2),
            "network_test_round_throughput_bps{direction=\"upload\",round=\"2\"}"
        );
        assert_eq!(
            run_metric("latency_ms", Direction::Download, 5),
            "network_test_latency_ms{direction=\"download\",rounds=\"5\"}"
        );
    }

    #[tokio::test]
    async fn test_tracing_sink_never_fails() {
        assert!(TracingSink.record("x", 1.0).await.is_ok());
    }

    #[tokio::test]
    async fn test_http_sink_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = HttpSink::new(format!("http://{}/metrics", addr)).unwrap();
        let err = sink.record("x", 1.0).await.unwrap_err();
        assert!(matches!(err, ProbeError::SinkUnavailable(_)));
    }

    #[test]
    fn test_from_config_requires_endpoint() {
        let cfg = SinkConfig {
            kind: SinkKind::Http,
            endpoint: None,
        };
        assert!(from_config(&cfg).is_err());
        assert!(from_config(&SinkConfig::default()).is_ok());
    }
}
