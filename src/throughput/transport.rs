//! Client side of a round: moves bytes to or from the test endpoints.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::debug;

use crate::engine::receiver::{UploadAck, TRANSFER_FIELD};
use crate::error::ProbeError;

/// One transfer against the generator or the receiver.
///
/// Implementations perform exactly one attempt and do not retry or time out
/// on their own; the orchestrator owns both policies.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Request `size` bytes and read the body to end of stream.
    ///
    /// Returns the number of bytes actually received.
    async fn download(&self, size: u64) -> Result<u64, ProbeError>;

    /// Send `payload` and wait for the receiver's acknowledgment.
    async fn upload(&self, payload: Bytes) -> Result<UploadAck, ProbeError>;
}

/// [`Transport`] over HTTP against a speedprobe server.
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    /// `base_url` is the server root, e.g. `http://10.0.0.2:8080`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProbeError::TransportFailure(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/network-test/{}", self.base_url, path)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download(&self, size: u64) -> Result<u64, ProbeError> {
        let url = self.endpoint("download");
        debug!(url = url.as_str(), size, "starting download round");

        let response = self
            .client
            .get(&url)
            .query(&[("size", size)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ProbeError::UnexpectedStatus(response.status().as_u16()));
        }

        let mut received: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            received += chunk?.len() as u64;
        }
        Ok(received)
    }

    async fn upload(&self, payload: Bytes) -> Result<UploadAck, ProbeError> {
        let url = self.endpoint("upload");
        let len = payload.len() as u64;
        debug!(url = url.as_str(), size = len, "starting upload round");

        let part = Part::stream_with_length(payload, len)
            .file_name("payload.bin")
            .mime_str("application/octet-stream")?;
        let form = Form::new().part(TRANSFER_FIELD, part);

        let response = self.client.post(&url).multipart(form).send().await?;
        if !response.status().is_success() {
            return Err(ProbeError::UnexpectedStatus(response.status().as_u16()));
        }

        response
            .json::<UploadAck>()
            .await
            .map_err(|e| ProbeError::MalformedTransfer(format!("invalid upload ack: {}", e)))
    }
}
