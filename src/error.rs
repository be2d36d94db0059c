//! Error taxonomy shared by the test endpoints and the orchestrator.
//!
//! Request-level errors (`InvalidParameter`, `PayloadTooLarge`,
//! `MissingPayload`, `MalformedTransfer`) are returned to HTTP callers with a
//! status code and a JSON body.  Round-level errors (`Timeout`,
//! `TransportFailure`, `UnexpectedStatus`, `ShortTransfer`) are recorded on a
//! failed [`TransferSample`](crate::throughput::sample::TransferSample) and
//! retried, except for 4xx statuses other than 408 and 429.  `SinkUnavailable` is only ever logged.

use std::time::Duration;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("payload of {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    #[error("no file part found in upload")]
    MissingPayload,

    #[error("malformed transfer: {0}")]
    MalformedTransfer(String),

    #[error("round timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("server responded with HTTP {0}")]
    UnexpectedStatus(u16),

    #[error("short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: u64, actual: u64 },

    #[error("metric sink unavailable: {0}")]
    SinkUnavailable(String),
}

/// Kind of a failed round, stored on its sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    TransportFailure,
    UnexpectedStatus,
    ShortTransfer,
}

impl ProbeError {
    /// HTTP status for request-level errors.
    pub fn status(&self) -> StatusCode {
        match self {
            ProbeError::InvalidParameter(_) | ProbeError::MissingPayload => {
                StatusCode::BAD_REQUEST
            }
            ProbeError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProbeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProbeError::UnexpectedStatus(_) | ProbeError::TransportFailure(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProbeError::MalformedTransfer(_)
            | ProbeError::ShortTransfer { .. }
            | ProbeError::SinkUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ProbeError::InvalidParameter(_) => "invalid_parameter",
            ProbeError::PayloadTooLarge { .. } => "payload_too_large",
            ProbeError::MissingPayload => "missing_payload",
            ProbeError::MalformedTransfer(_) => "malformed_transfer",
            ProbeError::Timeout(_) => "timeout",
            ProbeError::TransportFailure(_) => "transport_failure",
            ProbeError::UnexpectedStatus(_) => "unexpected_status",
            ProbeError::ShortTransfer { .. } => "short_transfer",
            ProbeError::SinkUnavailable(_) => "sink_unavailable",
        }
    }

    /// Classify an error raised while a round was in flight.
    ///
    /// Anything that is not a timeout, a bad status or a short read is
    /// treated as a transport failure (including an undecodable ack).
    pub fn round_kind(&self) -> ErrorKind {
        match self {
            ProbeError::Timeout(_) => ErrorKind::Timeout,
            ProbeError::UnexpectedStatus(_) => ErrorKind::UnexpectedStatus,
            ProbeError::ShortTransfer { .. } => ErrorKind::ShortTransfer,
            _ => ErrorKind::TransportFailure,
        }
    }

    /// Whether another attempt could succeed.
    ///
    /// A 4xx answer is the server refusing this request, and will be refused
    /// again; 408 and 429 are the exceptions.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProbeError::UnexpectedStatus(code) => {
                !(400..500).contains(code) || matches!(code, 408 | 429)
            }
            _ => true,
        }
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => ProbeError::UnexpectedStatus(status.as_u16()),
            None => ProbeError::TransportFailure(e.to_string()),
        }
    }
}
