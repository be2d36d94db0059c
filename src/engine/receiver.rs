//! Upload transfer receiver.
//!
//! Drains a multipart upload to end of stream, counting the bytes of the
//! `file` part, and reports `{size, type}`.  Nothing is buffered beyond the
//! current chunk and nothing is persisted.  The size limit is enforced here
//! rather than by the framework body limit: a `Content-Length` far beyond it
//! is refused before reading, and the running byte count enforces the exact
//! bound.

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::header::CONTENT_LENGTH;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::state::AppState;
use crate::api::ApiError;
use crate::error::ProbeError;

/// Name of the multipart field carrying the measured payload.
pub const TRANSFER_FIELD: &str = "file";

/// Content type reported when the part does not declare one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Slack allowed on top of the part limit when checking `Content-Length`,
/// which also counts boundaries and part headers.
pub const MULTIPART_OVERHEAD_ALLOWANCE: u64 = 16 * 1024;

/// Metadata of a drained upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedTransfer {
    pub size: u64,
    pub content_type: String,
}

/// Response body acknowledging a drained upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAck {
    pub success: bool,
    pub size: u64,
    #[serde(rename = "type")]
    pub content_type: String,
}

impl From<ReceivedTransfer> for UploadAck {
    fn from(t: ReceivedTransfer) -> Self {
        Self {
            success: true,
            size: t.size,
            content_type: t.content_type,
        }
    }
}

fn malformed(e: MultipartError) -> ProbeError {
    ProbeError::MalformedTransfer(e.body_text())
}

/// Drain every part of `multipart`, measuring the first `file` part.
///
/// All parts count toward `limit`; exceeding it stops the drain with
/// `PayloadTooLarge`.
pub async fn drain_upload(
    mut multipart: Multipart,
    limit: u64,
) -> Result<ReceivedTransfer, ProbeError> {
    let mut received: Option<ReceivedTransfer> = None;
    let mut total: u64 = 0;

    while let Some(mut field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().map(str::to_owned);
        let content_type = field
            .content_type()
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_owned();

        let mut size: u64 = 0;
        while let Some(chunk) = field.chunk().await.map_err(malformed)? {
            size += chunk.len() as u64;
            total += chunk.len() as u64;
            if total > limit {
                return Err(ProbeError::PayloadTooLarge { size: total, limit });
            }
        }

        if received.is_none() && name.as_deref() == Some(TRANSFER_FIELD) {
            received = Some(ReceivedTransfer { size, content_type });
        } else {
            debug!(field = ?name, size, "ignoring extra multipart field");
        }
    }

    received.ok_or(ProbeError::MissingPayload)
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Axum handler for `POST /network-test/upload`.
pub async fn upload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadAck>, ApiError> {
    let limit = state.limits.max_upload_size;

    // The exact bound is enforced on part bytes by the drain.
    if let Some(len) = declared_length(&headers) {
        if len > limit.saturating_add(MULTIPART_OVERHEAD_ALLOWANCE) {
            warn!(content_length = len, limit, "rejecting oversized upload");
            return Err(ProbeError::PayloadTooLarge { size: len, limit }.into());
        }
    }

    let multipart = multipart.map_err(|e| {
        debug!(error = %e, "upload is not a multipart body");
        ProbeError::MissingPayload
    })?;

    let transfer = drain_upload(multipart, limit).await.map_err(|e| {
        warn!(error = %e, "upload drain failed");
        e
    })?;

    info!(
        size = transfer.size,
        content_type = transfer.content_type.as_str(),
        "upload received"
    );

    Ok(Json(UploadAck::from(transfer)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
