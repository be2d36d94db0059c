//! Download payload generator.
//!
//! Serves exactly the requested number of random bytes.  Each response owns a
//! fresh `StdRng` seeded from OS entropy and fills fixed-size chunks on
//! demand, so peak memory per request is one chunk regardless of the
//! requested size and no request can predict another's bytes.

use std::convert::Infallible;

use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, PRAGMA};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::{Bytes, BytesMut};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Deserialize;
use tracing::debug;

use crate::api::state::AppState;
use crate::api::ApiError;
use crate::error::ProbeError;

/// Size of each chunk handed to the response body (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// GeneratorConfig
// ---------------------------------------------------------------------------

/// Per-request generator parameters, resolved from the query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Exact number of bytes to emit.
    pub requested_size: u64,
    /// Size used when the request did not carry one.
    pub default_size: u64,
}

impl GeneratorConfig {
    /// Resolve the raw `size` parameter.
    ///
    /// Absent or empty falls back to `default_size`.  Anything that is not a
    /// positive integer is `InvalidParameter`; anything above `max_size` is
    /// `PayloadTooLarge`.
    pub fn resolve(
        raw: Option<&str>,
        default_size: u64,
        max_size: u64,
    ) -> Result<Self, ProbeError> {
        let requested_size = match raw.map(str::trim) {
            None | Some("") => default_size,
            Some(s) => match s.parse::<u64>() {
                Ok(0) => {
                    return Err(ProbeError::InvalidParameter(
                        "size must be greater than zero".to_string(),
                    ))
                }
                Ok(n) => n,
                Err(_) => {
                    return Err(ProbeError::InvalidParameter(format!(
                        "size must be a positive integer, got {:?}",
                        s
                    )))
                }
            },
        };

        if requested_size > max_size {
            return Err(ProbeError::PayloadTooLarge {
                size: requested_size,
                limit: max_size,
            });
        }

        Ok(Self {
            requested_size,
            default_size,
        })
    }
}

// ---------------------------------------------------------------------------
// PayloadChunks
// ---------------------------------------------------------------------------

/// Iterator yielding random chunks that sum to exactly `size` bytes.
pub struct PayloadChunks {
    rng: StdRng,
    remaining: u64,
}

impl PayloadChunks {
    pub fn new(size: u64) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            remaining: size,
        }
    }
}

impl Iterator for PayloadChunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.remaining == 0 {
            return None;
        }
        let len = self.remaining.min(CHUNK_SIZE as u64) as usize;
        let mut buf = vec![0u8; len];
        self.rng.fill_bytes(&mut buf);
        self.remaining -= len as u64;
        Some(Bytes::from(buf))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.div_ceil(CHUNK_SIZE as u64) as usize;
        (n, Some(n))
    }
}

/// Materialize a random payload of `size` bytes (used for upload rounds).
pub fn random_payload(size: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(size as usize);
    for chunk in PayloadChunks::new(size) {
        buf.extend_from_slice(&chunk);
    }
    buf.freeze()
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    size: Option<String>,
}

/// Axum handler for `GET /network-test/download?size=<bytes>`.
pub async fn download_handler(
    State(state): State<AppState>,
    query: Result<Query<DownloadParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = query.map_err(|e| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            ProbeError::InvalidParameter(e.body_text()),
        )
    })?;
    let limits = &state.limits;
    let config = GeneratorConfig::resolve(
        params.size.as_deref(),
        limits.default_download_size,
        limits.max_download_size,
    )
    .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e))?;

    debug!(size = config.requested_size, "serving download payload");

    let chunks = PayloadChunks::new(config.requested_size).map(Ok::<_, Infallible>);
    let body = Body::from_stream(futures::stream::iter(chunks));

    Ok((
        StatusCode::OK,
        [
            (
                CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            ),
            (CONTENT_LENGTH, HeaderValue::from(config.requested_size)),
            (CACHE_CONTROL, HeaderValue::from_static("no-store, no-cache")),
            (PRAGMA, HeaderValue::from_static("no-cache")),
        ],
        body,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
