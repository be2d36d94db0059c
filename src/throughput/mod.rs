//! Measurement orchestrator: timed download/upload rounds with retry,
//! timeout and cancellation, aggregated into a [`TestResult`].
//!
//! Rounds of one request run strictly one after another on the caller's
//! task, since overlapping rounds would compete for the same path.
//! Cancellation is checked only between rounds; a round in flight runs to
//! completion or to its own timeout.

pub mod report;
pub mod sample;
pub mod sink;
pub mod stats;
pub mod transport;

pub use self::sample::{TestResult, TransferSample};

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use self::sample::Round;
use self::sink::{round_metric, run_metric, MetricSink};
use self::transport::Transport;
use crate::config::OrchestratorConfig;
use crate::engine::generator::random_payload;
use crate::error::ProbeError;

/// Payloads up to this size are latency probes rather than bulk transfers.
pub const LATENCY_PROBE_MAX_BYTES: u64 = 1024;

/// Payload used by [`TestRequest::latency_probe`].
pub const LATENCY_PROBE_BYTES: u64 = 1;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Download,
    Upload,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Download => write!(f, "download"),
            Direction::Upload => write!(f, "upload"),
        }
    }
}

/// Parameters of one test run.
#[derive(Debug, Clone)]
pub struct TestRequest {
    pub direction: Direction,
    pub payload_size: u64,
    pub round_count: u32,
    pub timeout_per_round: Duration,
    pub cancellation: CancellationToken,
}

impl TestRequest {
    pub fn new(
        direction: Direction,
        payload_size: u64,
        round_count: u32,
        timeout_per_round: Duration,
    ) -> Self {
        Self {
            direction,
            payload_size,
            round_count,
            timeout_per_round,
            cancellation: CancellationToken::new(),
        }
    }

    /// Small fixed-size rounds whose elapsed time is reported as latency.
    pub fn latency_probe(direction: Direction, round_count: u32, timeout_per_round: Duration) -> Self {
        Self::new(direction, LATENCY_PROBE_BYTES, round_count, timeout_per_round)
    }

    /// Defaults for everything but the direction.
    pub fn from_config(direction: Direction, config: &OrchestratorConfig) -> Self {
        Self::new(
            direction,
            config.payload_size,
            config.round_count,
            config.timeout_per_round(),
        )
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn is_latency_probe(&self) -> bool {
        self.payload_size <= LATENCY_PROBE_MAX_BYTES
    }

    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.payload_size == 0 {
            return Err(ProbeError::InvalidParameter(
                "payload_size must be greater than zero".to_string(),
            ));
        }
        if self.round_count == 0 {
            return Err(ProbeError::InvalidParameter(
                "round_count must be at least 1".to_string(),
            ));
        }
        if self.timeout_per_round.is_zero() {
            return Err(ProbeError::InvalidParameter(
                "timeout_per_round must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// How often and how patiently a failed round is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub retry_limit: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: 1,
            backoff: Duration::from_millis(250),
        }
    }
}

impl From<&OrchestratorConfig> for RetryPolicy {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            retry_limit: config.retry_limit,
            backoff: config.retry_backoff(),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// What each round of a run moves.
enum TransferPlan {
    Download,
    Upload(Bytes),
}

pub struct Orchestrator<T> {
    transport: T,
    sink: Arc<dyn MetricSink>,
    retry: RetryPolicy,
}

impl<T: Transport> Orchestrator<T> {
    pub fn new(transport: T, sink: Arc<dyn MetricSink>) -> Self {
        Self {
            transport,
            sink,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run every round of `request` and aggregate the samples.
    ///
    /// Only an invalid request is an error.  Failed rounds become failed
    /// samples, and cancellation yields the partial result collected so far.
    pub async fn run(&self, request: &TestRequest) -> Result<TestResult, ProbeError> {
        request.validate()?;

        let run_id = Uuid::new_v4();
        info!(
            run_id = %run_id,
            direction = %request.direction,
            payload_size = request.payload_size,
            round_count = request.round_count,
            "starting network test"
        );

        // One payload per run; every upload round sends the same bytes.
        let plan = match request.direction {
            Direction::Download => TransferPlan::Download,
            Direction::Upload => TransferPlan::Upload(random_payload(request.payload_size)),
        };

        let mut samples = Vec::with_capacity(request.round_count as usize);
        let mut cancelled = false;

        for index in 1..=request.round_count {
            if request.cancellation.is_cancelled() {
                info!(run_id = %run_id, completed = samples.len(), "network test cancelled");
                cancelled = true;
                break;
            }
            let sample = self.run_round(request, index, &plan).await;
            self.report_round(request, &sample).await;
            samples.push(sample);
        }

        let result = TestResult::from_samples(run_id, request, samples, cancelled);
        info!(
            run_id = %run_id,
            success_count = result.success_count,
            failure_count = result.failure_count,
            median_bps = ?result.throughput_bps.map(|s| s.median),
            "network test finished"
        );
        self.report_result(&result).await;
        Ok(result)
    }

    async fn run_round(
        &self,
        request: &TestRequest,
        index: u32,
        plan: &TransferPlan,
    ) -> TransferSample {
        let mut round = Round::new(index);
        loop {
            round.begin_attempt();
            let started_at = Utc::now();
            let start = Instant::now();

            let outcome =
                match tokio::time::timeout(request.timeout_per_round, self.transfer(request, plan))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ProbeError::Timeout(request.timeout_per_round)),
                };
            let elapsed = start.elapsed();

            match outcome {
                Ok(bytes) => {
                    round.succeed();
                    debug!(round = index, bytes, elapsed_ms = elapsed.as_millis() as u64, "round succeeded");
                    return TransferSample::succeeded(&round, bytes, elapsed, started_at);
                }
                Err(e) => {
                    let kind = e.round_kind();
                    round.fail(kind);
                    if e.is_retryable() && round.can_retry(self.retry.retry_limit) {
                        warn!(round = index, attempt = round.attempts(), error = %e, "round failed, retrying");
                        tokio::time::sleep(self.retry.backoff).await;
                        continue;
                    }
                    warn!(round = index, attempts = round.attempts(), error = %e, "round failed");
                    return TransferSample::failed(&round, kind, elapsed, started_at);
                }
            }
        }
    }

    /// One attempt; verifies the byte count the other side reports.
    async fn transfer(&self, request: &TestRequest, plan: &TransferPlan) -> Result<u64, ProbeError> {
        let expected = request.payload_size;
        let actual = match plan {
            TransferPlan::Download => self.transport.download(expected).await?,
            TransferPlan::Upload(payload) => {
                let ack = self.transport.upload(payload.clone()).await?;
                if !ack.success {
                    return Err(ProbeError::TransportFailure(
                        "receiver reported an unsuccessful upload".to_string(),
                    ));
                }
                ack.size
            }
        };
        if actual != expected {
            return Err(ProbeError::ShortTransfer { expected, actual });
        }
        Ok(actual)
    }

    async fn report_round(&self, request: &TestRequest, sample: &TransferSample) {
        let (name, value) = match (sample.succeeded, request.is_latency_probe()) {
            (true, true) => ("latency_ms", sample.latency_ms()),
            (true, false) => ("throughput_bps", sample.throughput_bps()),
            (false, _) => ("failed", Some(1.0)),
        };
        if let Some(value) = value {
            self.record(&round_metric(name, request.direction, sample.round), value)
                .await;
        }
    }

    async fn report_result(&self, result: &TestResult) {
        let (name, stat) = if result.latency_ms.is_some() {
            ("latency_ms", result.latency_ms)
        } else {
            ("throughput_bps", result.throughput_bps)
        };
        match stat {
            Some(stat) => {
                self.record(&run_metric(name, result.direction, result.round_count), stat.median)
                    .await
            }
            None => debug!(run_id = %result.run_id, "no successful rounds, nothing to report"),
        }
    }

    async fn record(&self, metric_name: &str, value: f64) {
        if let Err(e) = self.sink.record(metric_name, value).await {
            warn!(metric = metric_name, error = %e, "failed to report metric");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
