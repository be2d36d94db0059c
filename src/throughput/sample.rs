//! Per-round samples, the round state machine, and the aggregated result.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stats::Statistic;
use super::{Direction, TestRequest};
use crate::error::ErrorKind;

// ---------------------------------------------------------------------------
// RoundState
// ---------------------------------------------------------------------------

/// Lifecycle of one round.
///
/// `Pending -> InFlight -> {Succeeded | Failed | TimedOut}`; a failed or
/// timed-out round may go back to `InFlight` while retries remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundState {
    Pending,
    InFlight,
    Succeeded,
    Failed,
    TimedOut,
}

impl RoundState {
    pub fn can_transition_to(self, next: RoundState) -> bool {
        use RoundState::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (InFlight, Succeeded)
                | (InFlight, Failed)
                | (InFlight, TimedOut)
                | (Failed, InFlight)
                | (TimedOut, InFlight)
        )
    }
}

/// Tracks the state and attempt count of a single round.
#[derive(Debug)]
pub struct Round {
    index: u32,
    state: RoundState,
    attempts: u32,
}

impl Round {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            state: RoundState::Pending,
            attempts: 0,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn transition(&mut self, next: RoundState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid round transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    /// Move to `InFlight` and count the attempt.
    pub fn begin_attempt(&mut self) {
        self.transition(RoundState::InFlight);
        self.attempts += 1;
    }

    pub fn succeed(&mut self) {
        self.transition(RoundState::Succeeded);
    }

    pub fn fail(&mut self, kind: ErrorKind) {
        let next = if kind == ErrorKind::Timeout {
            RoundState::TimedOut
        } else {
            RoundState::Failed
        };
        self.transition(next);
    }

    /// Whether another attempt is allowed with `retry_limit` extra attempts.
    pub fn can_retry(&self, retry_limit: u32) -> bool {
        matches!(self.state, RoundState::Failed | RoundState::TimedOut)
            && self.attempts <= retry_limit
    }
}

// ---------------------------------------------------------------------------
// TransferSample
// ---------------------------------------------------------------------------

/// Outcome of one round (its final attempt).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferSample {
    /// 1-based round number.
    pub round: u32,
    pub bytes_transferred: u64,
    #[serde(rename = "elapsed_ms", with = "duration_ms")]
    pub elapsed: Duration,
    pub started_at: DateTime<Utc>,
    pub succeeded: bool,
    pub error_kind: Option<ErrorKind>,
    pub attempts: u32,
}

impl TransferSample {
    pub fn succeeded(
        round: &Round,
        bytes_transferred: u64,
        elapsed: Duration,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            round: round.index(),
            bytes_transferred,
            elapsed,
            started_at,
            succeeded: true,
            error_kind: None,
            attempts: round.attempts(),
        }
    }

    pub fn failed(
        round: &Round,
        kind: ErrorKind,
        elapsed: Duration,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            round: round.index(),
            bytes_transferred: 0,
            elapsed,
            started_at,
            succeeded: false,
            error_kind: Some(kind),
            attempts: round.attempts(),
        }
    }

    /// Bytes per second, for successful samples with a measurable duration.
    pub fn throughput_bps(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        (self.succeeded && secs > 0.0).then(|| self.bytes_transferred as f64 / secs)
    }

    pub fn latency_ms(&self) -> Option<f64> {
        self.succeeded.then(|| self.elapsed.as_secs_f64() * 1000.0)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(ms.max(0.0) / 1000.0))
    }
}

// ---------------------------------------------------------------------------
// TestResult
// ---------------------------------------------------------------------------

/// Aggregated outcome of a test run, complete or partial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub run_id: Uuid,
    pub direction: Direction,
    /// Rounds requested; `samples` may be shorter if the run was cancelled.
    pub round_count: u32,
    pub payload_size: u64,
    pub samples: Vec<TransferSample>,
    /// `None` when no round succeeded.
    pub throughput_bps: Option<Statistic>,
    /// Only set for latency probes.
    pub latency_ms: Option<Statistic>,
    pub success_count: usize,
    pub failure_count: usize,
    pub cancelled: bool,
}

impl TestResult {
    pub fn from_samples(
        run_id: Uuid,
        request: &TestRequest,
        samples: Vec<TransferSample>,
        cancelled: bool,
    ) -> Self {
        let success_count = samples.iter().filter(|s| s.succeeded).count();
        let failure_count = samples.len() - success_count;

        let throughputs: Vec<f64> = samples.iter().filter_map(|s| s.throughput_bps()).collect();
        let latency_ms = if request.is_latency_probe() {
            let latencies: Vec<f64> = samples.iter().filter_map(|s| s.latency_ms()).collect();
            Statistic::from_values(&latencies)
        } else {
            None
        };

        Self {
            run_id,
            direction: request.direction,
            round_count: request.round_count,
            payload_size: request.payload_size,
            throughput_bps: Statistic::from_values(&throughputs),
            latency_ms,
            success_count,
            failure_count,
            samples,
            cancelled,
        }
    }

    /// Median throughput in megabits per second, if any round succeeded.
    pub fn median_mbps(&self) -> Option<f64> {
        self.throughput_bps.map(|s| s.median * 8.0 / 1_000_000.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
