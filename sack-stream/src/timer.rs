//! Retransmission timer management.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within a bounded time.  This module provides:
//! - [`RtoEstimator`] — smoothed RTT / RTT variance tracking that yields the
//!   base retransmission timeout (RTO).
//! - [`RetransmitTimer`] — the deadlines themselves, either one for the whole
//!   window ([`TimerMode::PerWindow`], Go-Back-N) or one per transmitted
//!   segment ([`TimerMode::PerSegment`], Selective Repeat).
//!
//! RTO is computed using Jacobson's algorithm (RFC 6298):
//!   `RTO = SRTT + 4 × RTTVAR`
//! clamped to `[min_rto, max_rto]`, and doubles on each consecutive timeout
//! (exponential back-off) up to `max_rto`.  The back-off is cleared as soon
//! as the window makes progress.
//!
//! Deadlines are plain [`Instant`]s supplied by the caller; nothing here
//! reads the clock, which keeps every transition deterministic under test.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::RetransmitPolicy;

/// Adjustable timeout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// RTO before any RTT sample is available.
    pub initial_rto: Duration,
    /// Lower bound for the computed RTO.
    pub min_rto: Duration,
    /// Maximum RTO after repeated back-off.
    pub max_rto: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            initial_rto: Duration::from_millis(1000),
            min_rto: Duration::from_millis(200),
            max_rto: Duration::from_secs(60),
        }
    }
}

/// RFC 6298 round-trip estimator.
#[derive(Debug, Clone)]
pub struct RtoEstimator {
    config: TimerConfig,
    /// Smoothed RTT estimate (SRTT).
    srtt: Option<Duration>,
    /// RTT variance estimate (RTTVAR).
    rttvar: Option<Duration>,
    /// RTO derived from the estimates, before back-off.
    rto: Duration,
}

impl RtoEstimator {
    pub fn new(config: TimerConfig) -> Self {
        Self {
            config,
            srtt: None,
            rttvar: None,
            rto: config.initial_rto,
        }
    }

    /// Record a new RTT sample and update SRTT / RTTVAR / RTO (RFC 6298 §2).
    ///
    /// On the first sample:  SRTT = R,  RTTVAR = R/2,  RTO = SRTT + 4·RTTVAR.
    /// Subsequent samples:   RTTVAR = 3/4·RTTVAR + 1/4·|SRTT − R|
    ///                       SRTT   = 7/8·SRTT   + 1/8·R
    pub fn record_rtt_sample(&mut self, sample: Duration) {
        let (srtt, rttvar) = match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => {
                let diff = sample.abs_diff(srtt);
                (srtt * 7 / 8 + sample / 8, rttvar * 3 / 4 + diff / 4)
            }
            _ => (sample, sample / 2),
        };
        self.srtt = Some(srtt);
        self.rttvar = Some(rttvar);
        self.rto = (srtt + rttvar * 4).clamp(self.config.min_rto, self.config.max_rto);
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    /// RTO from the current estimates, without back-off.
    pub fn rto(&self) -> Duration {
        self.rto
    }
}

/// Which deadlines the timer keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// A single timer covering the oldest outstanding segment.
    PerWindow,
    /// An independent timer for each transmitted, unacknowledged segment.
    PerSegment,
}

impl From<RetransmitPolicy> for TimerMode {
    fn from(policy: RetransmitPolicy) -> Self {
        match policy {
            RetransmitPolicy::GoBackN => TimerMode::PerWindow,
            RetransmitPolicy::SelectiveRepeat => TimerMode::PerSegment,
        }
    }
}

/// Retransmission deadlines for one connection, keyed by segment offset.
#[derive(Debug)]
pub struct RetransmitTimer {
    mode: TimerMode,
    config: TimerConfig,
    estimator: RtoEstimator,
    /// Consecutive timeouts since the window last advanced.
    backoff: u32,
    deadlines: BTreeMap<u64, Instant>,
}

impl RetransmitTimer {
    pub fn new(config: TimerConfig, mode: TimerMode) -> Self {
        Self {
            mode,
            config,
            estimator: RtoEstimator::new(config),
            backoff: 0,
            deadlines: BTreeMap::new(),
        }
    }

    pub fn mode(&self) -> TimerMode {
        self.mode
    }

    /// Current timeout including exponential back-off, capped at `max_rto`.
    pub fn rto(&self) -> Duration {
        let factor = 1u32.checked_shl(self.backoff).unwrap_or(u32::MAX);
        self.estimator
            .rto()
            .checked_mul(factor)
            .unwrap_or(self.config.max_rto)
            .min(self.config.max_rto)
    }

    /// Consecutive timeouts without progress.
    pub fn backoff_count(&self) -> u32 {
        self.backoff
    }

    pub fn estimator(&self) -> &RtoEstimator {
        &self.estimator
    }

    pub fn record_rtt_sample(&mut self, sample: Duration) {
        self.estimator.record_rtt_sample(sample);
    }

    /// A segment starting at `offset` was (re)transmitted at `now`.
    ///
    /// Per-segment timers always restart; the per-window timer only starts
    /// when it is not already running.
    pub fn on_transmit(&mut self, offset: u64, now: Instant) {
        let deadline = now + self.rto();
        match self.mode {
            TimerMode::PerSegment => {
                self.deadlines.insert(offset, deadline);
            }
            TimerMode::PerWindow => {
                if self.deadlines.is_empty() {
                    self.deadlines.insert(offset, deadline);
                }
            }
        }
    }

    /// `base` advanced; drop covered deadlines and clear the back-off.
    ///
    /// The per-window timer is rearmed for the new `base` when data is still
    /// outstanding and cancelled otherwise.
    pub fn on_progress(&mut self, base: u64, outstanding: bool, now: Instant) {
        self.backoff = 0;
        match self.mode {
            TimerMode::PerSegment => {
                let kept = self.deadlines.split_off(&base);
                let covered = std::mem::replace(&mut self.deadlines, kept);
                if !outstanding {
                    self.deadlines.clear();
                } else if !self.deadlines.contains_key(&base) {
                    // An ACK inside a segment re-keys its tail at `base`; the
                    // tail keeps the deadline of the segment it came from.
                    let deadline = covered
                        .values()
                        .next_back()
                        .copied()
                        .unwrap_or_else(|| now + self.rto());
                    self.deadlines.insert(base, deadline);
                }
            }
            TimerMode::PerWindow => {
                self.deadlines.clear();
                if outstanding {
                    self.deadlines.insert(base, now + self.rto());
                }
            }
        }
    }

    /// Restart the timer for `offset` without retransmitting it.
    pub fn rearm(&mut self, offset: u64, now: Instant) {
        self.deadlines.insert(offset, now + self.rto());
    }

    /// Stop timing a single segment (it was selectively acknowledged, or
    /// expired together with another one).
    pub fn cancel(&mut self, offset: u64) {
        self.deadlines.remove(&offset);
    }

    pub fn cancel_all(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_armed(&self) -> bool {
        !self.deadlines.is_empty()
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Offset of the segment whose deadline passed first, ties broken by the
    /// lowest offset.
    pub fn expired(&self, now: Instant) -> Option<u64> {
        self.deadlines
            .iter()
            .filter(|(_, &deadline)| deadline <= now)
            .min_by_key(|(&offset, &deadline)| (deadline, offset))
            .map(|(&offset, _)| offset)
    }

    /// The timer for `offset` fired: forget it and back off.
    ///
    /// The retransmission that follows rearms the timer through
    /// [`on_transmit`](Self::on_transmit) with the doubled RTO.
    pub fn on_timeout(&mut self, offset: u64) {
        self.deadlines.remove(&offset);
        self.backoff = self.backoff.saturating_add(1);
    }
}
