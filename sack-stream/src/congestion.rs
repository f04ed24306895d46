//! Congestion control.
//!
//! The sender never has more than `min(peer window, cwnd)` bytes in flight.
//! How `cwnd` moves is decided by a [`CongestionControl`] implementation,
//! which only ever sees four signals: new data acknowledged, the duplicate
//! ACK that triggers a fast retransmit, further duplicate ACKs, and a
//! retransmission timeout.
//!
//! [`Reno`] is the classic AIMD state machine (RFC 5681):
//!
//! ```text
//!                 cwnd >= ssthresh
//!   SlowStart ─────────────────────────▶ CongestionAvoidance
//!       ▲   ╲                                 │        ▲
//!       │    ╲ 3rd dup ACK        3rd dup ACK │        │ new ACK
//!       │     ╲                               ▼        │
//!       │      ╲──────────────────────▶ FastRecovery ──┘
//!       │                                     │
//!       └──────────── timeout (any phase) ◀───┘
//! ```
//!
//! [`FixedWindow`] leaves the window alone, so only the peer's advertised
//! window limits the sender.

/// Phase of the [`Reno`] state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SlowStart,
    CongestionAvoidance,
    FastRecovery,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A pluggable congestion-window policy.  All values are in bytes.
pub trait CongestionControl: Send + std::fmt::Debug {
    /// Current congestion window.
    fn cwnd(&self) -> u32;

    /// Current slow-start threshold; `None` when unbounded.
    fn ssthresh(&self) -> Option<u32>;

    /// An ACK covered `acked_segments` previously unacknowledged segments.
    fn on_new_ack(&mut self, acked_segments: u32);

    /// The duplicate-ACK threshold was reached and a fast retransmit is about
    /// to be sent.
    fn on_fast_retransmit(&mut self);

    /// A duplicate ACK arrived after the fast retransmit.
    fn on_duplicate_ack(&mut self);

    /// The retransmission timer expired.
    fn on_timeout(&mut self);

    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Reno
// ---------------------------------------------------------------------------

/// Slow start, congestion avoidance, fast retransmit and fast recovery.
#[derive(Debug, Clone)]
pub struct Reno {
    mss: u32,
    cwnd: u32,
    /// `u32::MAX` stands for "infinite".
    ssthresh: u32,
    phase: Phase,
}

impl Reno {
    /// Start in slow start with `cwnd = 1 MSS`.
    pub fn new(mss: u32, initial_ssthresh: Option<u32>) -> Self {
        let mss = mss.max(1);
        Self {
            mss,
            cwnd: mss,
            ssthresh: initial_ssthresh.unwrap_or(u32::MAX),
            phase: Phase::SlowStart,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        if self.phase != phase {
            log::debug!(
                "[reno] {} -> {} (cwnd={}, ssthresh={})",
                self.phase,
                phase,
                self.cwnd,
                self.ssthresh
            );
            self.phase = phase;
        }
    }

    /// Multiplicative decrease: half the current window, never below 1 MSS.
    fn halved(&self) -> u32 {
        (self.cwnd / 2).max(self.mss)
    }

    fn slow_start_ack(&mut self, acked_segments: u32) {
        self.cwnd = self
            .cwnd
            .saturating_add(self.mss.saturating_mul(acked_segments.max(1)));
        if self.cwnd >= self.ssthresh {
            self.enter(Phase::CongestionAvoidance);
        }
    }

    fn congestion_avoidance_ack(&mut self) {
        let increment = (u64::from(self.mss) * u64::from(self.mss) / u64::from(self.cwnd)).max(1);
        self.cwnd = self.cwnd.saturating_add(increment as u32);
    }

    fn fast_recovery_exit(&mut self) {
        self.cwnd = self.ssthresh;
        self.enter(Phase::CongestionAvoidance);
    }
}

impl CongestionControl for Reno {
    fn cwnd(&self) -> u32 {
        self.cwnd
    }

    fn ssthresh(&self) -> Option<u32> {
        (self.ssthresh != u32::MAX).then_some(self.ssthresh)
    }

    fn on_new_ack(&mut self, acked_segments: u32) {
        match self.phase {
            Phase::SlowStart => self.slow_start_ack(acked_segments),
            Phase::CongestionAvoidance => self.congestion_avoidance_ack(),
            Phase::FastRecovery => self.fast_recovery_exit(),
        }
    }

    fn on_fast_retransmit(&mut self) {
        if self.phase == Phase::FastRecovery {
            return;
        }
        self.ssthresh = self.halved();
        self.cwnd = self.ssthresh.saturating_add(3 * self.mss);
        self.enter(Phase::FastRecovery);
    }

    fn on_duplicate_ack(&mut self) {
        if self.phase == Phase::FastRecovery {
            self.cwnd = self.cwnd.saturating_add(self.mss);
        }
    }

    fn on_timeout(&mut self) {
        self.ssthresh = self.halved();
        self.cwnd = self.mss;
        self.enter(Phase::SlowStart);
    }

    fn name(&self) -> &'static str {
        "reno"
    }
}

// ---------------------------------------------------------------------------
// FixedWindow
// ---------------------------------------------------------------------------

/// A constant window; congestion signals are ignored.
#[derive(Debug, Clone)]
pub struct FixedWindow {
    cwnd: u32,
}

impl FixedWindow {
    pub fn new(cwnd: u32) -> Self {
        Self { cwnd }
    }
}

impl CongestionControl for FixedWindow {
    fn cwnd(&self) -> u32 {
        self.cwnd
    }

    fn ssthresh(&self) -> Option<u32> {
        None
    }

    fn on_new_ack(&mut self, _acked_segments: u32) {}

    fn on_fast_retransmit(&mut self) {}

    fn on_duplicate_ack(&mut self) {}

    fn on_timeout(&mut self) {}

    fn name(&self) -> &'static str {
        "fixed"
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const MSS: u32 = 1000;

    /// Acknowledge one full window, one segment per ACK.
    fn ack_round(cc: &mut Reno) {
        let segments = cc.cwnd() / MSS;
        for _ in 0..segments {
            cc.on_new_ack(1);
        }
    }

    #[test]
    fn starts_in_slow_start_with_one_segment() {
        let cc = Reno::new(MSS, None);
        assert_eq!(cc.phase(), Phase::SlowStart);
        assert_eq!(cc.cwnd(), MSS);
        assert_eq!(cc.ssthresh(), None);
    }

    #[test]
    fn slow_start_doubles_per_round_trip_then_grows_linearly() {
        let mut cc = Reno::new(MSS, Some(8 * MSS));

        for expected in [2, 4, 8] {
            ack_round(&mut cc);
            assert_eq!(cc.cwnd(), expected * MSS);
        }
        assert_eq!(cc.phase(), Phase::CongestionAvoidance);

        // One MSS per round trip (slightly less, from integer division).
        let before = cc.cwnd();
        ack_round(&mut cc);
        let grown = cc.cwnd() - before;
        assert!(grown > MSS * 9 / 10 && grown <= MSS, "grew by {grown}");
    }

    #[test]
    fn eight_single_acks_from_one_segment() {
        let mut cc = Reno::new(MSS, Some(8 * MSS));
        let mut seen = Vec::new();
        for _ in 0..8 {
            cc.on_new_ack(1);
            seen.push(cc.cwnd());
        }
        // +1 MSS per ACK until ssthresh, then MSS*MSS/cwnd.
        assert_eq!(&seen[..7], &[2000, 3000, 4000, 5000, 6000, 7000, 8000]);
        assert_eq!(seen[7], 8125);
    }

    #[test]
    fn cumulative_ack_counts_every_segment_in_slow_start() {
        let mut cc = Reno::new(MSS, None);
        cc.on_new_ack(3);
        assert_eq!(cc.cwnd(), 4 * MSS);
        assert_eq!(cc.phase(), Phase::SlowStart);
    }

    #[test]
    fn congestion_avoidance_is_additive() {
        let mut cc = Reno::new(MSS, Some(8 * MSS));
        while cc.phase() == Phase::SlowStart {
            cc.on_new_ack(1);
        }
        assert_eq!(cc.cwnd(), 8000);
        for _ in 0..8 {
            cc.on_new_ack(1);
        }
        assert!((8900..=9000).contains(&cc.cwnd()), "cwnd {}", cc.cwnd());
    }

    #[test]
    fn fast_retransmit_enters_fast_recovery() {
        let mut cc = Reno::new(MSS, None);
        for _ in 0..9 {
            cc.on_new_ack(1);
        }
        assert_eq!(cc.cwnd(), 10 * MSS);

        cc.on_fast_retransmit();
        assert_eq!(cc.phase(), Phase::FastRecovery);
        assert_eq!(cc.ssthresh(), Some(5 * MSS));
        assert_eq!(cc.cwnd(), 8 * MSS);

        // Further duplicates inflate the window.
        cc.on_duplicate_ack();
        cc.on_duplicate_ack();
        assert_eq!(cc.cwnd(), 10 * MSS);

        // A second trigger while recovering changes nothing.
        cc.on_fast_retransmit();
        assert_eq!(cc.ssthresh(), Some(5 * MSS));

        // New data deflates to ssthresh.
        cc.on_new_ack(1);
        assert_eq!(cc.phase(), Phase::CongestionAvoidance);
        assert_eq!(cc.cwnd(), 5 * MSS);
    }

    #[test]
    fn duplicate_ack_outside_recovery_is_ignored() {
        let mut cc = Reno::new(MSS, None);
        cc.on_duplicate_ack();
        assert_eq!(cc.cwnd(), MSS);
        assert_eq!(cc.phase(), Phase::SlowStart);
    }

    #[rstest]
    #[case::slow_start(Phase::SlowStart)]
    #[case::congestion_avoidance(Phase::CongestionAvoidance)]
    #[case::fast_recovery(Phase::FastRecovery)]
    fn timeout_resets_from_any_phase(#[case] phase: Phase) {
        let mut cc = Reno::new(MSS, Some(4 * MSS));
        for _ in 0..5 {
            cc.on_new_ack(1);
        }
        if phase == Phase::SlowStart {
            cc = Reno::new(MSS, None);
            for _ in 0..5 {
                cc.on_new_ack(1);
            }
        }
        if phase == Phase::FastRecovery {
            cc.on_fast_retransmit();
        }
        assert_eq!(cc.phase(), phase);

        let before = cc.cwnd();
        cc.on_timeout();
        assert_eq!(cc.phase(), Phase::SlowStart);
        assert_eq!(cc.cwnd(), MSS);
        assert_eq!(cc.ssthresh(), Some((before / 2).max(MSS)));
    }

    #[test]
    fn ssthresh_never_below_one_segment() {
        let mut cc = Reno::new(MSS, None);
        cc.on_timeout();
        cc.on_timeout();
        assert_eq!(cc.ssthresh(), Some(MSS));
        assert_eq!(cc.cwnd(), MSS);
    }

    #[test]
    fn fixed_window_ignores_signals() {
        let mut cc = FixedWindow::new(64_000);
        cc.on_new_ack(10);
        cc.on_fast_retransmit();
        cc.on_duplicate_ack();
        cc.on_timeout();
        assert_eq!(cc.cwnd(), 64_000);
        assert_eq!(cc.ssthresh(), None);
        assert_eq!(cc.name(), "fixed");
    }
}
