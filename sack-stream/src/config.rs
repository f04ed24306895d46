//! Per-connection configuration.
//!
//! Every knob the protocol engine reads lives in [`Config`].  The defaults
//! give a Selective-Repeat sender with SACK and Reno congestion control;
//! switching [`Config::retransmit`] to [`RetransmitPolicy::GoBackN`] and
//! turning off [`Config::sack`] yields the classic Go-Back-N baseline.

use std::time::Duration;

use thiserror::Error;

use crate::packet::{MAX_PAYLOAD, MAX_SACK_BLOCKS};
use crate::timer::TimerConfig;

/// What the sender resends when the retransmission timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetransmitPolicy {
    /// One timer for the whole window; a timeout resends every outstanding
    /// segment from `base` to `next_seq`.
    GoBackN,
    /// One timer per segment; a timeout resends only the segment at `base`
    /// and restarts the other lapsed timers.
    #[default]
    SelectiveRepeat,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum segment size (payload bytes per datagram).
    pub mss: usize,
    /// Receive buffer advertised to the peer, in bytes.
    pub recv_window: u16,
    /// Application bytes accepted by `write` before it applies back-pressure.
    pub send_buffer: usize,
    pub retransmit: RetransmitPolicy,
    /// Report and honour selective acknowledgments.
    pub sack: bool,
    /// SACK blocks placed in one ACK (lowest ranges win when truncating).
    pub max_sack_blocks: usize,
    /// Run Reno congestion control; otherwise the window is fixed.
    pub congestion_control: bool,
    /// Initial slow-start threshold in bytes, `None` for unbounded.
    pub initial_ssthresh: Option<u32>,
    /// Duplicate ACKs that trigger a fast retransmit.
    pub dup_ack_threshold: u32,
    pub timer: TimerConfig,
    /// Consecutive timeouts without progress before the connection fails.
    pub max_retries: u32,
    /// First sequence number of our outbound stream.
    pub local_isn: u32,
    /// First sequence number expected from the peer.
    pub peer_isn: u32,
    /// Capacity of the bounded queue between the engine and the reader.
    pub delivery_queue: usize,
    /// How long to wait for the peer's FIN after ours has been acknowledged.
    pub fin_timeout: Duration,
    /// Linger after both FINs so a retransmitted peer FIN is re-acknowledged.
    pub time_wait: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mss: 1024,
            recv_window: u16::MAX,
            send_buffer: 256 * 1024,
            retransmit: RetransmitPolicy::default(),
            sack: true,
            max_sack_blocks: 3,
            congestion_control: true,
            initial_ssthresh: None,
            dup_ack_threshold: 3,
            timer: TimerConfig::default(),
            max_retries: 6,
            local_isn: 0,
            peer_isn: 0,
            delivery_queue: 64,
            fin_timeout: Duration::from_secs(30),
            time_wait: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// Plain Go-Back-N: whole-window retransmission, no SACK.
    pub fn go_back_n() -> Self {
        Self {
            retransmit: RetransmitPolicy::GoBackN,
            sack: false,
            ..Self::default()
        }
    }

    /// Selective Repeat driven by duplicate ACKs only, no SACK blocks.
    pub fn selective_repeat() -> Self {
        Self {
            retransmit: RetransmitPolicy::SelectiveRepeat,
            sack: false,
            ..Self::default()
        }
    }

    /// Check that the values are usable together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mss == 0 || self.mss > MAX_PAYLOAD {
            return Err(ConfigError::Mss(self.mss));
        }
        if usize::from(self.recv_window) < self.mss {
            return Err(ConfigError::WindowSmallerThanMss {
                window: self.recv_window,
                mss: self.mss,
            });
        }
        if self.sack && (self.max_sack_blocks == 0 || self.max_sack_blocks > MAX_SACK_BLOCKS) {
            return Err(ConfigError::SackBlocks(self.max_sack_blocks));
        }
        if self.dup_ack_threshold == 0 {
            return Err(ConfigError::DupAckThreshold);
        }
        if self.delivery_queue == 0 || self.send_buffer == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        let t = &self.timer;
        if t.min_rto.is_zero() || t.min_rto > t.max_rto || t.initial_rto > t.max_rto {
            return Err(ConfigError::Rto);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("mss {0} is outside 1..={MAX_PAYLOAD}")]
    Mss(usize),
    #[error("receive window {window} is smaller than one segment ({mss})")]
    WindowSmallerThanMss { window: u16, mss: usize },
    #[error("max_sack_blocks {0} is outside 1..={MAX_SACK_BLOCKS}")]
    SackBlocks(usize),
    #[error("dup_ack_threshold must be at least 1")]
    DupAckThreshold,
    #[error("queue and buffer capacities must be non-zero")]
    ZeroCapacity,
    #[error("RTO bounds must satisfy 0 < min_rto <= max_rto and initial_rto <= max_rto")]
    Rto,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
        assert_eq!(Config::go_back_n().validate(), Ok(()));
        assert_eq!(Config::selective_repeat().validate(), Ok(()));
    }

    #[test]
    fn presets_select_policy() {
        let gbn = Config::go_back_n();
        assert_eq!(gbn.retransmit, RetransmitPolicy::GoBackN);
        assert!(!gbn.sack);
        assert_eq!(Config::default().retransmit, RetransmitPolicy::SelectiveRepeat);
    }

    #[test]
    fn rejects_zero_mss() {
        let cfg = Config { mss: 0, ..Config::default() };
        assert_eq!(cfg.validate(), Err(ConfigError::Mss(0)));
    }

    #[test]
    fn rejects_window_below_mss() {
        let cfg = Config {
            mss: 1000,
            recv_window: 999,
            ..Config::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::WindowSmallerThanMss { .. })
        ));
    }

    #[test]
    fn rejects_too_many_sack_blocks() {
        let cfg = Config {
            max_sack_blocks: MAX_SACK_BLOCKS + 1,
            ..Config::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::SackBlocks(MAX_SACK_BLOCKS + 1)));

        // Irrelevant when SACK is off.
        let cfg = Config { sack: false, ..cfg };
        assert_eq!(cfg.validate(), Ok(()));
    }

    #[test]
    fn rejects_inverted_rto_bounds() {
        let mut cfg = Config::default();
        cfg.timer.min_rto = Duration::from_secs(120);
        assert_eq!(cfg.validate(), Err(ConfigError::Rto));
    }
}
