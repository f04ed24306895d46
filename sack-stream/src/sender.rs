//! Send-side sliding window.
//!
//! [`SendWindow`] owns every byte the application has written until the peer
//! acknowledges it.  Data is cut into segments of at most `mss` bytes and
//! kept in an ordered map keyed by absolute stream offset.
//!
//! # Sequence-number layout
//!
//! ```text
//!   base              snd_max                     next_seq
//!    │                   │                            │
//! ───┼───────────────────┼────────────────────────────┼──────▶ offset
//!    │ <── in flight ──▶ │ <── submitted, unsent ───▶ │
//!    │                                                │
//!    └──────────────── unacked (BTreeMap) ────────────┘
//! ```
//!
//! # Protocol contract
//!
//! - ACKs are **cumulative**: `ack = K` frees every byte below `K` and moves
//!   `base` to `K`.  A `K` that lands inside a segment trims its head.
//! - With SACK enabled, segments fully covered by a SACK block are flagged
//!   `sacked`; they stay in the map (base does not move) but are never
//!   retransmitted.
//! - Timeouts follow the [`RetransmitPolicy`]: Go-Back-N resends everything
//!   outstanding, Selective Repeat only the segment whose timer fired.
//! - The configured number of duplicate ACKs triggers a fast retransmit of
//!   the segment at `base`, or with SACK of every hole below the highest
//!   SACKed byte.
//!
//! Nothing here touches a socket or a clock; the caller passes `now` in and
//! picks up [`admissible_to_send`](SendWindow::admissible_to_send) to build
//! packets.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{Config, RetransmitPolicy};
use crate::packet::SackBlock;
use crate::seq;

// ---------------------------------------------------------------------------
// InFlight
// ---------------------------------------------------------------------------

/// A segment held until acknowledged.
#[derive(Debug, Clone)]
pub struct InFlight {
    pub payload: Vec<u8>,
    /// Total number of times this segment has been transmitted (0 = unsent).
    pub tx_count: u32,
    /// Time of the most recent transmission (for RTT sampling).
    pub sent_at: Option<Instant>,
    /// Covered by a SACK block.
    pub sacked: bool,
    /// Waiting to be resent.
    pub retransmit: bool,
}

impl InFlight {
    fn new(payload: Vec<u8>) -> Self {
        Self {
            payload,
            tx_count: 0,
            sent_at: None,
            sacked: false,
            retransmit: false,
        }
    }

    fn len(&self) -> u64 {
        self.payload.len() as u64
    }

    fn is_pending(&self) -> bool {
        !self.sacked && (self.tx_count == 0 || self.retransmit)
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// How an incoming acknowledgment relates to the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckKind {
    /// `base` advanced.
    NewData {
        acked_bytes: u64,
        /// Segments removed from the window (a trimmed head does not count).
        acked_segments: u32,
        /// RTT measured on a segment that was transmitted exactly once.
        rtt: Option<Duration>,
    },
    /// Same cumulative ACK as before while data is outstanding.  The
    /// advertised window may have moved: the application on the far side
    /// drains concurrently with the gap being reported.
    Duplicate,
    /// Same cumulative ACK with nothing outstanding, new window.
    WindowUpdate,
    /// Behind `base` or beyond anything sent; ignored.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckOutcome {
    pub kind: AckKind,
    /// Offsets of segments that a SACK block covered for the first time.
    pub newly_sacked: Vec<u64>,
}

/// What a duplicate ACK means for the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DupAckAction {
    /// Below the threshold; keep waiting.
    Wait,
    /// The threshold was just reached.
    FastRetransmit,
    /// Past the threshold; already recovering.
    Inflate,
}

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SendWindow {
    isn: u32,
    /// Oldest unacknowledged offset (left window edge).
    base: u64,
    /// One past the highest byte ever transmitted.
    snd_max: u64,
    /// One past the last byte submitted by the application.
    next_seq: u64,
    unacked: BTreeMap<u64, InFlight>,
    /// Receive window last advertised by the peer.
    peer_window: u32,
    dup_ack_count: u32,
    dup_ack_threshold: u32,
    mss: usize,
    policy: RetransmitPolicy,
    sack: bool,
}

impl SendWindow {
    /// Empty window starting at `config.local_isn`.  Until the first ACK the
    /// peer is assumed to advertise the same receive window we do.
    pub fn new(config: &Config) -> Self {
        Self {
            isn: config.local_isn,
            base: 0,
            snd_max: 0,
            next_seq: 0,
            unacked: BTreeMap::new(),
            peer_window: u32::from(config.recv_window),
            dup_ack_count: 0,
            dup_ack_threshold: config.dup_ack_threshold,
            mss: config.mss,
            policy: config.retransmit,
            sack: config.sack,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn peer_window(&self) -> u32 {
        self.peer_window
    }

    pub fn dup_ack_count(&self) -> u32 {
        self.dup_ack_count
    }

    /// Bytes written by the application and not yet acknowledged.
    pub fn buffered(&self) -> u64 {
        self.next_seq - self.base
    }

    /// Every submitted byte has been acknowledged.
    pub fn is_empty(&self) -> bool {
        self.unacked.is_empty()
    }

    /// Something has been transmitted and not yet cumulatively acknowledged.
    pub fn has_outstanding(&self) -> bool {
        self.snd_max > self.base
    }

    /// Wire sequence number of absolute offset `offset`.
    pub fn wrap(&self, offset: u64) -> u32 {
        seq::wrap(self.isn, offset)
    }

    /// Absolute offset of the wire acknowledgment number `ack`.
    pub fn unwrap(&self, ack: u32) -> u64 {
        seq::unwrap(self.isn, self.base, ack)
    }

    pub fn segment(&self, offset: u64) -> Option<&InFlight> {
        self.unacked.get(&offset)
    }

    /// Append application bytes, cutting them into segments of at most `mss`.
    ///
    /// A short tail segment that has not been transmitted yet is topped up
    /// first, so many small writes do not each cost a datagram.
    pub fn submit(&mut self, mut data: &[u8]) {
        if let Some((_, last)) = self.unacked.iter_mut().next_back() {
            if last.tx_count == 0 && last.payload.len() < self.mss {
                let take = (self.mss - last.payload.len()).min(data.len());
                last.payload.extend_from_slice(&data[..take]);
                self.next_seq += take as u64;
                data = &data[take..];
            }
        }
        for chunk in data.chunks(self.mss) {
            self.unacked.insert(self.next_seq, InFlight::new(chunk.to_vec()));
            self.next_seq += chunk.len() as u64;
        }
    }

    /// Offsets of segments to put on the wire now, ascending.
    ///
    /// A segment qualifies when it has never been sent or is marked for
    /// retransmission, is not SACKed, and starts below `base + send_window`.
    /// The segment at `base` always qualifies so a zero window is probed.
    pub fn admissible_to_send(&self, send_window: u32) -> Vec<u64> {
        let limit = self.base + u64::from(send_window.max(1));
        self.unacked
            .range(self.base..limit)
            .filter(|(_, seg)| seg.is_pending())
            .map(|(&offset, _)| offset)
            .collect()
    }

    /// The segment at `offset` was handed to the transport at `now`.
    ///
    /// Returns `true` when this was a retransmission.
    pub fn record_sent(&mut self, offset: u64, now: Instant) -> bool {
        let Some(seg) = self.unacked.get_mut(&offset) else {
            return false;
        };
        seg.tx_count += 1;
        seg.sent_at = Some(now);
        seg.retransmit = false;
        self.snd_max = self.snd_max.max(offset + seg.len());
        seg.tx_count > 1
    }

    /// Process the acknowledgment fields of an incoming packet.
    pub fn on_ack(&mut self, ack: u32, sack: &[SackBlock], window: u16, now: Instant) -> AckOutcome {
        let ack = self.unwrap(ack);
        let window = u32::from(window);

        if ack < self.base || ack > self.snd_max {
            log::trace!("[sender] stale ack {ack} (base={}, snd_max={})", self.base, self.snd_max);
            return AckOutcome {
                kind: AckKind::Stale,
                newly_sacked: Vec::new(),
            };
        }

        let kind = if ack > self.base {
            let kind = self.slide(ack, now);
            self.dup_ack_count = 0;
            kind
        } else if self.has_outstanding() {
            AckKind::Duplicate
        } else if window != self.peer_window {
            AckKind::WindowUpdate
        } else {
            AckKind::Stale
        };
        self.peer_window = window;

        let newly_sacked = if self.sack {
            self.apply_sack(sack)
        } else {
            Vec::new()
        };
        AckOutcome { kind, newly_sacked }
    }

    /// Move `base` forward to `ack`, dropping and trimming covered segments.
    fn slide(&mut self, ack: u64, now: Instant) -> AckKind {
        let acked_bytes = ack - self.base;
        let mut acked_segments = 0u32;
        let mut rtt = None;

        let mut remaining = self.unacked.split_off(&ack);
        let covered = std::mem::take(&mut self.unacked);
        for (offset, seg) in covered {
            let end = offset + seg.len();
            if end <= ack {
                acked_segments += 1;
                // Karn: ambiguous samples from retransmitted segments are skipped.
                if seg.tx_count == 1 {
                    if let Some(sent_at) = seg.sent_at {
                        rtt = Some(now.saturating_duration_since(sent_at));
                    }
                }
            } else {
                // The ACK landed inside this segment; keep the tail.
                let skip = (ack - offset) as usize;
                let mut tail = seg;
                tail.payload.drain(..skip);
                remaining.insert(ack, tail);
            }
        }
        self.unacked = remaining;
        self.base = ack;

        log::debug!(
            "[sender] ack slid base to {} ({acked_bytes} bytes, {acked_segments} segments)",
            self.base
        );
        AckKind::NewData {
            acked_bytes,
            acked_segments,
            rtt,
        }
    }

    /// Flag segments fully covered by SACK blocks.
    fn apply_sack(&mut self, blocks: &[SackBlock]) -> Vec<u64> {
        let mut newly = Vec::new();
        for block in blocks {
            let start = seq::unwrap(self.isn, self.base, block.start);
            let end = start + u64::from(block.len());
            if start < self.base || end > self.snd_max {
                continue;
            }
            for (&offset, seg) in self.unacked.range_mut(start..end) {
                if offset + seg.len() <= end && seg.tx_count > 0 && !seg.sacked {
                    seg.sacked = true;
                    seg.retransmit = false;
                    newly.push(offset);
                }
            }
        }
        if !newly.is_empty() {
            log::trace!("[sender] sacked {newly:?}");
        }
        newly
    }

    /// Count a duplicate ACK for the current `base`.
    pub fn on_duplicate_ack(&mut self) -> DupAckAction {
        self.dup_ack_count += 1;
        log::debug!("[sender] duplicate ack #{} for {}", self.dup_ack_count, self.base);
        match self.dup_ack_count.cmp(&self.dup_ack_threshold) {
            std::cmp::Ordering::Less => DupAckAction::Wait,
            std::cmp::Ordering::Equal => DupAckAction::FastRetransmit,
            std::cmp::Ordering::Greater => DupAckAction::Inflate,
        }
    }

    /// Mark the fast-retransmit set and return it.
    ///
    /// Without SACK information only `base` is resent.  With it, every
    /// transmitted, un-SACKed segment below the highest SACKed byte (the
    /// holes) is resent, bounded by `send_window`.
    pub fn mark_fast_retransmit(&mut self, send_window: u32) -> Vec<u64> {
        let highest_sacked = self
            .unacked
            .iter()
            .rev()
            .find(|(_, seg)| seg.sacked)
            .map(|(&offset, seg)| offset + seg.len());

        let limit = self.base + u64::from(send_window.max(1));
        let marked: Vec<u64> = match highest_sacked {
            Some(sacked_end) if self.sack => self
                .unacked
                .range(self.base..sacked_end.min(limit))
                .filter(|(_, seg)| !seg.sacked && seg.tx_count > 0)
                .map(|(&offset, _)| offset)
                .collect(),
            _ => self.unacked.keys().next().copied().into_iter().collect(),
        };
        for offset in &marked {
            if let Some(seg) = self.unacked.get_mut(offset) {
                seg.retransmit = true;
            }
        }
        log::debug!("[sender] fast retransmit {marked:?}");
        marked
    }

    /// The retransmission timer for `expired` fired.  Returns the offsets
    /// marked for retransmission: every outstanding unsacked segment under
    /// Go-Back-N, only the lowest one (the segment at `base`) under
    /// Selective Repeat.
    pub fn on_timeout(&mut self, expired: u64) -> Vec<u64> {
        self.dup_ack_count = 0;
        let mut outstanding = self
            .unacked
            .iter()
            .filter(|(_, seg)| !seg.sacked && seg.tx_count > 0)
            .map(|(&offset, _)| offset);
        let marked: Vec<u64> = match self.policy {
            RetransmitPolicy::GoBackN => outstanding.collect(),
            RetransmitPolicy::SelectiveRepeat => outstanding.next().into_iter().collect(),
        };
        for offset in &marked {
            if let Some(seg) = self.unacked.get_mut(offset) {
                seg.retransmit = true;
            }
        }
        log::debug!("[sender] timeout at {expired}, retransmitting {} segment(s)", marked.len());
        marked
    }

    /// Structural invariants: `base <= snd_max <= next_seq` and the
    /// segments tile `[base, next_seq)` exactly.
    pub fn invariants_hold(&self) -> bool {
        if self.base > self.snd_max || self.snd_max > self.next_seq {
            return false;
        }
        let mut cursor = self.base;
        for (&offset, seg) in &self.unacked {
            if offset != cursor || seg.payload.is_empty() {
                return false;
            }
            cursor += seg.len();
        }
        cursor == self.next_seq
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MSS: usize = 100;

    fn config(policy: RetransmitPolicy, sack: bool) -> Config {
        Config {
            mss: MSS,
            recv_window: 10_000,
            retransmit: policy,
            sack,
            ..Config::default()
        }
    }

    /// A window with `n` full segments, all transmitted at `now`.
    fn sent_window(cfg: &Config, n: usize, now: Instant) -> SendWindow {
        let mut s = SendWindow::new(cfg);
        s.submit(&vec![7u8; n * MSS]);
        for offset in s.admissible_to_send(u32::MAX) {
            s.record_sent(offset, now);
        }
        s
    }

    fn ack(s: &SendWindow, offset: u64) -> u32 {
        s.wrap(offset)
    }

    fn sack_block(s: &SendWindow, start: u64, end: u64) -> SackBlock {
        SackBlock::new(s.wrap(start), s.wrap(end))
    }

    #[test]
    fn initial_state() {
        let s = SendWindow::new(&config(RetransmitPolicy::GoBackN, false));
        assert_eq!(s.base(), 0);
        assert_eq!(s.next_seq(), 0);
        assert!(s.is_empty());
        assert!(!s.has_outstanding());
        assert!(s.invariants_hold());
    }

    #[test]
    fn submit_splits_into_mss_segments() {
        let mut s = SendWindow::new(&config(RetransmitPolicy::GoBackN, false));
        s.submit(&[1u8; 250]);
        assert_eq!(s.next_seq(), 250);
        assert_eq!(s.admissible_to_send(u32::MAX), vec![0, 100, 200]);
        assert_eq!(s.segment(200).unwrap().payload.len(), 50);
        assert!(s.invariants_hold());
    }

    #[test]
    fn small_writes_coalesce_until_sent() {
        let mut s = SendWindow::new(&config(RetransmitPolicy::GoBackN, false));
        s.submit(&[1u8; 30]);
        s.submit(&[2u8; 30]);
        assert_eq!(s.admissible_to_send(u32::MAX), vec![0]);
        assert_eq!(s.segment(0).unwrap().payload.len(), 60);

        s.record_sent(0, Instant::now());
        s.submit(&[3u8; 30]);
        assert_eq!(s.admissible_to_send(u32::MAX), vec![60]);
        assert!(s.invariants_hold());
    }

    #[test]
    fn admissible_respects_send_window() {
        let mut s = SendWindow::new(&config(RetransmitPolicy::GoBackN, false));
        s.submit(&[0u8; 500]);
        assert_eq!(s.admissible_to_send(250), vec![0, 100, 200]);
        // A zero window still lets the base segment through.
        assert_eq!(s.admissible_to_send(0), vec![0]);
    }

    #[test]
    fn sent_segments_are_not_admissible_again() {
        let now = Instant::now();
        let mut s = SendWindow::new(&config(RetransmitPolicy::GoBackN, false));
        s.submit(&[0u8; 200]);
        assert!(!s.record_sent(0, now));
        assert_eq!(s.admissible_to_send(u32::MAX), vec![100]);
        assert!(s.has_outstanding());
    }

    #[test]
    fn cumulative_ack_slides_multiple() {
        let t0 = Instant::now();
        let cfg = config(RetransmitPolicy::GoBackN, false);
        let mut s = sent_window(&cfg, 3, t0);

        let out = s.on_ack(ack(&s, 200), &[], 10_000, t0 + Duration::from_millis(40));
        assert_eq!(
            out.kind,
            AckKind::NewData {
                acked_bytes: 200,
                acked_segments: 2,
                rtt: Some(Duration::from_millis(40)),
            }
        );
        assert_eq!(s.base(), 200);
        assert!(s.invariants_hold());

        s.on_ack(ack(&s, 300), &[], 10_000, t0);
        assert!(s.is_empty());
        assert!(!s.has_outstanding());
    }

    #[test]
    fn partial_ack_trims_head_segment() {
        let now = Instant::now();
        let cfg = config(RetransmitPolicy::GoBackN, false);
        let mut s = sent_window(&cfg, 2, now);

        let out = s.on_ack(ack(&s, 130), &[], 10_000, now);
        assert!(matches!(out.kind, AckKind::NewData { acked_bytes: 130, acked_segments: 1, .. }));
        assert_eq!(s.base(), 130);
        assert_eq!(s.segment(130).unwrap().payload.len(), 70);
        assert!(s.invariants_hold());
    }

    #[test]
    fn karn_skips_retransmitted_segments() {
        let t0 = Instant::now();
        let cfg = config(RetransmitPolicy::SelectiveRepeat, false);
        let mut s = sent_window(&cfg, 1, t0);
        s.on_timeout(0);
        s.record_sent(0, t0 + Duration::from_secs(1));

        let out = s.on_ack(ack(&s, 100), &[], 10_000, t0 + Duration::from_millis(1100));
        assert!(matches!(out.kind, AckKind::NewData { rtt: None, .. }));
    }

    #[test]
    fn duplicate_and_stale_acks() {
        let now = Instant::now();
        let cfg = config(RetransmitPolicy::GoBackN, false);
        let mut s = sent_window(&cfg, 2, now);

        s.on_ack(ack(&s, 100), &[], 10_000, now);
        assert_eq!(s.on_ack(ack(&s, 100), &[], 10_000, now).kind, AckKind::Duplicate);
        assert_eq!(s.on_ack(ack(&s, 100), &[], 5_000, now).kind, AckKind::Duplicate);
        assert_eq!(s.peer_window(), 5_000);
        // Behind base.
        assert_eq!(s.on_ack(ack(&s, 50), &[], 5_000, now).kind, AckKind::Stale);
        // Beyond anything sent.
        assert_eq!(s.on_ack(ack(&s, 1_000), &[], 5_000, now).kind, AckKind::Stale);
        assert_eq!(s.base(), 100);
    }

    #[test]
    fn window_update_when_idle() {
        let now = Instant::now();
        let cfg = config(RetransmitPolicy::GoBackN, false);
        let mut s = sent_window(&cfg, 1, now);
        s.on_ack(ack(&s, 100), &[], 0, now);
        assert_eq!(s.peer_window(), 0);
        assert_eq!(s.on_ack(ack(&s, 100), &[], 4_000, now).kind, AckKind::WindowUpdate);
        assert_eq!(s.on_ack(ack(&s, 100), &[], 4_000, now).kind, AckKind::Stale);
        assert_eq!(s.peer_window(), 4_000);
    }

    #[test]
    fn dup_ack_threshold_triggers_once() {
        let mut s = SendWindow::new(&config(RetransmitPolicy::SelectiveRepeat, false));
        assert_eq!(s.on_duplicate_ack(), DupAckAction::Wait);
        assert_eq!(s.on_duplicate_ack(), DupAckAction::Wait);
        assert_eq!(s.on_duplicate_ack(), DupAckAction::FastRetransmit);
        assert_eq!(s.on_duplicate_ack(), DupAckAction::Inflate);
    }

    #[test]
    fn sack_marks_segments_without_moving_base() {
        let now = Instant::now();
        let cfg = config(RetransmitPolicy::SelectiveRepeat, true);
        let mut s = sent_window(&cfg, 5, now);

        let blocks = [sack_block(&s, 200, 500)];
        let out = s.on_ack(ack(&s, 100), &blocks, 10_000, now);
        assert_eq!(out.newly_sacked, vec![200, 300, 400]);
        assert_eq!(s.base(), 100);
        assert!(s.segment(300).unwrap().sacked);

        // Reported again: nothing new.
        let out = s.on_ack(ack(&s, 100), &blocks, 10_000, now);
        assert_eq!(out.kind, AckKind::Duplicate);
        assert!(out.newly_sacked.is_empty());
    }

    #[test]
    fn sack_ignored_when_disabled() {
        let now = Instant::now();
        let cfg = config(RetransmitPolicy::SelectiveRepeat, false);
        let mut s = sent_window(&cfg, 3, now);
        let blocks = [sack_block(&s, 100, 300)];
        let out = s.on_ack(ack(&s, 0), &blocks, 10_000, now);
        assert!(out.newly_sacked.is_empty());
    }

    #[test]
    fn fast_retransmit_resends_only_the_hole() {
        // Five segments; the second is lost, the receiver SACKs 3-5.
        let now = Instant::now();
        let cfg = config(RetransmitPolicy::SelectiveRepeat, true);
        let mut s = sent_window(&cfg, 5, now);

        s.on_ack(ack(&s, 100), &[], 10_000, now);
        let blocks = [sack_block(&s, 200, 500)];
        let mut action = DupAckAction::Wait;
        for _ in 0..3 {
            let out = s.on_ack(ack(&s, 100), &blocks, 10_000, now);
            assert_eq!(out.kind, AckKind::Duplicate);
            action = s.on_duplicate_ack();
        }
        assert_eq!(action, DupAckAction::FastRetransmit);

        assert_eq!(s.mark_fast_retransmit(10_000), vec![100]);
        assert_eq!(s.admissible_to_send(10_000), vec![100]);
    }

    #[test]
    fn fast_retransmit_resends_every_hole_in_order() {
        let now = Instant::now();
        let cfg = config(RetransmitPolicy::SelectiveRepeat, true);
        let mut s = sent_window(&cfg, 6, now);
        let blocks = [sack_block(&s, 100, 200), sack_block(&s, 300, 400)];
        s.on_ack(ack(&s, 0), &blocks, 10_000, now);

        assert_eq!(s.mark_fast_retransmit(10_000), vec![0, 200]);
        // Bounded by the send window.
        assert_eq!(s.mark_fast_retransmit(150), vec![0]);
    }

    #[test]
    fn fast_retransmit_without_sack_resends_base() {
        let now = Instant::now();
        let cfg = config(RetransmitPolicy::SelectiveRepeat, false);
        let mut s = sent_window(&cfg, 4, now);
        s.on_ack(ack(&s, 100), &[], 10_000, now);
        assert_eq!(s.mark_fast_retransmit(10_000), vec![100]);
    }

    #[test]
    fn go_back_n_timeout_resends_whole_window() {
        let now = Instant::now();
        let cfg = config(RetransmitPolicy::GoBackN, false);
        let mut s = sent_window(&cfg, 4, now);
        s.submit(&[0u8; 100]); // submitted but never sent

        assert_eq!(s.on_timeout(0), vec![0, 100, 200, 300]);
        assert_eq!(s.admissible_to_send(u32::MAX), vec![0, 100, 200, 300, 400]);
    }

    #[test]
    fn selective_repeat_timeout_resends_one_segment() {
        let now = Instant::now();
        let cfg = config(RetransmitPolicy::SelectiveRepeat, false);
        let mut s = sent_window(&cfg, 4, now);
        assert_eq!(s.on_timeout(0), vec![0]);
        assert_eq!(s.admissible_to_send(u32::MAX), vec![0]);
        assert!(s.record_sent(0, now));
    }

    #[test]
    fn timeout_skips_sacked_segments() {
        let now = Instant::now();
        let cfg = config(RetransmitPolicy::GoBackN, true);
        let mut s = sent_window(&cfg, 3, now);
        let blocks = [sack_block(&s, 100, 200)];
        s.on_ack(ack(&s, 0), &blocks, 10_000, now);
        assert_eq!(s.on_timeout(0), vec![0, 200]);
    }

    #[test]
    fn selective_repeat_timeout_resends_base_whichever_timer_fired() {
        let now = Instant::now();
        let cfg = config(RetransmitPolicy::SelectiveRepeat, true);
        let mut s = sent_window(&cfg, 4, now);
        assert_eq!(s.on_timeout(200), vec![0]);
        assert_eq!(s.admissible_to_send(u32::MAX), vec![0]);
    }

    #[test]
    fn sequence_numbers_wrap() {
        let now = Instant::now();
        let cfg = Config {
            local_isn: u32::MAX - 150,
            ..config(RetransmitPolicy::GoBackN, false)
        };
        let mut s = sent_window(&cfg, 3, now);
        assert_eq!(s.wrap(200), 49);

        let out = s.on_ack(49, &[], 10_000, now);
        assert!(matches!(out.kind, AckKind::NewData { acked_bytes: 200, .. }));
        assert_eq!(s.base(), 200);
        assert!(s.invariants_hold());
    }
}
