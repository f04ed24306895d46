//! Receive-side reassembly.
//!
//! [`ReceiveWindow`] turns an unordered, duplicated stream of segments back
//! into the original byte stream:
//!
//! - A segment starting at `expected` is delivered at once, and any buffered
//!   segments that became contiguous are drained behind it.
//! - A segment further ahead is parked in the reorder buffer, an ordered map
//!   of **non-overlapping** ranges; overlap with what is already held is
//!   trimmed away, so inserting the same data twice is a no-op.
//! - Anything entirely below `expected` is a duplicate.
//!
//! ```text
//!  delivered_up_to     expected                 delivered_up_to + capacity
//!        │                │                                │
//!  ──────┼────────────────┼────[buf]──[buf]───────[buf]────┼──────▶ offset
//!        │ <── ready ───▶ │ <────── reorder buffer ──────▶ │
//! ```
//!
//! `ready` holds reassembled bytes the application has not taken yet; they
//! still count against the advertised window.  Every byte is handed to the
//! application exactly once and in order.

use std::collections::{BTreeMap, VecDeque};

use crate::config::Config;
use crate::packet::{flags, Header, SackBlock};
use crate::seq;

/// What happened to an incoming segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// Extended the in-order prefix by this many bytes (including drained
    /// buffered data).
    Delivered(u64),
    /// Parked in the reorder buffer.
    Buffered,
    /// Every byte was already held or delivered.
    Duplicate,
    /// Starts beyond the receive window; dropped.
    OutOfWindow,
}

#[derive(Debug)]
pub struct ReceiveWindow {
    /// Peer's initial sequence number.
    irs: u32,
    /// Lowest offset not yet reassembled (`RCV.NXT`).
    expected: u64,
    /// Bytes taken by the application.
    delivered_up_to: u64,
    reorder: BTreeMap<u64, Vec<u8>>,
    ready: VecDeque<Vec<u8>>,
    capacity: u64,
    /// SACK blocks to report; 0 disables SACK.
    sack_blocks: usize,
    /// Offset of the peer's FIN once seen.
    fin_at: Option<u64>,
}

impl ReceiveWindow {
    pub fn new(config: &Config) -> Self {
        Self {
            irs: config.peer_isn,
            expected: 0,
            delivered_up_to: 0,
            reorder: BTreeMap::new(),
            ready: VecDeque::new(),
            capacity: u64::from(config.recv_window),
            sack_blocks: if config.sack { config.max_sack_blocks } else { 0 },
            fin_at: None,
        }
    }

    pub fn expected(&self) -> u64 {
        self.expected
    }

    pub fn delivered_up_to(&self) -> u64 {
        self.delivered_up_to
    }

    /// Bytes currently parked out of order.
    pub fn buffered_out_of_order(&self) -> u64 {
        self.reorder.values().map(|v| v.len() as u64).sum()
    }

    fn unwrap(&self, seq: u32) -> u64 {
        seq::unwrap(self.irs, self.expected, seq)
    }

    /// Process the payload of a segment whose first byte has wire sequence
    /// number `seq`.
    pub fn on_segment(&mut self, seq: u32, payload: &[u8]) -> SegmentOutcome {
        let start = self.unwrap(seq);
        let end = start + payload.len() as u64;
        let limit = self.delivered_up_to + self.capacity;

        if payload.is_empty() || end <= self.expected {
            return SegmentOutcome::Duplicate;
        }
        if start >= limit {
            log::trace!("[receiver] segment at {start} beyond window limit {limit}");
            return SegmentOutcome::OutOfWindow;
        }

        // Trim whatever is already delivered and whatever the window cannot hold.
        let lo = start.max(self.expected);
        let hi = end.min(limit);
        let data = &payload[(lo - start) as usize..(hi - start) as usize];

        if lo == self.expected {
            let before = self.expected;
            self.ready.push_back(data.to_vec());
            self.expected = hi;
            self.drain_reorder();
            SegmentOutcome::Delivered(self.expected - before)
        } else if self.insert_out_of_order(lo, data) {
            SegmentOutcome::Buffered
        } else {
            SegmentOutcome::Duplicate
        }
    }

    /// Insert `[start, start + data.len())` keeping ranges disjoint.
    /// Returns `false` when nothing new was stored.
    fn insert_out_of_order(&mut self, start: u64, data: &[u8]) -> bool {
        let end = start + data.len() as u64;
        let mut cursor = start;
        if let Some((&k, v)) = self.reorder.range(..=start).next_back() {
            cursor = cursor.max(k + v.len() as u64);
        }

        let mut gaps = Vec::new();
        for (&k, v) in self.reorder.range(start..end) {
            if cursor >= end {
                break;
            }
            if k > cursor {
                gaps.push((cursor, k));
            }
            cursor = cursor.max(k + v.len() as u64);
        }
        if cursor < end {
            gaps.push((cursor, end));
        }

        for &(lo, hi) in &gaps {
            let piece = data[(lo - start) as usize..(hi - start) as usize].to_vec();
            self.reorder.insert(lo, piece);
        }
        !gaps.is_empty()
    }

    fn drain_reorder(&mut self) {
        while let Some(entry) = self.reorder.first_entry() {
            let offset = *entry.key();
            if offset > self.expected {
                break;
            }
            let chunk = entry.remove();
            let chunk_end = offset + chunk.len() as u64;
            if chunk_end > self.expected {
                let skip = (self.expected - offset) as usize;
                self.ready.push_back(chunk[skip..].to_vec());
                self.expected = chunk_end;
            }
        }
    }

    /// Note a FIN carried by the segment starting at `seq` with
    /// `payload_len` bytes of data.
    pub fn on_fin(&mut self, seq: u32, payload_len: usize) {
        let at = self.unwrap(seq) + payload_len as u64;
        if self.fin_at.is_none() && at >= self.expected {
            log::debug!("[receiver] fin at {at}");
            self.fin_at = Some(at);
        }
    }

    /// The FIN has been seen and every byte before it reassembled.
    pub fn fin_received(&self) -> bool {
        self.fin_at == Some(self.expected)
    }

    /// Reassembled bytes are waiting for the application.
    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Hand the next chunk of in-order bytes to the application.
    pub fn take_ready(&mut self) -> Option<Vec<u8>> {
        let chunk = self.ready.pop_front()?;
        self.delivered_up_to += chunk.len() as u64;
        Some(chunk)
    }

    /// Free space advertised to the peer.
    pub fn window(&self) -> u16 {
        let held = self.expected - self.delivered_up_to;
        u16::try_from(self.capacity.saturating_sub(held)).unwrap_or(u16::MAX)
    }

    /// Maximal contiguous ranges in the reorder buffer, ascending, at most
    /// `limit` of them (lowest first).
    pub fn sack_ranges(&self, limit: usize) -> Vec<(u64, u64)> {
        let mut ranges: Vec<(u64, u64)> = Vec::new();
        for (&offset, data) in &self.reorder {
            let end = offset + data.len() as u64;
            match ranges.last_mut() {
                Some(last) if last.1 == offset => last.1 = end,
                _ => {
                    if ranges.len() == limit {
                        break;
                    }
                    ranges.push((offset, end));
                }
            }
        }
        ranges
    }

    /// Acknowledgment fields for the next outgoing packet.  `seq` is left at
    /// zero for the caller to fill in.
    pub fn build_ack(&self) -> Header {
        let fin = u64::from(self.fin_received());
        let sack = self
            .sack_ranges(self.sack_blocks)
            .into_iter()
            .map(|(start, end)| SackBlock::new(seq::wrap(self.irs, start), seq::wrap(self.irs, end)))
            .collect();
        Header {
            seq: 0,
            ack: seq::wrap(self.irs, self.expected + fin),
            flags: flags::ACK,
            window: self.window(),
            sack,
        }
    }

    /// `delivered_up_to <= expected`, and the reorder buffer holds disjoint
    /// ranges strictly above `expected`.
    pub fn invariants_hold(&self) -> bool {
        if self.delivered_up_to > self.expected {
            return false;
        }
        let mut floor = self.expected + 1;
        for (&offset, data) in &self.reorder {
            if offset < floor || data.is_empty() {
                return false;
            }
            floor = offset + data.len() as u64;
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
