//! Sans-IO protocol engine for one connection.
//!
//! [`Engine`] wires the pieces together without touching a socket or the
//! clock; the driver feeds it datagrams and the current time and sends
//! whatever it asks for:
//!
//! ```text
//!   write() ──▶ SendWindow ──┐                      ┌──▶ pop_delivery()
//!                            │                      │
//!          CongestionControl ├─▶ poll_transmit() ───┼──▶ datagrams out
//!          RetransmitTimer ──┘         ▲            │
//!                                      │            │
//!   datagrams in ──▶ on_datagram() ────┴─▶ ReceiveWindow
//!   deadline ──────▶ on_timer()
//! ```
//!
//! All mutation happens through `&mut self`, so ACK processing and timer
//! expiry are serialised by construction.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::{Config, ConfigError};
use crate::congestion::{CongestionControl, FixedWindow, Reno};
use crate::connection::ConnError;
use crate::packet::{flags, Header, Packet, PacketError, SackBlock};
use crate::receiver::{ReceiveWindow, SegmentOutcome};
use crate::sender::{AckKind, DupAckAction, SendWindow};
use crate::state::ConnectionState;
use crate::timer::{RetransmitTimer, TimerMode};

/// Counters collected over the life of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Data and FIN segments put on the wire, retransmissions included.
    pub segments_sent: u64,
    pub retransmissions: u64,
    pub fast_retransmits: u64,
    pub timeouts: u64,
    pub duplicate_acks: u64,
    /// Pure ACKs sent.
    pub acks_sent: u64,
    /// Our bytes cumulatively acknowledged by the peer.
    pub bytes_acked: u64,
    /// Peer bytes handed to the application.
    pub bytes_delivered: u64,
    pub duplicate_segments: u64,
    pub out_of_window_segments: u64,
    /// Datagrams dropped for failing the length or checksum checks.
    pub corrupt_dropped: u64,
    /// Datagrams dropped for malformed headers.
    pub malformed_dropped: u64,
    pub srtt: Option<Duration>,
    pub cwnd: u32,
}

pub struct Engine {
    config: Config,
    state: ConnectionState,
    sender: SendWindow,
    cc: Box<dyn CongestionControl>,
    timer: RetransmitTimer,
    receiver: ReceiveWindow,
    /// Offset of our FIN once it has been sent.
    fin_offset: Option<u64>,
    fin_acked: bool,
    fin_retransmit: bool,
    peer_fin_seen: bool,
    ack_pending: bool,
    last_advertised: u16,
    /// FIN_WAIT_2 / TIME_WAIT deadline.
    linger: Option<Instant>,
    reset: bool,
    stats: ConnectionStats,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("base", &self.sender.base())
            .field("next_seq", &self.sender.next_seq())
            .field("expected", &self.receiver.expected())
            .field("cc", &self.cc)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let cc: Box<dyn CongestionControl> = if config.congestion_control {
            Box::new(Reno::new(config.mss as u32, config.initial_ssthresh))
        } else {
            Box::new(FixedWindow::new(u32::from(config.recv_window)))
        };
        Ok(Self {
            state: ConnectionState::Established,
            sender: SendWindow::new(&config),
            timer: RetransmitTimer::new(config.timer, TimerMode::from(config.retransmit)),
            receiver: ReceiveWindow::new(&config),
            cc,
            fin_offset: None,
            fin_acked: false,
            fin_retransmit: false,
            peer_fin_seen: false,
            ack_pending: false,
            last_advertised: config.recv_window,
            linger: None,
            reset: false,
            stats: ConnectionStats::default(),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// The peer aborted the connection with RST.
    pub fn was_reset(&self) -> bool {
        self.reset
    }

    /// `min(peer window, cwnd)`.
    pub fn send_window(&self) -> u32 {
        self.sender.peer_window().min(self.cc.cwnd())
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            srtt: self.timer.estimator().srtt(),
            cwnd: self.cc.cwnd(),
            ..self.stats.clone()
        }
    }

    // -----------------------------------------------------------------------
    // Application side
    // -----------------------------------------------------------------------

    /// Room for more application data.
    pub fn can_write(&self) -> bool {
        self.state.can_send_data() && self.sender.buffered() < self.config.send_buffer as u64
    }

    /// Queue bytes for transmission.
    pub fn write(&mut self, data: &[u8]) -> Result<(), ConnError> {
        if !self.state.can_send_data() {
            return Err(ConnError::Closed);
        }
        self.sender.submit(data);
        Ok(())
    }

    /// Everything written so far has been acknowledged.
    pub fn is_flushed(&self) -> bool {
        self.sender.is_empty()
    }

    /// Close the sending half.  The FIN goes out once all data is
    /// acknowledged.
    pub fn close(&mut self) {
        if self.state.can_send_data() {
            self.state = self.state.on_local_close();
            log::debug!("[engine] local close -> {}", self.state);
        }
    }

    /// Abort: drop all state and return the RST to send, if the connection
    /// was still open.
    pub fn abort(&mut self) -> Option<Packet> {
        if self.is_closed() {
            return None;
        }
        let seq = self.sender.wrap(self.sender.next_seq());
        let mut header = self.receiver.build_ack();
        header.seq = seq;
        header.flags = flags::RST | flags::ACK;
        header.sack.clear();
        self.shutdown();
        log::debug!("[engine] aborted");
        Some(Packet {
            header,
            payload: Vec::new(),
        })
    }

    /// Next chunk of in-order peer data.
    pub fn pop_delivery(&mut self) -> Option<Vec<u8>> {
        let chunk = self.receiver.take_ready()?;
        self.stats.bytes_delivered += chunk.len() as u64;
        let mss = self.config.mss;
        if usize::from(self.last_advertised) < mss && usize::from(self.receiver.window()) >= mss {
            log::trace!("[engine] window reopened to {}", self.receiver.window());
            self.ack_pending = true;
        }
        Some(chunk)
    }

    pub fn has_delivery(&self) -> bool {
        self.receiver.has_ready()
    }

    /// The peer's FIN arrived and every byte before it was taken.
    pub fn peer_finished(&self) -> bool {
        self.receiver.fin_received() && !self.receiver.has_ready()
    }

    // -----------------------------------------------------------------------
    // Network side
    // -----------------------------------------------------------------------

    /// Process one raw datagram.  Undecodable datagrams are counted, dropped
    /// and reported back; they never change connection state.
    pub fn on_datagram(&mut self, bytes: &[u8], now: Instant) -> Result<(), PacketError> {
        match Packet::decode(bytes) {
            Ok(packet) => {
                self.on_packet(packet, now);
                Ok(())
            }
            Err(e) => {
                if e.is_corruption() {
                    self.stats.corrupt_dropped += 1;
                    log::debug!("[engine] dropped corrupt datagram: {e}");
                } else {
                    self.stats.malformed_dropped += 1;
                    log::warn!("[engine] dropped malformed datagram: {e}");
                }
                Err(e)
            }
        }
    }

    pub fn on_packet(&mut self, packet: Packet, now: Instant) {
        if self.is_closed() {
            return;
        }
        let Packet { header, payload } = packet;

        if header.has(flags::RST) {
            log::warn!("[engine] connection reset by peer");
            self.reset = true;
            self.shutdown();
            return;
        }

        if header.has(flags::ACK) {
            let pure = payload.is_empty() && !header.has(flags::FIN);
            self.process_ack(&header, pure, now);
            if self.is_closed() {
                return;
            }
        }

        if !payload.is_empty() {
            match self.receiver.on_segment(header.seq, &payload) {
                SegmentOutcome::Delivered(n) => {
                    log::trace!("[engine] <- data seq={} len={} delivered={n}", header.seq, payload.len());
                }
                SegmentOutcome::Buffered => {
                    log::trace!("[engine] <- data seq={} len={} out of order", header.seq, payload.len());
                }
                SegmentOutcome::Duplicate => self.stats.duplicate_segments += 1,
                SegmentOutcome::OutOfWindow => self.stats.out_of_window_segments += 1,
            }
            self.ack_pending = true;
            if self.state == ConnectionState::FinWait2 {
                // The FIN-wait timer measures peer silence, not total time.
                self.linger = Some(now + self.config.fin_timeout);
            }
        }

        if header.has(flags::FIN) {
            self.receiver.on_fin(header.seq, payload.len());
            self.ack_pending = true;
            if self.state == ConnectionState::TimeWait {
                // Our ACK of their FIN was lost; stay around to repeat it.
                self.linger = Some(now + self.config.time_wait);
            }
        }

        if self.receiver.fin_received() && !self.peer_fin_seen {
            self.peer_fin_seen = true;
            self.state = self.state.on_peer_fin();
            log::debug!("[engine] peer fin -> {}", self.state);
            if self.state == ConnectionState::TimeWait {
                self.linger = Some(now + self.config.time_wait);
            }
        }
    }

    fn process_ack(&mut self, header: &Header, pure: bool, now: Instant) {
        let ack = self.sender.unwrap(header.ack);
        let fin_covered = matches!(self.fin_offset, Some(f) if ack == f + 1);
        let data_ack = match self.fin_offset {
            Some(f) if fin_covered => self.sender.wrap(f),
            _ => header.ack,
        };
        let sack: &[SackBlock] = if self.config.sack { &header.sack } else { &[] };

        let outcome = self.sender.on_ack(data_ack, sack, header.window, now);
        for offset in &outcome.newly_sacked {
            self.timer.cancel(*offset);
        }

        match outcome.kind {
            AckKind::NewData {
                acked_bytes,
                acked_segments,
                rtt,
            } => {
                if let Some(rtt) = rtt {
                    self.timer.record_rtt_sample(rtt);
                }
                self.cc.on_new_ack(acked_segments);
                self.timer
                    .on_progress(self.sender.base(), self.sender.has_outstanding(), now);
                self.stats.bytes_acked += acked_bytes;
            }
            AckKind::Duplicate if pure && !fin_covered => {
                self.stats.duplicate_acks += 1;
                match self.sender.on_duplicate_ack() {
                    DupAckAction::FastRetransmit => {
                        self.cc.on_fast_retransmit();
                        let marked = self.sender.mark_fast_retransmit(self.send_window());
                        if !marked.is_empty() {
                            self.stats.fast_retransmits += 1;
                        }
                    }
                    DupAckAction::Inflate => self.cc.on_duplicate_ack(),
                    DupAckAction::Wait => {}
                }
            }
            _ => {}
        }

        if let Some(f) = self.fin_offset.filter(|_| fin_covered && !self.fin_acked) {
            self.fin_acked = true;
            self.timer.on_progress(f + 1, false, now);
            self.state = self.state.on_fin_acked();
            log::debug!("[engine] fin acked -> {}", self.state);
            match self.state {
                ConnectionState::FinWait2 => self.linger = Some(now + self.config.fin_timeout),
                ConnectionState::TimeWait => self.linger = Some(now + self.config.time_wait),
                ConnectionState::Closed => self.shutdown(),
                _ => {}
            }
        }
    }

    /// Packets to send now: admissible data segments, a due FIN, and a pure
    /// ACK when one is owed and nothing else carried it.
    pub fn poll_transmit(&mut self, now: Instant) -> Vec<Packet> {
        let mut out = Vec::new();
        if self.is_closed() {
            return out;
        }

        for offset in self.sender.admissible_to_send(self.send_window()) {
            let Some(seg) = self.sender.segment(offset) else {
                continue;
            };
            let payload = seg.payload.clone();
            let retransmit = self.sender.record_sent(offset, now);
            self.timer.on_transmit(offset, now);
            self.stats.segments_sent += 1;
            if retransmit {
                self.stats.retransmissions += 1;
                log::debug!("[engine] -> retransmit offset={offset} len={}", payload.len());
            } else {
                log::trace!("[engine] -> data offset={offset} len={}", payload.len());
            }
            let header = self.ack_header(self.sender.wrap(offset), flags::ACK);
            out.push(Packet { header, payload });
        }

        if self.fin_due() {
            let f = self.sender.next_seq();
            if self.fin_offset.is_some() {
                self.stats.retransmissions += 1;
            }
            self.fin_offset = Some(f);
            self.fin_retransmit = false;
            self.timer.on_transmit(f, now);
            self.stats.segments_sent += 1;
            log::debug!("[engine] -> fin offset={f}");
            let header = self.ack_header(self.sender.wrap(f), flags::ACK | flags::FIN);
            out.push(Packet {
                header,
                payload: Vec::new(),
            });
        }

        if self.ack_pending && out.is_empty() {
            let seq = self.fin_offset.map_or(self.sender.next_seq(), |f| f + 1);
            let header = self.ack_header(self.sender.wrap(seq), flags::ACK);
            self.stats.acks_sent += 1;
            out.push(Packet {
                header,
                payload: Vec::new(),
            });
        }
        self.ack_pending = false;
        out
    }

    fn fin_due(&self) -> bool {
        self.state.owes_fin()
            && self.sender.is_empty()
            && !self.fin_acked
            && (self.fin_offset.is_none() || self.fin_retransmit)
    }

    fn ack_header(&mut self, seq: u32, flags: u8) -> Header {
        let mut header = self.receiver.build_ack();
        header.seq = seq;
        header.flags = flags;
        self.last_advertised = header.window;
        header
    }

    // -----------------------------------------------------------------------
    // Time
    // -----------------------------------------------------------------------

    /// When [`on_timer`](Self::on_timer) next needs to run.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.timer.next_deadline(), self.linger) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Handle every deadline that has passed at `now`.
    pub fn on_timer(&mut self, now: Instant) -> Result<(), ConnError> {
        if self.is_closed() {
            return Ok(());
        }
        if let Some(deadline) = self.linger {
            if now >= deadline {
                if self.state == ConnectionState::TimeWait {
                    log::debug!("[engine] time-wait over");
                } else {
                    log::warn!("[engine] gave up waiting for the peer's fin in {}", self.state);
                }
                self.shutdown();
                return Ok(());
            }
        }

        let Some(first) = self.timer.expired(now) else {
            return Ok(());
        };
        if self.timer.backoff_count() >= self.config.max_retries {
            log::warn!(
                "[engine] offset {first} unacknowledged after {} retransmissions",
                self.config.max_retries
            );
            self.shutdown();
            return Err(ConnError::MaxRetriesExceeded);
        }

        // Deadlines that lapsed together count as a single timeout event.
        self.timer.on_timeout(first);
        let mut lapsed = vec![first];
        while let Some(offset) = self.timer.expired(now) {
            self.timer.cancel(offset);
            lapsed.push(offset);
        }
        self.stats.timeouts += 1;

        let fin = self.fin_offset.filter(|_| !self.fin_acked);
        let (fin_lapsed, data_lapsed): (Vec<u64>, Vec<u64>) =
            lapsed.into_iter().partition(|&offset| Some(offset) == fin);
        if !fin_lapsed.is_empty() {
            self.fin_retransmit = true;
        }
        if let Some(&oldest) = data_lapsed.iter().min() {
            let marked = self.sender.on_timeout(oldest);
            // Lapsed segments that are not resent now wait another RTO.
            for &offset in data_lapsed.iter().filter(|o| !marked.contains(*o)) {
                self.timer.rearm(offset, now);
            }
            self.cc.on_timeout();
        }
        log::debug!(
            "[engine] timeout at {first}, rto now {:?}, cwnd {}",
            self.timer.rto(),
            self.cc.cwnd()
        );
        Ok(())
    }

    fn shutdown(&mut self) {
        self.state = ConnectionState::Closed;
        self.timer.cancel_all();
        self.linger = None;
        self.ack_pending = false;
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
