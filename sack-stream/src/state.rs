//! Connection lifecycle states.
//!
//! Establishment happens outside this crate, so a connection starts life in
//! `Established`.  Teardown follows the TCP state diagram (RFC 793 §3.2):
//!
//! ```text
//!                 close                      FIN acked
//!  ESTABLISHED ─────────▶ FIN_WAIT_1 ─────────────────▶ FIN_WAIT_2
//!       │                     │                              │
//!       │ peer FIN            │ peer FIN                     │ peer FIN
//!       ▼                     ▼                              ▼
//!  CLOSE_WAIT               CLOSING ───── FIN acked ────▶ TIME_WAIT
//!       │                                                    │
//!       │ close                                              │ linger
//!       ▼                                                    ▼
//!   LAST_ACK ──────────────── FIN acked ───────────────▶  CLOSED
//! ```
//!
//! Every transition is a pure function of the current state; unknown
//! events leave the state unchanged.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Data flows both ways.
    #[default]
    Established,
    /// Local side closed; our FIN is queued or unacknowledged.
    FinWait1,
    /// Our FIN was acknowledged; waiting for the peer's.
    FinWait2,
    /// Peer's FIN received; we may still send.
    CloseWait,
    /// Both sides sent FIN before either was acknowledged.
    Closing,
    /// Waiting for the ACK of our FIN after the peer finished.
    LastAck,
    /// Both FINs done; lingering to re-acknowledge a retransmitted peer FIN.
    TimeWait,
    /// Nothing more will be sent or received.
    Closed,
}

impl ConnectionState {
    /// The application closed its sending half.
    pub fn on_local_close(self) -> Self {
        match self {
            Self::Established => Self::FinWait1,
            Self::CloseWait => Self::LastAck,
            other => other,
        }
    }

    /// The peer acknowledged our FIN.
    pub fn on_fin_acked(self) -> Self {
        match self {
            Self::FinWait1 => Self::FinWait2,
            Self::Closing => Self::TimeWait,
            Self::LastAck => Self::Closed,
            other => other,
        }
    }

    /// The peer's FIN arrived and all data before it was reassembled.
    pub fn on_peer_fin(self) -> Self {
        match self {
            Self::Established => Self::CloseWait,
            Self::FinWait1 => Self::Closing,
            Self::FinWait2 => Self::TimeWait,
            other => other,
        }
    }

    /// The application may still queue data.
    pub fn can_send_data(self) -> bool {
        matches!(self, Self::Established | Self::CloseWait)
    }

    /// Our FIN must be sent (or is waiting to be acknowledged).
    pub fn owes_fin(self) -> bool {
        matches!(self, Self::FinWait1 | Self::Closing | Self::LastAck)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;

    #[test]
    fn active_close() {
        let s = Established.on_local_close();
        assert_eq!(s, FinWait1);
        let s = s.on_fin_acked();
        assert_eq!(s, FinWait2);
        assert_eq!(s.on_peer_fin(), TimeWait);
    }

    #[test]
    fn passive_close() {
        let s = Established.on_peer_fin();
        assert_eq!(s, CloseWait);
        assert!(s.can_send_data());
        let s = s.on_local_close();
        assert_eq!(s, LastAck);
        assert!(s.owes_fin());
        assert_eq!(s.on_fin_acked(), Closed);
    }

    #[test]
    fn simultaneous_close() {
        let s = Established.on_local_close().on_peer_fin();
        assert_eq!(s, Closing);
        assert_eq!(s.on_fin_acked(), TimeWait);
    }

    #[test]
    fn irrelevant_events_are_ignored() {
        assert_eq!(Established.on_fin_acked(), Established);
        assert_eq!(TimeWait.on_peer_fin(), TimeWait);
        assert_eq!(Closed.on_local_close(), Closed);
        assert!(!FinWait2.can_send_data());
        assert!(!FinWait2.owes_fin());
    }
}
