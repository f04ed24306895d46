//! `sack-stream` — a TCP-like reliable byte stream over an unreliable
//! datagram service, with Go-Back-N or Selective Repeat retransmission,
//! SACK and Reno congestion control.
//!
//! # Architecture
//!
//! ```text
//!  Application  write() ───────────────┐        ┌──────▶ recv()
//!                                      │        │ bounded queue
//!  ┌───────────────────────────────────▼────────┴──────────────┐
//!  │ Connection / Session      (async event loop, select!)      │
//!  │  ┌─────────────────────────────────────────────────────┐  │
//!  │  │ Engine (sans-IO)                                    │  │
//!  │  │   SendWindow ── CongestionControl ── RetransmitTimer│  │
//!  │  │   ReceiveWindow (reorder buffer, SACK)              │  │
//!  │  │   ConnectionState (FIN / RST teardown)              │  │
//!  │  └─────────────────────────────────────────────────────┘  │
//!  └──────────────────────────────┬────────────────────────────┘
//!                                 │ encoded packets (packet.rs)
//!                  ┌──────────────▼──────────────┐
//!                  │ DatagramTransport           │
//!                  │  UdpTransport | link()      │
//!                  │  Lossy<T> fault injection   │
//!                  └─────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`seq`]         — 32-bit wire sequence numbers vs. 64-bit stream offsets
//! - [`packet`]      — wire format (serialise / deserialise, CRC-32)
//! - [`config`]      — connection configuration and validation
//! - [`sender`]      — outbound window, unacked buffer, duplicate-ACK logic
//! - [`congestion`]  — Reno AIMD and fixed-window congestion control
//! - [`receiver`]    — reorder buffer, in-order delivery, SACK generation
//! - [`timer`]       — RTO estimation and retransmission deadlines
//! - [`state`]       — connection teardown state machine
//! - [`engine`]      — sans-IO protocol engine tying the above together
//! - [`transport`]   — datagram transport trait and UDP implementation
//! - [`simulator`]   — lossy/reordering transport and in-memory link
//! - [`connection`]  — async driver and application handle

pub mod config;
pub mod congestion;
pub mod connection;
pub mod engine;
pub mod packet;
pub mod receiver;
pub mod sender;
pub mod seq;
pub mod simulator;
pub mod state;
pub mod timer;
pub mod transport;

pub use config::{Config, RetransmitPolicy};
pub use connection::{ConnError, Connection, Session};
pub use engine::{ConnectionStats, Engine};
pub use simulator::{link, Lossy, SimulatorConfig};
pub use transport::{DatagramTransport, UdpTransport};
