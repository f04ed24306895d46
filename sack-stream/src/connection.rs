//! Async connection driver.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  write(data) / recv()            Session
//!      │                               ┌─────────────────────┐
//!      └─────────────────────────────▶ │  writer  (mpsc)     │
//!                                      │  reader  (mpsc)     │
//!                                      │  abort   (watch)    │
//!                                      └──────────┬──────────┘
//!                                                 │ event_loop task
//!  Connection                                     │
//!    ├── Engine (windows, congestion, timers)     │
//!    └── Arc<T: DatagramTransport> ───────────────┘
//! ```
//!
//! The event loop is the only owner of the [`Engine`], so every window and
//! congestion transition is serialised.  It waits on whichever comes first:
//! a datagram, the earliest engine deadline, application data (only while
//! the send buffer has room), room in the bounded delivery queue, or an
//! abort request.  A slow reader therefore never stalls packet intake; it
//! only closes the advertised window.
//!
//! ```ignore
//! let session = Connection::new(transport, peer, Config::default())?.run();
//! session.write(b"hello".to_vec()).await?;
//! let stats = session.close().await?;
//! ```

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{Config, ConfigError};
use crate::engine::{ConnectionStats, Engine};
use crate::packet::MAX_DATAGRAM;
use crate::transport::DatagramTransport;

/// Queued application writes between `Session::write` and the event loop.
const WRITE_QUEUE: usize = 16;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConnError {
    /// The connection has been closed locally or has finished.
    #[error("connection closed")]
    Closed,
    /// The peer finished sending; no more data will arrive.
    #[error("end of stream")]
    Eof,
    #[error("connection reset by peer")]
    Reset,
    #[error("maximum retransmissions exceeded")]
    MaxRetriesExceeded,
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl ConnError {
    /// A copy for the reader; I/O errors keep their kind and message.
    fn replicate(&self) -> Self {
        match self {
            Self::Closed => Self::Closed,
            Self::Eof => Self::Eof,
            Self::Reset => Self::Reset,
            Self::MaxRetriesExceeded => Self::MaxRetriesExceeded,
            Self::Io(e) => Self::Io(io::Error::new(e.kind(), e.to_string())),
            Self::Config(e) => Self::Config(e.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// An established connection to `peer`, ready to be driven.
pub struct Connection<T> {
    transport: Arc<T>,
    peer: SocketAddr,
    engine: Engine,
}

impl<T: DatagramTransport> Connection<T> {
    /// Wrap a transport whose peer is already agreed on.  Sequence numbers
    /// start at `config.local_isn` / `config.peer_isn`.
    pub fn new(transport: Arc<T>, peer: SocketAddr, config: Config) -> Result<Self, ConnError> {
        let engine = Engine::new(config)?;
        Ok(Self {
            transport,
            peer,
            engine,
        })
    }

    /// Spawn the event loop and return the application handle.
    ///
    /// # Shutdown
    ///
    /// [`Session::close`] (or dropping the session) ends the sending half;
    /// the loop sends FIN after the last byte is acknowledged and exits once
    /// the peer has closed too.  [`Session::abort`] sends RST and exits at
    /// once.
    pub fn run(self) -> Session {
        let (writer, app_rx) = mpsc::channel::<Vec<u8>>(WRITE_QUEUE);
        let (deliver_tx, reader) =
            mpsc::channel::<Result<Vec<u8>, ConnError>>(self.engine.config().delivery_queue);
        let (abort, abort_rx) = watch::channel(false);

        let handle = tokio::spawn(event_loop(
            self.transport,
            self.peer,
            self.engine,
            app_rx,
            deliver_tx,
            abort_rx,
        ));

        Session {
            writer: Some(writer),
            reader,
            abort,
            handle,
            finished: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Handle returned by [`Connection::run`].
pub struct Session {
    writer: Option<mpsc::Sender<Vec<u8>>>,
    reader: mpsc::Receiver<Result<Vec<u8>, ConnError>>,
    abort: watch::Sender<bool>,
    handle: JoinHandle<Result<ConnectionStats, ConnError>>,
    finished: bool,
}

impl Session {
    /// Queue bytes for the peer.  Waits while the send buffer is full.
    pub async fn write(&self, data: impl Into<Vec<u8>>) -> Result<(), ConnError> {
        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }
        let writer = self.writer.as_ref().ok_or(ConnError::Closed)?;
        writer.send(data).await.map_err(|_| ConnError::Closed)
    }

    /// Half-close: no more writes, FIN follows the queued data.  Reading
    /// continues until the peer finishes too.
    pub fn finish(&mut self) {
        self.writer = None;
    }

    /// Next chunk of in-order data from the peer.
    ///
    /// Returns [`ConnError::Eof`] once the peer has finished sending, the
    /// error that ended the connection if it failed, and
    /// [`ConnError::Closed`] after that.
    pub async fn recv(&mut self) -> Result<Vec<u8>, ConnError> {
        if self.finished {
            return Err(ConnError::Eof);
        }
        match self.reader.recv().await {
            Some(Ok(data)) => Ok(data),
            Some(Err(ConnError::Eof)) => {
                self.finished = true;
                Err(ConnError::Eof)
            }
            Some(Err(e)) => Err(e),
            None => Err(ConnError::Closed),
        }
    }

    /// Stop writing and reading, then wait for the orderly close to finish.
    ///
    /// Data still arriving from the peer is acknowledged and discarded.
    pub async fn close(self) -> Result<ConnectionStats, ConnError> {
        let Session {
            writer,
            reader,
            handle,
            ..
        } = self;
        drop(writer);
        drop(reader);
        handle.await.map_err(|e| {
            log::error!("[conn] event loop failed: {e}");
            ConnError::Closed
        })?
    }

    /// Send RST and tear everything down without waiting for the peer.
    pub async fn abort(self) {
        let _ = self.abort.send(true);
        let _ = self.handle.await;
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

async fn event_loop<T: DatagramTransport>(
    transport: Arc<T>,
    peer: SocketAddr,
    mut engine: Engine,
    mut app_rx: mpsc::Receiver<Vec<u8>>,
    deliver_tx: mpsc::Sender<Result<Vec<u8>, ConnError>>,
    mut abort_rx: watch::Receiver<bool>,
) -> Result<ConnectionStats, ConnError> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut app_open = true;
    let mut abort_live = true;
    let mut aborted = false;
    let mut eof_sent = false;

    // A "disarmed" timer sits far in the future; the branch guard keeps it
    // from being polled while the engine has no deadline.
    let far_future = Duration::from_secs(365 * 24 * 3600);
    let timer = tokio::time::sleep(far_future);
    tokio::pin!(timer);

    let outcome: Result<(), ConnError> = loop {
        transmit(&*transport, peer, &mut engine).await;
        if engine.is_closed() {
            let result = if engine.was_reset() {
                Err(ConnError::Reset)
            } else {
                Ok(())
            };
            break result;
        }

        let deadline = engine.next_deadline();
        if let Some(deadline) = deadline {
            timer.as_mut().reset(deadline);
        }
        let writable = app_open && engine.can_write();
        let deliverable = engine.has_delivery() || (engine.peer_finished() && !eof_sent);

        tokio::select! {
            // ── Abort request ────────────────────────────────────────────
            changed = abort_rx.changed(), if abort_live => {
                if changed.is_err() {
                    abort_live = false;
                } else if *abort_rx.borrow() {
                    if let Some(rst) = engine.abort() {
                        send_packet(&*transport, peer, &rst, engine.config().mss).await;
                    }
                    log::info!("[conn] aborted");
                    aborted = true;
                    break Ok(());
                }
            }

            // ── Application data ─────────────────────────────────────────
            maybe_data = app_rx.recv(), if writable => {
                match maybe_data {
                    Some(data) => {
                        if let Err(e) = engine.write(&data) {
                            log::debug!("[conn] write after close: {e}");
                        }
                    }
                    None => {
                        log::debug!("[conn] application closed the stream");
                        app_open = false;
                        engine.close();
                    }
                }
            }

            // ── Incoming datagram ────────────────────────────────────────
            result = transport.recv_from(&mut buf) => {
                match result {
                    Ok((n, from)) if from == peer => {
                        // Undecodable datagrams are counted and dropped inside.
                        let _ = engine.on_datagram(&buf[..n], Instant::now());
                    }
                    Ok((_, from)) => log::trace!("[conn] ignoring datagram from {from}"),
                    Err(e) => {
                        log::warn!("[conn] receive failed: {e}");
                        break Err(ConnError::Io(e));
                    }
                }
            }

            // ── Retransmission / linger deadline ─────────────────────────
            _ = &mut timer, if deadline.is_some() => {
                if let Err(e) = engine.on_timer(Instant::now()) {
                    break Err(e);
                }
            }

            // ── Room in the delivery queue ───────────────────────────────
            permit = deliver_tx.reserve(), if deliverable => {
                match permit {
                    Ok(permit) => match engine.pop_delivery() {
                        Some(chunk) => permit.send(Ok(chunk)),
                        None => {
                            permit.send(Err(ConnError::Eof));
                            eof_sent = true;
                        }
                    },
                    Err(_) => {
                        // Nobody is reading any more.
                        while engine.pop_delivery().is_some() {}
                        eof_sent = true;
                    }
                }
            }
        }
    };

    let stats = engine.stats();
    match outcome {
        Ok(()) if aborted => Ok(stats),
        Ok(()) => {
            while let Some(chunk) = engine.pop_delivery() {
                if deliver_tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
            if engine.peer_finished() && !eof_sent {
                let _ = deliver_tx.send(Err(ConnError::Eof)).await;
            }
            log::info!(
                "[conn] closed: {} segments sent, {} retransmitted, {} bytes delivered",
                stats.segments_sent,
                stats.retransmissions,
                stats.bytes_delivered
            );
            Ok(stats)
        }
        Err(e) => {
            log::warn!("[conn] connection failed: {e}");
            let _ = deliver_tx.try_send(Err(e.replicate()));
            Err(e)
        }
    }
}

/// Send everything the engine has queued.  A failed send is a lost
/// datagram as far as the protocol is concerned.
async fn transmit<T: DatagramTransport>(transport: &T, peer: SocketAddr, engine: &mut Engine) {
    let mss = engine.config().mss;
    for packet in engine.poll_transmit(Instant::now()) {
        send_packet(transport, peer, &packet, mss).await;
    }
}

async fn send_packet<T: DatagramTransport>(
    transport: &T,
    peer: SocketAddr,
    packet: &crate::packet::Packet,
    mss: usize,
) {
    match packet.encode(mss) {
        Ok(bytes) => {
            if let Err(e) = transport.send_to(&bytes, peer).await {
                log::warn!("[conn] send to {peer} failed: {e}");
            }
        }
        Err(e) => log::error!("[conn] refusing to send invalid packet: {e}"),
    }
}
