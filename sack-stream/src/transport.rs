//! Datagram transport abstraction.
//!
//! The protocol only needs an unreliable way to move byte buffers between
//! two addresses.  [`DatagramTransport`] captures exactly that, so the
//! connection driver runs the same over a real [`UdpTransport`], the
//! in-memory [`crate::simulator::link`] or a fault-injecting
//! [`crate::simulator::Lossy`] wrapper.
//!
//! Transports move raw bytes; encoding and checksum validation stay with the
//! engine so a corrupted datagram is dropped in exactly one place.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::net::UdpSocket;

pub use crate::packet::MAX_DATAGRAM;

/// An unordered, lossy, possibly duplicating datagram service.
///
/// All methods take `&self` so one transport can be shared between the
/// driver task and whoever created it.
#[async_trait]
pub trait DatagramTransport: Send + Sync + 'static {
    /// Send one datagram to `dest`.
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<()>;

    /// Wait for the next datagram; returns its length and source.
    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

// ---------------------------------------------------------------------------
// UdpTransport
// ---------------------------------------------------------------------------

/// A thin wrapper around `tokio::net::UdpSocket`.
#[derive(Debug)]
pub struct UdpTransport {
    inner: UdpSocket,
}

impl UdpTransport {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port `0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        log::debug!("[udp] bound {}", inner.local_addr()?);
        Ok(Self { inner })
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.inner.send_to(buf, dest).await?;
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
