//! Network simulation for deterministic testing.
//!
//! Real networks drop, reorder, duplicate and corrupt packets.  To exercise
//! the reliability mechanisms without depending on actual network conditions,
//! this module provides:
//!
//! - [`link`] — two connected in-memory transports, a perfect wire.
//! - [`Lossy`] — a wrapper around any [`DatagramTransport`] that intercepts
//!   sends and applies a configurable fault model:
//!
//! | Fault            | Description                                      |
//! |------------------|--------------------------------------------------|
//! | Packet loss      | Drop a datagram with probability `loss_rate`.    |
//! | Reordering       | Hold a datagram back for `reorder_delay`, letting|
//! |                  | later ones overtake it.                          |
//! | Duplication      | Deliver a datagram twice.                        |
//! | Corruption       | Flip one random bit.                             |
//!
//! Every decision comes from a `StdRng` seeded with
//! [`SimulatorConfig::seed`], so a failing run can be replayed.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, Mutex};

use crate::transport::DatagramTransport;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`; anything else is
/// treated as "never".
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that a datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Probability that a datagram is delayed.
    pub reorder_rate: f64,
    /// Delay applied to reordered datagrams.
    pub reorder_delay: Duration,
    /// Probability that one bit of a datagram is flipped.
    pub corrupt_rate: f64,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default; the wrapper is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::from_millis(50),
            corrupt_rate: 0.0,
            seed: 0,
        }
    }
}

/// Counters of injected faults.
#[derive(Debug, Default)]
pub struct FaultStats {
    pub dropped: AtomicU64,
    pub duplicated: AtomicU64,
    pub reordered: AtomicU64,
    pub corrupted: AtomicU64,
}

impl FaultStats {
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn duplicated(&self) -> u64 {
        self.duplicated.load(Ordering::Relaxed)
    }

    pub fn reordered(&self) -> u64 {
        self.reordered.load(Ordering::Relaxed)
    }

    pub fn corrupted(&self) -> u64 {
        self.corrupted.load(Ordering::Relaxed)
    }
}

/// What happens to one outgoing datagram.
#[derive(Debug, Default)]
struct Fate {
    drop: bool,
    duplicate: bool,
    delay: bool,
    flip_bit: Option<usize>,
}

fn roll(rng: &mut StdRng, p: f64) -> bool {
    p > 0.0 && rng.random::<f64>() < p
}

// ---------------------------------------------------------------------------
// Lossy
// ---------------------------------------------------------------------------

/// A fault-injecting wrapper around another transport.  Faults are applied
/// on the send side; receives pass straight through.
pub struct Lossy<T> {
    inner: Arc<T>,
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
    stats: Arc<FaultStats>,
}

impl<T: DatagramTransport> Lossy<T> {
    pub fn new(inner: T, config: SimulatorConfig) -> Self {
        Self {
            inner: Arc::new(inner),
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            config,
            stats: Arc::new(FaultStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<FaultStats> {
        Arc::clone(&self.stats)
    }

    async fn decide(&self, len: usize) -> Fate {
        let mut rng = self.rng.lock().await;
        let c = &self.config;
        if roll(&mut rng, c.loss_rate) {
            return Fate {
                drop: true,
                ..Fate::default()
            };
        }
        Fate {
            drop: false,
            duplicate: roll(&mut rng, c.duplicate_rate),
            delay: roll(&mut rng, c.reorder_rate),
            flip_bit: (len > 0 && roll(&mut rng, c.corrupt_rate)).then(|| rng.random_range(0..len * 8)),
        }
    }
}

#[async_trait]
impl<T: DatagramTransport> DatagramTransport for Lossy<T> {
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<()> {
        let fate = self.decide(buf.len()).await;
        if fate.drop {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            log::trace!("[sim] drop {} bytes", buf.len());
            return Ok(());
        }

        let mut datagram = buf.to_vec();
        if let Some(bit) = fate.flip_bit {
            datagram[bit / 8] ^= 1 << (bit % 8);
            self.stats.corrupted.fetch_add(1, Ordering::Relaxed);
            log::trace!("[sim] flip bit {bit}");
        }
        let copies = if fate.duplicate {
            self.stats.duplicated.fetch_add(1, Ordering::Relaxed);
            2
        } else {
            1
        };

        if fate.delay {
            self.stats.reordered.fetch_add(1, Ordering::Relaxed);
            let inner = Arc::clone(&self.inner);
            let delay = self.config.reorder_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                for _ in 0..copies {
                    // Late datagrams to a closed peer are simply lost.
                    let _ = inner.send_to(&datagram, dest).await;
                }
            });
            return Ok(());
        }

        for _ in 0..copies {
            self.inner.send_to(&datagram, dest).await?;
        }
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

// ---------------------------------------------------------------------------
// In-memory link
// ---------------------------------------------------------------------------

type Datagram = (Vec<u8>, SocketAddr);

/// One end of an in-memory point-to-point link.
///
/// Datagrams addressed anywhere but the other end vanish, as do datagrams
/// sent after the other end is dropped.  Once the other end is gone,
/// receiving waits forever, like a UDP socket whose peer went silent.
#[derive(Debug)]
pub struct MemoryTransport {
    addr: SocketAddr,
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Datagram>,
    rx: Mutex<mpsc::UnboundedReceiver<Datagram>>,
}

/// Two connected in-memory transports, at `10.0.0.1:4000` and
/// `10.0.0.2:4000`.
pub fn link() -> (MemoryTransport, MemoryTransport) {
    let a_addr = SocketAddr::from(([10, 0, 0, 1], 4000));
    let b_addr = SocketAddr::from(([10, 0, 0, 2], 4000));
    let (to_b, from_a) = mpsc::unbounded_channel();
    let (to_a, from_b) = mpsc::unbounded_channel();
    let a = MemoryTransport {
        addr: a_addr,
        peer: b_addr,
        tx: to_b,
        rx: Mutex::new(from_b),
    };
    let b = MemoryTransport {
        addr: b_addr,
        peer: a_addr,
        tx: to_a,
        rx: Mutex::new(from_a),
    };
    (a, b)
}

#[async_trait]
impl DatagramTransport for MemoryTransport {
    async fn send_to(&self, buf: &[u8], dest: SocketAddr) -> io::Result<()> {
        if dest != self.peer {
            log::trace!("[sim] no route to {dest}");
            return Ok(());
        }
        if self.tx.send((buf.to_vec(), self.addr)).is_err() {
            log::trace!("[sim] peer gone, datagram lost");
        }
        Ok(())
    }

    async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some((data, from)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok((n, from))
            }
            None => std::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::MAX_DATAGRAM;

    async fn recv(t: &impl DatagramTransport) -> Vec<u8> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, _) = t.recv_from(&mut buf).await.unwrap();
        buf.truncate(n);
        buf
    }

    #[tokio::test]
    async fn link_delivers_both_ways() {
        let (a, b) = link();
        let b_addr = b.local_addr().unwrap();
        let a_addr = a.local_addr().unwrap();

        a.send_to(b"to b", b_addr).await.unwrap();
        b.send_to(b"to a", a_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"to b");
        assert_eq!(from, a_addr);
        assert_eq!(recv(&a).await, b"to a");
    }

    #[tokio::test]
    async fn pass_through_by_default() {
        let (a, b) = link();
        let b_addr = b.local_addr().unwrap();
        let a = Lossy::new(a, SimulatorConfig::default());
        for i in 0..20u8 {
            a.send_to(&[i], b_addr).await.unwrap();
        }
        for i in 0..20u8 {
            assert_eq!(recv(&b).await, vec![i]);
        }
        assert_eq!(a.stats().dropped(), 0);
    }

    #[tokio::test]
    async fn total_loss_drops_everything() {
        let (a, b) = link();
        let b_addr = b.local_addr().unwrap();
        let a = Lossy::new(
            a,
            SimulatorConfig {
                loss_rate: 1.0,
                ..SimulatorConfig::default()
            },
        );
        for _ in 0..10 {
            a.send_to(b"gone", b_addr).await.unwrap();
        }
        assert_eq!(a.stats().dropped(), 10);
        drop(a);

        let mut buf = [0u8; 16];
        let nothing = tokio::time::timeout(Duration::from_millis(10), b.recv_from(&mut buf)).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn duplication_and_corruption() {
        let (a, b) = link();
        let b_addr = b.local_addr().unwrap();
        let a = Lossy::new(
            a,
            SimulatorConfig {
                duplicate_rate: 1.0,
                corrupt_rate: 1.0,
                seed: 7,
                ..SimulatorConfig::default()
            },
        );
        let original = vec![0u8; 32];
        a.send_to(&original, b_addr).await.unwrap();

        let first = recv(&b).await;
        let second = recv(&b).await;
        assert_eq!(first, second);
        let flipped: u32 = first.iter().map(|b| b.count_ones()).sum();
        assert_eq!(flipped, 1);
        assert_eq!(a.stats().corrupted(), 1);
        assert_eq!(a.stats().duplicated(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reordered_datagrams_are_overtaken() {
        let (a, b) = link();
        let b_addr = b.local_addr().unwrap();
        let a = Lossy::new(
            a,
            SimulatorConfig {
                reorder_rate: 1.0,
                reorder_delay: Duration::from_millis(100),
                ..SimulatorConfig::default()
            },
        );
        a.send_to(b"late", b_addr).await.unwrap();
        a.inner.send_to(b"early", b_addr).await.unwrap();

        assert_eq!(recv(&b).await, b"early");
        assert_eq!(recv(&b).await, b"late");
        assert_eq!(a.stats().reordered(), 1);
    }

    #[tokio::test]
    async fn same_seed_same_fate() {
        let config = SimulatorConfig {
            loss_rate: 0.5,
            seed: 42,
            ..SimulatorConfig::default()
        };
        let mut outcomes = Vec::new();
        for _ in 0..2 {
            let (a, b) = link();
            let b_addr = b.local_addr().unwrap();
            let a = Lossy::new(a, config.clone());
            for _ in 0..64 {
                a.send_to(b"x", b_addr).await.unwrap();
            }
            outcomes.push(a.stats().dropped());
        }
        assert_eq!(outcomes[0], outcomes[1]);
        assert!(outcomes[0] > 0 && outcomes[0] < 64);
    }
}
