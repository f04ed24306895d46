//! Entry point for `sack-stream`.
//!
//! Parses CLI arguments and dispatches into either **send** or **recv** mode.
//! All protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing, file I/O).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use sack_stream::{
    Config, ConnError, Connection, ConnectionStats, DatagramTransport, Lossy, RetransmitPolicy,
    SimulatorConfig, UdpTransport,
};

/// Bytes handed to the connection per write call.
const CHUNK: usize = 64 * 1024;

/// Reliable file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Send a file to a peer running `recv`.
    Send {
        /// Local address to bind (e.g. 0.0.0.0:9001).
        #[arg(short, long)]
        bind: SocketAddr,
        /// Address of the receiving peer (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        peer: SocketAddr,
        /// File to send.
        #[arg(short, long)]
        file: PathBuf,
        #[command(flatten)]
        opts: Options,
    },
    /// Receive a stream from a peer running `send` and write it to a file.
    Recv {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long)]
        bind: SocketAddr,
        /// Address of the sending peer.
        #[arg(short, long)]
        peer: SocketAddr,
        /// Where to write the received bytes.
        #[arg(short, long)]
        out: PathBuf,
        #[command(flatten)]
        opts: Options,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    /// Go-Back-N: a timeout resends the whole window.
    Gbn,
    /// Selective Repeat: a timeout resends one segment.
    Sr,
}

#[derive(Args)]
struct Options {
    /// Maximum segment size in bytes.
    #[arg(long, default_value_t = 1024)]
    mss: usize,
    /// Advertised receive window in bytes.
    #[arg(long, default_value_t = u16::MAX)]
    recv_window: u16,
    #[arg(long, value_enum, default_value_t = Policy::Sr)]
    policy: Policy,
    /// Disable selective acknowledgments.
    #[arg(long)]
    no_sack: bool,
    /// Disable Reno and use a fixed window of `recv_window` bytes.
    #[arg(long)]
    no_congestion_control: bool,
    /// Initial retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 1000)]
    initial_rto_ms: u64,
    /// Lower bound on the retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 200)]
    min_rto_ms: u64,
    /// Consecutive timeouts before giving up.
    #[arg(long, default_value_t = 6)]
    max_retries: u32,
    /// Probability of dropping an outgoing datagram.
    #[arg(long, default_value_t = 0.0)]
    loss: f64,
    /// Probability of flipping a bit in an outgoing datagram.
    #[arg(long, default_value_t = 0.0)]
    corrupt: f64,
    /// Probability of sending an outgoing datagram twice.
    #[arg(long, default_value_t = 0.0)]
    duplicate: f64,
    /// Probability of delaying an outgoing datagram.
    #[arg(long, default_value_t = 0.0)]
    reorder: f64,
    /// Seed for the fault-injection RNG.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

impl Options {
    fn config(&self) -> Config {
        let mut config = Config {
            mss: self.mss,
            recv_window: self.recv_window,
            retransmit: match self.policy {
                Policy::Gbn => RetransmitPolicy::GoBackN,
                Policy::Sr => RetransmitPolicy::SelectiveRepeat,
            },
            sack: !self.no_sack,
            congestion_control: !self.no_congestion_control,
            max_retries: self.max_retries,
            ..Config::default()
        };
        config.timer.initial_rto = Duration::from_millis(self.initial_rto_ms);
        config.timer.min_rto = Duration::from_millis(self.min_rto_ms);
        config
    }

    fn simulator(&self) -> Option<SimulatorConfig> {
        let faulty = [self.loss, self.corrupt, self.duplicate, self.reorder]
            .iter()
            .any(|&p| p > 0.0);
        faulty.then(|| SimulatorConfig {
            loss_rate: self.loss,
            corrupt_rate: self.corrupt,
            duplicate_rate: self.duplicate,
            reorder_rate: self.reorder,
            seed: self.seed,
            ..SimulatorConfig::default()
        })
    }
}

enum Job {
    Send(PathBuf),
    Recv(PathBuf),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    let (bind, peer, opts, job) = match cli.mode {
        Mode::Send {
            bind,
            peer,
            file,
            opts,
        } => (bind, peer, opts, Job::Send(file)),
        Mode::Recv {
            bind,
            peer,
            out,
            opts,
        } => (bind, peer, opts, Job::Recv(out)),
    };

    let config = opts.config();
    config.validate().context("invalid options")?;

    let udp = UdpTransport::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    log::info!("bound {bind}, peer {peer}");

    let stats = match opts.simulator() {
        Some(sim) => {
            log::info!("simulating faults: {sim:?}");
            let lossy = Arc::new(Lossy::new(udp, sim));
            let faults = lossy.stats();
            let stats = run(lossy, peer, config, job).await?;
            log::info!(
                "injected: {} dropped, {} duplicated, {} reordered, {} corrupted",
                faults.dropped(),
                faults.duplicated(),
                faults.reordered(),
                faults.corrupted()
            );
            stats
        }
        None => run(Arc::new(udp), peer, config, job).await?,
    };

    log::info!("{stats:?}");
    Ok(())
}

async fn run<T: DatagramTransport>(
    transport: Arc<T>,
    peer: SocketAddr,
    config: Config,
    job: Job,
) -> Result<ConnectionStats> {
    let mut session = Connection::new(transport, peer, config)?.run();

    match job {
        Job::Send(path) => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            log::info!("sending {} bytes from {}", data.len(), path.display());
            for chunk in data.chunks(CHUNK) {
                session.write(chunk).await?;
            }
        }
        Job::Recv(path) => {
            let mut received = Vec::new();
            loop {
                match session.recv().await {
                    Ok(chunk) => received.extend_from_slice(&chunk),
                    Err(ConnError::Eof) => break,
                    Err(e) => return Err(e.into()),
                }
            }
            tokio::fs::write(&path, &received)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            log::info!("received {} bytes into {}", received.len(), path.display());
        }
    }

    Ok(session.close().await?)
}
