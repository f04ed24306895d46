//! Connection shutdown: orderly close, reset, and peers that go silent.

use std::sync::Arc;
use std::time::Duration;

use sack_stream::{link, Config, ConnError, Connection, DatagramTransport, Session};

fn config() -> Config {
    Config {
        mss: 500,
        recv_window: 8000,
        ..Config::default()
    }
}

/// Both ends of a fresh link, already running.
fn pair(config: Config) -> (Session, Session) {
    let (a, b) = link();
    let a_addr = a.local_addr().unwrap();
    let b_addr = b.local_addr().unwrap();
    let sa = Connection::new(Arc::new(a), b_addr, config.clone()).unwrap().run();
    let sb = Connection::new(Arc::new(b), a_addr, config).unwrap().run();
    (sa, sb)
}

#[tokio::test(start_paused = true)]
async fn orderly_close_after_eof() {
    let (sa, mut sb) = pair(config());

    let a = tokio::spawn(async move {
        sa.write(b"goodbye".to_vec()).await.unwrap();
        sa.close().await
    });

    assert_eq!(sb.recv().await.unwrap(), b"goodbye");
    assert!(matches!(sb.recv().await, Err(ConnError::Eof)));
    // EOF is sticky.
    assert!(matches!(sb.recv().await, Err(ConnError::Eof)));

    let b_stats = sb.close().await.unwrap();
    let a_stats = a.await.unwrap().unwrap();
    assert_eq!(a_stats.bytes_acked, 7);
    assert_eq!(b_stats.bytes_delivered, 7);
}

#[tokio::test(start_paused = true)]
async fn simultaneous_close() {
    let (sa, sb) = pair(config());
    sa.write(vec![1u8; 3000]).await.unwrap();
    sb.write(vec![2u8; 3000]).await.unwrap();

    let (a, b) = tokio::join!(sa.close(), sb.close());
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.bytes_acked, 3000);
    assert_eq!(b.bytes_acked, 3000);
}

#[tokio::test(start_paused = true)]
async fn abort_resets_the_peer() {
    let (sa, mut sb) = pair(config());
    sa.write(b"partial".to_vec()).await.unwrap();
    assert_eq!(sb.recv().await.unwrap(), b"partial");

    sa.abort().await;

    assert!(matches!(sb.recv().await, Err(ConnError::Reset)));
    assert!(matches!(sb.write(b"more".to_vec()).await, Err(ConnError::Closed)));
    assert!(matches!(sb.close().await, Err(ConnError::Reset)));
}

#[tokio::test(start_paused = true)]
async fn silent_peer_exhausts_retries() {
    let (a, b) = link();
    let b_addr = b.local_addr().unwrap();
    drop(b);

    let config = Config {
        max_retries: 3,
        ..config()
    };
    let start = tokio::time::Instant::now();
    let session = Connection::new(Arc::new(a), b_addr, config).unwrap().run();
    session.write(vec![0u8; 1000]).await.unwrap();

    assert!(matches!(session.close().await, Err(ConnError::MaxRetriesExceeded)));
    // Expiries at 1s, 3s and 7s retransmit; the one at 15s gives up.
    assert!(start.elapsed() >= Duration::from_secs(15));
}

#[tokio::test(start_paused = true)]
async fn peer_that_never_closes_is_abandoned_after_fin_timeout() {
    let (sa, mut sb) = pair(Config {
        fin_timeout: Duration::from_secs(5),
        ..config()
    });

    sa.write(b"bye".to_vec()).await.unwrap();
    let start = tokio::time::Instant::now();
    let closing = tokio::spawn(sa.close());

    assert_eq!(sb.recv().await.unwrap(), b"bye");
    assert!(matches!(sb.recv().await, Err(ConnError::Eof)));

    // B never closes its half; A gives up once the FIN-wait timer lapses.
    let stats = closing.await.unwrap().unwrap();
    assert_eq!(stats.bytes_acked, 3);
    assert!(start.elapsed() >= Duration::from_secs(5));
    sb.abort().await;
}
