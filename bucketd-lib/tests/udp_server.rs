//! End-to-end tests over loopback UDP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bucketd_lib::config::Config;
use bucketd_lib::Server;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

const REPLY_WAIT: Duration = Duration::from_millis(500);

struct Running {
    addr: SocketAddr,
    client: UdpSocket,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<bucketd_lib::Result<()>>,
    stats: Arc<bucketd_lib::ServiceStats>,
}

async fn start(config: Config) -> Result<Running, Box<dyn std::error::Error + Send + Sync>> {
    let server = Server::bind(Arc::new(config)).await?;
    let addr = server.local_addr()?;
    let stats = server.stats();
    let (shutdown, rx) = watch::channel(false);
    let task = tokio::spawn(server.run(rx));

    let client = UdpSocket::bind("127.0.0.1:0").await?;
    client.connect(addr).await?;
    Ok(Running { addr, client, shutdown, task, stats })
}

fn test_config(max_tokens: u32) -> Config {
    let mut cfg = Config::default();
    cfg.listen = SocketAddr::from(([127, 0, 0, 1], 0));
    cfg.bucket.max_tokens = max_tokens;
    // Keep the sweeper out of the way.
    cfg.bucket.refill_interval_ms = 60_000;
    cfg
}

async fn ask(client: &UdpSocket, message: &str) -> Result<Option<String>, std::io::Error> {
    let mut datagram = message.as_bytes().to_vec();
    datagram.push(0);
    client.send(&datagram).await?;

    let mut buf = [0u8; 64];
    match timeout(REPLY_WAIT, client.recv(&mut buf)).await {
        Ok(len) => Ok(Some(String::from_utf8_lossy(&buf[..len?]).into_owned())),
        Err(_) => Ok(None),
    }
}

async fn stop(running: Running) -> TestResult {
    running.shutdown.send(true)?;
    timeout(Duration::from_secs(5), running.task).await???;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn admits_burst_then_denies() -> TestResult {
    let running = start(test_config(3)).await?;

    for _ in 0..3 {
        assert_eq!(ask(&running.client, "192.168.3.30").await?.as_deref(), Some("OK"));
    }
    assert_eq!(ask(&running.client, "192.168.3.30").await?.as_deref(), Some("NOK"));
    assert_eq!(ask(&running.client, "192.168.3.31").await?.as_deref(), Some("OK"));

    let snap = running.stats.snapshot();
    assert_eq!(snap.admitted, 4);
    assert_eq!(snap.denied, 1);
    stop(running).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_messages_get_no_reply() -> TestResult {
    let running = start(test_config(3)).await?;

    for message in ["0.0.0.0", ".", "-1.-2.-3.-4", "192.168.", "B.BB.B.B"] {
        assert_eq!(ask(&running.client, message).await?, None, "{message:?}");
    }
    let junk = "A".repeat(80);
    assert_eq!(ask(&running.client, &junk).await?, None);

    // The service is still answering.
    assert_eq!(ask(&running.client, "10.0.0.1").await?.as_deref(), Some("OK"));
    assert_eq!(running.stats.snapshot().invalid, 6);
    stop(running).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sweeper_refills_over_time() -> TestResult {
    let mut cfg = test_config(2);
    cfg.bucket.refill_interval_ms = 200;
    let running = start(cfg).await?;

    assert_eq!(ask(&running.client, "10.1.1.1").await?.as_deref(), Some("OK"));
    assert_eq!(ask(&running.client, "10.1.1.1").await?.as_deref(), Some("OK"));
    assert_eq!(ask(&running.client, "10.1.1.1").await?.as_deref(), Some("NOK"));

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(ask(&running.client, "10.1.1.1").await?.as_deref(), Some("OK"));
    stop(running).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_releases_the_address() -> TestResult {
    let running = start(test_config(3)).await?;
    let addr = running.addr;
    assert_eq!(ask(&running.client, "10.2.2.2").await?.as_deref(), Some("OK"));
    stop(running).await?;

    // Both the receive loop and the worker's reply handle are gone.
    let rebound = UdpSocket::bind(addr).await?;
    assert_eq!(rebound.local_addr()?, addr);
    drop(rebound);

    // A second server can take over the same address.
    let mut cfg = test_config(3);
    cfg.listen = addr;
    let running = start(cfg).await?;
    assert_eq!(running.addr, addr);
    assert_eq!(ask(&running.client, "10.2.2.2").await?.as_deref(), Some("OK"));
    stop(running).await
}
