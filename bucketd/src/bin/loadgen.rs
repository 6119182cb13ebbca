#![forbid(unsafe_code)]

//! Load generator for bucketd: a pool of UDP clients hammering the service
//! with a mix of malformed probes and well-formed addresses.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, UdpSocket};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Malformed and repeated probes, one per leading worker.
const PROBES: [&str; 8] = [
    "0.0.0.0",
    ".",
    "-1.-2.-3.-4",
    "192.168.",
    "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
    "B.BB.B.B",
    "192.168.3.30",
    "192.168.3.30",
];

const REPLY_BUF: usize = 64;

#[derive(Parser, Debug)]
#[command(author, version, about = "UDP load generator for bucketd")]
struct Cli {
    /// Server host name or IPv4 address
    host: String,

    /// Server port
    port: u16,

    /// Number of concurrent clients
    #[arg(long, default_value_t = 20)]
    workers: usize,

    /// Pause between two requests of one client
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    interval_ms: u64,

    /// How long to wait for a reply
    #[arg(long, value_name = "MS", default_value_t = 300)]
    timeout_ms: u64,

    /// Requests per client; runs until interrupted when absent
    #[arg(long)]
    rounds: Option<u64>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let target = match resolve(&cli.host, cli.port).await {
        Ok(addr) => addr,
        Err(e) => {
            error!(host = %cli.host, port = cli.port, error = %e, "cannot resolve server address");
            std::process::exit(1);
        }
    };
    info!(%target, workers = cli.workers, interval_ms = cli.interval_ms, "starting load");

    let mut clients = JoinSet::new();
    for id in 0..cli.workers {
        let client = Client {
            id,
            target,
            probe: PROBES.get(id).copied(),
            interval: Duration::from_millis(cli.interval_ms),
            reply_timeout: Duration::from_millis(cli.timeout_ms),
            rounds: cli.rounds,
        };
        clients.spawn(client.run());
    }

    while let Some(res) = clients.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "client failed"),
            Err(e) => error!(error = %e, "client task panicked"),
        }
    }
}

/// First IPv4 address `host` resolves to.
async fn resolve(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    lookup_host((host, port))
        .await?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no IPv4 address"))
}

struct Client {
    id: usize,
    target: SocketAddr,
    probe: Option<&'static str>,
    interval: Duration,
    reply_timeout: Duration,
    rounds: Option<u64>,
}

impl Client {
    async fn run(self) -> std::io::Result<()> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(self.target).await?;

        let mut buf = [0u8; REPLY_BUF];
        let mut host: u8 = 1;
        let mut sent: u64 = 0;

        while self.rounds.is_none_or(|rounds| sent < rounds) {
            let message = match self.probe {
                Some(probe) => probe.to_string(),
                None => {
                    let m = format!("192.168.10.{host}");
                    host = if host == 254 { 1 } else { host + 1 };
                    m
                }
            };

            let mut datagram = message.clone().into_bytes();
            datagram.push(0);
            if let Err(e) = socket.send(&datagram).await {
                warn!(client = self.id, error = %e, "send failed");
            }
            sent += 1;

            match timeout(self.reply_timeout, socket.recv(&mut buf)).await {
                Ok(Ok(len)) => {
                    let end = buf[..len].iter().position(|&b| b == 0).unwrap_or(len);
                    let reply = String::from_utf8_lossy(&buf[..end]);
                    println!("{message}  response from server: {reply}");
                }
                Ok(Err(e)) => warn!(client = self.id, %message, error = %e, "receive failed"),
                Err(_) => println!("{message}  no response"),
            }

            sleep(self.interval).await;
        }
        Ok(())
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
