//! UDP front end.
//!
//! The receive loop runs on the tokio runtime and never blocks: every
//! datagram is decoded and pushed onto the bounded queue, or dropped when the
//! queue is full. The admission worker runs on its own thread and answers
//! through [`UdpReply`]. The refill sweeper runs as a tokio task.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::admission::{deliver, AdmissionWorker, QueueItem, Reply, Verdict};
use crate::config::Config;
use crate::error::{BucketError, Result};
use crate::queue::BoundedQueue;
use crate::rate_limit::RateLimitTable;
use crate::stats::ServiceStats;
use crate::sweeper::{spawn_sweeper, Sweeper};

/// Sends verdicts on the listening socket from outside the runtime.
pub struct UdpReply {
    socket: Arc<UdpSocket>,
    runtime: Handle,
}

impl UdpReply {
    pub fn new(socket: Arc<UdpSocket>, runtime: Handle) -> Self {
        Self { socket, runtime }
    }
}

impl Reply for UdpReply {
    type Addr = SocketAddr;

    fn reply(&self, to: &SocketAddr, verdict: Verdict) -> io::Result<()> {
        self.runtime
            .block_on(self.socket.send_to(verdict.as_bytes(), to))
            .map(|_| ())
    }
}

/// Extracts the request text from a datagram.
///
/// The text ends at the first NUL byte and is capped at `max_len - 1` bytes.
/// Returns `None` when nothing is left.
pub fn decode_message(datagram: &[u8], max_len: usize) -> Option<String> {
    let limit = datagram.len().min(max_len.saturating_sub(1));
    let bytes = &datagram[..limit];
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    if end == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

pub struct Server {
    config: Arc<Config>,
    socket: Arc<UdpSocket>,
    stats: Arc<ServiceStats>,
}

impl Server {
    pub async fn bind(config: Arc<Config>) -> Result<Self> {
        let socket = UdpSocket::bind(config.listen)
            .await
            .map_err(|source| BucketError::Bind { addr: config.listen, source })?;
        info!(addr = ?config.listen, "udp socket bound");
        Ok(Self { config, socket: Arc::new(socket), stats: Arc::new(ServiceStats::default()) })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn stats(&self) -> Arc<ServiceStats> {
        Arc::clone(&self.stats)
    }

    /// Serves requests until `shutdown` flips or its sender goes away.
    ///
    /// On the way out the queue is closed, the worker answers what is still
    /// queued and is joined, and the sweeper is stopped. The socket is
    /// released by the time this returns.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let cfg = &self.config;
        let policy = cfg.policy();
        let queue = Arc::new(BoundedQueue::<QueueItem<SocketAddr>>::new(cfg.queue.capacity));
        let table = Arc::new(RateLimitTable::new(cfg.table.capacity));

        let replier = UdpReply::new(Arc::clone(&self.socket), Handle::current());
        let worker = AdmissionWorker::new(
            Arc::clone(&queue),
            Arc::clone(&table),
            policy,
            replier,
            Arc::clone(&self.stats),
        )
        .spawn()?;

        let sweeper = spawn_sweeper(
            Sweeper::new(Arc::clone(&table), policy, Arc::clone(&self.stats)),
            cfg.refill_interval(),
        );
        info!(
            max_tokens = policy.max_tokens,
            refill_tokens = policy.refill_tokens,
            refill_interval_ms = cfg.bucket.refill_interval_ms,
            queue_capacity = queue.capacity(),
            table_capacity = table.capacity(),
            "admission service started"
        );

        let mut buf = vec![0u8; cfg.queue.max_message_len];
        loop {
            let result = tokio::select! {
                res = self.socket.recv_from(&mut buf) => res,
                _ = shutdown.changed() => {
                    info!("shutdown signal received, stopping receive loop");
                    break;
                }
            };
            let (len, peer) = match result {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "failed to receive datagram");
                    continue;
                }
            };
            match decode_message(&buf[..len], cfg.queue.max_message_len) {
                Some(message) => {
                    deliver(&queue, &self.stats, message, peer);
                }
                None => debug!(%peer, "ignoring empty datagram"),
            }
        }

        queue.close();
        match tokio::task::spawn_blocking(move || worker.join()).await {
            Ok(Ok(())) => debug!("admission worker stopped"),
            Ok(Err(_)) => warn!("admission worker panicked"),
            Err(e) => warn!(error = %e, "failed to join admission worker"),
        }
        sweeper.abort();
        // Cancellation is the expected outcome here.
        let _ = sweeper.await;

        let snap = self.stats.snapshot();
        info!(
            received = snap.received,
            dropped = snap.dropped,
            invalid = snap.invalid,
            admitted = snap.admitted,
            denied = snap.denied,
            evicted = snap.evicted,
            "admission service stopped"
        );
        Ok(())
    }
}

/// Binds `config.listen` and serves until shutdown.
pub async fn run(config: Arc<Config>, shutdown: watch::Receiver<bool>) -> Result<()> {
    Server::bind(config).await?.run(shutdown).await
}
