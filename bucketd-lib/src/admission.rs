//! The admission worker: turns queued messages into OK/NOK verdicts.
//!
//! A single worker drains the [`BoundedQueue`], parses each message as an
//! IPv4 address, and charges the address's token bucket. Unparseable
//! messages are dropped without a reply. Every other message gets exactly one
//! [`Verdict`], delivered through the [`Reply`] implementation the worker was
//! built with.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::address;
use crate::queue::BoundedQueue;
use crate::rate_limit::{BucketPolicy, RateLimitTable, TokenBucket};
use crate::stats::ServiceStats;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Admit,
    Deny,
}

impl Verdict {
    /// Wire form of the verdict.
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            Verdict::Admit => b"OK",
            Verdict::Deny => b"NOK",
        }
    }
}

/// Sends a verdict back to whoever asked.
pub trait Reply: Send {
    /// Where the request came from. Opaque to the worker.
    type Addr: Send + fmt::Debug;

    fn reply(&self, to: &Self::Addr, verdict: Verdict) -> io::Result<()>;
}

/// A received message waiting for admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem<A> {
    pub reply_to: A,
    pub message: String,
}

/// Hands a received message to the worker without blocking.
///
/// Returns `false` if the queue was full and the message was dropped.
pub fn deliver<A>(
    queue: &BoundedQueue<QueueItem<A>>,
    stats: &ServiceStats,
    message: String,
    reply_to: A,
) -> bool {
    stats.record_received();
    match queue.try_enqueue(QueueItem { reply_to, message }) {
        Ok(()) => true,
        Err(full) => {
            stats.record_dropped();
            warn!(message = %full.into_inner().message, "request queue full, dropping message");
            false
        }
    }
}

pub struct AdmissionWorker<R: Reply> {
    queue: Arc<BoundedQueue<QueueItem<R::Addr>>>,
    table: Arc<RateLimitTable>,
    policy: BucketPolicy,
    replier: R,
    stats: Arc<ServiceStats>,
}

impl<R: Reply> AdmissionWorker<R> {
    pub fn new(
        queue: Arc<BoundedQueue<QueueItem<R::Addr>>>,
        table: Arc<RateLimitTable>,
        policy: BucketPolicy,
        replier: R,
        stats: Arc<ServiceStats>,
    ) -> Self {
        Self { queue, table, policy, replier, stats }
    }

    /// Decides on a single message.
    ///
    /// Returns `None` for messages that are not a usable IPv4 address; those
    /// never touch the table. A first sighting creates the bucket and is
    /// admitted unless the table has no room left, in which case it is
    /// denied.
    pub fn admit(&self, message: &str) -> Option<Verdict> {
        let key = match address::parse(message) {
            Ok(key) => key,
            Err(e) => {
                self.stats.record_invalid();
                debug!(%message, error = %e, "ignoring invalid address");
                return None;
            }
        };

        let verdict = loop {
            let Some(handle) = self.table.lookup(key) else {
                break match self.table.insert(self.policy.fresh_bucket(key, message)) {
                    Ok(_) => Verdict::Admit,
                    Err(e) => {
                        warn!(%key, error = %e, "cannot create bucket");
                        Verdict::Deny
                    }
                };
            };
            // A stale handle means the entry was evicted or moved by a
            // compaction since the lookup; look it up again.
            match self.table.with_bucket(handle, TokenBucket::take) {
                Some(true) => break Verdict::Admit,
                Some(false) => break Verdict::Deny,
                None => continue,
            }
        };

        match verdict {
            Verdict::Admit => self.stats.record_admitted(),
            Verdict::Deny => self.stats.record_denied(),
        }
        Some(verdict)
    }

    /// Decides on `item` and replies to its sender.
    pub fn process(&self, item: QueueItem<R::Addr>) {
        let Some(verdict) = self.admit(&item.message) else {
            return;
        };
        if let Err(e) = self.replier.reply(&item.reply_to, verdict) {
            self.stats.record_reply_error();
            warn!(to = ?item.reply_to, ?verdict, error = %e, "failed to send verdict");
        }
    }

    /// Processes queued items until the queue is closed and drained.
    pub fn run(&self) {
        while let Some(item) = self.queue.dequeue() {
            self.process(item);
        }
        debug!("request queue closed, admission worker exiting");
    }
}

impl<R> AdmissionWorker<R>
where
    R: Reply + 'static,
    R::Addr: 'static,
{
    /// Runs the worker on its own OS thread.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("admission-worker".into())
            .spawn(move || self.run())
    }
}
