use std::sync::atomic::{AtomicU64, Ordering};

/// Request counters shared by the receiver, the admission worker and the sweeper.
#[derive(Debug, Default)]
pub struct ServiceStats {
    received: AtomicU64,
    dropped: AtomicU64,
    invalid: AtomicU64,
    admitted: AtomicU64,
    denied: AtomicU64,
    reply_errors: AtomicU64,
    evicted: AtomicU64,
}

/// Point-in-time copy of [`ServiceStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub dropped: u64,
    pub invalid: u64,
    pub admitted: u64,
    pub denied: u64,
    pub reply_errors: u64,
    pub evicted: u64,
}

impl ServiceStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Datagram dropped because the queue was full.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reply_error(&self) {
        self.reply_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, count: u64) {
        self.evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            admitted: self.admitted.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            reply_errors: self.reply_errors.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }
}
