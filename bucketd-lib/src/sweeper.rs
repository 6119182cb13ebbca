//! Periodic token refill and idle-bucket eviction.
//!
//! Every cycle walks the whole table, adds `refill_tokens` to each bucket
//! and drops buckets that have climbed above `max_tokens`. A bucket only gets
//! there after `max_tokens / refill_tokens` or so cycles without a request,
//! so eviction doubles as idle-address cleanup. The cost of a cycle is
//! bounded by the table capacity, whatever the number of live entries.
//! After the walk the table is compacted if evictions have left it mostly
//! tombstones.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::rate_limit::{BucketPolicy, RateLimitTable};
use crate::stats::ServiceStats;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub refilled: usize,
    pub evicted: usize,
    pub compacted: bool,
}

pub struct Sweeper {
    table: Arc<RateLimitTable>,
    policy: BucketPolicy,
    stats: Arc<ServiceStats>,
}

impl Sweeper {
    pub fn new(
        table: Arc<RateLimitTable>,
        policy: BucketPolicy,
        stats: Arc<ServiceStats>,
    ) -> Self {
        Self { table, policy, stats }
    }

    /// Runs a single refill-and-evict pass over the table.
    pub fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for handle in self.table.scan() {
            let saturated = self.table.with_bucket(handle, |bucket| {
                bucket.refill(self.policy.refill_tokens);
                self.policy.is_saturated(bucket)
            });

            match saturated {
                Some(true) => {
                    report.refilled += 1;
                    if self.table.remove_if(handle.key(), |b| self.policy.is_saturated(b)) {
                        report.evicted += 1;
                    } else {
                        warn!(key = %handle.key(), "saturated bucket changed before eviction");
                    }
                }
                Some(false) => report.refilled += 1,
                // Removed between the scan and the refill.
                None => {}
            }
        }

        if report.evicted > 0 {
            self.stats.record_evicted(report.evicted as u64);
            report.compacted = self.table.compact();
            debug!(
                refilled = report.refilled,
                evicted = report.evicted,
                compacted = report.compacted,
                live = self.table.len(),
                "sweep completed"
            );
        }
        report
    }
}

/// Spawns a background task that sweeps the table every `period`.
///
/// The first sweep happens one full period after the call.
pub fn spawn_sweeper(sweeper: Sweeper, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            sweeper.sweep_once();
        }
    })
}
