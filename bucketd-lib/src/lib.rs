#![forbid(unsafe_code)]

pub mod address;
pub mod admission;
pub mod config;
pub mod error;
pub mod queue;
pub mod rate_limit;
pub mod server;
pub mod stats;
pub mod sweeper;
pub mod telemetry;

pub use address::{parse, AddressError, BucketKey};
pub use admission::{AdmissionWorker, QueueItem, Reply, Verdict};
pub use config::{load_from_path, Config};
pub use error::{BucketError, Result};
pub use queue::BoundedQueue;
pub use rate_limit::{BucketPolicy, RateLimitTable, TokenBucket};
pub use server::{run, Server};
pub use stats::{ServiceStats, StatsSnapshot};
pub use sweeper::{spawn_sweeper, Sweeper};
