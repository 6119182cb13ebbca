use serde::Deserialize;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use super::telemetry::LoggingConfig;
use crate::rate_limit::{BucketPolicy, DEFAULT_TABLE_CAPACITY};

/// Default UDP port the service listens on.
pub const DEFAULT_PORT: u16 = 3211;

/// Main configuration structure
///
/// Every field has a default, so an empty file (or no file at all) gives
/// the stock tuning: 50-token buckets refilled by one token per second,
/// a 256-entry queue and a 4093-slot table.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address and port to listen on (IPv4 only)
    /// Default: "127.0.0.1:3211"
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Token bucket sizing and refill schedule
    #[serde(default)]
    pub bucket: BucketConfig,
    /// Request queue between the receiver and the admission worker
    #[serde(default)]
    pub queue: QueueConfig,
    /// Rate-limit table sizing
    #[serde(default)]
    pub table: TableConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            bucket: BucketConfig::default(),
            queue: QueueConfig::default(),
            table: TableConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    pub fn policy(&self) -> BucketPolicy {
        BucketPolicy { max_tokens: self.bucket.max_tokens, refill_tokens: self.bucket.refill_tokens }
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.bucket.refill_interval_ms)
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, DEFAULT_PORT))
}

/// Token bucket configuration
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    /// Burst size per address
    /// Default: 50
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Tokens added to every bucket on each sweep
    /// Default: 1
    #[serde(default = "default_refill_tokens")]
    pub refill_tokens: u32,
    /// Time between sweeps in milliseconds
    /// Default: 1000
    #[serde(default = "default_refill_interval_ms")]
    pub refill_interval_ms: u64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            refill_tokens: default_refill_tokens(),
            refill_interval_ms: default_refill_interval_ms(),
        }
    }
}

fn default_max_tokens() -> u32 {
    50
}

fn default_refill_tokens() -> u32 {
    1
}

fn default_refill_interval_ms() -> u64 {
    1000
}

/// Request queue configuration
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum queued requests; datagrams arriving on a full queue are dropped
    /// Default: 256
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    /// Receive buffer size in bytes, terminator included
    /// Longer datagrams are truncated to `max_message_len - 1` bytes
    /// Default: 64
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: default_queue_capacity(), max_message_len: default_max_message_len() }
    }
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_message_len() -> usize {
    64
}

/// Rate-limit table configuration
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    /// Number of slots; must be prime so that every probe sequence covers
    /// the whole table
    /// Default: 4093
    #[serde(default = "default_table_capacity")]
    pub capacity: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self { capacity: default_table_capacity() }
    }
}

fn default_table_capacity() -> usize {
    DEFAULT_TABLE_CAPACITY
}
