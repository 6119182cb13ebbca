//! Per-address token buckets and the table that stores them.
//!
//! - **TokenBucket** (`bucket.rs`): token count plus the address text it was
//!   created for, and the [`BucketPolicy`] that sizes new buckets and decides
//!   when an idle one is dropped.
//! - **RateLimitTable** (`table.rs`): a fixed-capacity, double-hashed table
//!   keyed by [`BucketKey`](crate::address::BucketKey), safe to share between
//!   the admission worker and the refill sweeper.

mod bucket;
mod table;

pub use bucket::{BucketPolicy, TokenBucket};
pub use table::{is_prime, RateLimitTable, SlotHandle, DEFAULT_TABLE_CAPACITY};
