//! Fixed-size open-addressing hash table of token buckets.
//!
//! Collisions are resolved with double hashing over a prime capacity `M`:
//!
//! ```text
//! h1(k)       = k mod M
//! h2(k)       = (k mod (M - 1)) + 1
//! probe(k, i) = (h1(k) + i * h2(k)) mod M      for i in 0..M
//! ```
//!
//! `h2` is never zero and, with `M` prime, coprime to `M`, so every probe
//! sequence visits all `M` slots exactly once.
//!
//! # Locking
//!
//! Two locks guard the table. The *structure* lock owns slot occupancy
//! (which key lives at which index). The *data* lock owns the bucket
//! payloads. Insert and remove take the structure lock, pick the slot, then
//! take the data lock before releasing the structure lock, so a claimed slot
//! is never observable without its payload. Nothing ever takes the structure
//! lock while holding the data lock.
//!
//! The data lock is shared by the whole table. Every payload critical
//! section is a handful of instructions, but under heavy multi-writer load
//! it is the contention point; sharding it per slot range would not change
//! any of the invariants above.
//!
//! Removed slots become tombstones rather than vacant slots. Lookups probe
//! past tombstones and stop at the first vacant slot, and inserts reuse the
//! first tombstone seen on the probe path, so a key is never duplicated and
//! never reported missing while it is live. Once the table is empty all
//! tombstones are cleared. [`RateLimitTable::compact`] rebuilds the probe
//! chains once tombstones cover more than half the table, so that misses do
//! not degrade into full-table probes under steady churn.

use parking_lot::Mutex;

use crate::address::BucketKey;
use crate::error::{BucketError, Result};
use crate::rate_limit::bucket::TokenBucket;

/// Default capacity: the largest prime below 4096.
pub const DEFAULT_TABLE_CAPACITY: usize = 4093;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Vacant,
    Occupied(BucketKey),
    Tombstone,
}

struct Slots {
    keys: Box<[Slot]>,
    live: usize,
    tombstones: usize,
}

enum Located {
    Found(usize),
    Missing { insert_at: Option<usize> },
}

/// Position of a live key, as returned by [`RateLimitTable::lookup`].
///
/// The handle names the key as well as the slot: if the key is removed and
/// the slot reused before the handle is used, payload access through it
/// finds a different key and yields `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotHandle {
    index: usize,
    key: BucketKey,
}

impl SlotHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn key(&self) -> BucketKey {
        self.key
    }
}

pub struct RateLimitTable {
    capacity: usize,
    slots: Mutex<Slots>,
    data: Mutex<Box<[Option<TokenBucket>]>>,
}

impl RateLimitTable {
    /// Creates an empty table with `capacity` slots.
    ///
    /// `capacity` should be prime (see [`is_prime`]) for probe sequences to
    /// cover the whole table; values below 2 are raised to 2.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            slots: Mutex::new(Slots {
                keys: vec![Slot::Vacant; capacity].into_boxed_slice(),
                live: 0,
                tombstones: 0,
            }),
            data: Mutex::new((0..capacity).map(|_| None).collect()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots.lock().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of removed slots still lengthening probe chains.
    pub fn tombstones(&self) -> usize {
        self.slots.lock().tombstones
    }

    fn probe(&self, key: BucketKey, attempt: usize) -> usize {
        let m = self.capacity as u64;
        let k = u64::from(key.get());
        let h1 = k % m;
        let h2 = k % (m - 1) + 1;
        ((h1 + attempt as u64 * h2) % m) as usize
    }

    fn locate(&self, keys: &[Slot], key: BucketKey) -> Located {
        let mut reusable = None;
        for attempt in 0..self.capacity {
            let index = self.probe(key, attempt);
            match keys[index] {
                Slot::Occupied(k) if k == key => return Located::Found(index),
                Slot::Occupied(_) => {}
                Slot::Tombstone => {
                    reusable.get_or_insert(index);
                }
                Slot::Vacant => {
                    return Located::Missing { insert_at: Some(reusable.unwrap_or(index)) };
                }
            }
        }
        Located::Missing { insert_at: reusable }
    }

    /// Stores `bucket` under its key.
    ///
    /// An existing entry for the same key is overwritten in place. Fails with
    /// [`BucketError::TableFull`], leaving the table untouched, when every
    /// probe position holds a different key.
    pub fn insert(&self, bucket: TokenBucket) -> Result<SlotHandle> {
        let key = bucket.key();
        let mut slots = self.slots.lock();
        let index = match self.locate(&slots.keys, key) {
            Located::Found(index) => index,
            Located::Missing { insert_at: Some(index) } => {
                if slots.keys[index] == Slot::Tombstone {
                    slots.tombstones -= 1;
                }
                slots.keys[index] = Slot::Occupied(key);
                slots.live += 1;
                debug_assert!(slots.live <= self.capacity);
                index
            }
            Located::Missing { insert_at: None } => return Err(BucketError::TableFull(key)),
        };

        let mut data = self.data.lock();
        drop(slots);
        data[index] = Some(bucket);
        Ok(SlotHandle { index, key })
    }

    /// Finds the slot holding `key`.
    pub fn lookup(&self, key: BucketKey) -> Option<SlotHandle> {
        let slots = self.slots.lock();
        match self.locate(&slots.keys, key) {
            Located::Found(index) => Some(SlotHandle { index, key }),
            Located::Missing { .. } => None,
        }
    }

    /// Removes `key`. Returns `false` if it was not present.
    pub fn remove(&self, key: BucketKey) -> bool {
        self.remove_if(key, |_| true)
    }

    /// Removes `key` only if `predicate` holds for its current bucket.
    ///
    /// The predicate runs with both locks held, so nothing can change the
    /// bucket between the check and the removal.
    pub fn remove_if(
        &self,
        key: BucketKey,
        predicate: impl FnOnce(&TokenBucket) -> bool,
    ) -> bool {
        let mut slots = self.slots.lock();
        let Located::Found(index) = self.locate(&slots.keys, key) else {
            return false;
        };

        let mut data = self.data.lock();
        if !data[index].as_ref().is_some_and(predicate) {
            return false;
        }

        slots.keys[index] = Slot::Tombstone;
        slots.live -= 1;
        slots.tombstones += 1;
        if slots.live == 0 {
            slots.keys.fill(Slot::Vacant);
            slots.tombstones = 0;
        }
        drop(slots);

        data[index] = None;
        true
    }

    /// Re-places every live entry along fresh probe chains and clears all
    /// tombstones, if tombstones make up more than half the table.
    ///
    /// Returns whether a rebuild happened. Both locks are held throughout.
    /// Entries may move, so handles taken before a rebuild can go stale.
    pub fn compact(&self) -> bool {
        let mut slots = self.slots.lock();
        if slots.tombstones * 2 <= self.capacity {
            return false;
        }
        let mut data = self.data.lock();

        let mut keys = vec![Slot::Vacant; self.capacity].into_boxed_slice();
        let mut payloads: Box<[Option<TokenBucket>]> =
            (0..self.capacity).map(|_| None).collect();
        for (index, slot) in slots.keys.iter().enumerate() {
            let Slot::Occupied(key) = *slot else {
                continue;
            };
            let target = (0..self.capacity)
                .map(|attempt| self.probe(key, attempt))
                .find(|&i| keys[i] == Slot::Vacant);
            debug_assert!(target.is_some(), "no vacant slot for live key {key}");
            if let Some(target) = target {
                keys[target] = Slot::Occupied(key);
                payloads[target] = data[index].take();
            }
        }

        slots.keys = keys;
        slots.tombstones = 0;
        *data = payloads;
        true
    }

    /// Runs `f` on the bucket behind `handle` under the data lock.
    ///
    /// Returns `None` when the handle is stale, i.e. its key has since been
    /// removed from that slot.
    pub fn with_bucket<R>(
        &self,
        handle: SlotHandle,
        f: impl FnOnce(&mut TokenBucket) -> R,
    ) -> Option<R> {
        let mut data = self.data.lock();
        match data.get_mut(handle.index) {
            Some(Some(bucket)) if bucket.key() == handle.key => Some(f(bucket)),
            _ => None,
        }
    }

    /// A copy of the entry for `key`, if live.
    pub fn entry(&self, key: BucketKey) -> Option<TokenBucket> {
        let handle = self.lookup(key)?;
        self.with_bucket(handle, |bucket| bucket.clone())
    }

    /// The key occupying slot `index`, if any.
    pub fn key_at(&self, index: usize) -> Option<SlotHandle> {
        let slots = self.slots.lock();
        match slots.keys.get(index) {
            Some(Slot::Occupied(key)) => Some(SlotHandle { index, key: *key }),
            _ => None,
        }
    }

    /// Walks every slot in index order, yielding the live ones.
    ///
    /// Each slot is read under its own short structure-lock acquisition, so
    /// the walk is not a snapshot: entries inserted or removed meanwhile may
    /// or may not be seen.
    pub fn scan(&self) -> impl Iterator<Item = SlotHandle> + '_ {
        (0..self.capacity).filter_map(move |index| self.key_at(index))
    }
}

impl std::fmt::Debug for RateLimitTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTable")
            .field("capacity", &self.capacity)
            .field("live", &self.len())
            .field("tombstones", &self.tombstones())
            .finish()
    }
}

/// Trial-division primality check for table capacities.
pub fn is_prime(n: usize) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3usize;
    while d.saturating_mul(d) <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}
