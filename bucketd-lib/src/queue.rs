//! Fixed-capacity FIFO between the datagram receiver and the admission worker.
//!
//! Producers never block: a full queue hands the item straight back. The
//! consumer blocks in [`BoundedQueue::dequeue`] until an item is available
//! or the queue is closed.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Returned by [`BoundedQueue::try_enqueue`] when every slot is taken or the
/// queue has been closed. Carries the rejected item so the caller decides
/// what to do with it.
#[derive(Error)]
#[error("queue is full")]
pub struct QueueFull<T>(pub T);

impl<T> fmt::Debug for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueFull(..)")
    }
}

impl<T> QueueFull<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

struct Ring<T> {
    slots: Box<[Option<T>]>,
    front: usize,
    end: usize,
    size: usize,
    closed: bool,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            front: 0,
            end: 0,
            size: 0,
            closed: false,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn push_back(&mut self, item: T) -> Result<(), T> {
        if self.size == self.capacity() {
            return Err(item);
        }
        debug_assert!(self.slots[self.end].is_none(), "ring slot {} still occupied", self.end);
        self.slots[self.end] = Some(item);
        self.end = (self.end + 1) % self.capacity();
        self.size += 1;
        Ok(())
    }

    fn pop_front(&mut self) -> Option<T> {
        if self.size == 0 {
            return None;
        }
        let item = self.slots[self.front].take();
        debug_assert!(item.is_some(), "ring slot {} empty with size {}", self.front, self.size);
        self.front = (self.front + 1) % self.capacity();
        self.size -= 1;
        item
    }
}

/// A thread-safe circular buffer with a blocking consumer side.
pub struct BoundedQueue<T> {
    ring: Mutex<Ring<T>>,
    ready: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Creates a queue holding at most `capacity` items (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring::with_capacity(capacity.max(1))),
            ready: Condvar::new(),
        }
    }

    /// Appends `item` without blocking.
    ///
    /// When the queue is full the item is returned inside [`QueueFull`] and a
    /// waiting consumer is woken so it can drain the backlog.
    pub fn try_enqueue(&self, item: T) -> Result<(), QueueFull<T>> {
        let mut ring = self.ring.lock();
        if ring.closed {
            return Err(QueueFull(item));
        }
        match ring.push_back(item) {
            Ok(()) => {
                drop(ring);
                self.ready.notify_one();
                Ok(())
            }
            Err(item) => {
                self.ready.notify_one();
                Err(QueueFull(item))
            }
        }
    }

    /// Removes the oldest item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is closed and every item enqueued before
    /// the close has been handed out.
    pub fn dequeue(&self) -> Option<T> {
        let mut ring = self.ring.lock();
        loop {
            if let Some(item) = ring.pop_front() {
                return Some(item);
            }
            if ring.closed {
                return None;
            }
            self.ready.wait(&mut ring);
        }
    }

    /// Like [`dequeue`](Self::dequeue) but gives up after `timeout`.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut ring = self.ring.lock();
        loop {
            if let Some(item) = ring.pop_front() {
                return Some(item);
            }
            if ring.closed {
                return None;
            }
            if self.ready.wait_until(&mut ring, deadline).timed_out() {
                return ring.pop_front();
            }
        }
    }

    /// Rejects further items and wakes every blocked consumer.
    pub fn close(&self) {
        self.ring.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.ring.lock().closed
    }

    pub fn len(&self) -> usize {
        self.ring.lock().size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }
}

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("BoundedQueue")
            .field("size", &ring.size)
            .field("capacity", &ring.capacity())
            .field("closed", &ring.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn preserves_fifo_order() {
        let queue = BoundedQueue::new(4);
        for i in 0..4 {
            assert!(queue.try_enqueue(i).is_ok());
        }
        assert_eq!(queue.len(), 4);
        for i in 0..4 {
            assert_eq!(queue.dequeue(), Some(i));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn full_queue_returns_item_without_blocking() {
        let queue = BoundedQueue::new(2);
        assert!(queue.try_enqueue("a").is_ok());
        assert!(queue.try_enqueue("b").is_ok());

        match queue.try_enqueue("c") {
            Err(full) => assert_eq!(full.into_inner(), "c"),
            Ok(()) => panic!("third item must be rejected"),
        }
        assert_eq!(queue.len(), 2);

        // Rejection leaves the ring intact.
        assert_eq!(queue.dequeue(), Some("a"));
        assert!(queue.try_enqueue("d").is_ok());
        assert_eq!(queue.dequeue(), Some("b"));
        assert_eq!(queue.dequeue(), Some("d"));
    }

    #[test]
    fn wraps_around_the_ring() {
        let queue = BoundedQueue::new(3);
        for round in 0..10 {
            assert!(queue.try_enqueue(round * 2).is_ok());
            assert!(queue.try_enqueue(round * 2 + 1).is_ok());
            assert_eq!(queue.dequeue(), Some(round * 2));
            assert_eq!(queue.dequeue(), Some(round * 2 + 1));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let queue = BoundedQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.try_enqueue(()).is_ok());
        assert!(queue.try_enqueue(()).is_err());
    }

    #[test]
    fn dequeue_timeout_on_empty_queue() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(1);
        assert_eq!(queue.dequeue_timeout(Duration::from_millis(20)), None);
    }

    #[test]
    fn close_wakes_blocked_consumer() {
        let queue: Arc<BoundedQueue<u32>> = Arc::new(BoundedQueue::new(8));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };
        thread::sleep(Duration::from_millis(50));
        queue.close();
        match consumer.join() {
            Ok(value) => assert_eq!(value, None),
            Err(_) => panic!("consumer thread panicked"),
        }
    }

    #[test]
    fn closed_queue_drains_then_ends() {
        let queue = BoundedQueue::new(4);
        assert!(queue.try_enqueue(1).is_ok());
        assert!(queue.try_enqueue(2).is_ok());
        queue.close();
        assert!(queue.is_closed());

        match queue.try_enqueue(3) {
            Err(rejected) => assert_eq!(rejected.into_inner(), 3),
            Ok(()) => panic!("closed queue must reject items"),
        }
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), None);
        assert_eq!(queue.dequeue_timeout(Duration::from_secs(5)), None);
    }

    #[test]
    fn blocked_consumer_wakes_on_enqueue() {
        let queue = Arc::new(BoundedQueue::new(8));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(queue.try_enqueue(42u32).is_ok());
        match consumer.join() {
            Ok(value) => assert_eq!(value, Some(42)),
            Err(_) => panic!("consumer thread panicked"),
        }
    }

    #[test]
    fn single_producer_single_consumer_keeps_order() {
        const ITEMS: u32 = 10_000;
        let queue = Arc::new(BoundedQueue::new(16));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..ITEMS {
                    let mut item = i;
                    loop {
                        match queue.try_enqueue(item) {
                            Ok(()) => break,
                            Err(full) => {
                                item = full.into_inner();
                                thread::yield_now();
                            }
                        }
                    }
                }
            })
        };

        for expected in 0..ITEMS {
            assert_eq!(queue.dequeue(), Some(expected));
        }
        assert!(producer.join().is_ok());
        assert!(queue.is_empty());
    }
}
