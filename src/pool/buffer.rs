//! Per-worker work-stealing buffer
//!
//! A bounded ring indexed by two monotonically increasing counters: `top`,
//! where the owning worker pushes and pops (LIFO), and `bottom`, where any
//! other worker steals (FIFO). One lock serializes owner and thieves; the
//! contract callers rely on is at-most-once delivery and the capacity
//! invariant, not the locking technique.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default per-worker buffer capacity
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

struct Ring<T> {
    slots: Vec<Option<T>>,
    /// Owner end; next push lands at `top % capacity`
    top: u64,
    /// Thief end; oldest un-stolen item sits at `bottom % capacity`
    bottom: u64,
}

/// A bounded deque for one owner and any number of concurrent thieves
///
/// The owner calls [`push`](Self::push) and [`pop`](Self::pop); every other
/// thread may call [`steal`](Self::steal). The owner sees its own work in
/// LIFO order, thieves drain the opposite end in FIFO order.
pub struct TaskDeque<T> {
    ring: Mutex<Ring<T>>,
    capacity: usize,
    // Mirrors of the ring counters so len()/is_empty() stay lock-free.
    top: AtomicU64,
    bottom: AtomicU64,
}

impl<T> TaskDeque<T> {
    /// Create a deque with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// Create a deque holding at most `capacity` items
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than 0");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            ring: Mutex::new(Ring {
                slots,
                top: 0,
                bottom: 0,
            }),
            capacity,
            top: AtomicU64::new(0),
            bottom: AtomicU64::new(0),
        }
    }

    /// Push an item at the owner end
    ///
    /// Returns the item back to the caller when the buffer is full.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut ring = self.ring.lock();
        if ring.top - ring.bottom >= self.capacity as u64 {
            return Err(item);
        }
        let idx = (ring.top % self.capacity as u64) as usize;
        ring.slots[idx] = Some(item);
        ring.top += 1;
        self.top.store(ring.top, Ordering::Release);
        Ok(())
    }

    /// Pop the most recently pushed item (owner only)
    pub fn pop(&self) -> Option<T> {
        let mut ring = self.ring.lock();
        if ring.top <= ring.bottom {
            return None;
        }
        ring.top -= 1;
        let idx = (ring.top % self.capacity as u64) as usize;
        let item = ring.slots[idx].take();
        self.top.store(ring.top, Ordering::Release);
        item
    }

    /// Steal the oldest item (any non-owner thread)
    pub fn steal(&self) -> Option<T> {
        let mut ring = self.ring.lock();
        if ring.bottom >= ring.top {
            return None;
        }
        let idx = (ring.bottom % self.capacity as u64) as usize;
        let item = ring.slots[idx].take();
        ring.bottom += 1;
        self.bottom.store(ring.bottom, Ordering::Release);
        item
    }

    /// Best-effort occupied count; may be stale by the time it is used
    pub fn len(&self) -> usize {
        let top = self.top.load(Ordering::Acquire);
        let bottom = self.bottom.load(Ordering::Acquire);
        top.saturating_sub(bottom) as usize
    }

    /// Best-effort emptiness check
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of items the buffer can hold
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Default for TaskDeque<T> {
    fn default() -> Self {
        Self::new()
    }
}
