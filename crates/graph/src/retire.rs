//! Deferred resource release.
//!
//! Resources referenced by an in-flight frame (staging buffers, replayed
//! commands and the `Arc` handles inside them, anything parked explicitly)
//! must stay alive until that frame's fence has been observed. The retire
//! queue holds them in per-slot lists and drops a slot's list right after
//! the render graph waits on that slot's fence, the same N-slot cadence as
//! frame pacing itself.

use std::any::Any;

/// Per-slot deferred-release lists.
///
/// Items are type-erased; dropping them is the release. Not thread-safe:
/// owned and driven by the render graph on its recording thread.
pub struct RetireQueue {
    slots: Vec<Vec<Box<dyn Any + Send>>>,
}

impl RetireQueue {
    /// Creates a queue with one list per frame slot.
    pub fn new(num_slots: usize) -> Self {
        Self {
            slots: (0..num_slots).map(|_| Vec::new()).collect(),
        }
    }

    /// Parks an item until `slot`'s fence is next observed.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range.
    pub fn park(&mut self, slot: usize, item: Box<dyn Any + Send>) {
        self.slots[slot].push(item);
    }

    /// Drops everything parked for `slot`, returning how many items were
    /// released. Call only after waiting on that slot's fence.
    ///
    /// # Panics
    ///
    /// Panics if `slot` is out of range.
    pub fn drain_slot(&mut self, slot: usize) -> usize {
        let count = self.slots[slot].len();
        self.slots[slot].clear();
        count
    }

    /// Drops everything in every slot (all fences known signaled, e.g.
    /// after a device-wide wait). Returns the number of items released.
    pub fn drain_all(&mut self) -> usize {
        self.slots.iter_mut().map(|s| std::mem::take(s).len()).sum()
    }

    /// Total number of parked items across all slots.
    pub fn pending(&self) -> usize {
        self.slots.iter().map(|s| s.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_drain_releases_only_that_slot() {
        let mut queue = RetireQueue::new(2);

        let a: Arc<Vec<u8>> = Arc::new(vec![1, 2, 3]);
        let b: Arc<Vec<u8>> = Arc::new(vec![4, 5, 6]);

        queue.park(0, Box::new(a.clone()));
        queue.park(1, Box::new(b.clone()));
        assert_eq!(queue.pending(), 2);
        assert_eq!(Arc::strong_count(&a), 2);

        assert_eq!(queue.drain_slot(0), 1);
        assert_eq!(Arc::strong_count(&a), 1);
        // Slot 1 untouched
        assert_eq!(Arc::strong_count(&b), 2);
        assert_eq!(queue.pending(), 1);
    }

    #[test]
    fn test_drain_all_releases_everything() {
        let mut queue = RetireQueue::new(3);
        let item: Arc<Vec<u8>> = Arc::new(vec![0; 16]);

        for slot in 0..3 {
            queue.park(slot, Box::new(item.clone()));
        }
        assert_eq!(Arc::strong_count(&item), 4);

        assert_eq!(queue.drain_all(), 3);
        assert_eq!(Arc::strong_count(&item), 1);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_empty_drain_is_zero() {
        let mut queue = RetireQueue::new(2);
        assert_eq!(queue.drain_slot(0), 0);
        assert_eq!(queue.drain_all(), 0);
    }
}
