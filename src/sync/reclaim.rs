//! Deferred Batch Reclamation
//!
//! Command buffers handed to a queue cannot be recycled until the GPU has
//! certified completion through the timeline counter the batch signals. This
//! map keys every in-flight batch by `(semaphore, timeline value)` and
//! releases batches only when a wait has observed the counter at or past
//! their value.
//!
//! # The downward walk
//!
//! On a successful wait at `value`, reclamation walks `value, value-1, …, 1`
//! and stops at the first value with no tracked batch. Under the expected
//! pattern — values submitted densely and waited on in increasing order — a
//! missing entry means everything below it was already reclaimed by an
//! earlier wait, so the walk costs O(distance since the last wait) rather
//! than O(total batches ever submitted).
//!
//! A wait that arrives out of order (say at 5, before 3 was ever waited on)
//! reclaims the contiguous run ending at 5 and skips anything below a gap;
//! skipped batches stay tracked and are released by the next wait that
//! reaches them. Nothing leaks, reclamation is just late.
//!
//! Precondition carried from the submission path: per semaphore, values are
//! strictly increasing and dense. Submitting at sparse values would strand
//! batches below a permanent gap — see `DESIGN.md`.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use ash::vk;

use crate::handles::SemaphoreKey;

/// Command buffers of one submission, in submission order.
pub(crate) type CommandBufferBatch = SmallVec<[vk::CommandBuffer; 4]>;

/// In-flight batches keyed by `(semaphore, timeline value)`.
#[derive(Default)]
pub(crate) struct ReclaimQueue {
    batches: FxHashMap<(SemaphoreKey, u64), CommandBufferBatch>,
}

impl ReclaimQueue {
    /// Tracks a freshly submitted batch.
    ///
    /// `value` must be unique among unreclaimed batches for this semaphore;
    /// the submission path guarantees it by signaling strictly increasing
    /// values.
    pub fn record(&mut self, semaphore: SemaphoreKey, value: u64, batch: CommandBufferBatch) {
        let previous = self.batches.insert((semaphore, value), batch);
        debug_assert!(
            previous.is_none(),
            "timeline value {value} submitted twice on one semaphore"
        );
    }

    /// Releases every batch for `semaphore` in the contiguous run ending at
    /// `value`, walking downward and stopping at the first gap.
    ///
    /// Call only after the semaphore's counter has been observed at or past
    /// `value`. Idempotent: a second call at the same value finds the run
    /// already empty and returns nothing.
    pub fn drain_completed(&mut self, semaphore: SemaphoreKey, value: u64) -> Vec<vk::CommandBuffer> {
        let mut reclaimed = Vec::new();
        for v in (1..=value).rev() {
            match self.batches.remove(&(semaphore, v)) {
                Some(batch) => reclaimed.extend(batch),
                // Everything below was reclaimed by an earlier wait.
                None => break,
            }
        }
        reclaimed
    }

    /// Whether a batch is still tracked at exactly `(semaphore, value)`.
    pub fn is_tracked(&self, semaphore: SemaphoreKey, value: u64) -> bool {
        self.batches.contains_key(&(semaphore, value))
    }

    /// Number of in-flight batches tracked against one semaphore.
    pub fn tracked_for(&self, semaphore: SemaphoreKey) -> usize {
        self.batches.keys().filter(|(s, _)| *s == semaphore).count()
    }

    /// Number of in-flight batches across all semaphores.
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    /// Releases everything unconditionally, for device teardown after an
    /// idle wait.
    pub fn drain_all(&mut self) -> Vec<vk::CommandBuffer> {
        self.batches.drain().flat_map(|(_, batch)| batch).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use slotmap::SlotMap;

    fn semaphore_key() -> SemaphoreKey {
        // A real key from a throwaway slot map; the queue only hashes it.
        let mut arena: SlotMap<SemaphoreKey, ()> = SlotMap::with_key();
        arena.insert(())
    }

    fn batch(id: u64) -> CommandBufferBatch {
        let mut b = CommandBufferBatch::new();
        b.push(vk::CommandBuffer::from_raw(id));
        b
    }

    #[test]
    fn in_order_wait_reclaims_prefix_only() {
        let sema = semaphore_key();
        let mut queue = ReclaimQueue::default();
        queue.record(sema, 1, batch(1));
        queue.record(sema, 2, batch(2));
        queue.record(sema, 3, batch(3));

        let reclaimed = queue.drain_completed(sema, 2);
        assert_eq!(reclaimed.len(), 2);
        assert!(!queue.is_tracked(sema, 1));
        assert!(!queue.is_tracked(sema, 2));
        assert!(queue.is_tracked(sema, 3));
    }

    #[test]
    fn single_wait_reclaims_all_lower_values() {
        let sema = semaphore_key();
        let mut queue = ReclaimQueue::default();
        for v in 1..=5 {
            queue.record(sema, v, batch(v));
        }

        // Never waited on 1-4: the downward walk from 5 hits no gap until 0.
        let reclaimed = queue.drain_completed(sema, 5);
        assert_eq!(reclaimed.len(), 5);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn repeated_wait_is_idempotent() {
        let sema = semaphore_key();
        let mut queue = ReclaimQueue::default();
        queue.record(sema, 1, batch(1));

        assert_eq!(queue.drain_completed(sema, 1).len(), 1);
        // Second wait at the same value finds nothing and does not error.
        assert_eq!(queue.drain_completed(sema, 1).len(), 0);
    }

    #[test]
    fn gap_stops_the_walk_but_later_wait_recovers() {
        let sema = semaphore_key();
        let mut queue = ReclaimQueue::default();
        for v in 1..=5 {
            queue.record(sema, v, batch(v));
        }

        // Reclaim 1..=3, leaving 4 and 5.
        assert_eq!(queue.drain_completed(sema, 3).len(), 3);

        // A wait at 5 walks 5, 4, hits the gap at 3, stops.
        assert_eq!(queue.drain_completed(sema, 5).len(), 2);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn skipped_values_are_reclaimed_by_a_later_wait() {
        let sema = semaphore_key();
        let mut queue = ReclaimQueue::default();
        queue.record(sema, 1, batch(1));
        queue.record(sema, 2, batch(2));

        // Batch 3 was never submitted; a wait at 4 finds the gap at 4
        // immediately and reclaims nothing.
        assert_eq!(queue.drain_completed(sema, 4).len(), 0);
        assert!(queue.is_tracked(sema, 1));
        assert!(queue.is_tracked(sema, 2));

        // The wait that reaches them directly still releases them.
        assert_eq!(queue.drain_completed(sema, 2).len(), 2);
    }

    #[test]
    fn semaphores_are_independent() {
        let mut arena: SlotMap<SemaphoreKey, ()> = SlotMap::with_key();
        let sema_a = arena.insert(());
        let sema_b = arena.insert(());
        let mut queue = ReclaimQueue::default();
        queue.record(sema_a, 1, batch(1));
        queue.record(sema_b, 1, batch(2));

        assert_eq!(queue.drain_completed(sema_a, 1).len(), 1);
        assert!(queue.is_tracked(sema_b, 1));
    }

    #[test]
    fn multi_buffer_batches_come_back_in_full() {
        let sema = semaphore_key();
        let mut queue = ReclaimQueue::default();
        let mut b = CommandBufferBatch::new();
        for id in 10..13 {
            b.push(vk::CommandBuffer::from_raw(id));
        }
        queue.record(sema, 1, b);

        assert_eq!(queue.drain_completed(sema, 1).len(), 3);
    }
}
