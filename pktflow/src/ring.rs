// Inter-stage rings.
//
// Every graph edge is one of these: a bounded lock-free queue of buffer
// handles with burst enqueue/dequeue. Each edge has exactly one producer
// stage and one consumer stage, but a cloned stage's replicas touch the
// shared edge concurrently, so the queue must tolerate concurrent burst
// operations on either side.

use arrayvec::ArrayVec;
use crossbeam_queue::ArrayQueue;

use crate::mbuf::MbufPtr;

/// Upper bound on a single burst. The runtime burst size
/// ([`Config::burst_size`](crate::Config::burst_size)) must not exceed it.
pub const MAX_BURST_SIZE: usize = 256;

/// A stage-local burst array of buffer handles.
pub type Burst = ArrayVec<MbufPtr, MAX_BURST_SIZE>;

/// A bounded queue of buffer handles connecting two stages.
///
/// Capacity is fixed at construction and is a power of two. Overflow on
/// enqueue is reported through the return count, never blocked on.
pub struct Ring {
    queue: ArrayQueue<MbufPtr>,
    capacity: usize,
}

impl Ring {
    /// Create a ring with the given power-of-two capacity.
    pub fn with_capacity(capacity: usize) -> Ring {
        assert!(
            capacity.is_power_of_two(),
            "ring capacity must be a power of two"
        );
        Ring {
            queue: ArrayQueue::new(capacity),
            capacity,
        }
    }

    /// Move up to `bufs.len()` handles into the ring.
    ///
    /// Returns the number accepted; the remainder (`bufs[accepted..]`) stays
    /// owned by the caller. `0` means the ring is full.
    #[inline]
    pub fn enqueue_burst(&self, bufs: &[MbufPtr]) -> usize {
        for (moved, &handle) in bufs.iter().enumerate() {
            if self.queue.push(handle).is_err() {
                return moved;
            }
        }
        bufs.len()
    }

    /// Move up to `max` handles out of the ring, appending them to `out`.
    ///
    /// Returns the number moved. `0` means the ring is empty.
    #[inline]
    pub fn dequeue_burst(&self, out: &mut Burst, max: usize) -> usize {
        let max = max.min(out.capacity() - out.len());
        let mut moved = 0;
        while moved < max {
            match self.queue.pop() {
                Some(handle) => {
                    out.push(handle);
                    moved += 1;
                }
                None => break,
            }
        }
        moved
    }

    /// Snapshot of the current occupancy.
    #[inline]
    pub fn count(&self) -> usize {
        self.queue.len()
    }

    /// Fixed capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl std::fmt::Debug for Ring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring")
            .field("count", &self.count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mempool::Mempool;

    #[test]
    fn test_burst_roundtrip_preserves_order() {
        let pool = Mempool::create("test", 16);
        let ring = Ring::with_capacity(16);

        let mut bufs = Burst::new();
        pool.allocate_bulk(&mut bufs, 8).unwrap();
        for (i, &b) in bufs.iter().enumerate() {
            unsafe { b.as_mut() }.copy_from_slice(&[i as u8]);
        }
        assert_eq!(ring.enqueue_burst(&bufs), 8);
        assert_eq!(ring.count(), 8);

        let mut out = Burst::new();
        assert_eq!(ring.dequeue_burst(&mut out, 8), 8);
        for (i, &b) in out.iter().enumerate() {
            assert_eq!(unsafe { b.as_ref() }.data(), &[i as u8]);
        }
        assert!(ring.is_empty());
        pool.free_bulk(&out);
    }

    #[test]
    fn test_enqueue_reports_overflow() {
        let pool = Mempool::create("test", 8);
        let ring = Ring::with_capacity(4);

        let mut bufs = Burst::new();
        pool.allocate_bulk(&mut bufs, 6).unwrap();
        assert_eq!(ring.enqueue_burst(&bufs), 4);
        assert_eq!(ring.count(), 4);
        assert_eq!(ring.enqueue_burst(&bufs[4..]), 0);

        let mut out = Burst::new();
        ring.dequeue_burst(&mut out, MAX_BURST_SIZE);
        pool.free_bulk(&out);
        pool.free_bulk(&bufs[4..]);
    }

    #[test]
    fn test_dequeue_on_empty_returns_zero() {
        let ring = Ring::with_capacity(4);
        let mut out = Burst::new();
        assert_eq!(ring.dequeue_burst(&mut out, 4), 0);
        assert!(out.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_capacity_must_be_power_of_two() {
        let _ = Ring::with_capacity(100);
    }
}
