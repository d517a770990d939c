// The stop subsystem.
//
// One process-wide ring receives every buffer the system discards: overflow
// from safe enqueues, filtered packets, and buffers released after
// serialization. A drain loop frees them back to their originating pools.
// When the stop ring itself is full, buffers are freed inline ("direct
// stop") so producers never block.

use std::sync::Arc;

use tracing::warn;

use crate::mbuf::MbufPtr;
use crate::ring::{Burst, Ring};
use crate::scheduler::stats::SchedulerStats;

/// The process-wide sink for discarded buffers.
pub struct StopRing {
    ring: Arc<Ring>,
    stats: Arc<SchedulerStats>,
}

impl StopRing {
    pub(crate) fn new(capacity: usize, stats: Arc<SchedulerStats>) -> Arc<StopRing> {
        Arc::new(StopRing {
            ring: Arc::new(Ring::with_capacity(capacity)),
            stats,
        })
    }

    pub(crate) fn ring(&self) -> &Ring {
        &self.ring
    }

    /// Shared handle to the underlying ring, so the builder can address the
    /// stop ring like any other edge (stoppers rewrite producers onto it).
    pub(crate) fn shared_ring(&self) -> Arc<Ring> {
        self.ring.clone()
    }

    /// Release buffers through the stop path: enqueue what fits, free the
    /// rest inline. Does not touch the dropped counter.
    pub(crate) fn release(&self, bufs: &[MbufPtr]) {
        let done = self.ring.enqueue_burst(bufs);
        if done < bufs.len() {
            self.direct_stop(&bufs[done..]);
        }
    }

    /// Free buffers to their pools immediately, bypassing the ring.
    pub(crate) fn direct_stop(&self, bufs: &[MbufPtr]) {
        for &handle in bufs {
            unsafe { handle.as_ref().pool() }.free_one(handle);
        }
        self.stats.add_freed(bufs.len() as u64);
    }

    /// Drain one burst from the stop ring, freeing every buffer. Returns the
    /// number freed; `0` means the ring was empty.
    pub(crate) fn drain_burst(&self, scratch: &mut Burst, burst_size: usize) -> usize {
        scratch.clear();
        let n = self.ring.dequeue_burst(scratch, burst_size);
        if n == 0 {
            return 0;
        }
        for &handle in scratch.iter() {
            unsafe { handle.as_ref().pool() }.free_one(handle);
        }
        self.stats.add_freed(n as u64);
        n
    }
}

/// Enqueue a burst into `out`; overflow goes to the stop ring and, if that
/// is crowded too, straight back to the pools. The shed count lands in the
/// dropped counter. Upstream is never signaled.
pub(crate) fn safe_enqueue(out: &Ring, stop: &StopRing, stats: &SchedulerStats, bufs: &[MbufPtr]) {
    let done = out.enqueue_burst(bufs);
    if done == bufs.len() {
        return;
    }
    let rest = &bufs[done..];
    stats.add_dropped(rest.len() as u64);
    let done2 = stop.ring.enqueue_burst(rest);
    if done2 < rest.len() {
        warn!("stop ring is crowded, freeing buffers inline");
        stop.direct_stop(&rest[done2..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mempool::Mempool;
    use crate::ring::MAX_BURST_SIZE;

    fn setup(out_cap: usize, stop_cap: usize) -> (Arc<Mempool>, Ring, Arc<StopRing>, Arc<SchedulerStats>) {
        let stats = Arc::new(SchedulerStats::default());
        let pool = Mempool::create("test", 64);
        let out = Ring::with_capacity(out_cap);
        let stop = StopRing::new(stop_cap, stats.clone());
        (pool, out, stop, stats)
    }

    #[test]
    fn test_safe_enqueue_overflows_to_stop_ring() {
        let (pool, out, stop, stats) = setup(4, 16);
        let mut bufs = Burst::new();
        pool.allocate_bulk(&mut bufs, 10).unwrap();

        safe_enqueue(&out, &stop, &stats, &bufs);
        assert_eq!(out.count(), 4);
        assert_eq!(stop.ring().count(), 6);
        assert_eq!(stats.dropped(), 6);
        assert_eq!(stats.freed(), 0);
    }

    #[test]
    fn test_safe_enqueue_falls_back_to_direct_stop() {
        let (pool, out, stop, stats) = setup(4, 4);
        let mut bufs = Burst::new();
        pool.allocate_bulk(&mut bufs, 12).unwrap();
        assert_eq!(pool.free_count(), 52);

        safe_enqueue(&out, &stop, &stats, &bufs);
        assert_eq!(out.count(), 4);
        assert_eq!(stop.ring().count(), 4);
        assert_eq!(stats.dropped(), 8);
        // Four buffers didn't fit anywhere and went straight back.
        assert_eq!(stats.freed(), 4);
        assert_eq!(pool.free_count(), 56);
    }

    #[test]
    fn test_drain_frees_to_originating_pool() {
        let (pool, _out, stop, stats) = setup(4, 16);
        let mut bufs = Burst::new();
        pool.allocate_bulk(&mut bufs, 8).unwrap();
        stop.release(&bufs);

        let mut scratch = Burst::new();
        let mut freed = 0;
        loop {
            let n = stop.drain_burst(&mut scratch, MAX_BURST_SIZE);
            if n == 0 {
                break;
            }
            freed += n;
        }
        assert_eq!(freed, 8);
        assert_eq!(pool.free_count(), 64);
        assert_eq!(stats.freed(), 8);
    }
}
