// Fixed packet-buffer pools.
//
// One pool is created per generator/reader stage. Allocation is bulk and
// all-or-nothing; freeing may come from a different thread (the stop drain
// or a sender), so the free list is a lock-free MPMC queue.

use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::error::{Error, Result};
use crate::mbuf::{Mbuf, MbufPtr};
use crate::ring::Burst;

/// A pre-allocated pool of fixed-size packet buffers.
///
/// Pools are created during graph construction and live until process exit;
/// every handle records its originating pool so that the terminal consumer
/// can return it with [`Mempool::free_bulk`].
pub struct Mempool {
    name: String,
    free: ArrayQueue<MbufPtr>,
    // Backing storage for every buffer in the pool. Handles point into it.
    storage: Box<[UnsafeCell<Mbuf>]>,
}

// Buffer access is serialized by handle ownership; the free list is
// thread-safe on its own.
unsafe impl Send for Mempool {}
unsafe impl Sync for Mempool {}

impl Mempool {
    /// Create a pool holding `size` buffers, all initially free.
    pub fn create(name: impl Into<String>, size: usize) -> Arc<Mempool> {
        assert!(size > 0, "mempool size must be positive");
        let mut storage = Vec::with_capacity(size);
        for _ in 0..size {
            storage.push(UnsafeCell::new(Mbuf::new()));
        }
        let pool = Arc::new(Mempool {
            name: name.into(),
            free: ArrayQueue::new(size),
            storage: storage.into_boxed_slice(),
        });
        for cell in pool.storage.iter() {
            // Backref lets terminal consumers free without knowing the pool.
            unsafe { (*cell.get()).set_pool(Arc::as_ptr(&pool)) };
            let handle = MbufPtr::new(NonNull::new(cell.get()).unwrap());
            let _ = pool.free.push(handle);
        }
        pool
    }

    /// Pool name, used in diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total number of buffers in the pool.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Number of buffers currently on the free list.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Allocate `n` fresh buffers into `out`, or fail as a unit.
    ///
    /// On success every allocated buffer has been reset. On failure `out` is
    /// left untouched and the pool unchanged.
    pub fn allocate_bulk(&self, out: &mut Burst, n: usize) -> Result<()> {
        debug_assert!(n <= out.capacity() - out.len());
        let start = out.len();
        for _ in 0..n {
            match self.free.pop() {
                Some(handle) => {
                    unsafe { handle.as_mut() }.reset();
                    out.push(handle);
                }
                None => {
                    while out.len() > start {
                        let handle = out.pop().unwrap();
                        let _ = self.free.push(handle);
                    }
                    return Err(Error::MempoolExhausted(self.name.clone()));
                }
            }
        }
        Ok(())
    }

    /// Return buffers to the free list.
    pub fn free_bulk(&self, bufs: &[MbufPtr]) {
        for &handle in bufs {
            self.free_one(handle);
        }
    }

    #[inline]
    pub(crate) fn free_one(&self, handle: MbufPtr) {
        debug_assert!(std::ptr::eq(unsafe { handle.as_ref().pool() }, self));
        let _ = self.free.push(handle);
    }
}

impl std::fmt::Debug for Mempool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mempool")
            .field("name", &self.name)
            .field("capacity", &self.capacity())
            .field("free", &self.free_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_free() {
        let pool = Mempool::create("test", 8);
        assert_eq!(pool.free_count(), 8);

        let mut bufs = Burst::new();
        pool.allocate_bulk(&mut bufs, 5).unwrap();
        assert_eq!(bufs.len(), 5);
        assert_eq!(pool.free_count(), 3);

        pool.free_bulk(&bufs);
        assert_eq!(pool.free_count(), 8);
    }

    #[test]
    fn test_allocation_is_all_or_nothing() {
        let pool = Mempool::create("test", 4);
        let mut bufs = Burst::new();
        assert!(matches!(
            pool.allocate_bulk(&mut bufs, 5),
            Err(Error::MempoolExhausted(_))
        ));
        assert!(bufs.is_empty());
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn test_allocated_buffers_are_reset() {
        let pool = Mempool::create("test", 1);
        let mut bufs = Burst::new();
        pool.allocate_bulk(&mut bufs, 1).unwrap();
        let mbuf = unsafe { bufs[0].as_mut() };
        mbuf.copy_from_slice(&[1, 2, 3]);
        mbuf.set_l3_offset(14);
        pool.free_bulk(&bufs);
        bufs.clear();

        pool.allocate_bulk(&mut bufs, 1).unwrap();
        let mbuf = unsafe { bufs[0].as_ref() };
        assert_eq!(mbuf.data_len(), 0);
        assert_eq!(mbuf.l3_offset(), None);
    }
}
