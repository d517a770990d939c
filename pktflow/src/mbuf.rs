// Packet buffer handles.
//
// An `Mbuf` is a fixed-layout buffer: a small framework-metadata header
// (owning pool, data length, cached L3/L4 offsets) followed by the data
// room. Buffers live inside a `Mempool`'s storage for the lifetime of the
// process; the `MbufPtr` handle moved through rings is a plain pointer.

use std::ptr::NonNull;

use crate::mempool::Mempool;

/// Usable bytes per packet buffer.
pub const DEFAULT_DATA_ROOM: usize = 2048;

const OFFSET_UNSET: u16 = u16::MAX;

/// A fixed-size packet buffer with framework metadata.
///
/// Stage callbacks receive `&mut Mbuf` (or `&Mbuf` for read-only kinds) and
/// must not retain the reference past the callback; the buffer is owned by
/// the framework and moves between rings by handle.
#[repr(C)]
pub struct Mbuf {
    pool: *const Mempool,
    data_len: u32,
    l3_offset: u16,
    l4_offset: u16,
    data: [u8; DEFAULT_DATA_ROOM],
}

impl Mbuf {
    pub(crate) fn new() -> Self {
        Self {
            pool: std::ptr::null(),
            data_len: 0,
            l3_offset: OFFSET_UNSET,
            l4_offset: OFFSET_UNSET,
            data: [0; DEFAULT_DATA_ROOM],
        }
    }

    pub(crate) fn set_pool(&mut self, pool: *const Mempool) {
        self.pool = pool;
    }

    /// The mempool this buffer was allocated from.
    ///
    /// # Safety
    /// The pool must still be alive; the graph keeps every pool alive until
    /// process exit.
    pub(crate) unsafe fn pool(&self) -> &Mempool {
        debug_assert!(!self.pool.is_null());
        unsafe { &*self.pool }
    }

    /// Current data length (bytes of valid packet data).
    #[inline]
    pub fn data_len(&self) -> usize {
        self.data_len as usize
    }

    /// Total capacity of the data room.
    #[inline]
    pub fn capacity(&self) -> usize {
        DEFAULT_DATA_ROOM
    }

    /// Unused space at the end of the buffer.
    #[inline]
    pub fn tailroom(&self) -> usize {
        DEFAULT_DATA_ROOM - self.data_len()
    }

    /// Immutable view of the packet data.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_len()]
    }

    /// Mutable view of the packet data.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        let len = self.data_len();
        &mut self.data[..len]
    }

    /// Append space to the end of the packet data.
    ///
    /// Returns a mutable slice over the newly appended region, or `None` if
    /// there is not enough tailroom.
    #[inline]
    pub fn append(&mut self, len: usize) -> Option<&mut [u8]> {
        if len > self.tailroom() {
            return None;
        }
        let start = self.data_len();
        self.data_len += len as u32;
        Some(&mut self.data[start..start + len])
    }

    /// Remove bytes from the end of the packet data.
    ///
    /// Returns `false` if `len` exceeds the current data length.
    #[inline]
    pub fn trim(&mut self, len: usize) -> bool {
        if len > self.data_len() {
            return false;
        }
        self.data_len -= len as u32;
        true
    }

    /// Reset to an empty buffer and clear the cached header offsets.
    #[inline]
    pub fn reset(&mut self) {
        self.data_len = 0;
        self.reset_headers();
    }

    /// Clear only the cached header offsets, keeping the data. Used when a
    /// buffer arrives from a NIC queue with stale metadata.
    #[inline]
    pub fn reset_headers(&mut self) {
        self.l3_offset = OFFSET_UNSET;
        self.l4_offset = OFFSET_UNSET;
    }

    /// Replace the packet data, resetting the buffer first.
    ///
    /// Returns `false` if `data` doesn't fit.
    pub fn copy_from_slice(&mut self, data: &[u8]) -> bool {
        self.reset();
        match self.append(data.len()) {
            Some(room) => {
                room.copy_from_slice(data);
                true
            }
            None => false,
        }
    }

    /// Cached L3 header offset, set by a parse step.
    #[inline]
    pub fn l3_offset(&self) -> Option<usize> {
        (self.l3_offset != OFFSET_UNSET).then_some(self.l3_offset as usize)
    }

    #[inline]
    pub fn set_l3_offset(&mut self, offset: usize) {
        debug_assert!(offset < OFFSET_UNSET as usize);
        self.l3_offset = offset as u16;
    }

    /// Cached L4 header offset, set by a parse step.
    #[inline]
    pub fn l4_offset(&self) -> Option<usize> {
        (self.l4_offset != OFFSET_UNSET).then_some(self.l4_offset as usize)
    }

    #[inline]
    pub fn set_l4_offset(&mut self, offset: usize) {
        debug_assert!(offset < OFFSET_UNSET as usize);
        self.l4_offset = offset as u16;
    }
}

impl AsRef<[u8]> for Mbuf {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl AsMut<[u8]> for Mbuf {
    fn as_mut(&mut self) -> &mut [u8] {
        self.data_mut()
    }
}

impl std::fmt::Debug for Mbuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mbuf")
            .field("data_len", &self.data_len())
            .field("tailroom", &self.tailroom())
            .field("l3_offset", &self.l3_offset())
            .field("l4_offset", &self.l4_offset())
            .finish()
    }
}

/// An opaque, copyable handle to an [`Mbuf`].
///
/// A handle is owned by exactly one party at a time: the mempool free list, a
/// stage's local burst array, or a ring slot. Enqueueing a handle transfers
/// ownership to the consumer; the producer must not touch it afterwards.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct MbufPtr(NonNull<Mbuf>);

// Handles move between pinned stage threads; the buffer itself is accessed by
// at most one thread at a time per the ownership rule above.
unsafe impl Send for MbufPtr {}

impl MbufPtr {
    pub(crate) fn new(ptr: NonNull<Mbuf>) -> Self {
        Self(ptr)
    }

    /// Borrow the buffer immutably.
    ///
    /// # Safety
    /// The caller must own the handle (see the ownership rule on the type).
    #[inline]
    pub unsafe fn as_ref<'a>(self) -> &'a Mbuf {
        unsafe { self.0.as_ref() }
    }

    /// Borrow the buffer mutably.
    ///
    /// # Safety
    /// The caller must own the handle and hold no other borrow of it.
    #[inline]
    pub unsafe fn as_mut<'a>(mut self) -> &'a mut Mbuf {
        unsafe { self.0.as_mut() }
    }
}
