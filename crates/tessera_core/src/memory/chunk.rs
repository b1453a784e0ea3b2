//! # Chunks
//!
//! A chunk is a leased, fixed-capacity block of raw memory.

// SAFETY: Chunks hand out raw pointers into pool-owned backing blocks.
// All unsafe blocks are documented.
#![allow(unsafe_code)]

use std::fmt;
use std::ptr::NonNull;

use super::SizeClass;

/// Identity of a chunk: the owning pool's tag and the slot within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkId {
    /// Tag of the pool that handed the chunk out.
    pub pool_tag: u32,
    /// Slot index inside that pool.
    pub slot: u32,
}

/// A leased chunk of pool memory.
///
/// The chunk is move-only: exactly one holder owns it until it is handed back
/// with [`Pool::release`](super::Pool::release). Dropping a chunk without
/// releasing it keeps the slot leased (the pool reports it at teardown).
///
/// The memory is zeroed when its backing block is first allocated and is
/// never cleared on recycle.
pub struct Chunk {
    ptr: NonNull<u8>,
    capacity: usize,
    size_class: SizeClass,
    id: ChunkId,
}

// SAFETY: A chunk is an exclusive lease on memory no other chunk aliases.
// Moving the lease across threads moves the exclusive access with it.
unsafe impl Send for Chunk {}
// SAFETY: `&Chunk` only exposes `*const` access and metadata.
unsafe impl Sync for Chunk {}

impl Chunk {
    /// Wraps a slot of a backing block.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for `capacity` bytes and not aliased by any other
    /// live chunk for the lifetime of the lease.
    pub(crate) const unsafe fn from_raw(
        ptr: NonNull<u8>,
        capacity: usize,
        size_class: SizeClass,
        id: ChunkId,
    ) -> Self {
        Self {
            ptr,
            capacity,
            size_class,
            id,
        }
    }

    /// Capacity in bytes.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Size class of the owning pool.
    #[inline]
    #[must_use]
    pub const fn size_class(&self) -> SizeClass {
        self.size_class
    }

    /// Owner tag and slot.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ChunkId {
        self.id
    }

    /// Start address. Stable for the whole lease.
    #[inline]
    #[must_use]
    pub const fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Mutable start address. Stable for the whole lease.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Fills the whole chunk with zeroes.
    pub fn zero(&mut self) {
        // SAFETY: the lease grants exclusive access to `capacity` bytes.
        unsafe { std::ptr::write_bytes(self.ptr.as_ptr(), 0, self.capacity) };
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id)
            .field("size_class", &self.size_class)
            .field("capacity", &self.capacity)
            .field("ptr", &self.ptr)
            .finish()
    }
}
