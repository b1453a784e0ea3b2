//! # Archetype Storage
//!
//! An archetype is a unique combination of component types. Its entities are
//! stored column-wise (Structure of Arrays) inside pool chunks:
//!
//! ```text
//! Chunk (Small, 4 KiB)
//! ┌──────────────────────────┬──────────────────────────┐
//! │ Position[0..capacity]    │ Velocity[0..capacity]    │
//! └──────────────────────────┴──────────────────────────┘
//! ```
//!
//! Columns are placed in descending alignment order, so every column start is
//! aligned without padding as long as no column is aligned past the chunk.

// SAFETY: Columns are typed views over raw chunk memory.
// Every row below `len` is initialized; rows past it are not.
#![allow(unsafe_code)]

use std::mem::ManuallyDrop;
use std::sync::Arc;

use super::registry::{TypeDescriptor, TypeId, TypeRegistry};
use crate::config::PoolSetConfig;
use crate::error::{CoreError, CoreResult};
use crate::hash::hash_combine;
use crate::memory::{Chunk, SizeClass, CHUNK_ALIGN};

/// Sorted, de-duplicated set of component types.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct ArchetypeSignature {
    types: Vec<TypeId>,
}

impl ArchetypeSignature {
    /// Creates a signature from component type ids in any order.
    pub fn new(types: impl IntoIterator<Item = TypeId>) -> Self {
        let mut types: Vec<TypeId> = types.into_iter().collect();
        types.sort_unstable();
        types.dedup();
        Self { types }
    }

    /// Component types, ascending.
    #[must_use]
    pub fn types(&self) -> &[TypeId] {
        &self.types
    }

    /// Returns `true` if the signature includes `type_id`.
    #[must_use]
    pub fn contains(&self, type_id: TypeId) -> bool {
        self.types.binary_search(&type_id).is_ok()
    }

    /// Number of component types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` for the empty archetype.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Order-sensitive fingerprint of the sorted type list.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        self.types
            .iter()
            .fold(0, |seed, id| hash_combine(seed, id.index() as u64))
    }
}

/// One component column of an archetype layout.
#[derive(Clone, Copy, Debug)]
pub struct Column {
    /// Component type stored in the column.
    pub type_id: TypeId,
    /// Registered descriptor of that type.
    pub descriptor: TypeDescriptor,
    /// Byte offset of row 0 from the chunk start.
    pub offset: usize,
}

impl Column {
    #[inline]
    const fn row_offset(&self, row: usize) -> usize {
        self.offset + row * self.descriptor.size()
    }
}

/// Column placement of one archetype inside a chunk.
#[derive(Clone, Debug)]
pub struct ArchetypeLayout {
    signature: ArchetypeSignature,
    columns: Vec<Column>,
    footprint: usize,
    capacity: usize,
    size_class: SizeClass,
}

impl ArchetypeLayout {
    /// Computes the layout of `signature` and picks its size class.
    ///
    /// The archetype gets the smallest class whose chunk fits at least
    /// `min_entities_per_chunk` entities, or else the largest class that fits
    /// one.
    ///
    /// # Errors
    ///
    /// - `UnknownType` if a type in the signature is not registered
    /// - `InvalidLayout` if a column is aligned past [`CHUNK_ALIGN`]
    /// - `ChunkTooLarge` if one entity does not fit a large chunk
    pub fn new(
        registry: &TypeRegistry,
        signature: ArchetypeSignature,
        config: &PoolSetConfig,
    ) -> CoreResult<Self> {
        let mut columns = Vec::with_capacity(signature.len());
        for &type_id in signature.types() {
            let descriptor = registry.lookup(type_id)?;
            if descriptor.align() > CHUNK_ALIGN {
                return Err(CoreError::InvalidLayout(format!(
                    "`{}` alignment {} exceeds chunk alignment {CHUNK_ALIGN}",
                    descriptor.name(), descriptor.align()
                )));
            }
            columns.push(Column {
                type_id,
                descriptor,
                offset: 0,
            });
        }

        let row_bytes: usize = columns.iter().map(|c| c.descriptor.size()).sum();
        let footprint = row_bytes.max(1);

        let size_class = SizeClass::ALL
            .into_iter()
            .find(|&class| config.get(class).chunk_size / footprint >= config.min_entities_per_chunk)
            .or_else(|| {
                SizeClass::ALL
                    .into_iter()
                    .rev()
                    .find(|&class| config.get(class).chunk_size >= footprint)
            })
            .ok_or(CoreError::ChunkTooLarge {
                requested: footprint,
                max: config.large.chunk_size,
            })?;
        let capacity = config.get(size_class).chunk_size / footprint;

        // Highest alignment first: each column length is a multiple of its own
        // alignment, hence of every later one.
        let mut placement: Vec<usize> = (0..columns.len()).collect();
        placement.sort_by(|&a, &b| {
            columns[b]
                .descriptor
                .align()
                .cmp(&columns[a].descriptor.align())
                .then(columns[a].type_id.cmp(&columns[b].type_id))
        });
        let mut offset = 0;
        for index in placement {
            columns[index].offset = offset;
            offset += columns[index].descriptor.size() * capacity;
        }

        tracing::trace!(
            "archetype {:016x}: {} columns, {} bytes/entity, {} entities per {:?} chunk",
            signature.fingerprint(),
            columns.len(),
            row_bytes,
            capacity,
            size_class
        );

        Ok(Self {
            signature,
            columns,
            footprint,
            capacity,
            size_class,
        })
    }

    /// The component types of this archetype.
    #[must_use]
    pub fn signature(&self) -> &ArchetypeSignature {
        &self.signature
    }

    /// Columns, in signature order.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column storing `type_id`, if part of the archetype.
    #[must_use]
    pub fn column(&self, type_id: TypeId) -> Option<&Column> {
        self.signature
            .types()
            .binary_search(&type_id)
            .ok()
            .map(|index| &self.columns[index])
    }

    /// Bytes per entity (at least one).
    #[must_use]
    pub const fn footprint(&self) -> usize {
        self.footprint
    }

    /// Entities per chunk.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Pool class the chunks come from.
    #[must_use]
    pub const fn size_class(&self) -> SizeClass {
        self.size_class
    }

    /// Bytes of a chunk the columns occupy when full.
    #[must_use]
    pub fn bytes_used(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.descriptor.size() * self.capacity)
            .sum()
    }
}

/// A chunk holding rows of one archetype.
///
/// Rows are constructed and destroyed through the registered type
/// operations. Dropping the value destroys its rows but keeps the chunk
/// leased; use [`ArchetypeChunk::into_chunk`] to get the chunk back for
/// release.
pub struct ArchetypeChunk {
    chunk: Chunk,
    layout: Arc<ArchetypeLayout>,
    len: usize,
}

impl ArchetypeChunk {
    /// Wraps an empty chunk.
    ///
    /// # Errors
    ///
    /// Returns `InvalidLayout` if the chunk is too small for the layout.
    pub fn new(chunk: Chunk, layout: Arc<ArchetypeLayout>) -> CoreResult<Self> {
        if chunk.capacity() < layout.bytes_used() {
            return Err(CoreError::InvalidLayout(format!(
                "{:?} chunk of {} bytes cannot hold {} bytes of columns",
                chunk.size_class(),
                chunk.capacity(),
                layout.bytes_used()
            )));
        }
        Ok(Self {
            chunk,
            layout,
            len: 0,
        })
    }

    /// Layout shared by every chunk of this archetype.
    #[must_use]
    pub fn layout(&self) -> &Arc<ArchetypeLayout> {
        &self.layout
    }

    /// Underlying chunk.
    #[must_use]
    pub const fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// Number of rows.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no rows are stored.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if no more rows fit.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == self.layout.capacity()
    }

    /// Appends a row of default-constructed components.
    ///
    /// Returns the new row index, or `None` if the chunk is full.
    pub fn push_default(&mut self) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        let row = self.len;
        let base = self.chunk.as_mut_ptr();
        for column in self.layout.columns() {
            // SAFETY: `row < capacity`, so the slot lies inside the column and
            // is uninitialized.
            unsafe { column.descriptor.construct(base.add(column.row_offset(row))) };
        }
        self.len += 1;
        Some(row)
    }

    /// Removes a row, moving the last row into its place.
    ///
    /// Returns `false` if `row` is out of bounds.
    pub fn swap_remove(&mut self, row: usize) -> bool {
        if row >= self.len {
            return false;
        }
        let last = self.len - 1;
        // Shrink first: a panicking destructor leaks the tail, never
        // exposes a dropped row.
        self.len = last;
        let base = self.chunk.as_mut_ptr();
        for column in self.layout.columns() {
            // SAFETY: `row` and `last` are initialized rows of this column.
            // The hole is refilled from `last` even if the drop unwinds, and
            // `last` is outside `len` afterwards.
            unsafe {
                let slot = base.add(column.row_offset(row));
                if row == last {
                    column.descriptor.destruct(slot);
                } else {
                    let _refill = FillHole {
                        descriptor: &column.descriptor,
                        hole: slot,
                        src: base.add(column.row_offset(last)),
                    };
                    column.descriptor.destruct(slot);
                }
            }
        }
        true
    }

    /// Typed view of the column storing `T`.
    #[must_use]
    pub fn column<T: 'static>(&self) -> Option<&[T]> {
        let column = self.typed_column::<T>()?;
        // SAFETY: the column holds `len` initialized `T`s at an aligned offset.
        Some(unsafe {
            std::slice::from_raw_parts(
                self.chunk.as_ptr().add(column.offset).cast::<T>(),
                self.len,
            )
        })
    }

    /// Mutable typed view of the column storing `T`.
    #[must_use]
    pub fn column_mut<T: 'static>(&mut self) -> Option<&mut [T]> {
        let offset = self.typed_column::<T>()?.offset;
        // SAFETY: as in `column`, and `&mut self` makes the view exclusive.
        Some(unsafe {
            std::slice::from_raw_parts_mut(
                self.chunk.as_mut_ptr().add(offset).cast::<T>(),
                self.len,
            )
        })
    }

    /// Combined hash of every component in a row, in signature order.
    #[must_use]
    pub fn hash_row(&self, row: usize) -> Option<u64> {
        if row >= self.len {
            return None;
        }
        let base = self.chunk.as_ptr();
        let hash = self.layout.columns().iter().fold(0, |seed, column| {
            // SAFETY: `row` is initialized in every column.
            let value = unsafe { column.descriptor.hash(base.add(column.row_offset(row))) };
            hash_combine(seed, value)
        });
        Some(hash)
    }

    /// Destroys every row.
    ///
    /// If a destructor panics, the rows not yet dropped are leaked.
    pub fn clear(&mut self) {
        let len = std::mem::take(&mut self.len);
        let base = self.chunk.as_mut_ptr();
        for column in self.layout.columns() {
            for row in 0..len {
                // SAFETY: every row below the old `len` is initialized, and
                // `len` is already zero so none is dropped twice.
                unsafe { column.descriptor.destruct(base.add(column.row_offset(row))) };
            }
        }
    }

    /// Destroys every row and returns the chunk for release.
    #[must_use]
    pub fn into_chunk(mut self) -> Chunk {
        self.clear();
        let this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so each field is read exactly once.
        unsafe {
            drop(std::ptr::read(&this.layout));
            std::ptr::read(&this.chunk)
        }
    }

    fn typed_column<T: 'static>(&self) -> Option<&Column> {
        self.layout
            .columns()
            .iter()
            .find(|column| column.descriptor.is::<T>())
    }
}

/// Moves `src` into `hole` when dropped, including during unwinding.
struct FillHole<'a> {
    descriptor: &'a TypeDescriptor,
    hole: *mut u8,
    src: *mut u8,
}

impl Drop for FillHole<'_> {
    fn drop(&mut self) {
        // SAFETY: built by `swap_remove` with an initialized `src` and a
        // dropped `hole` of the same column.
        unsafe { self.descriptor.move_value(self.hole, self.src) };
    }
}

impl Drop for ArchetypeChunk {
    fn drop(&mut self) {
        if self.len > 0 {
            tracing::warn!(
                "archetype chunk {:?} dropped with {} rows; chunk stays leased",
                self.chunk.id(),
                self.len
            );
        }
        self.clear();
    }
}

impl std::fmt::Debug for ArchetypeChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchetypeChunk")
            .field("chunk", &self.chunk)
            .field("len", &self.len)
            .field("capacity", &self.layout.capacity())
            .finish()
    }
}
