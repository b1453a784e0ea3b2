//! Declared component access of a task.

use crate::ecs::TypeId;

/// Component types a task reads and writes.
///
/// The two sets are disjoint: writing a type implies reading it, so a write
/// removes the type from the read set and a read of an already-written type
/// changes nothing.
///
/// # Example
///
/// ```rust,ignore
/// let access = AccessSet::new().write(position).read(velocity);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccessSet {
    reads: Vec<TypeId>,
    writes: Vec<TypeId>,
}

impl AccessSet {
    /// Creates an empty access set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    /// Adds a read of `type_id`.
    #[must_use]
    pub fn read(mut self, type_id: TypeId) -> Self {
        self.add_read(type_id);
        self
    }

    /// Adds a write of `type_id`.
    #[must_use]
    pub fn write(mut self, type_id: TypeId) -> Self {
        self.add_write(type_id);
        self
    }

    /// Adds a read of `type_id` in place.
    pub fn add_read(&mut self, type_id: TypeId) {
        if self.writes.binary_search(&type_id).is_ok() {
            return;
        }
        if let Err(at) = self.reads.binary_search(&type_id) {
            self.reads.insert(at, type_id);
        }
    }

    /// Adds a write of `type_id` in place.
    pub fn add_write(&mut self, type_id: TypeId) {
        if let Ok(at) = self.reads.binary_search(&type_id) {
            self.reads.remove(at);
        }
        if let Err(at) = self.writes.binary_search(&type_id) {
            self.writes.insert(at, type_id);
        }
    }

    /// Types read but not written, ascending.
    #[must_use]
    pub fn reads(&self) -> &[TypeId] {
        &self.reads
    }

    /// Types written, ascending.
    #[must_use]
    pub fn writes(&self) -> &[TypeId] {
        &self.writes
    }

    /// Returns `true` if the task reads or writes `type_id`.
    #[must_use]
    pub fn touches(&self, type_id: TypeId) -> bool {
        self.writes_type(type_id) || self.reads.binary_search(&type_id).is_ok()
    }

    /// Returns `true` if neither set has any type.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }

    /// Returns `true` if the two tasks must be ordered: both write a common
    /// type, or one writes a type the other reads.
    #[must_use]
    pub fn conflicts_with(&self, other: &Self) -> bool {
        self.writes.iter().any(|&id| other.touches(id))
            || other.writes.iter().any(|&id| self.touches(id))
    }

    /// Returns `true` if the task writes `type_id`.
    #[must_use]
    pub fn writes_type(&self, type_id: TypeId) -> bool {
        self.writes.binary_search(&type_id).is_ok()
    }
}
