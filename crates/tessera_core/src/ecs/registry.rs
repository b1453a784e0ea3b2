//! # Type Registry
//!
//! Gives every component type a dense, process-lifetime [`TypeId`] and keeps
//! its layout and lifecycle operations.
//!
//! ## Type Erasure
//!
//! ```text
//! Position ──register──> TypeId(0) ──lookup──> TypeDescriptor
//!                                               ├─ size / align
//!                                               └─ TypeOps (fn pointers)
//!                                                   construct / destruct
//!                                                   move / hash
//! ```
//!
//! The operations are resolved once at registration and stored by value, so
//! the per-entity path is a plain indirect call with no trait objects.

// SAFETY: Type-erased lifecycle operations work on raw pointers.
// Every operation documents the contract its caller must uphold.
#![allow(unsafe_code)]

use std::any::TypeId as RustTypeId;
use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

use super::component::Component;
use crate::error::{CoreError, CoreResult};

/// Stable identifier of a registered component type.
///
/// Dense index into the registry. Consistent within one process run only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeId(u32);

impl TypeId {
    /// Creates an id from a registry index.
    #[inline]
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Registry index of this id.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type#{}", self.0)
    }
}

/// Type-erased lifecycle operations of one component type.
#[derive(Clone, Copy)]
pub struct TypeOps {
    /// Writes a default value to `dst`.
    pub construct: unsafe fn(dst: *mut u8),
    /// Drops the value at `dst` in place.
    pub destruct: unsafe fn(dst: *mut u8),
    /// Moves the value at `src` to uninitialized `dst`; `src` is left
    /// logically uninitialized.
    pub move_to: unsafe fn(dst: *mut u8, src: *mut u8),
    /// Hashes the value at `value`.
    pub hash: unsafe fn(value: *const u8) -> u64,
}

impl TypeOps {
    /// Operations backed by `T`'s `Default`, `Drop` and `hash_component`.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            construct: construct_default::<T>,
            destruct: destruct_in_place::<T>,
            move_to: move_value::<T>,
            hash: hash_in_place::<T>,
        }
    }
}

impl fmt::Debug for TypeOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeOps").finish_non_exhaustive()
    }
}

/// # Safety
///
/// `dst` must be valid for writes and aligned for `T`.
unsafe fn construct_default<T: Component>(dst: *mut u8) {
    dst.cast::<T>().write(T::default());
}

/// # Safety
///
/// `dst` must hold an initialized `T` that is not used afterwards.
unsafe fn destruct_in_place<T: Component>(dst: *mut u8) {
    std::ptr::drop_in_place(dst.cast::<T>());
}

/// # Safety
///
/// `src` must hold an initialized `T`; `dst` must be valid for writes,
/// aligned, and must not overlap `src`.
unsafe fn move_value<T: Component>(dst: *mut u8, src: *mut u8) {
    dst.cast::<T>().write(src.cast::<T>().read());
}

/// # Safety
///
/// `value` must point to an initialized `T`.
unsafe fn hash_in_place<T: Component>(value: *const u8) -> u64 {
    (*value.cast::<T>()).hash_component()
}

/// Layout and lifecycle of a component type.
///
/// Fields are read-only: storage code sizes and aligns slots from `size` and
/// `align` and hands them to `ops`, so the three must agree.
///
/// ```compile_fail
/// use tessera_core::{Position, TypeDescriptor};
///
/// let mut descriptor = TypeDescriptor::of::<Position>();
/// descriptor.size = 4;
/// ```
///
/// ```compile_fail
/// use tessera_core::{Position, TypeDescriptor, TypeOps};
///
/// let _ = TypeDescriptor::new("narrow", 4, 4, TypeOps::of::<Position>());
/// ```
#[derive(Clone, Copy, Debug)]
pub struct TypeDescriptor {
    name: &'static str,
    size: usize,
    align: usize,
    rust_type: Option<RustTypeId>,
    ops: TypeOps,
}

impl TypeDescriptor {
    /// Describes a concrete component type.
    #[must_use]
    pub fn of<T: Component>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            rust_type: Some(RustTypeId::of::<T>()),
            ops: TypeOps::of::<T>(),
        }
    }

    /// Describes a type by hand, e.g. one defined outside Rust.
    ///
    /// Typed column access never matches a hand-made descriptor.
    ///
    /// # Safety
    ///
    /// Every operation in `ops` must touch at most `size` bytes at its
    /// pointer and need at most `align` alignment. `construct` must leave an
    /// initialized value that `destruct`, `move_to` and `hash` accept.
    #[must_use]
    pub const unsafe fn new(name: &'static str, size: usize, align: usize, ops: TypeOps) -> Self {
        Self {
            name,
            size,
            align,
            rust_type: None,
            ops,
        }
    }

    /// Unique type name. The registry keys registrations by it.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Size in bytes.
    #[inline]
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Alignment in bytes.
    #[inline]
    #[must_use]
    pub const fn align(&self) -> usize {
        self.align
    }

    /// Rust type id, when built from a concrete type.
    #[inline]
    #[must_use]
    pub const fn rust_type(&self) -> Option<RustTypeId> {
        self.rust_type
    }

    /// Lifecycle operations.
    #[inline]
    #[must_use]
    pub const fn ops(&self) -> TypeOps {
        self.ops
    }

    /// Returns `true` if both descriptors describe the same type.
    ///
    /// Function pointers are not compared: the same generic instantiation may
    /// live at different addresses in different codegen units.
    #[must_use]
    pub fn same_structure(&self, other: &Self) -> bool {
        self.name == other.name
            && self.size == other.size
            && self.align == other.align
            && self.rust_type == other.rust_type
    }

    /// Returns `true` if this descriptor was built from `T`.
    #[inline]
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.rust_type == Some(RustTypeId::of::<T>())
    }

    fn validate(&self) -> CoreResult<()> {
        if !self.align.is_power_of_two() {
            return Err(CoreError::InvalidLayout(format!(
                "`{}` alignment {} is not a power of two",
                self.name, self.align
            )));
        }
        if self.size % self.align != 0 {
            return Err(CoreError::InvalidLayout(format!(
                "`{}` size {} is not a multiple of its alignment {}",
                self.name, self.size, self.align
            )));
        }
        Ok(())
    }

    /// Writes a default value to `dst`.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for `size` bytes of writes and aligned to `align`.
    #[inline]
    pub unsafe fn construct(&self, dst: *mut u8) {
        (self.ops.construct)(dst);
    }

    /// Drops the value at `dst`.
    ///
    /// # Safety
    ///
    /// `dst` must hold an initialized value of this type, not used afterwards.
    #[inline]
    pub unsafe fn destruct(&self, dst: *mut u8) {
        (self.ops.destruct)(dst);
    }

    /// Moves the value at `src` into `dst`.
    ///
    /// # Safety
    ///
    /// `src` must hold an initialized value, `dst` must be valid, aligned and
    /// uninitialized, and the two must not overlap. `src` is uninitialized
    /// afterwards.
    #[inline]
    pub unsafe fn move_value(&self, dst: *mut u8, src: *mut u8) {
        (self.ops.move_to)(dst, src);
    }

    /// Hashes the value at `value`.
    ///
    /// # Safety
    ///
    /// `value` must hold an initialized value of this type.
    #[inline]
    pub unsafe fn hash(&self, value: *const u8) -> u64 {
        (self.ops.hash)(value)
    }
}

/// A registered type: its id and descriptor.
#[derive(Clone, Copy, Debug)]
pub struct TypeInfo {
    /// Assigned id.
    pub id: TypeId,
    /// Registered descriptor.
    pub descriptor: TypeDescriptor,
}

#[derive(Default)]
struct RegistryInner {
    infos: Vec<TypeInfo>,
    by_name: HashMap<&'static str, TypeId>,
    by_rust_type: HashMap<RustTypeId, TypeId>,
}

impl RegistryInner {
    /// Resolves an existing registration, or `None` if `name` is new.
    fn existing(&self, descriptor: &TypeDescriptor) -> Option<CoreResult<TypeId>> {
        let &id = self.by_name.get(descriptor.name)?;
        let registered = &self.infos[id.index()].descriptor;
        if registered.same_structure(descriptor) {
            Some(Ok(id))
        } else {
            Some(Err(CoreError::DuplicateTypeConflict {
                name: descriptor.name,
                existing: id,
            }))
        }
    }
}

/// Registry of component types.
///
/// Registration happens during setup, before tasks that touch the registry
/// run. Lookups afterwards only take the read lock.
///
/// # Example
///
/// ```rust,ignore
/// let registry = TypeRegistry::new();
///
/// let position = registry.register_component::<Position>()?;
/// assert_eq!(registry.register_component::<Position>()?, position); // idempotent
///
/// let descriptor = registry.lookup(position)?;
/// assert_eq!(descriptor.size(), 8);
/// ```
#[derive(Default)]
pub struct TypeRegistry {
    inner: RwLock<RegistryInner>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a type, or returns the id of an identical earlier
    /// registration.
    ///
    /// # Errors
    ///
    /// - `DuplicateTypeConflict` if the name is registered with a different
    ///   structure
    /// - `InvalidLayout` if size and alignment are inconsistent
    pub fn register(&self, descriptor: TypeDescriptor) -> CoreResult<TypeId> {
        descriptor.validate()?;

        if let Some(result) = self.inner.read().existing(&descriptor) {
            return result;
        }

        let mut inner = self.inner.write();
        // Another thread may have registered it between the two locks.
        if let Some(result) = inner.existing(&descriptor) {
            return result;
        }

        let index = u32::try_from(inner.infos.len())
            .map_err(|_| CoreError::InvalidLayout("type registry is full".to_string()))?;
        let id = TypeId::from_index(index);
        inner.infos.push(TypeInfo { id, descriptor });
        inner.by_name.insert(descriptor.name, id);
        if let Some(rust_type) = descriptor.rust_type {
            inner.by_rust_type.insert(rust_type, id);
        }

        tracing::debug!(
            "registered component `{}` as {} ({} bytes, align {})",
            descriptor.name,
            id,
            descriptor.size,
            descriptor.align
        );
        Ok(id)
    }

    /// Registers the concrete component type `T`.
    ///
    /// # Errors
    ///
    /// See [`TypeRegistry::register`].
    pub fn register_component<T: Component>(&self) -> CoreResult<TypeId> {
        self.register(TypeDescriptor::of::<T>())
    }

    /// Returns the descriptor of a registered type.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if `id` was never registered.
    pub fn lookup(&self, id: TypeId) -> CoreResult<TypeDescriptor> {
        self.info(id).map(|info| info.descriptor)
    }

    /// Returns the id and descriptor of a registered type.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if `id` was never registered.
    pub fn info(&self, id: TypeId) -> CoreResult<TypeInfo> {
        self.inner
            .read()
            .infos
            .get(id.index())
            .copied()
            .ok_or(CoreError::UnknownType(id))
    }

    /// Id of the concrete type `T`, if registered.
    #[must_use]
    pub fn id_of<T: 'static>(&self) -> Option<TypeId> {
        self.inner
            .read()
            .by_rust_type
            .get(&RustTypeId::of::<T>())
            .copied()
    }

    /// Id registered under `name`, if any.
    #[must_use]
    pub fn id_by_name(&self, name: &str) -> Option<TypeId> {
        self.inner.read().by_name.get(name).copied()
    }

    /// Hashes a value through its registered hash operation.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if `id` was never registered.
    ///
    /// # Safety
    ///
    /// `value` must point to an initialized value of the type `id` names.
    pub unsafe fn hash_of(&self, id: TypeId, value: *const u8) -> CoreResult<u64> {
        let descriptor = self.lookup(id)?;
        Ok(descriptor.hash(value))
    }

    /// Hashes a typed value through its registered hash operation.
    ///
    /// # Errors
    ///
    /// Returns `UnregisteredComponent` if `T` was never registered.
    pub fn hash_value<T: Component>(&self, value: &T) -> CoreResult<u64> {
        let Some(id) = self.id_of::<T>() else {
            return Err(CoreError::UnregisteredComponent(std::any::type_name::<T>()));
        };
        // SAFETY: `id` was registered from `T`, and `value` is a live `T`.
        unsafe { self.hash_of(id, std::ptr::addr_of!(*value).cast::<u8>()) }
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().infos.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every registration, in id order.
    #[must_use]
    pub fn descriptors(&self) -> Vec<TypeInfo> {
        self.inner.read().infos.clone()
    }
}
