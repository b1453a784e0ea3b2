//! # Component System
//!
//! Components are data containers. The registry erases their type so chunk
//! storage and the scheduler can handle them without static type knowledge.

use bytemuck::{Pod, Zeroable};

use crate::hash::hash_pod;

/// Marker trait for ECS components.
///
/// Components must be:
/// - `Default`: chunk rows are constructed in place before being written
/// - `Send + Sync`: rows are touched from scheduler worker threads
/// - hashable through [`Component::hash_component`], so generic containers
///   can hash values behind a type-erased pointer
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Copy, Default, Pod, Zeroable)]
/// #[repr(C)]
/// struct Health {
///     current: f32,
///     max: f32,
/// }
///
/// impl Component for Health {
///     fn hash_component(&self) -> u64 {
///         hash_pod(self)
///     }
/// }
/// ```
pub trait Component: Default + Send + Sync + 'static {
    /// Hashes this value. Equal values must hash equally.
    fn hash_component(&self) -> u64;
}

/// Position component for entities.
///
/// Represents a 2D position in world space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Position {
    /// X coordinate in world space.
    pub x: f32,
    /// Y coordinate in world space.
    pub y: f32,
}

impl Component for Position {
    fn hash_component(&self) -> u64 {
        hash_pod(self)
    }
}

impl Position {
    /// Creates a new position.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Returns the position advanced by `velocity` over `delta_time` seconds.
    #[inline]
    #[must_use]
    pub fn integrate(self, velocity: Velocity, delta_time: f32) -> Self {
        Self {
            x: velocity.x.mul_add(delta_time, self.x),
            y: velocity.y.mul_add(delta_time, self.y),
        }
    }
}

/// Velocity component for entities.
///
/// Represents movement speed in world units per second.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Velocity {
    /// X velocity component.
    pub x: f32,
    /// Y velocity component.
    pub y: f32,
}

impl Component for Velocity {
    fn hash_component(&self) -> u64 {
        hash_pod(self)
    }
}

impl Velocity {
    /// Creates a new velocity.
    #[inline]
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_integrate() {
        let p = Position::new(1.0, 2.0).integrate(Velocity::new(2.0, -1.0), 0.5);
        assert!((p.x - 2.0).abs() < f32::EPSILON);
        assert!((p.y - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_component_sizes() {
        assert_eq!(std::mem::size_of::<Position>(), 8);
        assert_eq!(std::mem::align_of::<Position>(), 4);
        assert_eq!(std::mem::size_of::<Velocity>(), 8);
    }

    #[test]
    fn test_equal_values_hash_equally() {
        let a = Position::new(3.0, 4.0);
        assert_eq!(a.hash_component(), Position::new(3.0, 4.0).hash_component());
        assert_ne!(a.hash_component(), Position::new(4.0, 3.0).hash_component());
    }
}
