//! World resource storage.
//!
//! The scheduler hands the world through to system bodies without ever
//! inspecting it; this container is the substrate those bodies operate on.
//! Safety of concurrent access comes from the access declarations: two
//! systems sharing a batch provably do not touch the same type in a write
//! direction.

use std::any::{Any, TypeId};

use dashmap::mapref::one::{MappedRef, MappedRefMut};
use dashmap::DashMap;

/// Shared immutable borrow of a resource.
pub type ResourceRef<'a, T> = MappedRef<'a, TypeId, Box<dyn Any + Send + Sync>, T>;

/// Exclusive borrow of a resource.
pub type ResourceRefMut<'a, T> = MappedRefMut<'a, TypeId, Box<dyn Any + Send + Sync>, T>;

/// A thread-safe, type-keyed resource container.
///
/// Each resource type has at most one value. Borrows hold a shard lock of
/// the underlying map; systems should keep them short-lived.
#[derive(Default)]
pub struct World {
    resources: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl World {
    /// Creates an empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a resource, returning the previous value of that type.
    pub fn insert_resource<T: Send + Sync + 'static>(&self, value: T) -> Option<T> {
        self.resources
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Removes and returns the resource of type `T`.
    pub fn remove_resource<T: Send + Sync + 'static>(&self) -> Option<T> {
        self.resources
            .remove(&TypeId::of::<T>())
            .and_then(|(_, old)| old.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    /// Returns whether a resource of type `T` is present.
    #[must_use]
    pub fn contains_resource<T: Send + Sync + 'static>(&self) -> bool {
        self.resources.contains_key(&TypeId::of::<T>())
    }

    /// Borrows the resource of type `T`.
    #[must_use]
    pub fn resource<T: Send + Sync + 'static>(&self) -> Option<ResourceRef<'_, T>> {
        let guard = self.resources.get(&TypeId::of::<T>())?;
        guard.try_map(|boxed| boxed.downcast_ref::<T>()).ok()
    }

    /// Exclusively borrows the resource of type `T`.
    #[must_use]
    pub fn resource_mut<T: Send + Sync + 'static>(&self) -> Option<ResourceRefMut<'_, T>> {
        let guard = self.resources.get_mut(&TypeId::of::<T>())?;
        guard.try_map(|boxed| boxed.downcast_mut::<T>()).ok()
    }

    /// Returns the number of stored resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }
}
