//! Access descriptors — a system's declared read/write footprint.
//!
//! Systems declare, per namespace (components, resources, events), which
//! types they read and write. The scheduler compiles the declarations into
//! bit sets at registration time and uses pairwise conflict checks to plan
//! which systems may share a parallel batch.

use std::any::TypeId;
use std::collections::HashMap;

use parking_lot::Mutex;

use crate::bitset::BitSet;

/// Maps type tokens to dense indices for compact bit-set storage.
///
/// Indices are assigned on first observation, increase monotonically and
/// are never recycled. One index is shared by every descriptor registered
/// against the same scheduler, so their bit sets are comparable.
#[derive(Debug, Default)]
pub struct TypeIndex {
    map: Mutex<HashMap<TypeId, usize>>,
}

impl TypeIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the dense index for `token`, assigning one on first use.
    pub fn index_of(&self, token: TypeId) -> usize {
        let mut map = self.map.lock();
        let next = map.len();
        *map.entry(token).or_insert(next)
    }

    /// Returns the number of distinct tokens observed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Returns whether no token has been observed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

/// Declared data access of a system, prior to compilation.
///
/// The three namespaces are disjoint: a component type and a resource type
/// never conflict with each other even if they happen to be the same Rust
/// type. A type may legally appear in both the read and write list of the
/// same descriptor.
///
/// # Examples
///
/// ```rust
/// use pulse_schedule::Access;
///
/// struct Position;
/// struct Velocity;
/// struct FrameBudget;
///
/// let access = Access::new()
///     .read::<Velocity>()
///     .write::<Position>()
///     .resource_read::<FrameBudget>();
/// ```
#[derive(Debug, Clone, Default)]
pub struct Access {
    component_reads: Vec<TypeId>,
    component_writes: Vec<TypeId>,
    resource_reads: Vec<TypeId>,
    resource_writes: Vec<TypeId>,
    event_reads: Vec<TypeId>,
    event_writes: Vec<TypeId>,
}

impl Access {
    /// Creates an empty access declaration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a component read.
    #[must_use]
    pub fn read<T: 'static>(mut self) -> Self {
        self.component_reads.push(TypeId::of::<T>());
        self
    }

    /// Declares a component write.
    #[must_use]
    pub fn write<T: 'static>(mut self) -> Self {
        self.component_writes.push(TypeId::of::<T>());
        self
    }

    /// Declares a resource read.
    #[must_use]
    pub fn resource_read<T: 'static>(mut self) -> Self {
        self.resource_reads.push(TypeId::of::<T>());
        self
    }

    /// Declares a resource write.
    #[must_use]
    pub fn resource_write<T: 'static>(mut self) -> Self {
        self.resource_writes.push(TypeId::of::<T>());
        self
    }

    /// Declares an event read.
    #[must_use]
    pub fn event_read<T: 'static>(mut self) -> Self {
        self.event_reads.push(TypeId::of::<T>());
        self
    }

    /// Declares an event write.
    #[must_use]
    pub fn event_write<T: 'static>(mut self) -> Self {
        self.event_writes.push(TypeId::of::<T>());
        self
    }

    /// Appends every declaration of `other` to `self`.
    pub fn merge(&mut self, other: &Access) {
        self.component_reads.extend_from_slice(&other.component_reads);
        self.component_writes.extend_from_slice(&other.component_writes);
        self.resource_reads.extend_from_slice(&other.resource_reads);
        self.resource_writes.extend_from_slice(&other.resource_writes);
        self.event_reads.extend_from_slice(&other.event_reads);
        self.event_writes.extend_from_slice(&other.event_writes);
    }

    /// Compiles the declaration into bit sets through the shared index.
    #[must_use]
    pub fn compile(&self, index: &TypeIndex) -> AccessSets {
        let build = |tokens: &[TypeId]| {
            BitSet::from_indices(tokens.iter().map(|&token| index.index_of(token)))
        };
        AccessSets {
            component_reads: build(&self.component_reads),
            component_writes: build(&self.component_writes),
            resource_reads: build(&self.resource_reads),
            resource_writes: build(&self.resource_writes),
            event_reads: build(&self.event_reads),
            event_writes: build(&self.event_writes),
        }
    }
}

/// Compiled access bit sets, ready for pairwise conflict checks.
#[derive(Debug, Clone, Default)]
pub struct AccessSets {
    component_reads: BitSet,
    component_writes: BitSet,
    resource_reads: BitSet,
    resource_writes: BitSet,
    event_reads: BitSet,
    event_writes: BitSet,
}

impl AccessSets {
    /// Returns whether two systems may not run in the same batch.
    ///
    /// Within each namespace, a conflict is any of write/read, write/write
    /// or read/write overlap; read/read never conflicts, and no conflict
    /// crosses namespaces. The check is symmetric and evaluated
    /// `O(|batch|²)` per stage plan, so it short-circuits on the first hit.
    #[must_use]
    pub fn conflicts(&self, other: &AccessSets) -> bool {
        namespace_conflict(
            &self.component_reads,
            &self.component_writes,
            &other.component_reads,
            &other.component_writes,
        ) || namespace_conflict(
            &self.resource_reads,
            &self.resource_writes,
            &other.resource_reads,
            &other.resource_writes,
        ) || namespace_conflict(
            &self.event_reads,
            &self.event_writes,
            &other.event_reads,
            &other.event_writes,
        )
    }
}

fn namespace_conflict(
    a_reads: &BitSet,
    a_writes: &BitSet,
    b_reads: &BitSet,
    b_writes: &BitSet,
) -> bool {
    a_writes.any_intersect(b_reads)
        || a_writes.any_intersect(b_writes)
        || a_reads.any_intersect(b_writes)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Transform;
    struct Velocity;
    struct AiState;

    fn compile(access: Access, index: &TypeIndex) -> AccessSets {
        access.compile(index)
    }

    #[test]
    fn test_type_index_is_dense_and_stable() {
        let index = TypeIndex::new();
        let a = index.index_of(TypeId::of::<Transform>());
        let b = index.index_of(TypeId::of::<Velocity>());
        assert_ne!(a, b);
        assert_eq!(index.index_of(TypeId::of::<Transform>()), a);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_no_conflict_both_read() {
        let index = TypeIndex::new();
        let a = compile(Access::new().read::<Transform>(), &index);
        let b = compile(Access::new().read::<Transform>(), &index);
        assert!(!a.conflicts(&b));
    }

    #[test]
    fn test_conflict_read_vs_write() {
        let index = TypeIndex::new();
        let a = compile(Access::new().read::<Transform>(), &index);
        let b = compile(Access::new().write::<Transform>(), &index);
        assert!(a.conflicts(&b));
        assert!(b.conflicts(&a));
    }

    #[test]
    fn test_conflict_write_vs_write() {
        let index = TypeIndex::new();
        let a = compile(Access::new().write::<Velocity>(), &index);
        let b = compile(Access::new().write::<Velocity>(), &index);
        assert!(a.conflicts(&b));
    }

    #[test]
    fn test_no_conflict_disjoint_writes() {
        let index = TypeIndex::new();
        // Physics: reads Transform, writes Velocity.
        let physics = compile(
            Access::new().read::<Transform>().write::<Velocity>(),
            &index,
        );
        // AI: reads Transform, writes AiState.
        let ai = compile(Access::new().read::<Transform>().write::<AiState>(), &index);
        assert!(!physics.conflicts(&ai));
    }

    #[test]
    fn test_namespaces_are_disjoint() {
        let index = TypeIndex::new();
        // Same Rust type used as a component write and a resource read:
        // no conflict crosses namespaces.
        let a = compile(Access::new().write::<Transform>(), &index);
        let b = compile(Access::new().resource_read::<Transform>(), &index);
        assert!(!a.conflicts(&b));
    }

    #[test]
    fn test_event_namespace_conflicts() {
        let index = TypeIndex::new();
        let writer = compile(Access::new().event_write::<Transform>(), &index);
        let reader = compile(Access::new().event_read::<Transform>(), &index);
        let bystander = compile(Access::new().event_read::<Velocity>(), &index);
        assert!(writer.conflicts(&reader));
        assert!(!reader.conflicts(&bystander));
    }

    #[test]
    fn test_read_and_write_of_same_type_is_legal() {
        let index = TypeIndex::new();
        let access = compile(
            Access::new().read::<Transform>().write::<Transform>(),
            &index,
        );
        let other = compile(Access::new().read::<Velocity>(), &index);
        assert!(!access.conflicts(&other));
    }

    #[test]
    fn test_merge() {
        let index = TypeIndex::new();
        let mut base = Access::new().read::<Transform>();
        base.merge(&Access::new().write::<Velocity>());
        let merged = compile(base, &index);
        let velocity_reader = compile(Access::new().read::<Velocity>(), &index);
        assert!(merged.conflicts(&velocity_reader));
    }
}
