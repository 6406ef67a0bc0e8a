//! High-performance collection types used throughout the mesher.
//!
//! All hashing collections use `rustc_hash::FxHasher`: keys are vertex
//! indices, arena keys and sorted index tuples produced by the mesher itself,
//! never attacker-controlled input.

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

#[cfg(not(feature = "dense-slotmap"))]
use slotmap::SlotMap;

#[cfg(feature = "dense-slotmap")]
use slotmap::DenseSlotMap;

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Arena storage for vertices and working tetrahedra.
///
/// - **default**: `DenseSlotMap` (enabled via the default `dense-slotmap` feature)
/// - **--no-default-features**: `SlotMap`
///
/// Keys are never reused with the same version, so a key of a removed
/// tetrahedron reliably reports "absent". The refinement queue depends on
/// this to discard stale entries.
#[cfg(not(feature = "dense-slotmap"))]
pub type StorageMap<K, V> = SlotMap<K, V>;

/// Arena storage for vertices and working tetrahedra.
#[cfg(feature = "dense-slotmap")]
pub type StorageMap<K, V> = DenseSlotMap<K, V>;

// =============================================================================
// CORE OPTIMIZED TYPES
// =============================================================================

/// `HashMap` with the Fx hasher.
///
/// # Examples
///
/// ```rust
/// use volmesh::core::collections::FastHashMap;
///
/// let mut map: FastHashMap<[usize; 3], usize> = FastHashMap::default();
/// map.insert([0, 1, 2], 7);
/// assert_eq!(map.get(&[0, 1, 2]), Some(&7));
/// ```
pub type FastHashMap<K, V> = FxHashMap<K, V>;

/// `HashSet` with the Fx hasher.
pub type FastHashSet<T> = FxHashSet<T>;

/// Re-export of the entry API used with [`FastHashMap`].
pub use std::collections::hash_map::Entry;

/// Stack-allocated buffer that spills to the heap beyond `N` items.
pub type SmallBuffer<T, const N: usize> = SmallVec<[T; N]>;

// =============================================================================
// SEMANTIC SIZE CONSTANTS
// =============================================================================

/// Typical number of tetrahedra in a Bowyer-Watson cavity.
pub const CAVITY_BUFFER_SIZE: usize = 32;

/// Typical number of tetrahedra around an edge.
pub const EDGE_RING_BUFFER_SIZE: usize = 8;

/// Regions sharing a facet: one for an external facet, two for an interface.
pub const FACET_REGION_BUFFER_SIZE: usize = 2;

// =============================================================================
// HELPERS
// =============================================================================

/// Creates a [`FastHashMap`] with pre-allocated capacity.
#[inline]
#[must_use]
pub fn fast_hash_map_with_capacity<K, V>(capacity: usize) -> FastHashMap<K, V> {
    FastHashMap::with_capacity_and_hasher(capacity, rustc_hash::FxBuildHasher)
}

/// Creates a [`FastHashSet`] with pre-allocated capacity.
#[inline]
#[must_use]
pub fn fast_hash_set_with_capacity<T>(capacity: usize) -> FastHashSet<T> {
    FastHashSet::with_capacity_and_hasher(capacity, rustc_hash::FxBuildHasher)
}
