//! Boundary facet types and canonical keys.
//!
//! A facet is identified independently of its winding by its sorted vertex
//! list. Boundary collection, constraint bookkeeping in the working
//! tetrahedralization and the final conformity checks all compare facets by
//! this canonical form.

use serde::{Deserialize, Serialize};

use crate::core::collections::{FACET_REGION_BUFFER_SIZE, SmallBuffer};
use crate::core::model::{FaceId, RegionId, VertexKey};

/// Returns `vertices` sorted ascending.
///
/// # Examples
///
/// ```
/// use volmesh::core::facet::canonical;
///
/// assert_eq!(canonical([7, 2, 5]), [2, 5, 7]);
/// assert_eq!(canonical([3, 1]), [1, 3]);
/// ```
#[inline]
#[must_use]
pub fn canonical<T: Ord + Copy, const N: usize>(mut vertices: [T; N]) -> [T; N] {
    vertices.sort_unstable();
    vertices
}

/// Canonical key of a triangular facet.
pub type TriangleKey = [VertexKey; 3];

/// Canonical key of a quadrilateral facet.
pub type QuadKey = [VertexKey; 4];

/// Entity a boundary facet was collected from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FacetOwner {
    /// A surface element of a bounding face.
    Face(FaceId),
    /// An exposed face of an element that already belongs to the region.
    Region(RegionId),
}

/// Regions on the sides of a facet: one for an external facet, two for an
/// interface between regions meshed together.
pub type FacetRegions = SmallBuffer<RegionId, FACET_REGION_BUFFER_SIZE>;

/// A triangular facet the tetrahedralization must conform to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundaryFacet {
    /// Vertices in the winding of the originating element.
    pub vertices: [VertexKey; 3],
    /// Where the facet came from.
    pub owner: FacetOwner,
    /// Regions adjacent to the facet.
    pub regions: FacetRegions,
}

impl BoundaryFacet {
    /// Canonical (sorted) key.
    #[inline]
    #[must_use]
    pub fn key(&self) -> TriangleKey {
        canonical(self.vertices)
    }

    /// Returns `true` when the facet separates two regions of the same group.
    #[inline]
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.regions.len() > 1
    }

    /// The three edges of the facet as canonical vertex pairs.
    #[must_use]
    pub fn edges(&self) -> [[VertexKey; 2]; 3] {
        let [a, b, c] = self.vertices;
        [canonical([a, b]), canonical([b, c]), canonical([c, a])]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_canonical_ignores_winding() {
        assert_eq!(canonical([3usize, 1, 2]), canonical([2usize, 3, 1]));
        assert_eq!(canonical([9usize, 4, 6, 1]), [1, 4, 6, 9]);
    }

    #[test]
    fn test_boundary_facet_key_and_edges() {
        let mut keys: SlotMap<VertexKey, ()> = SlotMap::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let c = keys.insert(());
        let facet = BoundaryFacet {
            vertices: [c, a, b],
            owner: FacetOwner::Face(FaceId(0)),
            regions: FacetRegions::from_slice(&[RegionId(0)]),
        };
        assert_eq!(facet.key(), canonical([a, b, c]));
        assert!(!facet.is_interface());
        let edges = facet.edges();
        assert!(edges.contains(&canonical([a, b])));
        assert!(edges.contains(&canonical([a, c])));
        assert!(edges.contains(&canonical([b, c])));
    }
}
