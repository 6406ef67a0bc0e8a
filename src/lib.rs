//! # volmesh
//!
//! Constrained Delaunay volume meshing of regions bounded by triangulated or
//! quad-dominant surface meshes.
//!
//! # Pipeline
//!
//! Every region goes through the same stages:
//!
//! 1. **Boundary collection** ([`core::boundary`]): the surface elements of
//!    the region's faces are gathered into a closed set of triangular facets.
//!    Quadrangles are split into four triangles around a synthetic centroid.
//! 2. **Constrained tetrahedralization**
//!    ([`core::algorithms::tetrahedralize`]): the boundary vertices are
//!    inserted with Bowyer-Watson insertion, missing facets are recovered
//!    with flips ([`core::algorithms::boundary_recovery`]), and the exterior
//!    is removed.
//! 3. **Refinement** ([`core::algorithms::refinement`]): Steiner points are
//!    inserted at circumcenters until every tetrahedron meets its target size
//!    and quality.
//! 4. **Pyramid reconstruction** ([`core::algorithms::pyramids`]): each split
//!    quad becomes the base of a pyramid whose apex is the centroid.
//! 5. **Apex relocation** ([`core::algorithms::relocation`]): each apex is
//!    moved into the volume so the pyramid is no longer flat.
//!
//! The [`core::mesher::Mesher`] orchestrates these stages over a whole
//! [`core::model::Model`], tracks a [`core::model::MeshStatus`] per region,
//! and publishes finished meshes as immutable snapshots.
//!
//! # Basic Usage
//!
//! ```rust
//! use volmesh::prelude::*;
//!
//! let mut model = Model::new();
//! let mut shapes = ShapeBuilder::new(&mut model);
//! let left = shapes.hexahedron(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0), true);
//! let right = shapes.hexahedron(Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 1.0, 1.0), true);
//!
//! let mut mesher = Mesher::new(MeshOptions::default());
//! let report = mesher.mesh_regions(&mut model);
//!
//! assert_eq!(report.meshed().count(), 2);
//! for region in [left, right] {
//!     assert!(model.region(region).unwrap().status.is_done());
//!     check_region(&model, region).unwrap();
//! }
//! ```
//!
//! # Failure handling
//!
//! A region whose boundary cannot be recovered (for instance because two
//! boundary triangles intersect) ends in [`core::model::MeshStatus::Failed`]
//! with a [`core::mesher::MeshError`] naming the offending vertices and
//! coordinates. Its volume mesh stays empty and the remaining regions are
//! meshed normally.
//!
//! Best-effort steps never fail a region: a Steiner point that cannot be
//! inserted is dropped, and a quad that cannot become a pyramid stays as four
//! triangles.

// Forbid unsafe code throughout the entire crate
#![forbid(unsafe_code)]

#[macro_use]
extern crate derive_builder;

/// Data structures and algorithms of the volume mesher.
pub mod core {
    /// Meshing algorithms operating on the working tetrahedralization and
    /// the model.
    pub mod algorithms {
        /// Edge and facet recovery by flips
        pub mod boundary_recovery;
        /// 2-3 flips and edge removal
        pub mod flips;
        /// Bowyer-Watson cavity insertion
        pub mod incremental_insertion;
        pub mod pyramids;
        pub mod refinement;
        pub mod relocation;
        pub mod tetrahedralize;
    }
    pub mod boundary;
    /// High-performance collection types used throughout the crate
    pub mod collections;
    pub mod config;
    pub mod facet;
    pub mod mesher;
    pub mod model;
    /// Builders for simple closed shapes
    pub mod primitives;
    pub mod size_field;
    pub mod snapshot;
    pub mod tet_mesh;
    pub mod validation;
}

/// Geometric predicates, measures and quality functions.
pub mod geometry {
    /// Exact orientation and in-sphere predicates
    pub mod predicates;
    /// Shape quality measures for tetrahedra
    pub mod quality;
    /// Volumes, centroids and circumspheres
    pub mod util;
}

/// A prelude module that re-exports commonly used types.
pub mod prelude {
    pub use crate::core::{
        boundary::{BoundaryCollection, SplitRecord, collect, collect_group},
        config::{Algorithm3D, MeshOptions, MeshOptionsBuilder},
        mesher::{MeshError, MeshReport, Mesher, RegionOutcome, RegionReport, VolumeMesher},
        model::{
            FaceId, MeshStatus, MeshingMethod, Model, Ownership, Pyramid, RegionId, Tetrahedron,
            VertexKey,
        },
        primitives::ShapeBuilder,
        size_field::{BoxSize, ConstantSize, SizeField},
        snapshot::{RegionMesh, SnapshotStore},
        validation::{ValidationError, check_region},
    };

    pub use crate::core::collections::{FastHashMap, FastHashSet, SmallBuffer};

    pub use crate::geometry::{predicates::orient3d, quality::QualityMeasure, util::*};

    pub use nalgebra::Point3;
}

/// The function `is_normal` checks that structs implement `auto` traits.
/// Traits are checked at compile time, so this function is only used for
/// testing.
#[must_use]
pub const fn is_normal<T: Sized + Send + Sync + Unpin>() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use crate::{
        core::{mesher::Mesher, model::Model, snapshot::SnapshotStore, tet_mesh::TetMesh},
        is_normal,
    };

    #[test]
    fn normal_types() {
        assert!(is_normal::<Model>());
        assert!(is_normal::<TetMesh>());
        assert!(is_normal::<Mesher>());
        assert!(is_normal::<SnapshotStore>());
    }

    #[test]
    fn test_prelude_exports() {
        use crate::prelude::*;

        let mut map: FastHashMap<u64, usize> = FastHashMap::default();
        map.insert(123, 456);
        assert_eq!(map.get(&123), Some(&456));

        let mut buffer: SmallBuffer<i32, 8> = SmallBuffer::new();
        buffer.push(42);
        assert_eq!(buffer.len(), 1);

        let options = MeshOptions::default();
        assert_eq!(options.algorithm_3d, Algorithm3D::Delaunay);
    }
}
