//! Consistency checks for a finished region mesh.
//!
//! [`check_region`] verifies that:
//!
//! - every tetrahedron and pyramid has positive volume;
//! - the faces of the elements that are not shared by two elements are
//!   exactly the surface elements of the region's faces;
//! - every pyramid base is a quadrangle of one of those faces, in the same
//!   cyclic order or its reverse;
//! - every element vertex is either on the region boundary or interior to
//!   the region, and no two element vertices share a position.

use thiserror::Error;

use crate::core::collections::{FastHashMap, FastHashSet};
use crate::core::facet::canonical;
use crate::core::model::{Model, Ownership, RegionId, VertexKey};
use crate::core::tet_mesh::FACE_VERTICES;
use crate::geometry::predicates::orient3d;
use crate::geometry::util::pyramid_volume;

/// A violated mesh property.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The region does not exist.
    #[error("{region} does not exist")]
    MissingRegion {
        /// The region.
        region: RegionId,
    },
    /// An element references a vertex that is not in the model.
    #[error("An element of {region} references missing vertex {vertex:?}")]
    MissingVertex {
        /// The region.
        region: RegionId,
        /// The vertex.
        vertex: VertexKey,
    },
    /// An element is flat or inverted.
    #[error("Element with vertices {vertices:?} of {region} has non-positive volume")]
    NonPositiveVolume {
        /// The region.
        region: RegionId,
        /// Vertex numbers of the element.
        vertices: Vec<usize>,
    },
    /// The element boundary differs from the surface mesh.
    #[error(
        "Boundary of {region} does not conform: {missing} surface elements uncovered, {extra} element faces exposed"
    )]
    BoundaryMismatch {
        /// The region.
        region: RegionId,
        /// Surface elements that are not an exposed element face.
        missing: usize,
        /// Exposed element faces that are not a surface element.
        extra: usize,
    },
    /// A pyramid base does not match a quadrangle corner for corner.
    #[error("Pyramid base {base:?} of {region} matches no boundary quadrangle")]
    PyramidWithoutQuad {
        /// The region.
        region: RegionId,
        /// Vertex numbers of the base.
        base: Vec<usize>,
    },
    /// An element vertex is neither on the boundary nor interior.
    #[error("Vertex {vertex} used by {region} is classified on {owner}")]
    StrayVertex {
        /// The region.
        region: RegionId,
        /// Vertex number.
        vertex: usize,
        /// Its classification.
        owner: Ownership,
    },
    /// Two element vertices share a position.
    #[error("Vertices {first} and {second} of {region} coincide")]
    DuplicateVertex {
        /// The region.
        region: RegionId,
        /// Number of the first vertex.
        first: usize,
        /// Number of the second vertex.
        second: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Side {
    Triangle([VertexKey; 3]),
    Quad([VertexKey; 4]),
}

fn toggle(set: &mut FastHashSet<Side>, side: Side) {
    if !set.remove(&side) {
        set.insert(side);
    }
}

fn same_cycle(a: [VertexKey; 4], b: [VertexKey; 4]) -> bool {
    let reversed = [b[3], b[2], b[1], b[0]];
    (0..4).any(|shift| {
        (0..4).all(|i| a[i] == b[(i + shift) % 4])
            || (0..4).all(|i| a[i] == reversed[(i + shift) % 4])
    })
}

/// Checks the mesh of `region`.
///
/// # Errors
///
/// Returns the first violated property.
pub fn check_region(model: &Model, region: RegionId) -> Result<(), ValidationError> {
    let r = model
        .region(region)
        .ok_or(ValidationError::MissingRegion { region })?;
    let position = |v: VertexKey| {
        model
            .position(v)
            .ok_or(ValidationError::MissingVertex { region, vertex: v })
    };
    let nums = |vertices: &[VertexKey]| -> Vec<usize> {
        vertices
            .iter()
            .map(|&v| model.vertex(v).map_or(0, |mv| mv.num))
            .collect()
    };

    let mut exposed: FastHashSet<Side> = FastHashSet::default();
    for tet in &r.tetrahedra {
        let v = tet.vertices;
        let [a, b, c, d] = [position(v[0])?, position(v[1])?, position(v[2])?, position(v[3])?];
        if orient3d(a, b, c, d) <= 0.0 {
            return Err(ValidationError::NonPositiveVolume {
                region,
                vertices: nums(&v),
            });
        }
        for f in FACE_VERTICES {
            toggle(
                &mut exposed,
                Side::Triangle(canonical([v[f[0]], v[f[1]], v[f[2]]])),
            );
        }
    }
    for pyramid in &r.pyramids {
        let [b0, b1, b2, b3, apex] = pyramid.vertices;
        let base = [position(b0)?, position(b1)?, position(b2)?, position(b3)?];
        if pyramid_volume(base, position(apex)?) <= 0.0 {
            return Err(ValidationError::NonPositiveVolume {
                region,
                vertices: nums(&pyramid.vertices),
            });
        }
        toggle(&mut exposed, Side::Quad(canonical(pyramid.base())));
        for [p, q] in [[b0, b1], [b1, b2], [b2, b3], [b3, b0]] {
            toggle(&mut exposed, Side::Triangle(canonical([p, q, apex])));
        }
    }

    let mut surface: FastHashSet<Side> = FastHashSet::default();
    let mut quads: FastHashMap<[VertexKey; 4], [VertexKey; 4]> = FastHashMap::default();
    for face in r.faces.iter().filter_map(|&f| model.face(f)) {
        for triangle in &face.triangles {
            toggle(&mut surface, Side::Triangle(canonical(triangle.vertices)));
        }
        for quad in &face.quadrangles {
            toggle(&mut surface, Side::Quad(canonical(quad.vertices)));
            quads.insert(canonical(quad.vertices), quad.vertices);
        }
    }
    if exposed != surface {
        return Err(ValidationError::BoundaryMismatch {
            region,
            missing: surface.difference(&exposed).count(),
            extra: exposed.difference(&surface).count(),
        });
    }

    for pyramid in &r.pyramids {
        let base = pyramid.base();
        let matches = quads
            .get(&canonical(base))
            .is_some_and(|&quad| same_cycle(base, quad));
        if !matches {
            return Err(ValidationError::PyramidWithoutQuad {
                region,
                base: nums(&base),
            });
        }
    }

    let boundary: FastHashSet<VertexKey> = surface
        .iter()
        .flat_map(|side| match *side {
            Side::Triangle(v) => v.to_vec(),
            Side::Quad(v) => v.to_vec(),
        })
        .collect();
    let mut used: Vec<VertexKey> = r
        .tetrahedra
        .iter()
        .flat_map(|t| t.vertices)
        .chain(r.pyramids.iter().flat_map(|p| p.vertices))
        .collect();
    used.sort_unstable();
    used.dedup();

    let mut positions: FastHashMap<[u64; 3], usize> = FastHashMap::default();
    for v in used {
        let vertex = model
            .vertex(v)
            .ok_or(ValidationError::MissingVertex { region, vertex: v })?;
        if !boundary.contains(&v) && vertex.owner() != Ownership::OnRegionInterior(region) {
            return Err(ValidationError::StrayVertex {
                region,
                vertex: vertex.num,
                owner: vertex.owner(),
            });
        }
        let p = vertex.position;
        if let Some(&first) = positions.get(&[p.x.to_bits(), p.y.to_bits(), p.z.to_bits()]) {
            return Err(ValidationError::DuplicateVertex {
                region,
                first,
                second: vertex.num,
            });
        }
        positions.insert([p.x.to_bits(), p.y.to_bits(), p.z.to_bits()], vertex.num);
    }
    Ok(())
}
