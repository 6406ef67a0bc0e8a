//! Constrained Delaunay tetrahedralization of a collected boundary.
//!
//! The boundary vertices are inserted into a super tetrahedron with
//! Bowyer-Watson insertion, cospherical ties going to vertices on more facet
//! edges. The boundary facets are recovered with flips and registered as
//! constraints, and the tetrahedra are classified:
//!
//! - Constraint faces cut the mesh into components.
//! - The component holding the super vertices is the exterior.
//! - Labels propagate across constraint faces. Crossing a facet of region
//!   `r` from outside enters `r`, crossing it from inside `r` leaves it,
//!   crossing an interface between `r` and `s` moves from one to the other.
//!
//! Components labelled as exterior (including voids) are deleted.

use std::fmt::Write as _;
use thiserror::Error;

use crate::core::algorithms::boundary_recovery::{
    RecoveryError, RecoveryStats, boundary_tie_order, find_intersecting_facets, recover_boundary,
};
use crate::core::algorithms::incremental_insertion::{InsertionError, insert_vertex};
use crate::core::boundary::BoundaryCollection;
use crate::core::collections::FastHashMap;
use crate::core::facet::{FacetRegions, canonical};
use crate::core::model::{Model, RegionId, VertexKey};
use crate::core::tet_mesh::{TetKey, TetMesh, TetMeshError};

/// Errors raised while building the constrained tetrahedralization.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum TetrahedralizeError {
    /// The collection has no facets.
    #[error("Boundary has no facets")]
    EmptyBoundary,
    /// A boundary vertex is missing from the model.
    #[error("Boundary vertex {vertex:?} is missing from the model")]
    MissingVertex {
        /// The missing vertex.
        vertex: VertexKey,
    },
    /// Two boundary vertices share a position.
    #[error("Boundary vertices {first} and {second} coincide at ({}, {}, {})", .position[0], .position[1], .position[2])]
    CoincidentVertices {
        /// Number of the first vertex.
        first: usize,
        /// Number of the second vertex.
        second: usize,
        /// The shared position.
        position: [f64; 3],
    },
    /// Boundary recovery failed.
    #[error("Boundary recovery failed: {source}; {detail}")]
    Recovery {
        /// The recovery failure.
        source: RecoveryError,
        /// Vertex numbers, coordinates, and the intersecting facet pair if
        /// one was found.
        detail: String,
        /// Whether two input facets were found to intersect.
        intersecting: bool,
    },
    /// The boundary does not enclose the regions consistently.
    #[error("Region classification failed: {message}")]
    Classification {
        /// Description of the problem.
        message: String,
    },
    /// A vertex insertion failed for a reason other than a duplicate.
    #[error("Delaunay insertion failed: {0}")]
    Insertion(#[from] InsertionError),
    /// The working mesh is inconsistent.
    #[error("Tetrahedralization is inconsistent: {0}")]
    Mesh(#[from] TetMeshError),
}

impl TetrahedralizeError {
    /// Returns `true` for failures caused by the input boundary rather than
    /// by numerical trouble.
    ///
    /// A recovery failure counts as bad input only when a vertex lies on a
    /// boundary edge or facet, or when two input facets intersect.
    #[must_use]
    pub const fn is_input_degeneracy(&self) -> bool {
        match self {
            Self::EmptyBoundary
            | Self::MissingVertex { .. }
            | Self::CoincidentVertices { .. }
            | Self::Classification { .. } => true,
            Self::Recovery {
                source: RecoveryError::VertexOnEdge { .. } | RecoveryError::VertexOnFacet { .. },
                ..
            } => true,
            Self::Recovery { intersecting, .. } => *intersecting,
            Self::Insertion(_) | Self::Mesh(_) => false,
        }
    }
}

/// A boundary-conforming tetrahedralization, classified into regions.
#[derive(Clone, Debug)]
pub struct Tetrahedralization {
    /// The working mesh. Every tetrahedron carries a region.
    pub mesh: TetMesh,
    /// Model vertex of every input point, by point index.
    pub vertices: Vec<VertexKey>,
    /// External boundary facets in point indices, as wound in the input.
    pub facets: Vec<[usize; 3]>,
    /// Interface facets in point indices.
    pub interfaces: Vec<[usize; 3]>,
    /// Counters from boundary recovery.
    pub recovery: RecoveryStats,
}

impl Tetrahedralization {
    /// Model vertex of point `v`, or `None` for super and Steiner points.
    #[must_use]
    pub fn vertex_key(&self, v: usize) -> Option<VertexKey> {
        self.vertices.get(v).copied()
    }

    /// Number of tetrahedra assigned to `region`.
    #[must_use]
    pub fn tets_in(&self, region: RegionId) -> usize {
        self.mesh
            .tets()
            .filter(|(_, t)| t.region == Some(region))
            .count()
    }
}

/// Builds the constrained tetrahedralization of a collected boundary.
///
/// # Errors
///
/// Returns a [`TetrahedralizeError`]; see
/// [`TetrahedralizeError::is_input_degeneracy`] for the split between bad
/// input and numerical failure.
pub fn tetrahedralize(
    model: &Model,
    collection: &BoundaryCollection,
    max_flips: usize,
) -> Result<Tetrahedralization, TetrahedralizeError> {
    if collection.is_empty() {
        return Err(TetrahedralizeError::EmptyBoundary);
    }

    let mut index: FastHashMap<VertexKey, usize> = FastHashMap::default();
    let mut points = Vec::with_capacity(collection.vertices.len());
    for (i, &key) in collection.vertices.iter().enumerate() {
        let position = model
            .position(key)
            .ok_or(TetrahedralizeError::MissingVertex { vertex: key })?;
        points.push(*position);
        index.insert(key, i);
    }
    let to_indices = |vertices: [VertexKey; 3]| vertices.map(|v| index[&v]);
    let facets: Vec<[usize; 3]> = collection.facets.iter().map(|f| to_indices(f.vertices)).collect();
    let interfaces: Vec<[usize; 3]> = collection
        .interfaces
        .iter()
        .map(|f| to_indices(f.vertices))
        .collect();
    let mut facet_regions: FastHashMap<[usize; 3], FacetRegions> = FastHashMap::default();
    for facet in collection.constraints() {
        facet_regions.insert(canonical(to_indices(facet.vertices)), facet.regions.clone());
    }

    let constraints: Vec<[usize; 3]> = facets.iter().chain(interfaces.iter()).copied().collect();
    let mut mesh = TetMesh::new(points)?;
    mesh.set_tie_order(&boundary_tie_order(collection.vertices.len(), &constraints))?;
    let mut hint: Option<TetKey> = None;
    for v in 0..collection.vertices.len() {
        match insert_vertex(&mut mesh, v, hint, false) {
            Ok(inserted) => hint = inserted.created.first().copied(),
            Err(InsertionError::Duplicate { vertex, existing }) => {
                let num = |i: usize| model.vertex(collection.vertices[i]).map_or(0, |mv| mv.num);
                let p = mesh.point(vertex);
                return Err(TetrahedralizeError::CoincidentVertices {
                    first: num(existing),
                    second: num(vertex),
                    position: [p.x, p.y, p.z],
                });
            }
            Err(err) => return Err(err.into()),
        }
    }
    tracing::debug!(
        "Delaunay tetrahedralization of {} boundary vertices: {} tetrahedra",
        collection.vertices.len(),
        mesh.number_of_tets()
    );

    let recovery = match recover_boundary(&mut mesh, &constraints, max_flips) {
        Ok(stats) => stats,
        Err(source) => {
            let (detail, intersecting) =
                describe_failure(model, collection, &mesh, &constraints, &source);
            tracing::error!("Boundary recovery failed: {source}; {detail}");
            return Err(TetrahedralizeError::Recovery {
                source,
                detail,
                intersecting,
            });
        }
    };

    let regions: Vec<RegionId> = {
        let mut all: Vec<RegionId> = facet_regions.values().flatten().copied().collect();
        all.sort_unstable();
        all.dedup();
        all
    };
    classify(&mut mesh, &facet_regions, &regions)?;
    mesh.validate()?;

    Ok(Tetrahedralization {
        mesh,
        vertices: collection.vertices.clone(),
        facets,
        interfaces,
        recovery,
    })
}

fn describe_failure(
    model: &Model,
    collection: &BoundaryCollection,
    mesh: &TetMesh,
    constraints: &[[usize; 3]],
    error: &RecoveryError,
) -> (String, bool) {
    let num = |v: usize| {
        collection
            .vertices
            .get(v)
            .and_then(|&k| model.vertex(k))
            .map_or(0, |mv| mv.num)
    };
    let describe = |facet: &[usize; 3]| {
        let mut text = String::new();
        for (n, &v) in facet.iter().enumerate() {
            let p = mesh.point(v);
            let sep = if n == 0 { "" } else { ", " };
            let _ = write!(text, "{sep}{} ({}, {}, {})", num(v), p.x, p.y, p.z);
        }
        format!("[{text}]")
    };

    let focus = error.vertices();
    let mut detail = format!(
        "vertices {:?}",
        focus.iter().map(|&v| num(v)).collect::<Vec<_>>()
    );
    let input = &mesh.points()[..mesh.input_count()];
    let pair = find_intersecting_facets(input, constraints, &focus);
    match pair {
        Some((i, j)) => {
            let _ = write!(
                detail,
                "; facets {} and {} intersect",
                describe(&constraints[i]),
                describe(&constraints[j])
            );
        }
        None => detail.push_str("; no intersecting facet pair found"),
    }
    (detail, pair.is_some())
}

/// Splits the mesh into components bounded by constraint faces, labels them
/// with regions and deletes the exterior ones.
fn classify(
    mesh: &mut TetMesh,
    facet_regions: &FastHashMap<[usize; 3], FacetRegions>,
    regions: &[RegionId],
) -> Result<(), TetrahedralizeError> {
    let keys = mesh.tet_keys_by_serial();
    let mut component: FastHashMap<TetKey, usize> = FastHashMap::default();
    let mut members: Vec<Vec<TetKey>> = Vec::new();
    // (component, neighbor component, facet) for every constraint crossing.
    let mut crossings: Vec<(usize, usize, [usize; 3])> = Vec::new();

    for &seed in &keys {
        if component.contains_key(&seed) {
            continue;
        }
        let id = members.len();
        component.insert(seed, id);
        let mut queue = vec![seed];
        let mut head = 0;
        while head < queue.len() {
            let key = queue[head];
            head += 1;
            let Some(tet) = mesh.tet(key) else {
                continue;
            };
            for i in 0..4 {
                let Some(n) = tet.neighbors[i] else {
                    continue;
                };
                if mesh.is_constraint_face(&tet.face_key(i)) {
                    continue;
                }
                if !component.contains_key(&n) {
                    component.insert(n, id);
                    queue.push(n);
                }
            }
        }
        members.push(queue);
    }

    for &key in &keys {
        let Some(tet) = mesh.tet(key) else {
            continue;
        };
        for i in 0..4 {
            let face = tet.face_key(i);
            if let Some(n) = tet.neighbors[i]
                && mesh.is_constraint_face(&face)
            {
                crossings.push((component[&key], component[&n], face));
            }
        }
    }

    let Some(exterior) = keys
        .iter()
        .find(|&&k| mesh.tet(k).is_some_and(|t| mesh.touches_super(t)))
        .map(|k| component[k])
    else {
        return Err(TetrahedralizeError::Classification {
            message: "no exterior tetrahedra".to_string(),
        });
    };

    // `None` is unlabelled, `Some(None)` exterior, `Some(Some(r))` region `r`.
    let mut labels: Vec<Option<Option<RegionId>>> = vec![None; members.len()];
    labels[exterior] = Some(None);
    let mut queue = vec![exterior];
    let mut head = 0;
    while head < queue.len() {
        let from = queue[head];
        head += 1;
        let Some(inside) = labels[from] else {
            continue;
        };
        for &(_, b, face) in crossings.iter().filter(|(a, _, _)| *a == from) {
            let facet = facet_regions.get(&face).map_or(&[][..], |r| r.as_slice());
            let next = cross(inside, facet).ok_or_else(|| TetrahedralizeError::Classification {
                message: format!("facet {face:?} of {facet:?} is not on the boundary of {inside:?}"),
            })?;
            match labels[b] {
                None => {
                    labels[b] = Some(next);
                    queue.push(b);
                }
                Some(existing) if existing != next => {
                    return Err(TetrahedralizeError::Classification {
                        message: format!(
                            "a component is enclosed by both {existing:?} and {next:?}"
                        ),
                    });
                }
                Some(_) => {}
            }
        }
    }

    let mut removed = Vec::new();
    for (id, tets) in members.iter().enumerate() {
        match labels[id] {
            Some(Some(region)) => {
                for &key in tets {
                    mesh.set_region(key, Some(region));
                }
            }
            Some(None) => removed.extend_from_slice(tets),
            None => {
                return Err(TetrahedralizeError::Classification {
                    message: "a component is not reachable from the exterior".to_string(),
                });
            }
        }
    }
    mesh.remove_tets(&removed);

    for &region in regions {
        if !mesh.tets().any(|(_, t)| t.region == Some(region)) {
            return Err(TetrahedralizeError::Classification {
                message: format!("{region} is empty; its boundary is not closed"),
            });
        }
    }
    tracing::debug!(
        "Classified {} components, removed {} exterior tetrahedra",
        members.len(),
        removed.len()
    );
    Ok(())
}

/// Label on the far side of a facet with adjacent `regions`, seen from a
/// component labelled `inside`.
fn cross(inside: Option<RegionId>, regions: &[RegionId]) -> Option<Option<RegionId>> {
    match (inside, regions) {
        (None, [r]) => Some(Some(*r)),
        (Some(r), [s]) if r == *s => Some(None),
        (Some(r), [s, t]) if r == *s => Some(Some(*t)),
        (Some(r), [s, t]) if r == *t => Some(Some(*s)),
        _ => None,
    }
}
