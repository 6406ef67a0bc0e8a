//! Topological flips for constrained tetrahedralizations.
//!
//! Two operations are provided:
//!
//! - [`flip_23`]: replaces the two tetrahedra sharing a face with three
//!   tetrahedra sharing the edge between their apexes.
//! - [`remove_edge`]: replaces the ring of tetrahedra around an edge with the
//!   best triangulation of the ring polygon coned to both edge endpoints
//!   (the 3-2 flip is the case of a ring of three).
//!
//! Both refuse to destroy a registered constraint face and return a
//! [`FlipRecord`] that [`undo`] uses to restore the previous configuration.
//!
//! # References
//!
//! - Shewchuk, J.R. "Updating and Constructing Constrained Delaunay and
//!   Constrained Regular Triangulations by Flips" (SoCG 2003)
//! - Si, H. "TetGen, a Delaunay-Based Quality Tetrahedral Mesh Generator"
//!   ACM TOMS 41.2 (2015), section on edge removal

use thiserror::Error;

use crate::core::facet::canonical;
use crate::core::tet_mesh::{TetBuffer, TetKey, TetMesh, TetMeshError};
use crate::geometry::predicates::orient3d;
use crate::geometry::quality::QualityMeasure;

/// Errors raised by flips.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlipError {
    /// The face lies on the mesh boundary.
    #[error("Face {face:?} has no tetrahedron on its other side")]
    BoundaryFace {
        /// The face.
        face: [usize; 3],
    },
    /// The two tetrahedra do not form a convex bipyramid.
    #[error("Face {face:?} cannot be flipped: the union of its tetrahedra is not convex")]
    NonConvex {
        /// The face.
        face: [usize; 3],
    },
    /// The flip would remove a constraint face.
    #[error("Flip would destroy constraint face {face:?}")]
    ConstraintFace {
        /// The protected face.
        face: [usize; 3],
    },
    /// The edge does not exist or lies on the mesh boundary.
    #[error("Edge {edge:?} is not an interior edge")]
    OpenRing {
        /// The edge.
        edge: [usize; 2],
    },
    /// No triangulation of the ring yields positive tetrahedra.
    #[error("Edge {edge:?} cannot be removed: no valid triangulation of its ring")]
    NoValidTriangulation {
        /// The edge.
        edge: [usize; 2],
    },
    /// The underlying replacement failed.
    #[error("Flip failed: {0}")]
    Mesh(#[from] TetMeshError),
}

/// What a flip changed, sufficient to undo it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlipRecord {
    /// Vertex arrays of the removed tetrahedra.
    pub removed: Vec<[usize; 4]>,
    /// Keys of the created tetrahedra.
    pub created: TetBuffer,
}

/// Elements a ring re-triangulation should produce when it can.
#[derive(Clone, Copy, Debug, Default)]
pub struct RingObjective<'a> {
    /// Edges to create.
    pub edges: &'a [[usize; 2]],
    /// Faces to create.
    pub faces: &'a [[usize; 3]],
}

impl RingObjective<'_> {
    fn hits(&self, triangle: [usize; 3]) -> usize {
        let key = canonical(triangle);
        let [x, y, z] = key;
        let edge_hits = [[x, y], [x, z], [y, z]]
            .iter()
            .filter(|e| self.edges.contains(e))
            .count();
        let face_hits = usize::from(self.faces.contains(&key));
        edge_hits + 4 * face_hits
    }
}

/// Performs a 2-3 flip on face `face` of tetrahedron `tet`.
///
/// # Errors
///
/// Returns [`FlipError::BoundaryFace`], [`FlipError::ConstraintFace`] or
/// [`FlipError::NonConvex`] when the flip is not possible.
pub fn flip_23(mesh: &mut TetMesh, tet: TetKey, face: usize) -> Result<FlipRecord, FlipError> {
    let t = mesh.tet(tet).ok_or(TetMeshError::MissingTet { key: tet })?;
    let [a, b, c] = t.face(face);
    let key = canonical([a, b, c]);
    if mesh.is_constraint_face(&key) {
        return Err(FlipError::ConstraintFace { face: key });
    }
    let d = t.vertices[face];
    let other = t.neighbors[face].ok_or(FlipError::BoundaryFace { face: key })?;
    let n = mesh.tet(other).ok_or(TetMeshError::MissingTet { key: other })?;
    let e = n
        .vertices
        .iter()
        .copied()
        .find(|v| !key.contains(v))
        .ok_or(FlipError::BoundaryFace { face: key })?;

    let created = [[a, b, d, e], [b, c, d, e], [c, a, d, e]];
    let points = mesh.points();
    if created
        .iter()
        .any(|v| orient3d(&points[v[0]], &points[v[1]], &points[v[2]], &points[v[3]]) <= 0.0)
    {
        return Err(FlipError::NonConvex { face: key });
    }

    let removed = vec![t.vertices, n.vertices];
    let created = mesh.replace(&[tet, other], &created)?;
    tracing::trace!("2-3 flip on face {key:?} created edge ({d}, {e})");
    Ok(FlipRecord { removed, created })
}

/// Removes edge `(a, b)` by re-triangulating the ring of tetrahedra around it.
///
/// Among all triangulations of the ring polygon whose cones to `a` and `b`
/// are positively oriented, the one with the most `objective` hits wins, and
/// then the one with the best worst-element quality.
///
/// # Errors
///
/// Returns [`FlipError::OpenRing`] for a boundary or missing edge,
/// [`FlipError::ConstraintFace`] if a face around the edge is a constraint,
/// and [`FlipError::NoValidTriangulation`] when no valid re-triangulation
/// exists.
pub fn remove_edge(
    mesh: &mut TetMesh,
    a: usize,
    b: usize,
    objective: RingObjective<'_>,
    measure: QualityMeasure,
) -> Result<FlipRecord, FlipError> {
    let edge = canonical([a, b]);
    let ring = mesh.edge_ring(a, b).ok_or(FlipError::OpenRing { edge })?;
    let k = ring.ring.len();
    for &r in &ring.ring {
        let face = canonical([a, b, r]);
        if mesh.is_constraint_face(&face) {
            return Err(FlipError::ConstraintFace { face });
        }
    }
    if k < 3 {
        return Err(FlipError::NoValidTriangulation { edge });
    }

    let triangles = best_ring_triangulation(mesh, a, b, &ring.ring, objective, measure)
        .ok_or(FlipError::NoValidTriangulation { edge })?;

    let mut removed = Vec::with_capacity(k);
    for &key in &ring.tets {
        removed.push(mesh.tet(key).ok_or(TetMeshError::MissingTet { key })?.vertices);
    }
    let created: Vec<[usize; 4]> = triangles
        .iter()
        .flat_map(|&[x, y, z]| [[x, y, z, b], [x, z, y, a]])
        .collect();
    let created = mesh.replace(&ring.tets, &created)?;
    tracing::trace!(
        "Removed edge {edge:?}: {k} tetrahedra replaced by {}",
        created.len()
    );
    Ok(FlipRecord { removed, created })
}

#[derive(Clone, Copy, Debug)]
struct Score {
    hits: usize,
    quality: f64,
}

impl Score {
    const EMPTY: Self = Self {
        hits: 0,
        quality: f64::INFINITY,
    };

    fn combine(self, other: Self) -> Self {
        Self {
            hits: self.hits + other.hits,
            quality: self.quality.min(other.quality),
        }
    }

    fn better_than(self, other: Self) -> bool {
        self.hits > other.hits || (self.hits == other.hits && self.quality > other.quality)
    }
}

/// Dynamic programming over triangulations of the ring polygon.
///
/// `best[i][j]` is the best triangulation of the sub-polygon
/// `ring[i..=j]` closed by chord `(i, j)`.
fn best_ring_triangulation(
    mesh: &TetMesh,
    a: usize,
    b: usize,
    ring: &[usize],
    objective: RingObjective<'_>,
    measure: QualityMeasure,
) -> Option<Vec<[usize; 3]>> {
    let k = ring.len();
    let points = mesh.points();
    let (pa, pb) = (&points[a], &points[b]);

    let mut best: Vec<Vec<Option<Score>>> = vec![vec![None; k]; k];
    let mut choice = vec![vec![usize::MAX; k]; k];
    for i in 0..k - 1 {
        best[i][i + 1] = Some(Score::EMPTY);
    }

    for span in 2..k {
        for i in 0..k - span {
            let j = i + span;
            for m in i + 1..j {
                let (Some(left), Some(right)) = (best[i][m], best[m][j]) else {
                    continue;
                };
                let (x, y, z) = (ring[i], ring[m], ring[j]);
                let (px, py, pz) = (&points[x], &points[y], &points[z]);
                if orient3d(px, py, pz, pb) <= 0.0 || orient3d(px, py, pz, pa) >= 0.0 {
                    continue;
                }
                let quality = measure
                    .evaluate(px, py, pz, pb)
                    .min(measure.evaluate(px, pz, py, pa));
                let score = left.combine(right).combine(Score {
                    hits: objective.hits([x, y, z]),
                    quality,
                });
                if best[i][j].is_none_or(|current| score.better_than(current)) {
                    best[i][j] = Some(score);
                    choice[i][j] = m;
                }
            }
        }
    }

    best[0][k - 1]?;
    let mut triangles = Vec::with_capacity(k - 2);
    let mut stack = vec![(0, k - 1)];
    while let Some((i, j)) = stack.pop() {
        if j <= i + 1 {
            continue;
        }
        let m = choice[i][j];
        if m == usize::MAX {
            return None;
        }
        triangles.push([ring[i], ring[m], ring[j]]);
        stack.push((i, m));
        stack.push((m, j));
    }
    Some(triangles)
}

/// Restores the configuration before a flip.
///
/// # Errors
///
/// Returns [`FlipError::Mesh`] if the created tetrahedra were modified since.
pub fn undo(mesh: &mut TetMesh, record: &FlipRecord) -> Result<TetBuffer, FlipError> {
    Ok(mesh.replace(&record.created, &record.removed)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::algorithms::incremental_insertion::insert_vertex;
    use crate::core::tet_mesh::TetMesh;
    use nalgebra::Point3;

    /// Bipyramid: triangle (0, 1, 2) in z = 0 with apexes 3 (below) and 4 (above).
    fn bipyramid() -> TetMesh {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.2, 0.2, -1.0),
            Point3::new(0.3, 0.3, 1.0),
        ];
        let n = points.len();
        let mut mesh = TetMesh::new(points).unwrap();
        let mut hint = None;
        for v in 0..n {
            hint = insert_vertex(&mut mesh, v, hint, false)
                .unwrap()
                .created
                .first()
                .copied();
        }
        mesh
    }

    #[test]
    fn test_flip_23_and_undo() {
        let mut mesh = bipyramid();
        let before = mesh.number_of_tets();
        let (tet, face) = mesh.find_face([0, 1, 2]).unwrap();
        let record = flip_23(&mut mesh, tet, face).unwrap();
        mesh.validate().unwrap();
        assert_eq!(mesh.number_of_tets(), before + 1);
        assert!(mesh.has_edge(3, 4));
        assert!(!mesh.has_face([0, 1, 2]));

        undo(&mut mesh, &record).unwrap();
        mesh.validate().unwrap();
        assert_eq!(mesh.number_of_tets(), before);
        assert!(mesh.has_face([0, 1, 2]));
    }

    #[test]
    fn test_remove_edge_recovers_face() {
        let mut mesh = bipyramid();
        let (tet, face) = mesh.find_face([0, 1, 2]).unwrap();
        flip_23(&mut mesh, tet, face).unwrap();
        let faces = [canonical([0, 1, 2])];
        let objective = RingObjective {
            edges: &[],
            faces: &faces,
        };
        remove_edge(&mut mesh, 3, 4, objective, QualityMeasure::Gamma).unwrap();
        mesh.validate().unwrap();
        assert!(mesh.has_face([0, 1, 2]));
        assert!(!mesh.has_edge(3, 4));
    }

    #[test]
    fn test_constraint_face_is_never_flipped() {
        let mut mesh = bipyramid();
        mesh.add_constraint_face([2, 1, 0]);
        let (tet, face) = mesh.find_face([0, 1, 2]).unwrap();
        let err = flip_23(&mut mesh, tet, face).unwrap_err();
        assert_eq!(err, FlipError::ConstraintFace { face: [0, 1, 2] });
        mesh.validate().unwrap();
    }

    #[test]
    fn test_boundary_edge_cannot_be_removed() {
        let mut mesh = bipyramid();
        let sup = mesh.super_vertices();
        let err = remove_edge(
            &mut mesh,
            sup.start,
            sup.start + 1,
            RingObjective::default(),
            QualityMeasure::Rho,
        )
        .unwrap_err();
        assert!(matches!(err, FlipError::OpenRing { .. }));
    }
}
