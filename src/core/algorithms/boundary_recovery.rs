//! Boundary recovery by flips.
//!
//! A Delaunay tetrahedralization of the boundary vertices does not in general
//! contain every boundary facet. Recovery proceeds in two phases:
//!
//! 1. **Edges.** For every facet edge missing from the mesh, the faces crossed
//!    by the open segment and the edges crossing it are collected. Crossed
//!    faces are removed with 2-3 flips, crossing edges with edge removal.
//! 2. **Facets.** Once all edges exist, every facet missing from the mesh is
//!    pierced by a set of edges, which are removed with edge removal whose
//!    ring triangulation is steered toward the facet.
//!
//! A flip is kept only if it strictly reduces the number of obstructions;
//! otherwise it is undone. Besides the obstructions themselves, the edges
//! from a crossing edge's endpoints to its ring are removal candidates, which
//! opens up configurations where no obstruction can be flipped directly.
//! When no flip reduces the count, a bounded number of sideways flips (same
//! count, configuration not seen before) is allowed. Existing facet edges and
//! recovered facets are never destroyed. Each attempt on a missing edge or
//! facet gets at most `max_flips` flips.
//!
//! A target that cannot be recovered is deferred and retried after the
//! others, since their flips change its neighborhood. Recovery fails once a
//! whole pass over the deferred targets makes no progress.
//!
//! No Steiner points are inserted: a boundary that cannot be recovered this
//! way is reported, together with a pair of intersecting input facets when
//! one exists.

use nalgebra::Point3;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use thiserror::Error;

use crate::core::algorithms::flips::{
    FlipError, FlipRecord, RingObjective, flip_23, remove_edge, undo,
};
use crate::core::collections::FastHashSet;
use crate::core::facet::canonical;
use crate::core::tet_mesh::TetMesh;
use crate::geometry::predicates::{
    coplanar_segments_cross, orient3d, point_in_open_segment, point_in_open_triangle,
    segment_crosses_triangle, triangles_intersect,
};
use crate::geometry::quality::QualityMeasure;

/// Errors raised by boundary recovery.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RecoveryError {
    /// A mesh vertex lies in the interior of a boundary edge.
    #[error("Vertex {vertex} lies on boundary edge {edge:?}")]
    VertexOnEdge {
        /// The boundary edge.
        edge: [usize; 2],
        /// The offending vertex.
        vertex: usize,
    },
    /// A mesh vertex lies in the interior of a boundary facet.
    #[error("Vertex {vertex} lies inside boundary facet {facet:?}")]
    VertexOnFacet {
        /// The boundary facet.
        facet: [usize; 3],
        /// The offending vertex.
        vertex: usize,
    },
    /// An edge could not be recovered.
    #[error("Boundary edge {edge:?} could not be recovered after {flips} flips")]
    EdgeNotRecovered {
        /// The missing edge.
        edge: [usize; 2],
        /// Flips spent on it.
        flips: usize,
    },
    /// A facet could not be recovered.
    #[error("Boundary facet {facet:?} could not be recovered after {flips} flips")]
    FacetNotRecovered {
        /// The missing facet.
        facet: [usize; 3],
        /// Flips spent on it.
        flips: usize,
    },
    /// A flip failed in an unexpected way.
    #[error("Flip failed during recovery: {0}")]
    Flip(#[from] FlipError),
}

impl RecoveryError {
    /// Input vertices named by the error, used to search for intersecting
    /// facets.
    #[must_use]
    pub fn vertices(&self) -> Vec<usize> {
        match self {
            Self::VertexOnEdge { edge, vertex } => vec![edge[0], edge[1], *vertex],
            Self::VertexOnFacet { facet, vertex } => vec![facet[0], facet[1], facet[2], *vertex],
            Self::EdgeNotRecovered { edge, .. } => edge.to_vec(),
            Self::FacetNotRecovered { facet, .. } => facet.to_vec(),
            Self::Flip(_) => Vec::new(),
        }
    }
}

/// Counters reported by [`recover_boundary`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Facet edges missing from the Delaunay tetrahedralization.
    pub missing_edges: usize,
    /// Facets missing after edge recovery.
    pub missing_facets: usize,
    /// Flips kept.
    pub flips: usize,
    /// Flips undone because they did not help.
    pub undone: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Move {
    FlipFace([usize; 3]),
    RemoveEdge([usize; 2]),
}

#[derive(Clone, Copy, Debug)]
enum Target {
    Edge([usize; 2]),
    Facet([usize; 3]),
}

struct Recovery<'a> {
    mesh: &'a mut TetMesh,
    facet_edges: FastHashSet<[usize; 2]>,
    max_flips: usize,
    stats: RecoveryStats,
}

/// Recovers every facet of `facets` as a face of `mesh` and registers each
/// as a constraint face.
///
/// # Errors
///
/// Returns a [`RecoveryError`] naming the first edge or facet that could not
/// be recovered.
pub fn recover_boundary(
    mesh: &mut TetMesh,
    facets: &[[usize; 3]],
    max_flips: usize,
) -> Result<RecoveryStats, RecoveryError> {
    let mut facet_edges = FastHashSet::default();
    let mut edges = Vec::new();
    for &[a, b, c] in facets {
        for edge in [canonical([a, b]), canonical([b, c]), canonical([c, a])] {
            if facet_edges.insert(edge) {
                edges.push(edge);
            }
        }
    }

    check_vertices(mesh, facets)?;

    let mut recovery = Recovery {
        mesh,
        facet_edges,
        max_flips,
        stats: RecoveryStats::default(),
    };

    let missing: Vec<Target> = edges
        .into_iter()
        .filter(|&[u, v]| !recovery.mesh.has_edge(u, v))
        .map(Target::Edge)
        .collect();
    recovery.stats.missing_edges = missing.len();
    recovery.recover_all(missing)?;

    let mut missing = Vec::new();
    for &facet in facets {
        if recovery.mesh.has_face(facet) {
            recovery.mesh.add_constraint_face(facet);
        } else {
            missing.push(Target::Facet(canonical(facet)));
        }
    }
    recovery.stats.missing_facets = missing.len();
    recovery.recover_all(missing)?;

    let stats = recovery.stats;
    if stats.missing_edges + stats.missing_facets > 0 {
        tracing::debug!(
            "Recovered {} edges and {} facets with {} flips ({} undone)",
            stats.missing_edges,
            stats.missing_facets,
            stats.flips,
            stats.undone
        );
    }
    Ok(stats)
}

impl Recovery<'_> {
    fn present(&self, target: Target) -> bool {
        match target {
            Target::Edge([u, v]) => self.mesh.has_edge(u, v),
            Target::Facet(f) => self.mesh.has_face(f),
        }
    }

    fn give_up(target: Target, flips: usize) -> RecoveryError {
        match target {
            Target::Edge(edge) => RecoveryError::EdgeNotRecovered { edge, flips },
            Target::Facet(facet) => RecoveryError::FacetNotRecovered { facet, flips },
        }
    }

    fn obstructions(&self, target: Target) -> Vec<Move> {
        match target {
            Target::Edge(edge) => edge_obstructions(&*self.mesh, edge),
            Target::Facet(facet) => facet_obstructions(&*self.mesh, facet),
        }
    }

    /// Obstruction count after a move, zero once the target is present.
    fn count(&self, target: Target) -> usize {
        if self.present(target) {
            return 0;
        }
        self.obstructions(target).len().max(1)
    }

    fn candidates(&self, target: Target, obstructions: &[Move]) -> Vec<Move> {
        let mut moves = Vec::new();
        let push = |m: Move, moves: &mut Vec<Move>| {
            if !moves.contains(&m) {
                moves.push(m);
            }
        };
        for &obstruction in obstructions {
            push(obstruction, &mut moves);
        }
        for &obstruction in obstructions {
            match obstruction {
                Move::FlipFace([a, b, c]) => {
                    for edge in [canonical([a, b]), canonical([b, c]), canonical([a, c])] {
                        push(Move::RemoveEdge(edge), &mut moves);
                    }
                }
                Move::RemoveEdge([x, y]) => {
                    if let Some(ring) = self.mesh.edge_ring(x, y) {
                        for &r in &ring.ring {
                            push(Move::FlipFace(canonical([x, y, r])), &mut moves);
                        }
                    }
                }
            }
        }
        for &obstruction in obstructions {
            if let Move::RemoveEdge([x, y]) = obstruction
                && let Some(ring) = self.mesh.edge_ring(x, y)
            {
                for &r in &ring.ring {
                    push(Move::RemoveEdge(canonical([x, r])), &mut moves);
                    push(Move::RemoveEdge(canonical([y, r])), &mut moves);
                }
            }
        }
        if let Target::Facet(facet) = target {
            let [a, b, c] = facet;
            // Faces around the facet's edges block it when they fold over it.
            for edge in [[a, b], [b, c], [a, c]] {
                if let Some(ring) = self.mesh.edge_ring(edge[0], edge[1]) {
                    for &r in &ring.ring {
                        push(Move::FlipFace(canonical([edge[0], edge[1], r])), &mut moves);
                    }
                }
            }
        }
        moves
    }

    fn apply(&mut self, target: Target, m: Move) -> Option<FlipRecord> {
        let (edges, faces): (Vec<[usize; 2]>, Vec<[usize; 3]>) = match target {
            Target::Edge(edge) => (vec![edge], Vec::new()),
            Target::Facet(facet) => (Vec::new(), vec![facet]),
        };
        let objective = RingObjective {
            edges: &edges,
            faces: &faces,
        };
        let result = match m {
            Move::FlipFace(face) => {
                let (tet, i) = self.mesh.find_face(face)?;
                flip_23(self.mesh, tet, i)
            }
            Move::RemoveEdge([x, y]) => {
                if self.facet_edges.contains(&[x, y]) {
                    return None;
                }
                remove_edge(self.mesh, x, y, objective, QualityMeasure::Gamma)
            }
        };
        match result {
            Ok(record) => Some(record),
            Err(err) => {
                tracing::trace!("Recovery move {m:?} rejected: {err}");
                None
            }
        }
    }

    fn signature(&self) -> u64 {
        let mut tets: Vec<[usize; 4]> = self.mesh.tets().map(|(_, t)| canonical(t.vertices)).collect();
        tets.sort_unstable();
        let mut hasher = FxHasher::default();
        tets.hash(&mut hasher);
        hasher.finish()
    }

    /// Marks a recovered facet as a constraint so later flips keep it.
    fn settle(&mut self, target: Target) {
        if let Target::Facet(facet) = target {
            self.mesh.add_constraint_face(facet);
        }
    }

    /// Recovers every target, deferring failures to later passes.
    fn recover_all(&mut self, mut pending: Vec<Target>) -> Result<(), RecoveryError> {
        while !pending.is_empty() {
            let attempted = pending.len();
            let mut deferred = Vec::new();
            let mut first_failure = None;
            for target in pending {
                if self.present(target) {
                    self.settle(target);
                    continue;
                }
                match self.recover(target) {
                    Ok(()) => self.settle(target),
                    Err(
                        err @ (RecoveryError::EdgeNotRecovered { .. }
                        | RecoveryError::FacetNotRecovered { .. }),
                    ) => {
                        tracing::trace!("Deferring {target:?}: {err}");
                        first_failure.get_or_insert(err);
                        deferred.push(target);
                    }
                    Err(err) => return Err(err),
                }
            }
            if deferred.len() == attempted
                && let Some(err) = first_failure
            {
                return Err(err);
            }
            pending = deferred;
        }
        Ok(())
    }

    fn recover(&mut self, target: Target) -> Result<(), RecoveryError> {
        let mut flips = 0;
        let mut sideways_left = self.max_flips / 4;
        let mut visited: FastHashSet<u64> = FastHashSet::default();
        visited.insert(self.signature());

        while !self.present(target) {
            if flips >= self.max_flips {
                return Err(Self::give_up(target, flips));
            }
            let obstructions = self.obstructions(target);
            if obstructions.is_empty() {
                return Err(Self::give_up(target, flips));
            }
            let count = obstructions.len();
            let candidates = self.candidates(target, &obstructions);

            let mut progressed = false;
            for &m in &candidates {
                let Some(record) = self.apply(target, m) else {
                    continue;
                };
                if self.count(target) < count {
                    progressed = true;
                    flips += 1;
                    self.stats.flips += 1;
                    visited.insert(self.signature());
                    break;
                }
                undo(self.mesh, &record)?;
                self.stats.undone += 1;
            }

            if !progressed && sideways_left > 0 {
                for &m in &candidates {
                    let Some(record) = self.apply(target, m) else {
                        continue;
                    };
                    if self.count(target) <= count && visited.insert(self.signature()) {
                        progressed = true;
                        sideways_left -= 1;
                        flips += 1;
                        self.stats.flips += 1;
                        break;
                    }
                    undo(self.mesh, &record)?;
                    self.stats.undone += 1;
                }
            }

            if !progressed {
                return Err(Self::give_up(target, flips));
            }
        }
        Ok(())
    }
}

/// Rejects boundaries with a mesh vertex inside an edge or facet; no flip
/// sequence can recover those.
fn check_vertices(mesh: &TetMesh, facets: &[[usize; 3]]) -> Result<(), RecoveryError> {
    let vertices = || (0..mesh.points().len()).filter(|&w| !mesh.is_super(w));
    for &[a, b, c] in facets {
        let (pa, pb, pc) = (mesh.point(a), mesh.point(b), mesh.point(c));
        for edge in [canonical([a, b]), canonical([b, c]), canonical([a, c])] {
            let (p, q) = (mesh.point(edge[0]), mesh.point(edge[1]));
            if let Some(vertex) = vertices().find(|&w| point_in_open_segment(mesh.point(w), p, q)) {
                return Err(RecoveryError::VertexOnEdge { edge, vertex });
            }
        }
        if let Some(vertex) = vertices().find(|&w| point_in_open_triangle(mesh.point(w), pa, pb, pc))
        {
            return Err(RecoveryError::VertexOnFacet {
                facet: canonical([a, b, c]),
                vertex,
            });
        }
    }
    Ok(())
}

/// Faces crossed by, and edges crossing, the open segment `edge`.
fn edge_obstructions(mesh: &TetMesh, edge: [usize; 2]) -> Vec<Move> {
    let [u, v] = edge;
    let (pu, pv) = (mesh.point(u), mesh.point(v));
    let mut faces = FastHashSet::default();
    let mut edges = FastHashSet::default();
    let mut moves = Vec::new();

    for key in mesh.tet_keys_by_serial() {
        let Some(tet) = mesh.tet(key) else {
            continue;
        };
        for i in 0..4 {
            let face = tet.face_key(i);
            if face.contains(&u) || face.contains(&v) || !faces.insert(face) {
                continue;
            }
            let [a, b, c] = face;
            if segment_crosses_triangle(pu, pv, mesh.point(a), mesh.point(b), mesh.point(c)) {
                moves.push(Move::FlipFace(face));
            }
        }
        for [x, y] in tet.edges() {
            if x == u || x == v || y == u || y == v || !edges.insert([x, y]) {
                continue;
            }
            let (px, py) = (mesh.point(x), mesh.point(y));
            if orient3d(pu, pv, px, py) == 0.0 && coplanar_segments_cross(pu, pv, px, py) {
                moves.push(Move::RemoveEdge([x, y]));
            }
        }
    }
    moves
}

/// Edges piercing the open triangle `facet`.
fn facet_obstructions(mesh: &TetMesh, facet: [usize; 3]) -> Vec<Move> {
    let [a, b, c] = facet;
    let (pa, pb, pc) = (mesh.point(a), mesh.point(b), mesh.point(c));
    let mut edges = FastHashSet::default();
    let mut moves = Vec::new();

    for key in mesh.tet_keys_by_serial() {
        let Some(tet) = mesh.tet(key) else {
            continue;
        };
        for [x, y] in tet.edges() {
            if facet.contains(&x) || facet.contains(&y) || !edges.insert([x, y]) {
                continue;
            }
            if segment_crosses_triangle(mesh.point(x), mesh.point(y), pa, pb, pc) {
                moves.push(Move::RemoveEdge([x, y]));
            }
        }
    }
    moves
}

/// Tie order for [`TetMesh::set_tie_order`]: points on more facet edges come
/// first, then by index.
///
/// Cospherical boundary vertices then split each planar quadrilateral along a
/// diagonal through its best-connected corner, which matches how a
/// triangulated planar side usually fans out.
#[must_use]
pub fn boundary_tie_order(point_count: usize, facets: &[[usize; 3]]) -> Vec<usize> {
    let mut edges = FastHashSet::default();
    for &[a, b, c] in facets {
        for edge in [canonical([a, b]), canonical([b, c]), canonical([a, c])] {
            edges.insert(edge);
        }
    }
    let mut degree = vec![0_usize; point_count];
    for [u, v] in edges {
        degree[u] += 1;
        degree[v] += 1;
    }
    let mut order: Vec<usize> = (0..point_count).collect();
    order.sort_by_key(|&v| (std::cmp::Reverse(degree[v]), v));
    order
}

/// Finds a pair of input facets that intersect transversally.
///
/// Facets touching any vertex of `focus` are tried first so that the pair
/// reported relates to the recovery failure.
#[must_use]
pub fn find_intersecting_facets(
    points: &[Point3<f64>],
    facets: &[[usize; 3]],
    focus: &[usize],
) -> Option<(usize, usize)> {
    let tri = |f: &[usize; 3]| [&points[f[0]], &points[f[1]], &points[f[2]]];
    let mut order: Vec<usize> = (0..facets.len()).collect();
    order.sort_by_key(|&i| !facets[i].iter().any(|v| focus.contains(v)));

    for (n, &i) in order.iter().enumerate() {
        for &j in &order[n + 1..] {
            if triangles_intersect(tri(&facets[i]), tri(&facets[j])) {
                return Some((i.min(j), i.max(j)));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::algorithms::incremental_insertion::insert_vertex;

    fn delaunay(points: Vec<Point3<f64>>) -> TetMesh {
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

    fn boundary_delaunay(points: Vec<Point3<f64>>, facets: &[[usize; 3]]) -> TetMesh {
        let n = points.len();
        let mut mesh = TetMesh::new(points).unwrap();
        mesh.set_tie_order(&boundary_tie_order(n, facets)).unwrap();
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
    fn test_non_delaunay_facet_is_recovered() {
        // Every sphere through the flat triangle (0, 1, 2) contains point 3 or
        // point 4, so the Delaunay mesh has edge (3, 4) piercing it instead.
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(4.0, 0.0, 0.0),
            Point3::new(2.0, 0.3, 0.0),
            Point3::new(2.0, 0.1, 0.2),
            Point3::new(2.0, 0.1, -0.2),
        ];
        let mut mesh = delaunay(points);
        let facets = [[0, 1, 2]];
        let stats = recover_boundary(&mut mesh, &facets, 64).unwrap();
        mesh.validate().unwrap();
        assert!(mesh.has_face([0, 1, 2]));
        assert_eq!(stats.missing_edges, 0);
        assert_eq!(stats.missing_facets, 1);
        assert_eq!(stats.flips, 1);
        assert!(mesh.is_constraint_face(&[0, 1, 2]));
    }

    #[test]
    fn test_present_facets_need_no_flips() {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        let mut mesh = delaunay(points);
        let facets = [[1, 2, 3], [0, 3, 2], [0, 1, 3], [0, 2, 1]];
        let stats = recover_boundary(&mut mesh, &facets, 64).unwrap();
        assert_eq!(stats, RecoveryStats::default());
        assert_eq!(mesh.number_of_constraint_faces(), 4);
    }

    #[test]
    fn test_vertex_inside_facet_is_reported() {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.25, 0.25, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        let mut mesh = delaunay(points);
        let err = recover_boundary(&mut mesh, &[[0, 1, 2]], 64).unwrap_err();
        assert_eq!(
            err,
            RecoveryError::VertexOnFacet {
                facet: [0, 1, 2],
                vertex: 3
            }
        );
    }

    /// Box corners with every side split into two triangles.
    fn triangulated_box(shear: [f64; 2]) -> (Vec<Point3<f64>>, Vec<[usize; 3]>) {
        let corners = [
            [0.0, 0.0, 0.0],
            [0.0, 1.2, 0.0],
            [1.0, 1.2, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 0.0, 0.9],
            [1.0, 0.0, 0.9],
            [1.0, 1.2, 0.9],
            [0.0, 1.2, 0.9],
        ];
        let points = corners
            .iter()
            .map(|&[x, y, z]| Point3::new(x + shear[0] * z, y + shear[1] * z, z))
            .collect();
        let sides = [
            [0, 1, 2, 3],
            [4, 5, 6, 7],
            [0, 3, 5, 4],
            [1, 7, 6, 2],
            [0, 4, 7, 1],
            [3, 2, 6, 5],
        ];
        let facets = sides
            .iter()
            .flat_map(|&[a, b, c, d]| [[a, b, c], [a, c, d]])
            .collect();
        (points, facets)
    }

    fn assert_recovered(mesh: &TetMesh, facets: &[[usize; 3]]) {
        mesh.validate().unwrap();
        for facet in facets {
            assert!(mesh.has_face(*facet), "facet {facet:?} is missing");
            assert!(mesh.is_constraint_face(&canonical(*facet)));
        }
    }

    #[test]
    fn test_boundary_tie_order_prefers_connected_vertices() {
        // Vertex 2 is on four facet edges, 0 and 3 on three, 1 and 4 on two.
        let order = boundary_tie_order(6, &[[0, 1, 2], [0, 2, 3], [2, 3, 4]]);
        assert_eq!(order, vec![2, 0, 3, 1, 4, 5]);
    }

    #[test]
    fn test_triangulated_box_sides_are_present() {
        let (points, facets) = triangulated_box([0.0, 0.0]);
        let mut mesh = boundary_delaunay(points, &facets);
        let stats = recover_boundary(&mut mesh, &facets, 256).unwrap();
        assert_recovered(&mesh, &facets);
        assert_eq!(stats.missing_edges, 0);
        assert_eq!(stats.missing_facets, 0);
    }

    #[test]
    fn test_sheared_box_diagonals_are_recovered() {
        for shear in [[0.3, 0.1], [-0.4, 0.25], [0.2, -0.3], [0.5, 0.5]] {
            let (points, facets) = triangulated_box(shear);
            let mut mesh = boundary_delaunay(points, &facets);
            let stats = recover_boundary(&mut mesh, &facets, 256).unwrap();
            assert_recovered(&mesh, &facets);
            assert!(stats.missing_edges > 0, "shear {shear:?}");
        }
    }

    #[test]
    fn test_find_intersecting_facets() {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.2, 0.2, -1.0),
            Point3::new(0.2, 0.2, 1.0),
            Point3::new(0.3, 0.6, 1.0),
            Point3::new(5.0, 5.0, 5.0),
        ];
        let facets = [[0, 1, 2], [0, 1, 6], [3, 4, 5]];
        assert_eq!(find_intersecting_facets(&points, &facets, &[]), Some((0, 2)));
        assert_eq!(find_intersecting_facets(&points, &facets[..2], &[]), None);
    }
}
