//! Working tetrahedralization with face adjacency.
//!
//! [`TetMesh`] is the mutable structure the Delaunay, recovery and
//! refinement stages operate on. Vertices are dense indices into a point
//! array: input points first, then the four vertices of an enclosing super
//! tetrahedron, then Steiner points. Tetrahedra live in a [`StorageMap`] so
//! that a removed tetrahedron's key reliably reports "absent".
//!
//! # Conventions
//!
//! Every tetrahedron is positively oriented (see
//! [`crate::geometry::predicates::orient3d`]). Face `i` is the face opposite
//! vertex `i`, listed by [`FACE_VERTICES`] so that the opposite vertex lies on
//! its negative side (the face is wound outward), and `neighbors[i]` is the
//! tetrahedron across face `i`.
//!
//! All topological changes go through [`TetMesh::replace`], which swaps a set
//! of tetrahedra for another set filling the same polyhedron and rewires
//! adjacency. Insertion, flips and their undo are all expressed with it.

use nalgebra::Point3;
use slotmap::new_key_type;
use std::ops::Range;
use thiserror::Error;

use crate::core::collections::{
    CAVITY_BUFFER_SIZE, EDGE_RING_BUFFER_SIZE, Entry, FastHashMap, FastHashSet, SmallBuffer,
    StorageMap,
};
use crate::core::facet::canonical;
use crate::core::model::RegionId;
use crate::geometry::predicates::{in_conflict, orient3d};

new_key_type! {
    /// Key type for accessing tetrahedra in the working mesh.
    pub struct TetKey;
}

/// Local vertex indices of face `i`, wound outward.
pub const FACE_VERTICES: [[usize; 3]; 4] = [[1, 2, 3], [0, 3, 2], [0, 1, 3], [0, 2, 1]];

/// Number of super tetrahedron vertices.
pub const SUPER_VERTEX_COUNT: usize = 4;

/// Scale of the super tetrahedron relative to the input bounding box.
const SUPER_SCALE: f64 = 1.0e3;

/// Directions of the super vertices from the bounding box center. They avoid
/// the box diagonals so that no super vertex is collinear or coplanar with
/// the corners of an axis-aligned box.
const SUPER_DIRECTIONS: [[f64; 3]; SUPER_VERTEX_COUNT] = [
    [1.0, 0.9, 1.1],
    [-1.1, 1.0, -0.9],
    [0.9, -1.1, -1.0],
    [-1.0, -0.9, 1.1],
];

/// Buffer of tetrahedron keys sized for a typical cavity.
pub type TetBuffer = SmallBuffer<TetKey, CAVITY_BUFFER_SIZE>;

/// Errors raised by structural operations on a [`TetMesh`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TetMeshError {
    /// No input points were given.
    #[error("Cannot build a tetrahedralization of an empty point set")]
    EmptyPointSet,
    /// An input coordinate is NaN or infinite.
    #[error("Point {index} has a non-finite coordinate")]
    NonFinitePoint {
        /// Index of the offending point.
        index: usize,
    },
    /// A tetrahedron key does not exist.
    #[error("Tetrahedron {key:?} does not exist")]
    MissingTet {
        /// The missing key.
        key: TetKey,
    },
    /// The replacement set does not fill the same polyhedron.
    #[error("Inconsistent replacement: {message}")]
    InconsistentReplacement {
        /// Description of the mismatch.
        message: String,
    },
    /// Adjacency or orientation invariants are violated.
    #[error("Invalid tetrahedralization: {message}")]
    Invalid {
        /// Description of the violation.
        message: String,
    },
}

/// A tetrahedron of the working mesh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tet {
    /// Vertex indices in positive orientation.
    pub vertices: [usize; 4],
    /// Neighbor across face `i` (opposite vertex `i`).
    pub neighbors: [Option<TetKey>; 4],
    /// Region the tetrahedron was assigned to by classification.
    pub region: Option<RegionId>,
    /// Creation order; lower serials were created earlier.
    pub serial: u64,
}

impl Tet {
    /// Vertices of face `i`, wound outward.
    #[inline]
    #[must_use]
    pub const fn face(&self, i: usize) -> [usize; 3] {
        let f = FACE_VERTICES[i];
        [self.vertices[f[0]], self.vertices[f[1]], self.vertices[f[2]]]
    }

    /// Canonical key of face `i`.
    #[inline]
    #[must_use]
    pub fn face_key(&self, i: usize) -> [usize; 3] {
        canonical(self.face(i))
    }

    /// Local index of vertex `v`.
    #[inline]
    #[must_use]
    pub fn index_of(&self, v: usize) -> Option<usize> {
        self.vertices.iter().position(|&x| x == v)
    }

    /// Returns `true` if `v` is a vertex of this tetrahedron.
    #[inline]
    #[must_use]
    pub fn contains(&self, v: usize) -> bool {
        self.vertices.contains(&v)
    }

    /// Index of the face matching `key`, if any.
    #[must_use]
    pub fn face_index(&self, key: &[usize; 3]) -> Option<usize> {
        (0..4).find(|&i| self.face_key(i) == *key)
    }

    /// The six edges as canonical pairs.
    #[must_use]
    pub fn edges(&self) -> [[usize; 2]; 6] {
        let v = self.vertices;
        [
            canonical([v[0], v[1]]),
            canonical([v[0], v[2]]),
            canonical([v[0], v[3]]),
            canonical([v[1], v[2]]),
            canonical([v[1], v[3]]),
            canonical([v[2], v[3]]),
        ]
    }
}

/// Tetrahedra around an edge `(a, b)` in cyclic order.
///
/// Tetrahedron `i` is `(a, b, ring[i], ring[i + 1])` up to an even
/// permutation, and is positively oriented in that order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EdgeRing {
    /// Tetrahedra around the edge.
    pub tets: SmallBuffer<TetKey, EDGE_RING_BUFFER_SIZE>,
    /// Ring vertices, one per tetrahedron.
    pub ring: SmallBuffer<usize, EDGE_RING_BUFFER_SIZE>,
}

/// Result of point location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocateResult {
    /// The point lies in the closed tetrahedron.
    Inside(TetKey),
    /// The point lies outside the mesh, or behind a constraint face when
    /// constraints are respected.
    Outside,
}

/// Working tetrahedralization.
#[derive(Clone, Debug)]
pub struct TetMesh {
    points: Vec<Point3<f64>>,
    input_count: usize,
    tets: StorageMap<TetKey, Tet>,
    vertex_tet: Vec<Option<TetKey>>,
    // Tie-break rank per point for cospherical conflicts, smaller wins.
    ranks: Vec<usize>,
    constraint_faces: FastHashSet<[usize; 3]>,
    next_serial: u64,
}

impl TetMesh {
    /// Creates a mesh holding `points` and a single super tetrahedron that
    /// encloses them. No input point is connected yet.
    ///
    /// # Errors
    ///
    /// Returns [`TetMeshError::EmptyPointSet`] for an empty input and
    /// [`TetMeshError::NonFinitePoint`] for NaN or infinite coordinates.
    pub fn new(points: Vec<Point3<f64>>) -> Result<Self, TetMeshError> {
        if points.is_empty() {
            return Err(TetMeshError::EmptyPointSet);
        }
        if let Some(index) = points
            .iter()
            .position(|p| !p.iter().all(|c| c.is_finite()))
        {
            return Err(TetMeshError::NonFinitePoint { index });
        }

        let (min, max) = points.iter().fold(
            (points[0], points[0]),
            |(lo, hi), p| (lo.inf(p), hi.sup(p)),
        );
        let center = nalgebra::center(&min, &max);
        let diagonal = match (max - min).norm() {
            d if d > 0.0 => d,
            _ => 1.0,
        };
        let s = SUPER_SCALE * diagonal;
        let input_count = points.len();

        let mut all = points;
        all.extend(
            SUPER_DIRECTIONS
                .iter()
                .map(|&[x, y, z]| center + nalgebra::Vector3::new(x * s, y * s, z * s)),
        );

        let mut mesh = Self {
            vertex_tet: vec![None; all.len()],
            ranks: (0..all.len()).collect(),
            points: all,
            input_count,
            tets: StorageMap::with_key(),
            constraint_faces: FastHashSet::default(),
            next_serial: 0,
        };
        let n = input_count;
        let root = mesh.create_tet([n, n + 1, n + 2, n + 3], None);
        for v in n..n + SUPER_VERTEX_COUNT {
            mesh.vertex_tet[v] = Some(root);
        }
        Ok(mesh)
    }

    fn create_tet(&mut self, vertices: [usize; 4], region: Option<RegionId>) -> TetKey {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.tets.insert(Tet {
            vertices,
            neighbors: [None; 4],
            region,
            serial,
        })
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// All points, including super and Steiner points.
    #[inline]
    #[must_use]
    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    /// Coordinates of vertex `v`.
    #[inline]
    #[must_use]
    pub fn point(&self, v: usize) -> &Point3<f64> {
        &self.points[v]
    }

    /// Number of input points.
    #[inline]
    #[must_use]
    pub const fn input_count(&self) -> usize {
        self.input_count
    }

    /// Index range of the super tetrahedron vertices.
    #[inline]
    #[must_use]
    pub const fn super_vertices(&self) -> Range<usize> {
        self.input_count..self.input_count + SUPER_VERTEX_COUNT
    }

    /// Returns `true` for a super tetrahedron vertex.
    #[inline]
    #[must_use]
    pub const fn is_super(&self, v: usize) -> bool {
        v >= self.input_count && v < self.input_count + SUPER_VERTEX_COUNT
    }

    /// Returns `true` for a point added after construction.
    #[inline]
    #[must_use]
    pub const fn is_steiner(&self, v: usize) -> bool {
        v >= self.input_count + SUPER_VERTEX_COUNT
    }

    /// Appends a point and returns its index. The point is not connected.
    pub fn add_point(&mut self, p: Point3<f64>) -> usize {
        self.ranks.push(self.points.len());
        self.points.push(p);
        self.vertex_tet.push(None);
        self.points.len() - 1
    }

    /// Sets the tie-break order of the input points: `order[0]` wins every
    /// cospherical tie it takes part in, then `order[1]`, and so on. Super
    /// and Steiner points rank after all input points. Call before the
    /// first insertion.
    ///
    /// # Errors
    ///
    /// Returns [`TetMeshError::Invalid`] if `order` is not a permutation of
    /// the input indices.
    pub fn set_tie_order(&mut self, order: &[usize]) -> Result<(), TetMeshError> {
        let n = self.input_count;
        let mut seen = vec![false; n];
        for &v in order {
            if v >= n || seen[v] {
                return Err(TetMeshError::Invalid {
                    message: format!("tie order is not a permutation of 0..{n}"),
                });
            }
            seen[v] = true;
        }
        if order.len() != n {
            return Err(TetMeshError::Invalid {
                message: format!("tie order has {} entries for {n} points", order.len()),
            });
        }
        for (rank, &v) in order.iter().enumerate() {
            self.ranks[v] = rank;
        }
        Ok(())
    }

    /// Drops the most recently added point if it is not connected.
    pub(crate) fn pop_unconnected_point(&mut self) {
        if self.vertex_tet.last().is_some_and(Option::is_none)
            && self.points.len() > self.input_count + SUPER_VERTEX_COUNT
        {
            self.points.pop();
            self.vertex_tet.pop();
            self.ranks.pop();
        }
    }

    /// Looks up a tetrahedron.
    #[inline]
    #[must_use]
    pub fn tet(&self, key: TetKey) -> Option<&Tet> {
        self.tets.get(key)
    }

    /// Mutable access to a tetrahedron's region tag.
    pub fn set_region(&mut self, key: TetKey, region: Option<RegionId>) {
        if let Some(tet) = self.tets.get_mut(key) {
            tet.region = region;
        }
    }

    /// Returns `true` if the key refers to a live tetrahedron.
    #[inline]
    #[must_use]
    pub fn contains_tet(&self, key: TetKey) -> bool {
        self.tets.contains_key(key)
    }

    /// Iterates over all tetrahedra.
    pub fn tets(&self) -> impl Iterator<Item = (TetKey, &Tet)> {
        self.tets.iter()
    }

    /// Keys of all tetrahedra ordered by serial (creation order).
    #[must_use]
    pub fn tet_keys_by_serial(&self) -> Vec<TetKey> {
        let mut keys: Vec<(u64, TetKey)> = self.tets.iter().map(|(k, t)| (t.serial, k)).collect();
        keys.sort_unstable_by_key(|(serial, _)| *serial);
        keys.into_iter().map(|(_, k)| k).collect()
    }

    /// Number of tetrahedra.
    #[inline]
    #[must_use]
    pub fn number_of_tets(&self) -> usize {
        self.tets.len()
    }

    /// Coordinates of a tetrahedron's vertices.
    #[inline]
    #[must_use]
    pub fn tet_points(&self, tet: &Tet) -> [&Point3<f64>; 4] {
        tet.vertices.map(|v| &self.points[v])
    }

    /// Exact orientation of `p` against face `i` of `tet`: positive when `p`
    /// is strictly outside across that face.
    #[inline]
    #[must_use]
    pub fn face_orientation(&self, tet: &Tet, i: usize, p: &Point3<f64>) -> f64 {
        let [a, b, c] = tet.face(i);
        orient3d(&self.points[a], &self.points[b], &self.points[c], p)
    }

    /// Returns `true` if point `v` lies inside the circumsphere of `tet`,
    /// with cospherical ties broken by the tie order.
    #[inline]
    #[must_use]
    pub fn conflicts(&self, tet: &Tet, v: usize) -> bool {
        let [a, b, c, d] = tet.vertices;
        let ranks = [a, b, c, d, v].map(|i| self.ranks[i]);
        in_conflict(self.tet_points(tet), &self.points[v], ranks)
    }

    /// Returns `true` if any vertex of `tet` is a super vertex.
    #[must_use]
    pub fn touches_super(&self, tet: &Tet) -> bool {
        tet.vertices.iter().any(|&v| self.is_super(v))
    }

    // =========================================================================
    // CONSTRAINTS
    // =========================================================================

    /// Registers a face that flips, insertion and point location must not
    /// cross or destroy.
    pub fn add_constraint_face(&mut self, face: [usize; 3]) {
        self.constraint_faces.insert(canonical(face));
    }

    /// Returns `true` if the canonical face `key` is a constraint.
    #[inline]
    #[must_use]
    pub fn is_constraint_face(&self, key: &[usize; 3]) -> bool {
        self.constraint_faces.contains(key)
    }

    /// Number of registered constraint faces.
    #[must_use]
    pub fn number_of_constraint_faces(&self) -> usize {
        self.constraint_faces.len()
    }

    // =========================================================================
    // TOPOLOGICAL QUERIES
    // =========================================================================

    fn any_tet_with_vertex(&self, v: usize) -> Option<TetKey> {
        if let Some(key) = self.vertex_tet.get(v).copied().flatten()
            && self.tets.get(key).is_some_and(|t| t.contains(v))
        {
            return Some(key);
        }
        self.tets
            .iter()
            .find(|(_, t)| t.contains(v))
            .map(|(k, _)| k)
    }

    /// Tetrahedra incident to vertex `v`, in breadth-first order from the
    /// vertex hint.
    #[must_use]
    pub fn tets_around_vertex(&self, v: usize) -> Vec<TetKey> {
        let Some(start) = self.any_tet_with_vertex(v) else {
            return Vec::new();
        };
        let mut seen = FastHashSet::default();
        seen.insert(start);
        let mut queue = vec![start];
        let mut head = 0;
        while head < queue.len() {
            let key = queue[head];
            head += 1;
            let Some(tet) = self.tets.get(key) else {
                continue;
            };
            for i in 0..4 {
                if tet.vertices[i] == v {
                    continue;
                }
                if let Some(n) = tet.neighbors[i]
                    && seen.insert(n)
                {
                    queue.push(n);
                }
            }
        }
        queue
    }

    /// Returns `true` if `(a, b)` is an edge of the mesh.
    #[must_use]
    pub fn has_edge(&self, a: usize, b: usize) -> bool {
        self.tets_around_vertex(a)
            .into_iter()
            .any(|k| self.tets.get(k).is_some_and(|t| t.contains(b)))
    }

    /// Finds the tetrahedron and local face index of face `face`.
    #[must_use]
    pub fn find_face(&self, face: [usize; 3]) -> Option<(TetKey, usize)> {
        let key = canonical(face);
        self.tets_around_vertex(face[0]).into_iter().find_map(|k| {
            let tet = self.tets.get(k)?;
            tet.face_index(&key).map(|i| (k, i))
        })
    }

    /// Returns `true` if `face` is a face of the mesh.
    #[must_use]
    pub fn has_face(&self, face: [usize; 3]) -> bool {
        self.find_face(face).is_some()
    }

    /// All edges of the mesh as sorted pairs, in a deterministic order.
    #[must_use]
    pub fn edges(&self) -> Vec<[usize; 2]> {
        let mut seen = FastHashSet::default();
        let mut edges = Vec::new();
        for key in self.tet_keys_by_serial() {
            if let Some(tet) = self.tets.get(key) {
                for edge in tet.edges() {
                    if seen.insert(edge) {
                        edges.push(edge);
                    }
                }
            }
        }
        edges
    }

    /// Tetrahedra around edge `(a, b)` in cyclic order.
    ///
    /// Returns `None` if the edge does not exist or lies on the mesh
    /// boundary (the ring is open).
    #[must_use]
    pub fn edge_ring(&self, a: usize, b: usize) -> Option<EdgeRing> {
        let start = self
            .tets_around_vertex(a)
            .into_iter()
            .find(|&k| self.tets.get(k).is_some_and(|t| t.contains(b)))?;
        let mut ring = EdgeRing::default();
        let mut current = start;
        loop {
            let tet = self.tets.get(current)?;
            let (c, d) = self.ring_pair(tet, a, b)?;
            ring.tets.push(current);
            ring.ring.push(c);
            let next = tet.neighbors[tet.index_of(c)?]?;
            if next == start {
                break;
            }
            if ring.tets.len() > self.tets.len() {
                return None;
            }
            current = next;
            let next_tet = self.tets.get(current)?;
            // The next tetrahedron continues from `d`.
            if self.ring_pair(next_tet, a, b)?.0 != d {
                return None;
            }
        }
        Some(ring)
    }

    /// The two vertices of `tet` other than `a` and `b`, ordered so that
    /// `(a, b, c, d)` is positively oriented.
    fn ring_pair(&self, tet: &Tet, a: usize, b: usize) -> Option<(usize, usize)> {
        let mut others = tet.vertices.iter().copied().filter(|&v| v != a && v != b);
        let c = others.next()?;
        let d = others.next()?;
        if orient3d(&self.points[a], &self.points[b], &self.points[c], &self.points[d]) > 0.0 {
            Some((c, d))
        } else {
            Some((d, c))
        }
    }

    // =========================================================================
    // POINT LOCATION
    // =========================================================================

    /// Locates `p` by walking from `hint`.
    ///
    /// When `respect_constraints` is set the walk never crosses a constraint
    /// face; a point behind one is reported as [`LocateResult::Outside`].
    /// If the walk does not terminate, every tetrahedron is tested (restricted
    /// to the region of the start tetrahedron when constraints are
    /// respected).
    #[must_use]
    pub fn locate(
        &self,
        p: &Point3<f64>,
        hint: Option<TetKey>,
        respect_constraints: bool,
    ) -> LocateResult {
        let Some(start) = hint
            .filter(|k| self.tets.contains_key(*k))
            .or_else(|| self.tets.keys().next())
        else {
            return LocateResult::Outside;
        };

        let max_steps = 4 * self.tets.len() + 16;
        let mut current = start;
        for step in 0..max_steps {
            let Some(tet) = self.tets.get(current) else {
                break;
            };
            let mut crossed = false;
            for offset in 0..4 {
                let i = (offset + step) % 4;
                if self.face_orientation(tet, i, p) <= 0.0 {
                    continue;
                }
                if respect_constraints && self.constraint_faces.contains(&tet.face_key(i)) {
                    return LocateResult::Outside;
                }
                match tet.neighbors[i] {
                    Some(n) => {
                        current = n;
                        crossed = true;
                        break;
                    }
                    None => return LocateResult::Outside,
                }
            }
            if !crossed {
                return LocateResult::Inside(current);
            }
        }

        tracing::trace!("Point walk did not terminate, falling back to exhaustive search");
        let region = self.tets.get(start).and_then(|t| t.region);
        self.tet_keys_by_serial()
            .into_iter()
            .find(|&k| {
                self.tets.get(k).is_some_and(|t| {
                    (!respect_constraints || t.region == region)
                        && (0..4).all(|i| self.face_orientation(t, i, p) <= 0.0)
                })
            })
            .map_or(LocateResult::Outside, LocateResult::Inside)
    }

    // =========================================================================
    // MUTATION
    // =========================================================================

    /// Replaces the tetrahedra `removed` with new tetrahedra `created`.
    ///
    /// The created tetrahedra must be positively oriented and fill exactly the
    /// polyhedron of the removed ones: every boundary face of the removed set
    /// must appear once among the created faces, and every other created face
    /// must appear exactly twice. The check happens before anything is
    /// modified. The new tetrahedra inherit the region of the removed ones
    /// when they all agree.
    ///
    /// # Errors
    ///
    /// Returns [`TetMeshError::MissingTet`] for an unknown key and
    /// [`TetMeshError::InconsistentReplacement`] when the sets do not match.
    pub fn replace(
        &mut self,
        removed: &[TetKey],
        created: &[[usize; 4]],
    ) -> Result<TetBuffer, TetMeshError> {
        let removed_set: FastHashSet<TetKey> = removed.iter().copied().collect();
        let mut region: Option<Option<RegionId>> = None;
        // Boundary face key -> (outside tetrahedron, its local face index).
        let mut boundary: FastHashMap<[usize; 3], Option<(TetKey, usize)>> = FastHashMap::default();
        for &key in removed {
            let tet = self.tets.get(key).ok_or(TetMeshError::MissingTet { key })?;
            region = match region {
                None => Some(tet.region),
                Some(r) if r == tet.region => Some(r),
                Some(_) => Some(None),
            };
            for i in 0..4 {
                match tet.neighbors[i] {
                    Some(n) if removed_set.contains(&n) => {}
                    Some(n) => {
                        let outside = self.tets.get(n).ok_or(TetMeshError::MissingTet { key: n })?;
                        let j = outside
                            .neighbors
                            .iter()
                            .position(|&x| x == Some(key))
                            .ok_or_else(|| TetMeshError::Invalid {
                                message: format!("neighbor {n:?} does not point back to {key:?}"),
                            })?;
                        boundary.insert(tet.face_key(i), Some((n, j)));
                    }
                    None => {
                        boundary.insert(tet.face_key(i), None);
                    }
                }
            }
        }

        let mut counts: FastHashMap<[usize; 3], usize> = FastHashMap::default();
        for vertices in created {
            for f in FACE_VERTICES {
                let key = canonical([vertices[f[0]], vertices[f[1]], vertices[f[2]]]);
                *counts.entry(key).or_insert(0) += 1;
            }
        }
        for key in boundary.keys() {
            if counts.get(key) != Some(&1) {
                return Err(TetMeshError::InconsistentReplacement {
                    message: format!("boundary face {key:?} is not covered exactly once"),
                });
            }
        }
        for (key, count) in &counts {
            if !boundary.contains_key(key) && *count != 2 {
                return Err(TetMeshError::InconsistentReplacement {
                    message: format!("interior face {key:?} appears {count} times"),
                });
            }
        }

        for &key in removed {
            if let Some(tet) = self.tets.remove(key) {
                for v in tet.vertices {
                    if self.vertex_tet[v] == Some(key) {
                        self.vertex_tet[v] = None;
                    }
                }
            }
        }

        let region = region.flatten();
        let mut new_keys = TetBuffer::new();
        let mut pending: FastHashMap<[usize; 3], (TetKey, usize)> = FastHashMap::default();
        for &vertices in created {
            let key = self.create_tet(vertices, region);
            new_keys.push(key);
            for v in vertices {
                self.vertex_tet[v] = Some(key);
            }
            for i in 0..4 {
                let face_key = canonical({
                    let f = FACE_VERTICES[i];
                    [vertices[f[0]], vertices[f[1]], vertices[f[2]]]
                });
                if let Some(outside) = boundary.get(&face_key) {
                    if let Some((n, j)) = *outside {
                        self.link(key, i, n, j);
                    }
                    continue;
                }
                match pending.entry(face_key) {
                    Entry::Occupied(entry) => {
                        let (other, j) = entry.remove();
                        self.link(key, i, other, j);
                    }
                    Entry::Vacant(entry) => {
                        entry.insert((key, i));
                    }
                }
            }
        }
        Ok(new_keys)
    }

    fn link(&mut self, a: TetKey, i: usize, b: TetKey, j: usize) {
        if let Some(t) = self.tets.get_mut(a) {
            t.neighbors[i] = Some(b);
        }
        if let Some(t) = self.tets.get_mut(b) {
            t.neighbors[j] = Some(a);
        }
    }

    /// Deletes tetrahedra, leaving open faces on their neighbors.
    pub fn remove_tets(&mut self, keys: &[TetKey]) {
        for &key in keys {
            let Some(tet) = self.tets.remove(key) else {
                continue;
            };
            for n in tet.neighbors.into_iter().flatten() {
                if let Some(other) = self.tets.get_mut(n) {
                    for slot in &mut other.neighbors {
                        if *slot == Some(key) {
                            *slot = None;
                        }
                    }
                }
            }
            for v in tet.vertices {
                if self.vertex_tet[v] == Some(key) {
                    self.vertex_tet[v] = tet
                        .neighbors
                        .iter()
                        .flatten()
                        .copied()
                        .find(|n| self.tets.get(*n).is_some_and(|t| t.contains(v)));
                }
            }
        }
    }

    // =========================================================================
    // VALIDATION
    // =========================================================================

    /// Checks orientation and adjacency invariants.
    ///
    /// # Errors
    ///
    /// Returns [`TetMeshError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), TetMeshError> {
        for (key, tet) in &self.tets {
            let [a, b, c, d] = self.tet_points(tet);
            if orient3d(a, b, c, d) <= 0.0 {
                return Err(TetMeshError::Invalid {
                    message: format!("tetrahedron {:?} is not positively oriented", tet.vertices),
                });
            }
            for i in 0..4 {
                let Some(n) = tet.neighbors[i] else {
                    continue;
                };
                let other = self.tets.get(n).ok_or_else(|| TetMeshError::Invalid {
                    message: format!("{key:?} references missing neighbor {n:?}"),
                })?;
                let j = other.face_index(&tet.face_key(i)).ok_or_else(|| TetMeshError::Invalid {
                    message: format!("{key:?} and {n:?} do not share face {i}"),
                })?;
                if other.neighbors[j] != Some(key) {
                    return Err(TetMeshError::Invalid {
                        message: format!("neighbor relation {key:?} -> {n:?} is not symmetric"),
                    });
                }
            }
        }
        Ok(())
    }

    /// Counts (tetrahedron, vertex) pairs where the vertex conflicts with the
    /// tetrahedron's circumsphere. Zero for a Delaunay tetrahedralization.
    #[must_use]
    pub fn delaunay_violations(&self) -> usize {
        let used: FastHashSet<usize> = self.tets.values().flat_map(|t| t.vertices).collect();
        self.tets
            .values()
            .map(|tet| {
                used.iter()
                    .filter(|&&v| !tet.contains(v) && self.conflicts(tet, v))
                    .count()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_points() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ]
    }

    #[test]
    fn test_tie_order_must_be_a_permutation() {
        let mut mesh = TetMesh::new(vec![Point3::origin(), Point3::new(1.0, 0.0, 0.0)]).unwrap();
        assert!(mesh.set_tie_order(&[0, 0]).is_err());
        assert!(mesh.set_tie_order(&[1]).is_err());
        assert!(mesh.set_tie_order(&[1, 2]).is_err());
        mesh.set_tie_order(&[1, 0]).unwrap();
    }

    #[test]
    fn test_super_tetrahedron_encloses_input() {
        let mesh = TetMesh::new(unit_points()).unwrap();
        assert_eq!(mesh.number_of_tets(), 1);
        assert_eq!(mesh.super_vertices(), 4..8);
        mesh.validate().unwrap();
        for p in &unit_points() {
            assert!(matches!(mesh.locate(p, None, false), LocateResult::Inside(_)));
        }
    }

    #[test]
    fn test_new_rejects_bad_input() {
        assert_eq!(TetMesh::new(Vec::new()).unwrap_err(), TetMeshError::EmptyPointSet);
        let bad = vec![Point3::new(0.0, f64::NAN, 0.0)];
        assert_eq!(
            TetMesh::new(bad).unwrap_err(),
            TetMeshError::NonFinitePoint { index: 0 }
        );
    }

    #[test]
    fn test_face_vertices_are_wound_outward() {
        let mesh = TetMesh::new(unit_points()).unwrap();
        let (_, tet) = mesh.tets().next().unwrap();
        for i in 0..4 {
            let opposite = mesh.point(tet.vertices[i]);
            assert!(mesh.face_orientation(tet, i, opposite) < 0.0);
        }
    }

    #[test]
    fn test_replace_rejects_mismatched_polyhedron() {
        let mut mesh = TetMesh::new(unit_points()).unwrap();
        let root: Vec<TetKey> = mesh.tets().map(|(k, _)| k).collect();
        let err = mesh.replace(&root, &[[4, 5, 6, 0]]).unwrap_err();
        assert!(matches!(err, TetMeshError::InconsistentReplacement { .. }));
        assert_eq!(mesh.number_of_tets(), 1);
    }

    #[test]
    fn test_replace_splits_super_tetrahedron() {
        let mut mesh = TetMesh::new(unit_points()).unwrap();
        let root: Vec<TetKey> = mesh.tets().map(|(k, _)| k).collect();
        let tet = mesh.tet(root[0]).unwrap().clone();
        // Star the root around input point 0.
        let created: Vec<[usize; 4]> = (0..4)
            .map(|i| {
                let [a, b, c] = tet.face(i);
                [a, c, b, 0]
            })
            .collect();
        let keys = mesh.replace(&root, &created).unwrap();
        assert_eq!(keys.len(), 4);
        mesh.validate().unwrap();
        assert_eq!(mesh.tets_around_vertex(0).len(), 4);
        assert!(mesh.has_edge(0, 4));
        assert!(!mesh.has_edge(0, 1));
        let ring = mesh.edge_ring(0, 4).unwrap();
        assert_eq!(ring.tets.len(), 3);
        assert_eq!(ring.ring.len(), 3);
    }
}
