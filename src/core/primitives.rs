//! Construction of simple boundary representations.
//!
//! [`ShapeBuilder`] adds corner vertices, single-element faces and regions to
//! a [`Model`], merging corners that share coordinates and faces that share
//! corners. Boxes glued along a face therefore share that face, which makes
//! them a two-region model with an interface.

use nalgebra::Point3;

use crate::core::collections::FastHashMap;
use crate::core::facet::canonical;
use crate::core::model::{FaceId, Model, Ownership, RegionId, VertexKey};
use crate::geometry::predicates::orient3d;

/// Incrementally builds faces and regions of a model from coordinates.
///
/// # Examples
///
/// ```
/// use nalgebra::Point3;
/// use volmesh::core::model::Model;
/// use volmesh::core::primitives::ShapeBuilder;
///
/// let mut model = Model::new();
/// let mut shapes = ShapeBuilder::new(&mut model);
/// let left = shapes.hexahedron(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0), true);
/// let right = shapes.hexahedron(Point3::new(1.0, 0.0, 0.0), Point3::new(2.0, 1.0, 1.0), true);
/// assert_ne!(left, right);
/// assert_eq!(model.faces().len(), 11);
/// assert_eq!(model.number_of_vertices(), 12);
/// ```
pub struct ShapeBuilder<'m> {
    model: &'m mut Model,
    corners: FastHashMap<[u64; 3], VertexKey>,
    faces: FastHashMap<Vec<VertexKey>, FaceId>,
    next_tag: i32,
}

impl<'m> ShapeBuilder<'m> {
    /// Creates a builder adding to `model`.
    pub fn new(model: &'m mut Model) -> Self {
        Self {
            model,
            corners: FastHashMap::default(),
            faces: FastHashMap::default(),
            next_tag: 1,
        }
    }

    fn tag(&mut self) -> i32 {
        let tag = self.next_tag;
        self.next_tag += 1;
        tag
    }

    /// Returns the corner vertex at `p`, creating it on first use.
    pub fn corner(&mut self, p: Point3<f64>) -> VertexKey {
        let bits = [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()];
        if let Some(&key) = self.corners.get(&bits) {
            return key;
        }
        let tag = self.tag();
        let key = self.model.add_vertex(p, Ownership::OnPoint(tag));
        self.corners.insert(bits, key);
        key
    }

    fn face_for(&mut self, corners: &[VertexKey]) -> Result<FaceId, FaceId> {
        let mut sorted = corners.to_vec();
        sorted.sort_unstable();
        if let Some(&face) = self.faces.get(&sorted) {
            return Err(face);
        }
        let tag = self.tag();
        let face = self.model.add_face(tag);
        self.faces.insert(sorted, face);
        Ok(face)
    }

    /// Adds a face meshed with a single quadrangle, or returns the existing
    /// face with the same corners.
    pub fn quad_face(&mut self, corners: [Point3<f64>; 4]) -> FaceId {
        let keys = corners.map(|p| self.corner(p));
        match self.face_for(&keys) {
            Ok(face) => {
                self.model.add_quadrangle(face, keys);
                face
            }
            Err(face) => face,
        }
    }

    /// Adds a face meshed with the two triangles `(c0, c1, c2)` and
    /// `(c0, c2, c3)`, or returns the existing face with the same corners.
    pub fn split_quad_face(&mut self, corners: [Point3<f64>; 4]) -> FaceId {
        let [a, b, c, d] = corners.map(|p| self.corner(p));
        match self.face_for(&[a, b, c, d]) {
            Ok(face) => {
                self.model.add_triangle(face, [a, b, c]);
                self.model.add_triangle(face, [a, c, d]);
                face
            }
            Err(face) => face,
        }
    }

    /// Adds a face meshed with a single triangle, or returns the existing
    /// face with the same corners.
    pub fn triangle_face(&mut self, corners: [Point3<f64>; 3]) -> FaceId {
        let keys = corners.map(|p| self.corner(p));
        match self.face_for(&keys) {
            Ok(face) => {
                self.model.add_triangle(face, keys);
                face
            }
            Err(face) => face,
        }
    }

    /// Adds a region bounded by `faces`.
    pub fn region(&mut self, faces: Vec<FaceId>) -> RegionId {
        let tag = self.tag();
        self.model.add_region(tag, faces)
    }

    /// Adds an axis-aligned box. Each side is one quadrangle when `quads` is
    /// set, otherwise two triangles.
    pub fn hexahedron(&mut self, min: Point3<f64>, max: Point3<f64>, quads: bool) -> RegionId {
        let p = |i: usize, j: usize, k: usize| {
            Point3::new(
                if i == 0 { min.x } else { max.x },
                if j == 0 { min.y } else { max.y },
                if k == 0 { min.z } else { max.z },
            )
        };
        // Outward winding for every side.
        let sides = [
            [p(0, 0, 0), p(0, 1, 0), p(1, 1, 0), p(1, 0, 0)],
            [p(0, 0, 1), p(1, 0, 1), p(1, 1, 1), p(0, 1, 1)],
            [p(0, 0, 0), p(1, 0, 0), p(1, 0, 1), p(0, 0, 1)],
            [p(0, 1, 0), p(0, 1, 1), p(1, 1, 1), p(1, 1, 0)],
            [p(0, 0, 0), p(0, 0, 1), p(0, 1, 1), p(0, 1, 0)],
            [p(1, 0, 0), p(1, 1, 0), p(1, 1, 1), p(1, 0, 1)],
        ];
        let faces = sides
            .into_iter()
            .map(|side| {
                if quads {
                    self.quad_face(side)
                } else {
                    self.split_quad_face(side)
                }
            })
            .collect();
        self.region(faces)
    }

    /// Adds a tetrahedron with one triangular face per side, wound outward.
    pub fn tetrahedron(&mut self, corners: [Point3<f64>; 4]) -> RegionId {
        let [a, b, c, d] = corners;
        let (b, c) = if orient3d(&a, &b, &c, &d) < 0.0 {
            (c, b)
        } else {
            (b, c)
        };
        let sides = [[b, c, d], [a, d, c], [a, b, d], [a, c, b]];
        let faces = sides
            .into_iter()
            .map(|side| self.triangle_face(side))
            .collect();
        self.region(faces)
    }
}

/// Sorted corner keys of a face's single element, used by tests to find
/// faces by geometry.
#[must_use]
pub fn face_corner_key(model: &Model, face: FaceId) -> Option<Vec<VertexKey>> {
    let face = model.face(face)?;
    let mut keys: Vec<VertexKey> = face
        .quadrangles
        .iter()
        .flat_map(|q| q.vertices)
        .chain(face.triangles.iter().flat_map(|t| t.vertices))
        .collect();
    keys.sort_unstable();
    keys.dedup();
    Some(keys)
}
