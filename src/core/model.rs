//! Arena model of the geometry being meshed.
//!
//! The model owns every mesh vertex in a single [`StorageMap`] and refers to
//! faces and regions by dense indices ([`FaceId`], [`RegionId`]). A face owns
//! its surface elements and the vertices classified on it; a region owns its
//! volume elements and the vertices interior to it. Elements reference
//! vertices by [`VertexKey`] and never own them.
//!
//! Every vertex carries an explicit [`Ownership`] tag. Synthetic quad
//! centroids move from a face (or a pair of regions sharing a face) into a
//! region when they become pyramid apexes; those transitions go through
//! [`Model::reclassify_vertex`], which keeps the face and region vertex
//! lists in step with the tag and logs every change.

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use std::fmt;

use crate::core::collections::{FastHashMap, FastHashSet, StorageMap};
use crate::core::mesher::MeshError;

new_key_type! {
    /// Key type for accessing mesh vertices in the model's storage map.
    pub struct VertexKey;
}

/// Dense index of a face (surface patch) in the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FaceId(pub usize);

/// Dense index of a region (volume) in the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionId(pub usize);

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "face#{}", self.0)
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region#{}", self.0)
    }
}

// =============================================================================
// OWNERSHIP
// =============================================================================

/// Geometric entity a mesh vertex is classified on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ownership {
    /// A model point (corner), identified by its tag.
    OnPoint(i32),
    /// A model curve, identified by its tag.
    OnCurve(i32),
    /// The interior of a face.
    OnSurface(FaceId),
    /// The interior of a region.
    OnRegionInterior(RegionId),
    /// A face shared by two regions that are meshed together.
    Shared {
        /// The shared face.
        face: FaceId,
        /// Region that receives the vertex when it becomes interior.
        first: RegionId,
        /// Region that receives a duplicate of the vertex.
        second: RegionId,
    },
}

impl Ownership {
    /// Face this vertex lies on, if any.
    #[must_use]
    pub const fn face(&self) -> Option<FaceId> {
        match *self {
            Self::OnSurface(face) | Self::Shared { face, .. } => Some(face),
            _ => None,
        }
    }

    /// Region this vertex is interior to, if any.
    #[must_use]
    pub const fn interior_region(&self) -> Option<RegionId> {
        match *self {
            Self::OnRegionInterior(region) => Some(region),
            _ => None,
        }
    }
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnPoint(tag) => write!(f, "point {tag}"),
            Self::OnCurve(tag) => write!(f, "curve {tag}"),
            Self::OnSurface(face) => write!(f, "surface {face}"),
            Self::OnRegionInterior(region) => write!(f, "interior of {region}"),
            Self::Shared {
                face,
                first,
                second,
            } => write!(f, "{face} shared by {first} and {second}"),
        }
    }
}

// =============================================================================
// VERTICES AND ELEMENTS
// =============================================================================

/// A mesh vertex.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshVertex {
    /// 1-based vertex number, unique over the lifetime of the model.
    pub num: usize,
    /// Coordinates.
    pub position: Point3<f64>,
    owner: Ownership,
    /// `true` for vertices created by the mesher (quad centroids, Steiner
    /// points, duplicated apexes).
    pub synthetic: bool,
}

impl MeshVertex {
    /// Entity this vertex is classified on.
    #[inline]
    #[must_use]
    pub const fn owner(&self) -> Ownership {
        self.owner
    }
}

/// Triangular surface element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triangle {
    /// Vertices in consistent winding.
    pub vertices: [VertexKey; 3],
}

/// Quadrilateral surface element.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quadrangle {
    /// Corners in consistent winding.
    pub vertices: [VertexKey; 4],
}

/// Tetrahedral volume element with positive orientation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tetrahedron {
    /// Vertices ordered so that the signed volume is positive.
    pub vertices: [VertexKey; 4],
}

/// Pyramid volume element: four base corners followed by the apex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pyramid {
    /// `[b0, b1, b2, b3, apex]`, base wound so that the apex lies on the side
    /// of the right-handed base normal.
    pub vertices: [VertexKey; 5],
}

impl Pyramid {
    /// Base corners.
    #[inline]
    #[must_use]
    pub fn base(&self) -> [VertexKey; 4] {
        [
            self.vertices[0],
            self.vertices[1],
            self.vertices[2],
            self.vertices[3],
        ]
    }

    /// Apex vertex.
    #[inline]
    #[must_use]
    pub const fn apex(&self) -> VertexKey {
        self.vertices[4]
    }
}

// =============================================================================
// FACES AND REGIONS
// =============================================================================

/// Meshing method attached to a region.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeshingMethod {
    /// Unstructured meshing with the configured 3D algorithm.
    #[default]
    Unstructured,
    /// The region is never meshed.
    None,
    /// Structured meshing done elsewhere; skipped once elements exist.
    Transfinite,
}

/// Pipeline state of a region.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum MeshStatus {
    /// Nothing done yet.
    #[default]
    Unmeshed,
    /// Boundary facets collected.
    BoundaryCollected,
    /// Constrained Delaunay tetrahedralization built.
    Tetrahedralized,
    /// Refinement finished.
    Refined,
    /// Pyramids reconstructed.
    PyramidsBuilt,
    /// Pyramid apexes relocated.
    Relocated,
    /// The region mesh is complete.
    Done,
    /// Meshing failed; the region holds no volume elements.
    Failed(MeshError),
}

impl MeshStatus {
    /// Returns `true` once the region mesh is complete.
    #[inline]
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// A surface patch with its surface mesh.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Face {
    /// Model tag.
    pub tag: i32,
    /// Triangles of the surface mesh.
    pub triangles: Vec<Triangle>,
    /// Quadrangles of the surface mesh.
    pub quadrangles: Vec<Quadrangle>,
    /// Vertices classified on the interior of the face.
    pub mesh_vertices: Vec<VertexKey>,
    /// Visibility flag consulted when only visible entities are meshed.
    pub visible: bool,
}

/// A volume with its volume mesh.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Model tag.
    pub tag: i32,
    /// Bounding faces.
    pub faces: Vec<FaceId>,
    /// Tetrahedra of the volume mesh.
    pub tetrahedra: Vec<Tetrahedron>,
    /// Pyramids of the volume mesh.
    pub pyramids: Vec<Pyramid>,
    /// Vertices interior to the region.
    pub mesh_vertices: Vec<VertexKey>,
    /// Pipeline state.
    pub status: MeshStatus,
    /// Meshing method.
    pub meshing_method: MeshingMethod,
    /// Visibility flag consulted when only visible entities are meshed.
    pub visible: bool,
}

impl Region {
    /// Returns `true` if the region holds volume elements.
    #[inline]
    #[must_use]
    pub fn has_elements(&self) -> bool {
        !self.tetrahedra.is_empty() || !self.pyramids.is_empty()
    }
}

// =============================================================================
// MODEL
// =============================================================================

/// The geometric model with its surface and volume meshes.
#[derive(Clone, Debug, Default)]
pub struct Model {
    vertices: StorageMap<VertexKey, MeshVertex>,
    faces: Vec<Face>,
    regions: Vec<Region>,
    next_num: usize,
}

impl Model {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self {
            vertices: StorageMap::with_key(),
            faces: Vec::new(),
            regions: Vec::new(),
            next_num: 1,
        }
    }

    /// Adds a vertex and registers it with the face or region it is
    /// classified on.
    pub fn add_vertex(&mut self, position: Point3<f64>, owner: Ownership) -> VertexKey {
        self.insert_vertex(position, owner, false)
    }

    /// Adds a vertex created by the mesher.
    pub(crate) fn add_synthetic_vertex(
        &mut self,
        position: Point3<f64>,
        owner: Ownership,
    ) -> VertexKey {
        self.insert_vertex(position, owner, true)
    }

    fn insert_vertex(&mut self, position: Point3<f64>, owner: Ownership, synthetic: bool) -> VertexKey {
        let num = self.next_num.max(1);
        self.next_num = num + 1;
        let key = self.vertices.insert(MeshVertex {
            num,
            position,
            owner,
            synthetic,
        });
        self.attach(key, owner);
        key
    }

    fn attach(&mut self, key: VertexKey, owner: Ownership) {
        if let Some(face) = owner.face().and_then(|f| self.faces.get_mut(f.0)) {
            face.mesh_vertices.push(key);
        } else if let Some(region) = owner
            .interior_region()
            .and_then(|r| self.regions.get_mut(r.0))
        {
            region.mesh_vertices.push(key);
        }
    }

    fn detach(&mut self, key: VertexKey, owner: Ownership) {
        if let Some(face) = owner.face().and_then(|f| self.faces.get_mut(f.0)) {
            face.mesh_vertices.retain(|&v| v != key);
        } else if let Some(region) = owner
            .interior_region()
            .and_then(|r| self.regions.get_mut(r.0))
        {
            region.mesh_vertices.retain(|&v| v != key);
        }
    }

    /// Changes the classification of a vertex, moving it between the face and
    /// region vertex lists. Every transition is logged.
    ///
    /// Returns `false` if the vertex does not exist.
    pub(crate) fn reclassify_vertex(&mut self, key: VertexKey, owner: Ownership) -> bool {
        let Some(vertex) = self.vertices.get_mut(key) else {
            return false;
        };
        let previous = vertex.owner;
        if previous == owner {
            return true;
        }
        vertex.owner = owner;
        let num = vertex.num;
        self.detach(key, previous);
        self.attach(key, owner);
        tracing::info!("Vertex {num}: reclassified from {previous} to {owner}");
        true
    }

    /// Removes a vertex from the model and from the lists referencing it.
    pub(crate) fn remove_vertex(&mut self, key: VertexKey) -> Option<MeshVertex> {
        let vertex = self.vertices.remove(key)?;
        self.detach(key, vertex.owner);
        Some(vertex)
    }

    /// Moves a vertex.
    pub(crate) fn set_position(&mut self, key: VertexKey, position: Point3<f64>) {
        if let Some(vertex) = self.vertices.get_mut(key) {
            vertex.position = position;
        }
    }

    /// Looks up a vertex.
    #[inline]
    #[must_use]
    pub fn vertex(&self, key: VertexKey) -> Option<&MeshVertex> {
        self.vertices.get(key)
    }

    /// Coordinates of a vertex.
    #[inline]
    #[must_use]
    pub fn position(&self, key: VertexKey) -> Option<&Point3<f64>> {
        self.vertices.get(key).map(|v| &v.position)
    }

    /// Iterates over all vertices.
    pub fn vertices(&self) -> impl Iterator<Item = (VertexKey, &MeshVertex)> {
        self.vertices.iter()
    }

    /// Number of vertices.
    #[must_use]
    pub fn number_of_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Adds an empty, visible face.
    pub fn add_face(&mut self, tag: i32) -> FaceId {
        self.faces.push(Face {
            tag,
            visible: true,
            ..Face::default()
        });
        FaceId(self.faces.len() - 1)
    }

    /// Adds an unmeshed, visible region bounded by `faces`.
    pub fn add_region(&mut self, tag: i32, faces: Vec<FaceId>) -> RegionId {
        self.regions.push(Region {
            tag,
            faces,
            visible: true,
            ..Region::default()
        });
        RegionId(self.regions.len() - 1)
    }

    /// Adds a triangle to a face.
    pub fn add_triangle(&mut self, face: FaceId, vertices: [VertexKey; 3]) {
        if let Some(face) = self.faces.get_mut(face.0) {
            face.triangles.push(Triangle { vertices });
        }
    }

    /// Adds a quadrangle to a face.
    pub fn add_quadrangle(&mut self, face: FaceId, vertices: [VertexKey; 4]) {
        if let Some(face) = self.faces.get_mut(face.0) {
            face.quadrangles.push(Quadrangle { vertices });
        }
    }

    /// Looks up a face.
    #[inline]
    #[must_use]
    pub fn face(&self, id: FaceId) -> Option<&Face> {
        self.faces.get(id.0)
    }

    /// Mutable access to a face.
    #[inline]
    pub fn face_mut(&mut self, id: FaceId) -> Option<&mut Face> {
        self.faces.get_mut(id.0)
    }

    /// All faces, indexed by [`FaceId`].
    #[must_use]
    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    /// Looks up a region.
    #[inline]
    #[must_use]
    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.regions.get(id.0)
    }

    /// Mutable access to a region.
    #[inline]
    pub fn region_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.regions.get_mut(id.0)
    }

    /// All regions, indexed by [`RegionId`].
    #[must_use]
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Identifiers of all regions in order.
    pub fn region_ids(&self) -> impl Iterator<Item = RegionId> + use<> {
        (0..self.regions.len()).map(RegionId)
    }

    /// Regions bounded by `face`.
    #[must_use]
    pub fn regions_of_face(&self, face: FaceId) -> Vec<RegionId> {
        self.regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.faces.contains(&face))
            .map(|(i, _)| RegionId(i))
            .collect()
    }

    /// Turns the four triangles fanned around `apex` on `face` back into the
    /// quad they were split from.
    pub(crate) fn merge_fan(&mut self, face: FaceId, apex: VertexKey) {
        let Some(face) = self.faces.get_mut(face.0) else {
            return;
        };
        let fan: Vec<(VertexKey, VertexKey)> = face
            .triangles
            .iter()
            .filter_map(|t| {
                let i = t.vertices.iter().position(|&v| v == apex)?;
                Some((t.vertices[(i + 1) % 3], t.vertices[(i + 2) % 3]))
            })
            .collect();
        if fan.len() != 4 {
            return;
        }
        let next: FastHashMap<VertexKey, VertexKey> = fan.iter().copied().collect();
        let start = fan[0].0;
        let mut corners = [start; 4];
        for i in 1..4 {
            match next.get(&corners[i - 1]) {
                Some(&n) => corners[i] = n,
                None => return,
            }
        }
        if next.get(&corners[3]) != Some(&start) {
            return;
        }
        face.triangles.retain(|t| !t.vertices.contains(&apex));
        face.quadrangles.push(Quadrangle { vertices: corners });
    }

    /// Destroys the volume mesh of a region.
    ///
    /// Removes its elements and the vertices interior to it, then deletes
    /// synthetic vertices on its faces that no remaining element references.
    /// The region returns to [`MeshStatus::Unmeshed`].
    pub fn clear_region_mesh(&mut self, id: RegionId) {
        let Some(region) = self.regions.get_mut(id.0) else {
            return;
        };
        region.tetrahedra.clear();
        region.pyramids.clear();
        region.status = MeshStatus::Unmeshed;
        let interior = std::mem::take(&mut region.mesh_vertices);
        let faces = region.faces.clone();
        for key in interior {
            self.vertices.remove(key);
        }

        let referenced: FastHashSet<VertexKey> = self
            .regions
            .iter()
            .flat_map(|r| {
                r.tetrahedra
                    .iter()
                    .flat_map(|t| t.vertices)
                    .chain(r.pyramids.iter().flat_map(|p| p.vertices))
            })
            .collect();
        for face in faces {
            let stale: Vec<VertexKey> = self
                .faces
                .get(face.0)
                .map(|f| {
                    f.mesh_vertices
                        .iter()
                        .copied()
                        .filter(|&v| {
                            !referenced.contains(&v)
                                && self.vertices.get(v).is_some_and(|mv| mv.synthetic)
                        })
                        .collect()
                })
                .unwrap_or_default();
            for key in stale {
                self.merge_fan(face, key);
                self.remove_vertex(key);
            }
        }
        tracing::debug!("Cleared mesh of {id}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_registration_follows_ownership() {
        let mut model = Model::new();
        let face = model.add_face(1);
        let region = model.add_region(1, vec![face]);
        let corner = model.add_vertex(Point3::new(0.0, 0.0, 0.0), Ownership::OnPoint(1));
        let on_face = model.add_vertex(Point3::new(0.5, 0.5, 0.0), Ownership::OnSurface(face));
        let inside = model.add_vertex(
            Point3::new(0.5, 0.5, 0.5),
            Ownership::OnRegionInterior(region),
        );
        assert_eq!(model.face(face).unwrap().mesh_vertices, vec![on_face]);
        assert_eq!(model.region(region).unwrap().mesh_vertices, vec![inside]);
        assert_eq!(model.vertex(corner).unwrap().num, 1);
        assert_eq!(model.vertex(inside).unwrap().num, 3);
    }

    #[test]
    fn test_reclassify_moves_vertex_between_lists() {
        let mut model = Model::new();
        let face = model.add_face(1);
        let region = model.add_region(1, vec![face]);
        let v = model.add_synthetic_vertex(Point3::origin(), Ownership::OnSurface(face));
        assert!(model.reclassify_vertex(v, Ownership::OnRegionInterior(region)));
        assert!(model.face(face).unwrap().mesh_vertices.is_empty());
        assert_eq!(model.region(region).unwrap().mesh_vertices, vec![v]);
        assert_eq!(
            model.vertex(v).unwrap().owner(),
            Ownership::OnRegionInterior(region)
        );
    }

    #[test]
    fn test_shared_ownership_reports_face() {
        let owner = Ownership::Shared {
            face: FaceId(3),
            first: RegionId(0),
            second: RegionId(1),
        };
        assert_eq!(owner.face(), Some(FaceId(3)));
        assert_eq!(owner.interior_region(), None);
        assert!(owner.to_string().contains("shared"));
    }

    #[test]
    fn test_clear_region_mesh_removes_owned_vertices() {
        let mut model = Model::new();
        let face = model.add_face(1);
        let region = model.add_region(1, vec![face]);
        let a = model.add_vertex(Point3::new(0.0, 0.0, 0.0), Ownership::OnPoint(1));
        let b = model.add_vertex(Point3::new(1.0, 0.0, 0.0), Ownership::OnPoint(2));
        let c = model.add_vertex(Point3::new(0.0, 1.0, 0.0), Ownership::OnPoint(3));
        let centroid = model.add_synthetic_vertex(
            Point3::new(0.3, 0.3, 0.0),
            Ownership::OnSurface(face),
        );
        let steiner = model.add_synthetic_vertex(
            Point3::new(0.2, 0.2, 0.2),
            Ownership::OnRegionInterior(region),
        );
        model.region_mut(region).unwrap().tetrahedra.push(Tetrahedron {
            vertices: [a, b, c, steiner],
        });
        model.region_mut(region).unwrap().status = MeshStatus::Done;

        model.clear_region_mesh(region);

        let r = model.region(region).unwrap();
        assert!(!r.has_elements());
        assert_eq!(r.status, MeshStatus::Unmeshed);
        assert!(model.vertex(steiner).is_none());
        assert!(model.vertex(centroid).is_none());
        assert!(model.vertex(a).is_some());
        assert!(model.face(face).unwrap().mesh_vertices.is_empty());
    }
}
