//! Boundary collection.
//!
//! Gathers the triangular facets a region (or a group of regions meshed
//! together) must conform to. Facets are keyed by their sorted vertices:
//!
//! - A facet contributed by two different regions of the group is an
//!   *interface*: it is kept as a constraint but removed from the external
//!   boundary.
//! - A facet contributed twice by the same region cancels out.
//! - Faces of elements that already belong to a region are toggled in:
//!   inserted when absent, erased when present.
//!
//! Surviving quadrilaterals are split into four triangles around a new
//! synthetic centroid vertex. Each split is recorded in a [`SplitRecord`]
//! so that pyramid reconstruction can undo it later.

use nalgebra::Point3;

use crate::core::collections::{FastHashMap, FastHashSet};
use crate::core::facet::{BoundaryFacet, FacetOwner, FacetRegions, canonical};
use crate::core::model::{FaceId, Model, Ownership, RegionId, VertexKey};
use crate::core::tet_mesh::FACE_VERTICES;
use crate::geometry::util::centroid;

/// Record of one quadrilateral replaced by four centroid triangles.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitRecord {
    /// Quad corners in their original winding.
    pub corners: [VertexKey; 4],
    /// The synthetic centroid vertex.
    pub apex: VertexKey,
    /// Entity the quad came from.
    pub owner: FacetOwner,
    /// Regions adjacent to the quad.
    pub regions: FacetRegions,
}

impl SplitRecord {
    /// The four triangles `(c_i, c_{i+1}, apex)` that replaced the quad.
    #[must_use]
    pub fn triangles(&self) -> [[VertexKey; 3]; 4] {
        let c = self.corners;
        [
            [c[0], c[1], self.apex],
            [c[1], c[2], self.apex],
            [c[2], c[3], self.apex],
            [c[3], c[0], self.apex],
        ]
    }

    /// Face the quad belongs to, if it came from a surface mesh.
    #[must_use]
    pub const fn face(&self) -> Option<FaceId> {
        match self.owner {
            FacetOwner::Face(face) => Some(face),
            FacetOwner::Region(_) => None,
        }
    }
}

/// Result of boundary collection.
#[derive(Clone, Debug, Default)]
pub struct BoundaryCollection {
    /// External boundary facets (post quad split).
    pub facets: Vec<BoundaryFacet>,
    /// Facets between two regions of the group (post quad split).
    pub interfaces: Vec<BoundaryFacet>,
    /// Distinct vertices referenced by `facets` and `interfaces`, in order of
    /// first appearance.
    pub vertices: Vec<VertexKey>,
    /// Quads split during collection.
    pub splits: Vec<SplitRecord>,
}

impl BoundaryCollection {
    /// Returns `true` if no external facet survived cancellation.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facets.is_empty()
    }

    /// All facets the tetrahedralization must contain.
    pub fn constraints(&self) -> impl Iterator<Item = &BoundaryFacet> {
        self.facets.iter().chain(self.interfaces.iter())
    }

    /// Number of quad facets in the boundary before splitting.
    #[must_use]
    pub fn quad_count(&self) -> usize {
        self.splits.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum ElementKey {
    Triangle([VertexKey; 3]),
    Quad([VertexKey; 4]),
}

#[derive(Clone, Copy, Debug)]
enum Element {
    Triangle([VertexKey; 3]),
    Quad([VertexKey; 4]),
}

impl Element {
    fn key(&self) -> ElementKey {
        match *self {
            Self::Triangle(v) => ElementKey::Triangle(canonical(v)),
            Self::Quad(v) => ElementKey::Quad(canonical(v)),
        }
    }
}

#[derive(Clone, Debug)]
struct Pending {
    element: Element,
    owner: FacetOwner,
    regions: FacetRegions,
}

/// Insertion-ordered facet map with cancellation.
#[derive(Default)]
struct FacetTable {
    entries: Vec<Option<Pending>>,
    index: FastHashMap<ElementKey, usize>,
}

impl FacetTable {
    fn add_face_element(&mut self, element: Element, face: FaceId, region: RegionId) {
        let key = element.key();
        if let Some(&slot) = self.index.get(&key) {
            let Some(entry) = self.entries[slot].as_mut() else {
                return;
            };
            if entry.regions.contains(&region) {
                self.entries[slot] = None;
                self.index.remove(&key);
            } else {
                entry.regions.push(region);
            }
            return;
        }
        self.push(key, element, FacetOwner::Face(face), region);
    }

    fn toggle_region_element(&mut self, element: Element, region: RegionId) {
        let key = element.key();
        if let Some(slot) = self.index.remove(&key) {
            self.entries[slot] = None;
            return;
        }
        self.push(key, element, FacetOwner::Region(region), region);
    }

    fn push(&mut self, key: ElementKey, element: Element, owner: FacetOwner, region: RegionId) {
        self.index.insert(key, self.entries.len());
        self.entries.push(Some(Pending {
            element,
            owner,
            regions: FacetRegions::from_slice(&[region]),
        }));
    }
}

/// Collects the boundary of a single region.
///
/// See [`collect_group`].
pub fn collect(model: &mut Model, region: RegionId) -> BoundaryCollection {
    collect_group(model, &[region])
}

/// Collects the boundary of a group of regions meshed together.
///
/// Quad facets are split here, which adds synthetic centroid vertices to
/// the model. They can be removed with [`rollback`] if the group is
/// abandoned.
pub fn collect_group(model: &mut Model, regions: &[RegionId]) -> BoundaryCollection {
    let mut table = FacetTable::default();

    for &region_id in regions {
        let Some(region) = model.region(region_id) else {
            continue;
        };
        for &face_id in &region.faces {
            let Some(face) = model.face(face_id) else {
                tracing::warn!("{region_id} references missing {face_id}");
                continue;
            };
            for triangle in &face.triangles {
                table.add_face_element(Element::Triangle(triangle.vertices), face_id, region_id);
            }
            for quad in &face.quadrangles {
                table.add_face_element(Element::Quad(quad.vertices), face_id, region_id);
            }
        }
        for tet in &region.tetrahedra {
            for face in FACE_VERTICES {
                let v = tet.vertices;
                table.toggle_region_element(
                    Element::Triangle([v[face[0]], v[face[1]], v[face[2]]]),
                    region_id,
                );
            }
        }
        for pyramid in &region.pyramids {
            let [b0, b1, b2, b3, apex] = pyramid.vertices;
            table.toggle_region_element(Element::Quad([b3, b2, b1, b0]), region_id);
            for [p, q] in [[b0, b1], [b1, b2], [b2, b3], [b3, b0]] {
                table.toggle_region_element(Element::Triangle([p, q, apex]), region_id);
            }
        }
    }

    let mut collection = BoundaryCollection::default();
    for pending in table.entries.into_iter().flatten() {
        match pending.element {
            Element::Triangle(vertices) => push_facet(
                &mut collection,
                BoundaryFacet {
                    vertices,
                    owner: pending.owner,
                    regions: pending.regions,
                },
            ),
            Element::Quad(corners) => split_quad(model, &mut collection, corners, pending),
        }
    }

    let mut seen = FastHashSet::default();
    let ordered: Vec<VertexKey> = collection
        .facets
        .iter()
        .chain(collection.interfaces.iter())
        .flat_map(|f| f.vertices)
        .filter(|v| seen.insert(*v))
        .collect();
    collection.vertices = ordered;

    tracing::debug!(
        "Collected {} boundary facets, {} interface facets, {} vertices, {} quads split",
        collection.facets.len(),
        collection.interfaces.len(),
        collection.vertices.len(),
        collection.splits.len()
    );
    collection
}

fn push_facet(collection: &mut BoundaryCollection, facet: BoundaryFacet) {
    if facet.is_interface() {
        collection.interfaces.push(facet);
    } else {
        collection.facets.push(facet);
    }
}

fn split_quad(
    model: &mut Model,
    collection: &mut BoundaryCollection,
    corners: [VertexKey; 4],
    pending: Pending,
) {
    let positions: Vec<Point3<f64>> = corners
        .iter()
        .filter_map(|&v| model.position(v).copied())
        .collect();
    if positions.len() != 4 {
        tracing::warn!("Skipping quad facet with missing corner vertices");
        return;
    }
    let refs: Vec<&Point3<f64>> = positions.iter().collect();
    let center = centroid(&refs);

    let owner = match (pending.owner, pending.regions.as_slice()) {
        (FacetOwner::Face(face), [first, second, ..]) => Ownership::Shared {
            face,
            first: *first,
            second: *second,
        },
        (FacetOwner::Face(face), _) => Ownership::OnSurface(face),
        (FacetOwner::Region(region), _) => Ownership::OnRegionInterior(region),
    };
    let apex = model.add_synthetic_vertex(center, owner);

    let record = SplitRecord {
        corners,
        apex,
        owner: pending.owner,
        regions: pending.regions,
    };
    for vertices in record.triangles() {
        push_facet(
            collection,
            BoundaryFacet {
                vertices,
                owner: record.owner,
                regions: record.regions.clone(),
            },
        );
    }
    collection.splits.push(record);
}

/// Removes the synthetic centroid vertices created by a collection.
pub fn rollback(model: &mut Model, collection: &BoundaryCollection) {
    for split in &collection.splits {
        model.remove_vertex(split.apex);
    }
    if !collection.splits.is_empty() {
        tracing::debug!("Rolled back {} quad splits", collection.splits.len());
    }
}
