//! Pyramid reconstruction.
//!
//! Every quad split by the boundary collector left a synthetic centroid
//! vertex and four sub-triangles `(c_i, c_{i+1}, apex)` in the volume mesh.
//! When each sub-triangle is a face of exactly one tetrahedron of every
//! adjacent region, the quad is turned into a pyramid `[c0, c1, c2, c3,
//! apex]` per region:
//!
//! - The tetrahedra stay. The pyramid sits between the quad and them, flat
//!   until relocation lifts the apex into the volume. Deleting them instead
//!   would leave a zero-volume pyramid over an empty cavity, so keeping them
//!   is deliberate.
//! - The apex becomes interior to the first region. On a face shared by two
//!   regions, the second region gets a duplicate apex and its tetrahedra are
//!   rewired to it.
//! - The base is wound so the apex side is the region interior.
//!
//! Conversion is best effort. A quad that cannot be converted stays
//! triangulated: its face gets the four sub-triangles instead of the quad.
//! Every conversion is recorded so that it can be dissolved again.

use nalgebra::Point3;
use thiserror::Error;

use crate::core::boundary::SplitRecord;
use crate::core::collections::{FACET_REGION_BUFFER_SIZE, SmallBuffer};
use crate::core::facet::canonical;
use crate::core::model::{FaceId, Model, Ownership, Pyramid, RegionId, Triangle, VertexKey};
use crate::core::tet_mesh::FACE_VERTICES;
use crate::geometry::predicates::orient3d;

/// One region's side of a converted quad.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    /// The region holding the pyramid.
    pub region: RegionId,
    /// The pyramid added to it.
    pub pyramid: Pyramid,
}

impl Placement {
    /// Apex vertex of this side.
    #[must_use]
    pub const fn apex(&self) -> VertexKey {
        self.pyramid.apex()
    }
}

/// A quad turned into pyramids.
#[derive(Clone, Debug, PartialEq)]
pub struct Converted {
    /// The split the conversion undoes.
    pub split: SplitRecord,
    /// Face holding the quad.
    pub face: FaceId,
    /// Ownership of the centroid before conversion.
    pub original_owner: Ownership,
    /// Position of the centroid before conversion.
    pub original_position: Point3<f64>,
    /// One placement per adjacent region; the first uses the centroid
    /// itself, a second one uses its duplicate.
    pub placements: SmallBuffer<Placement, FACET_REGION_BUFFER_SIZE>,
}

/// Why a quad was left triangulated.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Unconverted {
    /// The quad does not come from a face.
    #[error("Quad is not part of a surface mesh")]
    NotOnFace,
    /// A vertex of the quad is missing.
    #[error("Quad vertex {vertex:?} is missing")]
    MissingVertex {
        /// The missing vertex.
        vertex: VertexKey,
    },
    /// A sub-triangle is not a face of exactly one tetrahedron of a region.
    #[error("Sub-triangle {triangle:?} is covered by {count} tetrahedra of {region}")]
    NotCovered {
        /// The region.
        region: RegionId,
        /// The sub-triangle.
        triangle: [VertexKey; 3],
        /// Number of tetrahedra having it as a face.
        count: usize,
    },
}

/// Outcome of pyramid reconstruction over a set of splits.
#[derive(Clone, Debug, Default)]
pub struct PyramidOutcome {
    /// Quads converted, in split order.
    pub converted: Vec<Converted>,
    /// Quads left triangulated with the reason.
    pub unconverted: Vec<(SplitRecord, Unconverted)>,
}

impl PyramidOutcome {
    /// Number of pyramids created.
    #[must_use]
    pub fn pyramid_count(&self) -> usize {
        self.converted.iter().map(|c| c.placements.len()).sum()
    }
}

/// Checks that the sub-triangles of `split` are covered in `region` and
/// returns the base winding facing the region interior.
fn oriented_base(
    model: &Model,
    split: &SplitRecord,
    region: RegionId,
) -> Result<[VertexKey; 4], Unconverted> {
    let tets = model
        .region(region)
        .map(|r| r.tetrahedra.as_slice())
        .unwrap_or_default();
    let position = |v: VertexKey| {
        model
            .position(v)
            .copied()
            .ok_or(Unconverted::MissingVertex { vertex: v })
    };

    let mut inner = None;
    for triangle in split.triangles() {
        let key = canonical(triangle);
        let mut count = 0;
        for tet in tets.iter().filter(|t| t.vertices.contains(&split.apex)) {
            for f in FACE_VERTICES {
                let face = [tet.vertices[f[0]], tet.vertices[f[1]], tet.vertices[f[2]]];
                if canonical(face) == key {
                    count += 1;
                    if inner.is_none() {
                        inner = tet.vertices.iter().copied().find(|v| !triangle.contains(v));
                    }
                }
            }
        }
        if count != 1 {
            return Err(Unconverted::NotCovered {
                region,
                triangle,
                count,
            });
        }
    }

    let [c0, c1, c2, c3] = split.corners;
    let Some(x) = inner else {
        return Err(Unconverted::NotCovered {
            region,
            triangle: split.triangles()[0],
            count: 0,
        });
    };
    let o = orient3d(
        &position(c0)?,
        &position(c1)?,
        &position(split.apex)?,
        &position(x)?,
    );
    Ok(if o > 0.0 {
        [c0, c1, c2, c3]
    } else {
        [c3, c2, c1, c0]
    })
}

/// Converts one split quad into pyramids.
///
/// # Errors
///
/// Returns the reason the quad was left as four triangles. The model is not
/// modified in that case.
pub fn convert_quad(model: &mut Model, split: &SplitRecord) -> Result<Converted, Unconverted> {
    let face = split.face().ok_or(Unconverted::NotOnFace)?;
    let vertex = model.vertex(split.apex).ok_or(Unconverted::MissingVertex {
        vertex: split.apex,
    })?;
    let original_owner = vertex.owner();
    let original_position = vertex.position;

    let mut bases: SmallBuffer<(RegionId, [VertexKey; 4]), FACET_REGION_BUFFER_SIZE> =
        SmallBuffer::new();
    for &region in &split.regions {
        bases.push((region, oriented_base(model, split, region)?));
    }

    let mut placements = SmallBuffer::new();
    for (n, &(region, [b0, b1, b2, b3])) in bases.iter().enumerate() {
        let apex = if n == 0 {
            model.reclassify_vertex(split.apex, Ownership::OnRegionInterior(region));
            split.apex
        } else {
            let duplicate = model
                .add_synthetic_vertex(original_position, Ownership::OnRegionInterior(region));
            rewire(model, region, split.apex, duplicate);
            if let (Some(a), Some(b)) = (model.vertex(split.apex), model.vertex(duplicate)) {
                tracing::info!("Vertex {}: duplicated as vertex {} for {region}", a.num, b.num);
            }
            duplicate
        };
        let pyramid = Pyramid {
            vertices: [b0, b1, b2, b3, apex],
        };
        if let Some(r) = model.region_mut(region) {
            r.pyramids.push(pyramid);
        }
        placements.push(Placement { region, pyramid });
    }

    Ok(Converted {
        split: split.clone(),
        face,
        original_owner,
        original_position,
        placements,
    })
}

/// Replaces `from` with `to` in the tetrahedra of `region`.
fn rewire(model: &mut Model, region: RegionId, from: VertexKey, to: VertexKey) {
    if let Some(r) = model.region_mut(region) {
        for tet in &mut r.tetrahedra {
            for v in &mut tet.vertices {
                if *v == from {
                    *v = to;
                }
            }
        }
    }
}

/// Replaces a face quad with the four triangles it was split into.
fn keep_triangulated(model: &mut Model, split: &SplitRecord) {
    let Some(face) = split.face().and_then(|f| model.face_mut(f)) else {
        return;
    };
    let key = canonical(split.corners);
    let before = face.quadrangles.len();
    face.quadrangles.retain(|q| canonical(q.vertices) != key);
    if face.quadrangles.len() == before {
        return;
    }
    face.triangles
        .extend(split.triangles().map(|vertices| Triangle { vertices }));
}

/// Undoes a conversion: the pyramids are removed, the duplicate apex merged
/// back, the centroid restored to its position and ownership, and the quad
/// left triangulated.
pub fn dissolve(model: &mut Model, converted: &Converted) {
    let apex = converted.split.apex;
    for placement in &converted.placements {
        if let Some(r) = model.region_mut(placement.region) {
            r.pyramids.retain(|p| *p != placement.pyramid);
        }
        if placement.apex() != apex {
            rewire(model, placement.region, placement.apex(), apex);
            model.remove_vertex(placement.apex());
        }
    }
    model.set_position(apex, converted.original_position);
    model.reclassify_vertex(apex, converted.original_owner);
    keep_triangulated(model, &converted.split);
}

/// Converts every split quad that allows it.
pub fn build_pyramids(model: &mut Model, splits: &[SplitRecord]) -> PyramidOutcome {
    let mut outcome = PyramidOutcome::default();
    for split in splits {
        match convert_quad(model, split) {
            Ok(converted) => outcome.converted.push(converted),
            Err(reason) => {
                tracing::debug!("Quad {:?} left triangulated: {reason}", split.corners);
                keep_triangulated(model, split);
                outcome.unconverted.push((split.clone(), reason));
            }
        }
    }
    tracing::debug!(
        "Built {} pyramids, {} quads left triangulated",
        outcome.pyramid_count(),
        outcome.unconverted.len()
    );
    outcome
}
