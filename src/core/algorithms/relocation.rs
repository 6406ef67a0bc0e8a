//! Pyramid apex relocation.
//!
//! A fresh pyramid apex still lies on its quad, so the pyramid is flat. Each
//! apex is moved once toward the mean of the centroids of the elements
//! touching it (every element weighted equally). The full step is tried
//! first, then halved steps; a position is accepted only when every
//! touching tetrahedron and pyramid keeps a strictly positive volume.
//!
//! An apex with no acceptable position is pinned and its quad conversion is
//! dissolved on every side, so no flat pyramid survives. Connectivity never
//! changes.

use nalgebra::Point3;
use thiserror::Error;

use crate::core::algorithms::pyramids::{Converted, dissolve};
use crate::core::model::{Model, Ownership, RegionId, VertexKey};
use crate::geometry::predicates::orient3d;
use crate::geometry::util::{centroid, pyramid_volume};

/// A successful apex move.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Relocated {
    /// The apex.
    pub apex: VertexKey,
    /// Position before the move.
    pub from: Point3<f64>,
    /// Position after the move.
    pub to: Point3<f64>,
    /// Fraction of the full step taken.
    pub damping: f64,
}

/// Why an apex was not moved.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Pinned {
    /// The vertex is not interior to the region.
    #[error("Vertex {apex:?} is not interior to {region}")]
    NotInterior {
        /// The vertex.
        apex: VertexKey,
        /// The region.
        region: RegionId,
    },
    /// The vertex or one of its neighbors is missing.
    #[error("Vertex {apex:?} or a neighbor is missing")]
    MissingVertex {
        /// The vertex.
        apex: VertexKey,
    },
    /// Every tried position inverts or flattens an element.
    #[error("No position of vertex {apex:?} keeps all {elements} elements valid")]
    NoValidPosition {
        /// The vertex.
        apex: VertexKey,
        /// Number of touching elements.
        elements: usize,
    },
}

/// Outcome of relocating a set of conversions.
#[derive(Clone, Debug, Default)]
pub struct RelocationOutcome {
    /// Apexes moved.
    pub relocated: Vec<Relocated>,
    /// Apexes pinned, each of which dissolved its conversion.
    pub pinned: Vec<Pinned>,
    /// Conversions that survived relocation.
    pub kept: Vec<Converted>,
}

struct Star {
    tets: Vec<[VertexKey; 4]>,
    pyramids: Vec<([VertexKey; 4], VertexKey)>,
}

fn star(model: &Model, region: RegionId, apex: VertexKey) -> Star {
    let Some(r) = model.region(region) else {
        return Star {
            tets: Vec::new(),
            pyramids: Vec::new(),
        };
    };
    Star {
        tets: r
            .tetrahedra
            .iter()
            .filter(|t| t.vertices.contains(&apex))
            .map(|t| t.vertices)
            .collect(),
        pyramids: r
            .pyramids
            .iter()
            .filter(|p| p.vertices.contains(&apex))
            .map(|p| (p.base(), p.apex()))
            .collect(),
    }
}

impl Star {
    fn len(&self) -> usize {
        self.tets.len() + self.pyramids.len()
    }

    /// Mean of the element centroids, with `apex` at its current position.
    fn target(&self, model: &Model) -> Option<Point3<f64>> {
        let mut centroids = Vec::with_capacity(self.len());
        for tet in &self.tets {
            let points = tet
                .iter()
                .map(|&v| model.position(v))
                .collect::<Option<Vec<_>>>()?;
            centroids.push(centroid(&points));
        }
        for (base, top) in &self.pyramids {
            let points = base
                .iter()
                .chain(std::iter::once(top))
                .map(|&v| model.position(v))
                .collect::<Option<Vec<_>>>()?;
            centroids.push(centroid(&points));
        }
        let refs: Vec<&Point3<f64>> = centroids.iter().collect();
        (!refs.is_empty()).then(|| centroid(&refs))
    }

    /// Returns `true` if every element has positive volume with `apex` at `p`.
    fn valid_with(&self, model: &Model, apex: VertexKey, p: &Point3<f64>) -> Option<bool> {
        let at = |v: VertexKey| {
            if v == apex {
                Some(*p)
            } else {
                model.position(v).copied()
            }
        };
        for tet in &self.tets {
            let [a, b, c, d] = [at(tet[0])?, at(tet[1])?, at(tet[2])?, at(tet[3])?];
            if orient3d(&a, &b, &c, &d) <= 0.0 {
                return Some(false);
            }
        }
        for (base, top) in &self.pyramids {
            let corners = [at(base[0])?, at(base[1])?, at(base[2])?, at(base[3])?];
            let base = [&corners[0], &corners[1], &corners[2], &corners[3]];
            if pyramid_volume(base, &at(*top)?) <= 0.0 {
                return Some(false);
            }
        }
        Some(true)
    }
}

/// Moves one interior vertex of `region` toward the mean centroid of its
/// elements.
///
/// # Errors
///
/// Returns the reason the vertex stayed where it was.
pub fn relocate_apex(
    model: &mut Model,
    region: RegionId,
    apex: VertexKey,
    damping_steps: usize,
) -> Result<Relocated, Pinned> {
    let vertex = model.vertex(apex).ok_or(Pinned::MissingVertex { apex })?;
    if vertex.owner() != Ownership::OnRegionInterior(region) {
        return Err(Pinned::NotInterior { apex, region });
    }
    let from = vertex.position;
    let star = star(model, region, apex);
    let target = star.target(model).ok_or(Pinned::MissingVertex { apex })?;

    let mut damping = 1.0;
    for _ in 0..damping_steps {
        let to = from + (target - from) * damping;
        if star
            .valid_with(model, apex, &to)
            .ok_or(Pinned::MissingVertex { apex })?
        {
            model.set_position(apex, to);
            return Ok(Relocated {
                apex,
                from,
                to,
                damping,
            });
        }
        damping *= 0.5;
    }
    Err(Pinned::NoValidPosition {
        apex,
        elements: star.len(),
    })
}

/// Relocates the apexes of `conversions` in order of vertex number. A
/// conversion with any pinned apex is rolled back and dissolved before the
/// next one is processed.
pub fn relocate_apexes(
    model: &mut Model,
    mut conversions: Vec<Converted>,
    damping_steps: usize,
) -> RelocationOutcome {
    conversions.sort_by_key(|c| model.vertex(c.split.apex).map_or(usize::MAX, |v| v.num));
    let mut outcome = RelocationOutcome::default();

    for converted in conversions {
        let mut moved = Vec::new();
        let mut pinned = None;
        for placement in &converted.placements {
            match relocate_apex(model, placement.region, placement.apex(), damping_steps) {
                Ok(relocated) => moved.push(relocated),
                Err(reason) => {
                    pinned = Some(reason);
                    break;
                }
            }
        }
        match pinned {
            None => {
                outcome.relocated.extend(moved);
                outcome.kept.push(converted);
            }
            Some(reason) => {
                tracing::warn!(
                    "Dissolving pyramid over quad {:?}: {reason}",
                    converted.split.corners
                );
                for relocated in moved.iter().rev() {
                    model.set_position(relocated.apex, relocated.from);
                }
                dissolve(model, &converted);
                outcome.pinned.push(reason);
            }
        }
    }
    tracing::debug!(
        "Relocated {} apexes, pinned {}",
        outcome.relocated.len(),
        outcome.pinned.len()
    );
    outcome
}
