//! Steiner point refinement.
//!
//! Tetrahedra whose circumradius exceeds their target size, or whose quality
//! falls below the threshold, are refined worst first by inserting their
//! circumcenter with constrained Bowyer-Watson insertion. A circumcenter that
//! lies outside its region (behind a constraint face) or would produce a
//! degenerate cavity is rejected and the tetrahedron is settled: it stays in
//! the mesh and is never queued again.
//!
//! Priority is `R / target + max(0, threshold - quality)`. Ties go to the
//! oldest tetrahedron, which keeps runs reproducible.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use thiserror::Error;

use crate::core::algorithms::incremental_insertion::{InsertionError, Inserted, insert_vertex};
use crate::core::collections::FastHashSet;
use crate::core::config::MeshOptions;
use crate::core::size_field::VertexSizes;
use crate::core::tet_mesh::{TetKey, TetMesh, TetMeshError};
use crate::geometry::util::{CircumcenterError, circumcenter, circumradius};

/// Why a Steiner point was not inserted.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Rejected {
    /// The tetrahedron has no circumcenter.
    #[error("No circumcenter: {0}")]
    NoCircumcenter(#[from] CircumcenterError),
    /// The point lies outside the region.
    #[error("Point lies outside the region")]
    Outside,
    /// The point coincides with an existing vertex.
    #[error("Point coincides with vertex {existing}")]
    Duplicate {
        /// The existing vertex.
        existing: usize,
    },
    /// The cavity would contain a flat or inverted tetrahedron.
    #[error("Degenerate cavity: {message}")]
    DegenerateCavity {
        /// Description of the problem.
        message: String,
    },
}

/// Errors that abort refinement.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RefinementError {
    /// The working mesh became inconsistent.
    #[error("Refinement corrupted the mesh: {0}")]
    Mesh(#[from] TetMeshError),
}

/// Summary of a refinement run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementReport {
    /// Steiner points inserted.
    pub inserted: usize,
    /// Insertions rejected.
    pub rejected: usize,
    /// Settled tetrahedra still in the mesh at the end.
    pub settled: usize,
    /// Whether the iteration cap stopped refinement early.
    pub cap_hit: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Candidate {
    priority: OrderedFloat<f64>,
    age: Reverse<u64>,
    key: TetKey,
}

fn evaluate(
    mesh: &TetMesh,
    sizes: &VertexSizes<'_>,
    options: &MeshOptions,
    key: TetKey,
) -> Option<Candidate> {
    let tet = mesh.tet(key)?;
    tet.region?;
    let [a, b, c, d] = mesh.tet_points(tet);
    let radius = circumradius(a, b, c, d).ok()?;
    let target = sizes.target(mesh, tet.vertices);
    let size_ratio = radius / target;
    let shortfall = if options.quality_threshold > 0.0 {
        (options.quality_threshold - options.quality_measure.evaluate(a, b, c, d)).max(0.0)
    } else {
        0.0
    };
    (size_ratio > 1.0 || shortfall > 0.0).then_some(Candidate {
        priority: OrderedFloat(size_ratio + shortfall),
        age: Reverse(tet.serial),
        key,
    })
}

/// Inserts the circumcenter of `key` as a Steiner point.
///
/// The outer error is fatal; the inner result tells whether the point was
/// inserted. A rejected point is removed again.
///
/// # Errors
///
/// Returns [`RefinementError::Mesh`] if cavity filling fails.
pub fn insert_circumcenter(
    mesh: &mut TetMesh,
    sizes: &mut VertexSizes<'_>,
    key: TetKey,
) -> Result<Result<Inserted, Rejected>, RefinementError> {
    let tet = mesh.tet(key).ok_or(TetMeshError::MissingTet { key })?;
    let vertices = tet.vertices;
    let [a, b, c, d] = mesh.tet_points(tet);
    let center = match circumcenter(a, b, c, d) {
        Ok(center) => center,
        Err(err) => return Ok(Err(err.into())),
    };

    let v = mesh.add_point(center);
    sizes.push_interpolated(mesh, v, vertices, &center);
    let rejected = match insert_vertex(mesh, v, Some(key), true) {
        Ok(inserted) => return Ok(Ok(inserted)),
        Err(InsertionError::CavityFilling(err)) => return Err(err.into()),
        Err(InsertionError::Outside { .. }) => Rejected::Outside,
        Err(InsertionError::Duplicate { existing, .. }) => Rejected::Duplicate { existing },
        Err(InsertionError::DegenerateCavity { message, .. }) => {
            Rejected::DegenerateCavity { message }
        }
    };
    mesh.pop_unconnected_point();
    sizes.truncate(v);
    Ok(Err(rejected))
}

/// Refines every tetrahedron carrying a region until no candidate is left
/// or the iteration cap is reached.
///
/// # Errors
///
/// Returns [`RefinementError::Mesh`] if the mesh becomes inconsistent.
pub fn refine(
    mesh: &mut TetMesh,
    sizes: &mut VertexSizes<'_>,
    options: &MeshOptions,
) -> Result<RefinementReport, RefinementError> {
    let mut report = RefinementReport::default();
    let mut heap: BinaryHeap<Candidate> = mesh
        .tet_keys_by_serial()
        .into_iter()
        .filter_map(|key| evaluate(mesh, sizes, options, key))
        .collect();
    let mut settled: FastHashSet<TetKey> = FastHashSet::default();
    let mut attempts = 0;

    while let Some(candidate) = heap.pop() {
        let live = mesh
            .tet(candidate.key)
            .is_some_and(|t| t.serial == candidate.age.0);
        if !live || settled.contains(&candidate.key) {
            continue;
        }
        if attempts >= options.max_refinement_iterations {
            report.cap_hit = true;
            break;
        }
        attempts += 1;

        match insert_circumcenter(mesh, sizes, candidate.key)? {
            Ok(inserted) => {
                report.inserted += 1;
                heap.extend(
                    inserted
                        .created
                        .iter()
                        .filter_map(|&key| evaluate(mesh, sizes, options, key)),
                );
            }
            Err(reason) => {
                tracing::trace!("Steiner point for {:?} rejected: {reason}", candidate.key);
                report.rejected += 1;
                settled.insert(candidate.key);
            }
        }
    }

    report.settled = settled.iter().filter(|&&k| mesh.contains_tet(k)).count();
    if report.cap_hit {
        tracing::warn!(
            "Refinement stopped after {} iterations with candidates left",
            options.max_refinement_iterations
        );
    }
    tracing::debug!(
        "Refinement inserted {} points, rejected {}, {} tetrahedra settled",
        report.inserted,
        report.rejected,
        report.settled
    );
    Ok(report)
}
