//! Volume meshing orchestrator.
//!
//! [`Mesher`] walks the regions of a [`Model`] and drives each one through
//! the pipeline
//!
//! ```text
//! Unmeshed -> BoundaryCollected -> Tetrahedralized -> Refined
//!          -> PyramidsBuilt -> Relocated -> Done
//! ```
//!
//! or into [`MeshStatus::Failed`]. Regions meshed with the Delaunay back end
//! that share faces are meshed together as one group; when a group fails,
//! each of its regions is retried on its own. A failed region keeps no
//! volume elements and never stops the other regions from being meshed.
//!
//! Other back ends are external [`VolumeMesher`] implementations registered
//! per [`Algorithm3D`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::core::algorithms::pyramids::build_pyramids;
use crate::core::algorithms::refinement::{RefinementReport, refine};
use crate::core::algorithms::relocation::relocate_apexes;
use crate::core::algorithms::tetrahedralize::{
    TetrahedralizeError, Tetrahedralization, tetrahedralize,
};
use crate::core::boundary::{BoundaryCollection, collect_group};
use crate::core::collections::{FastHashMap, FastHashSet};
use crate::core::config::{Algorithm3D, MeshOptions};
use crate::core::model::{
    MeshStatus, MeshingMethod, Model, Ownership, Region, RegionId, Tetrahedron, VertexKey,
};
use crate::core::size_field::{SizeField, VertexSizes};
use crate::core::snapshot::{RegionMesh, SnapshotStore};
use crate::core::tet_mesh::TetMesh;
use crate::core::validation::check_region;

// =============================================================================
// ERRORS AND REPORTS
// =============================================================================

/// Why a region could not be meshed.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum MeshError {
    /// The boundary is self-intersecting, non-manifold or not closed.
    #[error("Volume {tag}: invalid boundary: {message}")]
    InputDegeneracy {
        /// Region tag.
        tag: i32,
        /// Description with vertex numbers and coordinates.
        message: String,
    },
    /// A geometric computation could not be completed robustly.
    #[error("Volume {tag}: geometric failure: {message}")]
    GeometricPredicateFailure {
        /// Region tag.
        tag: i32,
        /// Description of the failure.
        message: String,
    },
    /// The options or back end do not fit the region.
    #[error("Volume {tag}: {message}")]
    ConfigurationMismatch {
        /// Region tag.
        tag: i32,
        /// Description of the mismatch.
        message: String,
    },
    /// The region has no boundary facets.
    #[error("Volume {tag}: boundary has no facets")]
    EmptyBoundary {
        /// Region tag.
        tag: i32,
    },
}

impl MeshError {
    /// Tag of the region the error belongs to.
    #[must_use]
    pub const fn tag(&self) -> i32 {
        match self {
            Self::InputDegeneracy { tag, .. }
            | Self::GeometricPredicateFailure { tag, .. }
            | Self::ConfigurationMismatch { tag, .. }
            | Self::EmptyBoundary { tag } => *tag,
        }
    }

    /// The same error attributed to another region.
    #[must_use]
    pub fn with_tag(self, tag: i32) -> Self {
        match self {
            Self::InputDegeneracy { message, .. } => Self::InputDegeneracy { tag, message },
            Self::GeometricPredicateFailure { message, .. } => {
                Self::GeometricPredicateFailure { tag, message }
            }
            Self::ConfigurationMismatch { message, .. } => {
                Self::ConfigurationMismatch { tag, message }
            }
            Self::EmptyBoundary { .. } => Self::EmptyBoundary { tag },
        }
    }

    fn from_tetrahedralize(tag: i32, err: TetrahedralizeError) -> Self {
        match err {
            TetrahedralizeError::EmptyBoundary => Self::EmptyBoundary { tag },
            err if err.is_input_degeneracy() => Self::InputDegeneracy {
                tag,
                message: err.to_string(),
            },
            err => Self::GeometricPredicateFailure {
                tag,
                message: err.to_string(),
            },
        }
    }
}

/// Why a region was left alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The region's meshing method is [`MeshingMethod::None`].
    MeshNone,
    /// The region is transfinite and already has elements.
    TransfiniteMeshed,
    /// The region is hidden and only visible regions are meshed.
    Invisible,
    /// The region is already [`MeshStatus::Done`].
    AlreadyDone,
}

/// Final state of one region after a meshing run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionOutcome {
    /// The region reached [`MeshStatus::Done`].
    Meshed,
    /// The region was not touched.
    Skipped(SkipReason),
    /// Meshing failed.
    Failed(MeshError),
}

/// Per-region summary of a meshing run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionReport {
    /// The region.
    pub region: RegionId,
    /// Region tag.
    pub tag: i32,
    /// Back end used.
    pub algorithm: Algorithm3D,
    /// Final state.
    pub outcome: RegionOutcome,
    /// Number of regions meshed together with this one, itself included.
    pub group_size: usize,
    /// External boundary facets of the group after quad splitting.
    pub boundary_facets: usize,
    /// Quads split by boundary collection for the group.
    pub quads_split: usize,
    /// Flips kept by boundary recovery for the group.
    pub recovery_flips: usize,
    /// Refinement counters for the group.
    pub refinement: RefinementReport,
    /// Tetrahedra added to this region.
    pub tetrahedra: usize,
    /// Pyramids added to this region.
    pub pyramids: usize,
    /// Steiner vertices added to this region.
    pub steiner_vertices: usize,
    /// Pyramid apexes relocated in the group.
    pub apexes_relocated: usize,
    /// Pyramid conversions dissolved in the group.
    pub pyramids_dissolved: usize,
}

impl RegionReport {
    fn new(region: RegionId, tag: i32, algorithm: Algorithm3D, outcome: RegionOutcome) -> Self {
        Self {
            region,
            tag,
            algorithm,
            outcome,
            group_size: 1,
            boundary_facets: 0,
            quads_split: 0,
            recovery_flips: 0,
            refinement: RefinementReport::default(),
            tetrahedra: 0,
            pyramids: 0,
            steiner_vertices: 0,
            apexes_relocated: 0,
            pyramids_dissolved: 0,
        }
    }

    /// Returns `true` if the region reached [`MeshStatus::Done`].
    #[must_use]
    pub const fn is_meshed(&self) -> bool {
        matches!(self.outcome, RegionOutcome::Meshed)
    }
}

/// Summary of a meshing run, one entry per region in region order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshReport {
    /// Region summaries.
    pub regions: Vec<RegionReport>,
}

impl MeshReport {
    /// Summary of `region`, if it was part of the run.
    #[must_use]
    pub fn region(&self, region: RegionId) -> Option<&RegionReport> {
        self.regions.iter().find(|r| r.region == region)
    }

    /// Regions that reached [`MeshStatus::Done`].
    pub fn meshed(&self) -> impl Iterator<Item = &RegionReport> {
        self.regions.iter().filter(|r| r.is_meshed())
    }

    /// Errors of the regions that failed.
    pub fn failures(&self) -> impl Iterator<Item = &MeshError> {
        self.regions.iter().filter_map(|r| match &r.outcome {
            RegionOutcome::Failed(err) => Some(err),
            _ => None,
        })
    }
}

// =============================================================================
// BACK ENDS
// =============================================================================

/// An external volume meshing back end.
pub trait VolumeMesher: fmt::Debug + Send + Sync {
    /// Whether the back end accepts quadrangles in the region boundary.
    fn supports_quads(&self) -> bool;

    /// Fills `region` with volume elements.
    ///
    /// # Errors
    ///
    /// Returns a [`MeshError`] if the region cannot be meshed. The mesher
    /// clears whatever the back end added.
    fn mesh(
        &self,
        model: &mut Model,
        region: RegionId,
        options: &MeshOptions,
    ) -> Result<(), MeshError>;
}

// =============================================================================
// MESHER
// =============================================================================

/// Element counts of a region before a run, used to undo a failed run.
#[derive(Clone, Copy, Debug)]
struct Mark {
    region: RegionId,
    tetrahedra: usize,
    pyramids: usize,
    vertices: usize,
}

impl Mark {
    fn of(model: &Model, region: RegionId) -> Self {
        let r = model.region(region);
        Self {
            region,
            tetrahedra: r.map_or(0, |r| r.tetrahedra.len()),
            pyramids: r.map_or(0, |r| r.pyramids.len()),
            vertices: r.map_or(0, |r| r.mesh_vertices.len()),
        }
    }
}

/// Drives regions through the volume meshing pipeline.
///
/// # Examples
///
/// ```rust
/// use nalgebra::Point3;
/// use volmesh::core::config::MeshOptions;
/// use volmesh::core::mesher::Mesher;
/// use volmesh::core::model::Model;
/// use volmesh::core::primitives::ShapeBuilder;
///
/// let mut model = Model::new();
/// let region = ShapeBuilder::new(&mut model).hexahedron(
///     Point3::new(0.0, 0.0, 0.0),
///     Point3::new(1.0, 1.0, 1.0),
///     true,
/// );
///
/// let mut mesher = Mesher::new(MeshOptions::default());
/// let report = mesher.mesh_regions(&mut model);
/// assert!(report.region(region).unwrap().is_meshed());
/// assert_eq!(model.region(region).unwrap().pyramids.len(), 6);
/// assert!(mesher.snapshots().load(region).is_some());
/// ```
#[derive(Debug)]
pub struct Mesher {
    options: MeshOptions,
    size_field: Option<Box<dyn SizeField>>,
    backends: FastHashMap<Algorithm3D, Box<dyn VolumeMesher>>,
    snapshots: Arc<SnapshotStore>,
}

impl Mesher {
    /// Creates a mesher with no background size field and no external back
    /// ends.
    #[must_use]
    pub fn new(options: MeshOptions) -> Self {
        Self {
            options,
            size_field: None,
            backends: FastHashMap::default(),
            snapshots: Arc::new(SnapshotStore::new(0)),
        }
    }

    /// Sets a background size field overriding boundary-derived sizes.
    #[must_use]
    pub fn with_size_field(mut self, field: impl SizeField + 'static) -> Self {
        self.size_field = Some(Box::new(field));
        self
    }

    /// Registers an external back end. Registering [`Algorithm3D::Delaunay`]
    /// has no effect since the built-in pipeline always handles it.
    pub fn register_backend(&mut self, algorithm: Algorithm3D, backend: Box<dyn VolumeMesher>) {
        if algorithm == Algorithm3D::Delaunay {
            tracing::warn!("Ignoring external back end for the built-in Delaunay algorithm");
            return;
        }
        self.backends.insert(algorithm, backend);
    }

    /// The options in use.
    #[must_use]
    pub const fn options(&self) -> &MeshOptions {
        &self.options
    }

    /// Handle to the published region meshes.
    #[must_use]
    pub fn snapshots(&self) -> Arc<SnapshotStore> {
        Arc::clone(&self.snapshots)
    }

    /// Meshes every region of `model`.
    pub fn mesh_regions(&mut self, model: &mut Model) -> MeshReport {
        let all: Vec<RegionId> = model.region_ids().collect();
        self.mesh_selected(model, &all)
    }

    /// Meshes a single region, without grouping it with its neighbors.
    ///
    /// Returns `None` if the region does not exist.
    pub fn mesh_region(&mut self, model: &mut Model, region: RegionId) -> Option<RegionReport> {
        model.region(region)?;
        let mut report = self.mesh_selected(model, &[region]);
        report.regions.pop()
    }

    fn mesh_selected(&mut self, model: &mut Model, selected: &[RegionId]) -> MeshReport {
        self.reserve_snapshots(model.regions().len());
        let algorithm = self.options.algorithm_3d;
        let mut reports: FastHashMap<RegionId, RegionReport> = FastHashMap::default();
        let options_error = self.options.validate().err();
        let mut delaunay = Vec::new();

        for &id in selected {
            let Some(region) = model.region(id) else {
                continue;
            };
            let tag = region.tag;
            if let Some(reason) = self.skip_reason(region) {
                tracing::debug!("Skipping volume {tag}: {reason:?}");
                reports.insert(
                    id,
                    RegionReport::new(id, tag, algorithm, RegionOutcome::Skipped(reason)),
                );
                continue;
            }
            if let Some(err) = &options_error {
                let err = MeshError::ConfigurationMismatch {
                    tag,
                    message: err.to_string(),
                };
                reports.insert(id, self.fail(model, id, algorithm, err));
                continue;
            }
            tracing::info!("Meshing volume {tag} ({algorithm})");
            if algorithm == Algorithm3D::Delaunay {
                delaunay.push(id);
            } else {
                reports.insert(id, self.mesh_with_backend(model, id, algorithm));
            }
        }

        let groups = if selected.len() == 1 {
            delaunay.into_iter().map(|id| vec![id]).collect()
        } else {
            groups(model, &delaunay)
        };
        for group in groups {
            match self.mesh_group(model, &group) {
                Ok(done) => {
                    for report in done {
                        reports.insert(report.region, report);
                    }
                }
                Err(err) if group.len() > 1 => {
                    let tags: Vec<i32> = group
                        .iter()
                        .filter_map(|&id| model.region(id).map(|r| r.tag))
                        .collect();
                    tracing::warn!(
                        "Meshing volumes {tags:?} together failed ({err}); meshing them one at a time"
                    );
                    for &id in &group {
                        let report = match self.mesh_group(model, &[id]) {
                            Ok(mut done) => done.pop(),
                            Err(err) => Some(self.report_failure(model, id, err)),
                        };
                        if let Some(report) = report {
                            reports.insert(id, report);
                        }
                    }
                }
                Err(err) => {
                    let id = group[0];
                    reports.insert(id, self.report_failure(model, id, err));
                }
            }
        }

        let mut regions: Vec<RegionReport> = reports.into_values().collect();
        regions.sort_by_key(|r| r.region);
        MeshReport { regions }
    }

    fn skip_reason(&self, region: &Region) -> Option<SkipReason> {
        match region.meshing_method {
            MeshingMethod::None => return Some(SkipReason::MeshNone),
            MeshingMethod::Transfinite if region.has_elements() => {
                return Some(SkipReason::TransfiniteMeshed);
            }
            _ => {}
        }
        if self.options.mesh_only_visible && !region.visible {
            return Some(SkipReason::Invisible);
        }
        region.status.is_done().then_some(SkipReason::AlreadyDone)
    }

    /// Grows the snapshot store to hold `regions` regions. Handles taken
    /// from [`Mesher::snapshots`] afterwards see every later publication;
    /// a handle taken before a growth keeps the old store.
    pub fn reserve_snapshots(&mut self, regions: usize) {
        if self.snapshots.len() >= regions {
            return;
        }
        let store = SnapshotStore::new(regions);
        for i in 0..self.snapshots.len() {
            if let Some(mesh) = self.snapshots.load(RegionId(i)) {
                store.publish(RegionMesh::clone(&mesh));
            }
        }
        self.snapshots = Arc::new(store);
    }

    fn publish(&self, model: &Model, region: RegionId) {
        if let Some(mesh) = RegionMesh::capture(model, region) {
            self.snapshots.publish(mesh);
        }
    }

    /// Marks `region` as failed and builds its report.
    fn fail(
        &self,
        model: &mut Model,
        region: RegionId,
        algorithm: Algorithm3D,
        err: MeshError,
    ) -> RegionReport {
        tracing::error!("{err}");
        let tag = model.region(region).map_or(0, |r| r.tag);
        set_status(model, &[region], &MeshStatus::Failed(err.clone()));
        self.snapshots.retract(region);
        RegionReport::new(region, tag, algorithm, RegionOutcome::Failed(err))
    }

    fn report_failure(&self, model: &mut Model, region: RegionId, err: MeshError) -> RegionReport {
        let tag = model.region(region).map_or(0, |r| r.tag);
        self.fail(model, region, Algorithm3D::Delaunay, err.with_tag(tag))
    }

    fn mesh_with_backend(
        &self,
        model: &mut Model,
        region: RegionId,
        algorithm: Algorithm3D,
    ) -> RegionReport {
        let tag = model.region(region).map_or(0, |r| r.tag);
        let has_quads = model.region(region).is_some_and(|r| {
            r.faces
                .iter()
                .filter_map(|&f| model.face(f))
                .any(|f| !f.quadrangles.is_empty())
        });
        let result = match self.backends.get(&algorithm) {
            None => Err(MeshError::ConfigurationMismatch {
                tag,
                message: format!("no {algorithm} back end is registered"),
            }),
            Some(backend) if has_quads && !backend.supports_quads() => {
                Err(MeshError::ConfigurationMismatch {
                    tag,
                    message: format!(
                        "the {algorithm} back end cannot mesh a boundary with quadrangles"
                    ),
                })
            }
            Some(backend) => {
                let mark = Mark::of(model, region);
                let result = backend.mesh(model, region, &self.options);
                if result.is_err() {
                    undo_elements(model, &[mark]);
                }
                result
            }
        };

        match result {
            Ok(()) => {
                set_status(model, &[region], &MeshStatus::Done);
                self.publish(model, region);
                let mut report = RegionReport::new(region, tag, algorithm, RegionOutcome::Meshed);
                if let Some(r) = model.region(region) {
                    report.tetrahedra = r.tetrahedra.len();
                    report.pyramids = r.pyramids.len();
                }
                log_counts(&report);
                report
            }
            Err(err) => self.fail(model, region, algorithm, err),
        }
    }

    /// Runs the Delaunay pipeline on a group of regions. On failure every
    /// change to the model is undone and the regions are marked failed.
    fn mesh_group(
        &self,
        model: &mut Model,
        group: &[RegionId],
    ) -> Result<Vec<RegionReport>, MeshError> {
        let tag = model.region(group[0]).map_or(0, |r| r.tag);
        let marks: Vec<Mark> = group.iter().map(|&id| Mark::of(model, id)).collect();
        let collection = collect_group(model, group);
        set_status(model, group, &MeshStatus::BoundaryCollected);

        let result = self.run_pipeline(model, group, &marks, &collection, tag);
        if let Err(err) = &result {
            for split in &collection.splits {
                if let Some(face) = split.face() {
                    model.merge_fan(face, split.apex);
                }
                model.remove_vertex(split.apex);
            }
            undo_elements(model, &marks);
            for &id in group {
                let tag = model.region(id).map_or(0, |r| r.tag);
                set_status(model, &[id], &MeshStatus::Failed(err.clone().with_tag(tag)));
                self.snapshots.retract(id);
            }
        }
        result
    }

    fn run_pipeline(
        &self,
        model: &mut Model,
        group: &[RegionId],
        marks: &[Mark],
        collection: &BoundaryCollection,
        tag: i32,
    ) -> Result<Vec<RegionReport>, MeshError> {
        let Tetrahedralization {
            mut mesh,
            vertices,
            facets,
            interfaces,
            recovery,
        } = tetrahedralize(model, collection, self.options.recovery_max_flips)
            .map_err(|err| MeshError::from_tetrahedralize(tag, err))?;
        set_status(model, group, &MeshStatus::Tetrahedralized);

        let refinement = if self.options.optimize_quality {
            let boundary: Vec<[usize; 3]> = facets.iter().chain(&interfaces).copied().collect();
            let mut sizes = VertexSizes::from_boundary(
                &mesh,
                &boundary,
                &self.options,
                self.size_field.as_deref(),
            );
            refine(&mut mesh, &mut sizes, &self.options).map_err(|err| {
                MeshError::GeometricPredicateFailure {
                    tag,
                    message: err.to_string(),
                }
            })?
        } else {
            RefinementReport::default()
        };
        set_status(model, group, &MeshStatus::Refined);

        let steiner = export(model, &mesh, &vertices, tag)?;
        let pyramids = build_pyramids(model, &collection.splits);
        set_status(model, group, &MeshStatus::PyramidsBuilt);
        let relocation = relocate_apexes(
            model,
            pyramids.converted,
            self.options.relocation_damping_steps,
        );
        set_status(model, group, &MeshStatus::Relocated);

        for &id in group {
            check_region(model, id).map_err(|err| MeshError::GeometricPredicateFailure {
                tag: model.region(id).map_or(tag, |r| r.tag),
                message: err.to_string(),
            })?;
        }

        let mut reports = Vec::with_capacity(group.len());
        for mark in marks {
            let id = mark.region;
            set_status(model, &[id], &MeshStatus::Done);
            self.publish(model, id);
            let Some(region) = model.region(id) else {
                continue;
            };
            let mut report = RegionReport::new(
                id,
                region.tag,
                Algorithm3D::Delaunay,
                RegionOutcome::Meshed,
            );
            report.group_size = group.len();
            report.boundary_facets = collection.facets.len();
            report.quads_split = collection.quad_count();
            report.recovery_flips = recovery.flips;
            report.refinement = refinement;
            report.tetrahedra = region.tetrahedra.len() - mark.tetrahedra;
            report.pyramids = region.pyramids.len() - mark.pyramids;
            report.steiner_vertices = steiner.get(&id).copied().unwrap_or(0);
            report.apexes_relocated = relocation.relocated.len();
            report.pyramids_dissolved = relocation.pinned.len();
            log_counts(&report);
            reports.push(report);
        }
        Ok(reports)
    }
}

fn log_counts(report: &RegionReport) {
    tracing::info!(
        "Volume {}: {} tetrahedra, {} pyramids, {} Steiner vertices",
        report.tag,
        report.tetrahedra,
        report.pyramids,
        report.steiner_vertices
    );
}

fn set_status(model: &mut Model, regions: &[RegionId], status: &MeshStatus) {
    for &id in regions {
        if let Some(region) = model.region_mut(id) {
            region.status = status.clone();
        }
    }
}

/// Drops elements and interior vertices added after `marks` were taken.
fn undo_elements(model: &mut Model, marks: &[Mark]) {
    for mark in marks {
        let Some(region) = model.region_mut(mark.region) else {
            continue;
        };
        region.tetrahedra.truncate(mark.tetrahedra);
        region.pyramids.truncate(mark.pyramids);
        let added: Vec<VertexKey> = region
            .mesh_vertices
            .get(mark.vertices..)
            .map(<[VertexKey]>::to_vec)
            .unwrap_or_default();
        for key in added {
            model.remove_vertex(key);
        }
    }
}

/// Splits `regions` into groups connected by shared faces. Groups and their
/// members are in region order.
fn groups(model: &Model, regions: &[RegionId]) -> Vec<Vec<RegionId>> {
    let candidates: FastHashSet<RegionId> = regions.iter().copied().collect();
    let mut seen: FastHashSet<RegionId> = FastHashSet::default();
    let mut sorted = regions.to_vec();
    sorted.sort_unstable();

    let mut groups = Vec::new();
    for &start in &sorted {
        if !seen.insert(start) {
            continue;
        }
        let mut group = vec![start];
        let mut head = 0;
        while head < group.len() {
            let id = group[head];
            head += 1;
            let faces = model.region(id).map(|r| r.faces.clone()).unwrap_or_default();
            for face in faces {
                for neighbor in model.regions_of_face(face) {
                    if candidates.contains(&neighbor) && seen.insert(neighbor) {
                        group.push(neighbor);
                    }
                }
            }
        }
        group.sort_unstable();
        groups.push(group);
    }
    groups
}

/// Copies the classified tetrahedra into the model. Steiner points become
/// vertices interior to the region of the first tetrahedron using them.
/// Returns the number of Steiner vertices per region.
fn export(
    model: &mut Model,
    mesh: &TetMesh,
    vertices: &[VertexKey],
    tag: i32,
) -> Result<FastHashMap<RegionId, usize>, MeshError> {
    let mut steiner: FastHashMap<usize, VertexKey> = FastHashMap::default();
    let mut counts: FastHashMap<RegionId, usize> = FastHashMap::default();
    for key in mesh.tet_keys_by_serial() {
        let Some(tet) = mesh.tet(key) else {
            continue;
        };
        let region = tet.region.ok_or_else(|| MeshError::GeometricPredicateFailure {
            tag,
            message: format!("tetrahedron {:?} is not classified", tet.vertices),
        })?;
        let mut keys = [VertexKey::default(); 4];
        for (slot, &v) in keys.iter_mut().zip(&tet.vertices) {
            *slot = if let Some(&key) = vertices.get(v) {
                key
            } else if mesh.is_steiner(v) {
                *steiner.entry(v).or_insert_with(|| {
                    *counts.entry(region).or_default() += 1;
                    model.add_synthetic_vertex(
                        *mesh.point(v),
                        Ownership::OnRegionInterior(region),
                    )
                })
            } else {
                return Err(MeshError::GeometricPredicateFailure {
                    tag,
                    message: format!("tetrahedron {:?} uses a super vertex", tet.vertices),
                });
            };
        }
        if let Some(r) = model.region_mut(region) {
            r.tetrahedra.push(Tetrahedron { vertices: keys });
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::primitives::ShapeBuilder;
    use nalgebra::Point3;

    fn unit_cube(model: &mut Model, quads: bool) -> RegionId {
        ShapeBuilder::new(model).hexahedron(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 1.0),
            quads,
        )
    }

    /// Back end that records the call and adds nothing.
    #[derive(Debug)]
    struct NullBackend {
        quads: bool,
        fail: bool,
    }

    impl VolumeMesher for NullBackend {
        fn supports_quads(&self) -> bool {
            self.quads
        }

        fn mesh(
            &self,
            model: &mut Model,
            region: RegionId,
            _options: &MeshOptions,
        ) -> Result<(), MeshError> {
            let tag = model.region(region).map_or(0, |r| r.tag);
            model.add_vertex(Point3::new(0.5, 0.5, 0.5), Ownership::OnRegionInterior(region));
            if self.fail {
                return Err(MeshError::GeometricPredicateFailure {
                    tag,
                    message: "null back end".to_string(),
                });
            }
            Ok(())
        }
    }

    #[test]
    fn test_triangulated_cube_is_meshed() {
        let mut model = Model::new();
        let region = unit_cube(&mut model, false);
        let mut mesher = Mesher::new(MeshOptions::default());
        let report = mesher.mesh_regions(&mut model);

        let r = report.region(region).unwrap();
        assert!(r.is_meshed());
        assert_eq!(r.boundary_facets, 12);
        assert_eq!(r.pyramids, 0);
        assert!(r.tetrahedra >= 5);
        assert!(model.region(region).unwrap().status.is_done());
        check_region(&model, region).unwrap();
    }

    #[test]
    fn test_skip_rules() {
        let mut model = Model::new();
        let mut shapes = ShapeBuilder::new(&mut model);
        let none = shapes.hexahedron(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 1.0),
            false,
        );
        let hidden = shapes.hexahedron(
            Point3::new(3.0, 0.0, 0.0),
            Point3::new(4.0, 1.0, 1.0),
            false,
        );
        model.region_mut(none).unwrap().meshing_method = MeshingMethod::None;
        model.region_mut(hidden).unwrap().visible = false;

        let options = MeshOptions {
            mesh_only_visible: true,
            ..MeshOptions::default()
        };
        let mut mesher = Mesher::new(options);
        let report = mesher.mesh_regions(&mut model);
        assert_eq!(
            report.region(none).unwrap().outcome,
            RegionOutcome::Skipped(SkipReason::MeshNone)
        );
        assert_eq!(
            report.region(hidden).unwrap().outcome,
            RegionOutcome::Skipped(SkipReason::Invisible)
        );
        assert!(!model.region(hidden).unwrap().has_elements());
    }

    #[test]
    fn test_done_region_is_not_remeshed() {
        let mut model = Model::new();
        let region = unit_cube(&mut model, false);
        let mut mesher = Mesher::new(MeshOptions::default());
        mesher.mesh_regions(&mut model);
        let tets = model.region(region).unwrap().tetrahedra.len();

        let report = mesher.mesh_regions(&mut model);
        assert_eq!(
            report.region(region).unwrap().outcome,
            RegionOutcome::Skipped(SkipReason::AlreadyDone)
        );
        assert_eq!(model.region(region).unwrap().tetrahedra.len(), tets);
    }

    #[test]
    fn test_invalid_options_fail_every_region() {
        let mut model = Model::new();
        let region = unit_cube(&mut model, false);
        let options = MeshOptions {
            characteristic_length_factor: -1.0,
            ..MeshOptions::default()
        };
        let report = Mesher::new(options).mesh_regions(&mut model);
        assert!(matches!(
            report.region(region).unwrap().outcome,
            RegionOutcome::Failed(MeshError::ConfigurationMismatch { .. })
        ));
        assert!(matches!(
            model.region(region).unwrap().status,
            MeshStatus::Failed(MeshError::ConfigurationMismatch { .. })
        ));
    }

    #[test]
    fn test_backend_dispatch() {
        let options = MeshOptions {
            algorithm_3d: Algorithm3D::Frontal,
            ..MeshOptions::default()
        };

        let mut model = Model::new();
        let region = unit_cube(&mut model, true);
        let report = Mesher::new(options.clone()).mesh_regions(&mut model);
        assert!(matches!(
            report.region(region).unwrap().outcome,
            RegionOutcome::Failed(MeshError::ConfigurationMismatch { .. })
        ));

        let mut mesher = Mesher::new(options.clone());
        mesher.register_backend(
            Algorithm3D::Frontal,
            Box::new(NullBackend {
                quads: false,
                fail: false,
            }),
        );
        let report = mesher.mesh_regions(&mut model);
        assert!(matches!(
            report.region(region).unwrap().outcome,
            RegionOutcome::Failed(MeshError::ConfigurationMismatch { ref message, .. })
                if message.contains("quadrangles")
        ));

        let mut model = Model::new();
        let region = unit_cube(&mut model, false);
        let report = mesher.mesh_regions(&mut model);
        assert!(report.region(region).unwrap().is_meshed());
        assert_eq!(report.region(region).unwrap().algorithm, Algorithm3D::Frontal);
    }

    #[test]
    fn test_failed_backend_leaves_region_clean() {
        let mut model = Model::new();
        let region = unit_cube(&mut model, false);
        let vertices = model.number_of_vertices();
        let mut mesher = Mesher::new(MeshOptions {
            algorithm_3d: Algorithm3D::Mmg3d,
            ..MeshOptions::default()
        });
        mesher.register_backend(
            Algorithm3D::Mmg3d,
            Box::new(NullBackend {
                quads: true,
                fail: true,
            }),
        );
        let report = mesher.mesh_regions(&mut model);
        assert_eq!(report.failures().count(), 1);
        assert_eq!(model.number_of_vertices(), vertices);
        assert!(mesher.snapshots().load(region).is_none());
    }

    #[test]
    fn test_groups_follow_shared_faces() {
        let mut model = Model::new();
        let mut shapes = ShapeBuilder::new(&mut model);
        let a = shapes.hexahedron(
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 1.0),
            true,
        );
        let b = shapes.hexahedron(
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(2.0, 1.0, 1.0),
            true,
        );
        let c = shapes.hexahedron(
            Point3::new(5.0, 0.0, 0.0),
            Point3::new(6.0, 1.0, 1.0),
            true,
        );
        assert_eq!(groups(&model, &[c, b, a]), vec![vec![a, b], vec![c]]);
        assert_eq!(groups(&model, &[b, c]), vec![vec![b], vec![c]]);
    }

    #[test]
    fn test_error_tags() {
        let err = MeshError::EmptyBoundary { tag: 3 };
        assert_eq!(err.tag(), 3);
        assert_eq!(err.with_tag(5), MeshError::EmptyBoundary { tag: 5 });
        let err = MeshError::from_tetrahedralize(2, TetrahedralizeError::EmptyBoundary);
        assert_eq!(err, MeshError::EmptyBoundary { tag: 2 });
    }

    #[test]
    fn test_recovery_failures_are_split_by_cause() {
        use crate::core::algorithms::boundary_recovery::RecoveryError;

        let failure = |intersecting: bool| TetrahedralizeError::Recovery {
            source: RecoveryError::EdgeNotRecovered {
                edge: [0, 4],
                flips: 12,
            },
            detail: "vertices [1, 5]".to_string(),
            intersecting,
        };
        assert!(matches!(
            MeshError::from_tetrahedralize(7, failure(true)),
            MeshError::InputDegeneracy { tag: 7, .. }
        ));
        assert!(matches!(
            MeshError::from_tetrahedralize(7, failure(false)),
            MeshError::GeometricPredicateFailure { tag: 7, .. }
        ));
    }
}
