//! Immutable published region meshes.
//!
//! The mesher is the single writer: once a region reaches
//! [`MeshStatus::Done`](crate::core::model::MeshStatus::Done) it builds a
//! [`RegionMesh`] and swaps it into the region's slot. Readers (display,
//! exporters) load the current `Arc` without locking and never observe a
//! partially built mesh. A failed or cleared region has an empty slot.

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::core::collections::FastHashMap;
use crate::core::model::{Model, RegionId, VertexKey};

/// Self-contained copy of one region's volume mesh.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegionMesh {
    /// The region.
    pub region: RegionId,
    /// Region tag.
    pub tag: i32,
    /// Vertex numbers, indexed like `positions`.
    pub vertex_numbers: Vec<usize>,
    /// Vertex coordinates.
    pub positions: Vec<[f64; 3]>,
    /// Tetrahedra as indices into `positions`.
    pub tetrahedra: Vec<[usize; 4]>,
    /// Pyramids (four base corners, then apex) as indices into `positions`.
    pub pyramids: Vec<[usize; 5]>,
}

impl RegionMesh {
    /// Copies the current mesh of `region`. Returns `None` if the region does
    /// not exist or an element references a missing vertex.
    #[must_use]
    pub fn capture(model: &Model, region: RegionId) -> Option<Self> {
        let r = model.region(region)?;
        let mut index: FastHashMap<VertexKey, usize> = FastHashMap::default();
        let mut mesh = Self {
            region,
            tag: r.tag,
            vertex_numbers: Vec::new(),
            positions: Vec::new(),
            tetrahedra: Vec::with_capacity(r.tetrahedra.len()),
            pyramids: Vec::with_capacity(r.pyramids.len()),
        };
        let mut lookup = |key: VertexKey, mesh: &mut Self| -> Option<usize> {
            if let Some(&i) = index.get(&key) {
                return Some(i);
            }
            let vertex = model.vertex(key)?;
            let i = mesh.positions.len();
            mesh.positions
                .push([vertex.position.x, vertex.position.y, vertex.position.z]);
            mesh.vertex_numbers.push(vertex.num);
            index.insert(key, i);
            Some(i)
        };
        for tet in &r.tetrahedra {
            let mut t = [0; 4];
            for (slot, &v) in t.iter_mut().zip(&tet.vertices) {
                *slot = lookup(v, &mut mesh)?;
            }
            mesh.tetrahedra.push(t);
        }
        for pyramid in &r.pyramids {
            let mut p = [0; 5];
            for (slot, &v) in p.iter_mut().zip(&pyramid.vertices) {
                *slot = lookup(v, &mut mesh)?;
            }
            mesh.pyramids.push(p);
        }
        Some(mesh)
    }
}

/// Per-region slots holding the latest published mesh.
#[derive(Debug)]
pub struct SnapshotStore {
    slots: Box<[ArcSwapOption<RegionMesh>]>,
    generation: AtomicU64,
}

impl SnapshotStore {
    /// Creates empty slots for `regions` regions.
    #[must_use]
    pub fn new(regions: usize) -> Self {
        Self {
            slots: (0..regions).map(|_| ArcSwapOption::empty()).collect(),
            generation: AtomicU64::new(0),
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if the store has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Publishes a mesh, replacing the previous one. Returns `false` if the
    /// region has no slot.
    pub fn publish(&self, mesh: RegionMesh) -> bool {
        let Some(slot) = self.slots.get(mesh.region.0) else {
            return false;
        };
        slot.store(Some(Arc::new(mesh)));
        self.generation.fetch_add(1, Ordering::Release);
        true
    }

    /// Empties the slot of `region`.
    pub fn retract(&self, region: RegionId) {
        if let Some(slot) = self.slots.get(region.0) {
            slot.store(None);
            self.generation.fetch_add(1, Ordering::Release);
        }
    }

    /// Latest published mesh of `region`.
    #[must_use]
    pub fn load(&self, region: RegionId) -> Option<Arc<RegionMesh>> {
        self.slots.get(region.0).and_then(ArcSwapOption::load_full)
    }

    /// Number of publish and retract operations so far.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
