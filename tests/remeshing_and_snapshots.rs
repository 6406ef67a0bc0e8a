//! Re-meshing determinism and snapshot publication.

use std::sync::atomic::{AtomicBool, Ordering};
use volmesh::prelude::*;

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

fn sorted_positions(mesh: &RegionMesh) -> Vec<[f64; 3]> {
    let mut positions = mesh.positions.clone();
    positions.sort_by(|a, b| a.partial_cmp(b).unwrap());
    positions
}

fn box_model(quads: bool) -> (Model, RegionId) {
    let mut model = Model::new();
    let region = ShapeBuilder::new(&mut model).hexahedron(
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(2.0, 1.0, 1.5),
        quads,
    );
    (model, region)
}

#[test]
fn clearing_restores_the_surface_mesh() {
    init_tracing();
    let (mut model, region) = box_model(true);
    let surface_before: Vec<_> = model.faces().to_vec();
    let vertices_before = model.number_of_vertices();

    Mesher::new(MeshOptions::default()).mesh_regions(&mut model);
    assert!(model.region(region).unwrap().status.is_done());

    model.clear_region_mesh(region);
    let r = model.region(region).unwrap();
    assert!(!r.has_elements());
    assert!(r.mesh_vertices.is_empty());
    assert_eq!(r.status, MeshStatus::Unmeshed);
    assert_eq!(model.number_of_vertices(), vertices_before);
    assert_eq!(model.faces(), surface_before.as_slice());
}

#[test]
fn remeshing_after_clear_is_deterministic() {
    init_tracing();
    for quads in [true, false] {
        let (mut model, region) = box_model(quads);
        let mut mesher = Mesher::new(MeshOptions::default());

        mesher.mesh_regions(&mut model);
        let first = mesher.snapshots().load(region).unwrap();

        model.clear_region_mesh(region);
        let report = mesher.mesh_regions(&mut model);
        assert!(report.region(region).unwrap().is_meshed());
        let second = mesher.snapshots().load(region).unwrap();

        assert_eq!(first.tetrahedra.len(), second.tetrahedra.len());
        assert_eq!(first.pyramids.len(), second.pyramids.len());
        let a = sorted_positions(&first);
        let b = sorted_positions(&second);
        assert_eq!(a.len(), b.len());
        for (p, q) in a.iter().zip(&b) {
            for i in 0..3 {
                assert!((p[i] - q[i]).abs() < 1e-12, "{p:?} != {q:?}");
            }
        }
    }
}

#[test]
fn readers_only_see_complete_meshes() {
    init_tracing();
    let (mut model, region) = box_model(true);
    let mut mesher = Mesher::new(MeshOptions::default());
    mesher.reserve_snapshots(model.regions().len());
    let store = mesher.snapshots();
    let finished = AtomicBool::new(false);

    std::thread::scope(|scope| {
        let reader = scope.spawn(|| {
            let mut seen = None;
            loop {
                let done = finished.load(Ordering::Acquire);
                if let Some(mesh) = store.load(region) {
                    seen = Some(mesh);
                }
                if done {
                    return seen;
                }
                std::thread::yield_now();
            }
        });

        mesher.mesh_regions(&mut model);
        finished.store(true, Ordering::Release);

        let seen = reader.join().unwrap().expect("snapshot published");
        assert_eq!(seen.pyramids.len(), 6);
        assert_eq!(
            seen.tetrahedra.len(),
            model.region(region).unwrap().tetrahedra.len()
        );
    });
}

#[test]
fn failed_remesh_retracts_snapshot() {
    init_tracing();
    let (mut model, region) = box_model(false);
    let mut mesher = Mesher::new(MeshOptions::default());
    mesher.mesh_regions(&mut model);
    assert!(mesher.snapshots().load(region).is_some());

    model.clear_region_mesh(region);
    // Drop every face so the region has nothing to conform to.
    model.region_mut(region).unwrap().faces.clear();
    let report = mesher.mesh_regions(&mut model);
    assert_eq!(report.failures().count(), 1);
    assert!(mesher.snapshots().load(region).is_none());
}
