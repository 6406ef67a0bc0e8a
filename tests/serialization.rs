//! Serialization of options, reports and region snapshots.

use approx::assert_relative_eq;
use volmesh::core::mesher::SkipReason;
use volmesh::prelude::*;

#[test]
fn options_round_trip_through_json() {
    let options = MeshOptionsBuilder::default()
        .algorithm_3d(Algorithm3D::Frontal)
        .characteristic_length_factor(0.25)
        .quality_measure(QualityMeasure::Gamma)
        .quality_threshold(0.5)
        .build()
        .unwrap();
    let json = serde_json::to_string(&options).unwrap();
    let back: MeshOptions = serde_json::from_str(&json).unwrap();
    assert_eq!(back, options);
}

#[test]
fn partial_option_files_fall_back_to_defaults() {
    let options: MeshOptions =
        serde_json::from_str(r#"{"optimize_quality": false, "recovery_max_flips": 32}"#).unwrap();
    assert!(!options.optimize_quality);
    assert_eq!(options.recovery_max_flips, 32);
    assert_eq!(
        options.characteristic_length_factor,
        MeshOptions::default().characteristic_length_factor
    );
    assert!(options.validate().is_ok());
}

#[test]
fn failed_status_keeps_its_error() {
    let status = MeshStatus::Failed(MeshError::InputDegeneracy {
        tag: 7,
        message: "facet (1, 2, 3) intersects facet (4, 5, 6)".to_string(),
    });
    let json = serde_json::to_string(&status).unwrap();
    let back: MeshStatus = serde_json::from_str(&json).unwrap();
    assert_eq!(back, status);
}

#[test]
fn mesh_report_round_trips() {
    let mut model = Model::new();
    let mut shapes = ShapeBuilder::new(&mut model);
    shapes.hexahedron(
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(1.0, 1.0, 1.0),
        true,
    );
    let empty = model.add_region(9, Vec::new());
    model.region_mut(empty).unwrap().meshing_method = MeshingMethod::None;

    let report = Mesher::new(MeshOptions::default()).mesh_regions(&mut model);
    assert_eq!(
        report.region(empty).unwrap().outcome,
        RegionOutcome::Skipped(SkipReason::MeshNone)
    );

    let json = serde_json::to_string_pretty(&report).unwrap();
    let back: MeshReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back, report);
}

#[test]
fn region_snapshot_round_trips() {
    let mut model = Model::new();
    let region = ShapeBuilder::new(&mut model).hexahedron(
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(1.0, 2.0, 1.0),
        true,
    );
    let mut mesher = Mesher::new(MeshOptions::default());
    mesher.mesh_regions(&mut model);
    let mesh = mesher.snapshots().load(region).unwrap();

    let json = serde_json::to_string(&*mesh).unwrap();
    let back: RegionMesh = serde_json::from_str(&json).unwrap();
    assert_eq!(back.region, mesh.region);
    assert_eq!(back.vertex_numbers, mesh.vertex_numbers);
    assert_eq!(back.tetrahedra, mesh.tetrahedra);
    assert_eq!(back.pyramids, mesh.pyramids);
    for (p, q) in back.positions.iter().zip(&mesh.positions) {
        for i in 0..3 {
            assert_relative_eq!(p[i], q[i], epsilon = 1e-12);
        }
    }
    assert_eq!(back.pyramids.len(), 6);
    assert!(
        back.tetrahedra
            .iter()
            .flatten()
            .chain(back.pyramids.iter().flatten())
            .all(|&i| i < back.positions.len())
    );
}
