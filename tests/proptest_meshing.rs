//! Property-based tests for the meshing pipeline.
//!
//! ## Invariants Tested
//!
//! - **Volume conservation** - tetrahedra and pyramids fill the region exactly
//! - **Boundary conformity** - the exposed element faces are the surface mesh
//! - **Positive volumes** - no flat or inverted element survives
//! - **Quad preservation** - every quadrangle gets a pyramid whose apex is
//!   lifted into the volume
//!
//! Boxes are generated with bounded aspect ratios so that every side can be
//! recovered; random tetrahedra come from a seeded generator.

use proptest::prelude::*;
use rand::{Rng, SeedableRng, rngs::StdRng};
use volmesh::prelude::*;

// =============================================================================
// TEST CONFIGURATION
// =============================================================================

fn region_volume(model: &Model, region: RegionId) -> f64 {
    let r = model.region(region).unwrap();
    let p = |v: VertexKey| model.position(v).unwrap();
    let tets: f64 = r
        .tetrahedra
        .iter()
        .map(|t| {
            let [a, b, c, d] = t.vertices;
            tet_volume(p(a), p(b), p(c), p(d))
        })
        .sum();
    let pyramids: f64 = r
        .pyramids
        .iter()
        .map(|py| {
            let [b0, b1, b2, b3, apex] = py.vertices;
            pyramid_volume([p(b0), p(b1), p(b2), p(b3)], p(apex))
        })
        .sum();
    tets + pyramids
}

/// Strategy for an axis-aligned box as `(origin, extents)`.
fn box_strategy() -> impl Strategy<Value = ([f64; 3], [f64; 3])> {
    (
        prop::array::uniform3(-50.0f64..50.0),
        prop::array::uniform3(0.5f64..2.0),
    )
}

// =============================================================================
// BOX PROPERTIES
// =============================================================================

/// Macro to generate box meshing properties for quad and triangle sides.
macro_rules! test_box_properties {
    ($kind:ident, $quads:expr) => {
        pastey::paste! {
            proptest! {
                #![proptest_config(ProptestConfig::with_cases(16))]

                /// Property: a meshed box conforms to its surface and fills it.
                #[test]
                fn [<prop_ $kind _box_is_filled_conformingly>]((origin, extents) in box_strategy()) {
                    let min = Point3::from(origin);
                    let max = Point3::new(
                        origin[0] + extents[0],
                        origin[1] + extents[1],
                        origin[2] + extents[2],
                    );
                    let mut model = Model::new();
                    let region = ShapeBuilder::new(&mut model).hexahedron(min, max, $quads);

                    let report = Mesher::new(MeshOptions::default()).mesh_regions(&mut model);
                    let summary = report.region(region).unwrap();
                    prop_assert!(summary.is_meshed(), "{:?}", summary.outcome);
                    prop_assert!(check_region(&model, region).is_ok());

                    let expected = extents[0] * extents[1] * extents[2];
                    let volume = region_volume(&model, region);
                    prop_assert!(
                        (volume - expected).abs() <= 1e-9 * expected.max(1.0),
                        "volume {} != {}",
                        volume,
                        expected
                    );
                    if $quads {
                        prop_assert_eq!(summary.pyramids, 6);
                        prop_assert_eq!(summary.quads_split, 6);
                        for pyramid in &model.region(region).unwrap().pyramids {
                            let apex = model.position(pyramid.apex()).unwrap();
                            prop_assert!(
                                (0..3).all(|i| apex[i] > min[i] && apex[i] < max[i]),
                                "apex {:?} is not inside the box",
                                apex
                            );
                        }
                    } else {
                        prop_assert_eq!(summary.pyramids, 0);
                    }
                }

                /// Property: meshing is deterministic for a given input.
                #[test]
                fn [<prop_ $kind _box_meshing_is_deterministic>]((origin, extents) in box_strategy()) {
                    let build = || {
                        let mut model = Model::new();
                        let min = Point3::from(origin);
                        let max = min + nalgebra::Vector3::from(extents);
                        let region = ShapeBuilder::new(&mut model).hexahedron(min, max, $quads);
                        Mesher::new(MeshOptions::default()).mesh_regions(&mut model);
                        RegionMesh::capture(&model, region).unwrap()
                    };
                    prop_assert_eq!(build(), build());
                }
            }
        }
    };
}

test_box_properties!(quad, true);
test_box_properties!(triangle, false);

// =============================================================================
// RANDOM TETRAHEDRA
// =============================================================================

fn random_tetrahedron(rng: &mut StdRng) -> [Point3<f64>; 4] {
    loop {
        let corners: [Point3<f64>; 4] = std::array::from_fn(|_| {
            Point3::new(
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            )
        });
        let [a, b, c, d] = &corners;
        let volume = tet_volume(a, b, c, d).abs();
        let shortest = edge_length_range(a, b, c, d).0;
        if volume > 0.05 && shortest > 0.3 {
            return corners;
        }
    }
}

#[test]
fn seeded_tetrahedra_refine_within_their_boundary() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..12 {
        let corners = random_tetrahedron(&mut rng);
        let [a, b, c, d] = &corners;
        let expected = tet_volume(a, b, c, d).abs();

        let mut model = Model::new();
        let region = ShapeBuilder::new(&mut model).tetrahedron(corners);
        let mut mesher = Mesher::new(MeshOptions::default()).with_size_field(ConstantSize(0.4));
        let report = mesher.mesh_regions(&mut model);
        let summary = report.region(region).unwrap();

        assert!(summary.is_meshed(), "{:?}", summary.outcome);
        assert!(summary.tetrahedra >= 1);
        assert_eq!(
            summary.steiner_vertices,
            model.region(region).unwrap().mesh_vertices.len()
        );
        check_region(&model, region).unwrap();
        assert!((region_volume(&model, region) - expected).abs() < 1e-9);
    }
}
