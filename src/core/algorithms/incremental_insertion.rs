//! Bowyer-Watson point insertion.
//!
//! Inserting a vertex follows the usual cavity scheme:
//! 1. Locate the tetrahedron containing the point (facet walking)
//! 2. Grow the conflict region breadth-first with exact in-sphere tests
//! 3. Shrink the region until every boundary face sees the point
//! 4. Replace the region with the star of the point
//!
//! Step 3 keeps the result valid in a constrained (non-Delaunay)
//! tetrahedralization: a boundary face the point does not strictly see would
//! produce a flat or inverted tetrahedron, so the tetrahedron behind it is
//! dropped from the cavity. If the tetrahedron containing the point has to be
//! dropped, the insertion fails.

use thiserror::Error;

use crate::core::collections::FastHashSet;
use crate::core::tet_mesh::{LocateResult, TetBuffer, TetKey, TetMesh, TetMeshError};

/// Error during point insertion.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InsertionError {
    /// The point lies outside the tetrahedralization or behind a constraint.
    #[error("Point {vertex} lies outside the insertion domain")]
    Outside {
        /// Index of the point.
        vertex: usize,
    },
    /// The point coincides with an existing vertex.
    #[error("Point {vertex} coincides with vertex {existing}")]
    Duplicate {
        /// Index of the point.
        vertex: usize,
        /// Index of the existing vertex.
        existing: usize,
    },
    /// No star-shaped cavity containing the point exists.
    #[error("Cavity for point {vertex} is degenerate: {message}")]
    DegenerateCavity {
        /// Index of the point.
        vertex: usize,
        /// Description of the problem.
        message: String,
    },
    /// Cavity filling failed.
    #[error("Cavity filling failed: {0}")]
    CavityFilling(#[from] TetMeshError),
}

/// Successful insertion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Inserted {
    /// Index of the inserted point.
    pub vertex: usize,
    /// Tetrahedra created around the point.
    pub created: TetBuffer,
    /// Number of tetrahedra removed.
    pub removed: usize,
}

/// Computes the cavity of `vertex` grown from `seed`.
///
/// When `respect_constraints` is set the cavity never extends across a
/// constraint face.
///
/// # Errors
///
/// Returns [`InsertionError::Duplicate`] if the point is a vertex of `seed`
/// and [`InsertionError::DegenerateCavity`] if no valid cavity exists.
pub fn find_cavity(
    mesh: &TetMesh,
    vertex: usize,
    seed: TetKey,
    respect_constraints: bool,
) -> Result<TetBuffer, InsertionError> {
    let p = *mesh.point(vertex);
    let seed_tet = mesh.tet(seed).ok_or(TetMeshError::MissingTet { key: seed })?;
    if let Some(&existing) = seed_tet
        .vertices
        .iter()
        .find(|&&v| v != vertex && *mesh.point(v) == p)
    {
        return Err(InsertionError::Duplicate { vertex, existing });
    }

    let mut in_cavity: FastHashSet<TetKey> = FastHashSet::default();
    in_cavity.insert(seed);
    let mut order = vec![seed];
    let mut head = 0;
    while head < order.len() {
        let key = order[head];
        head += 1;
        let Some(tet) = mesh.tet(key) else {
            continue;
        };
        for i in 0..4 {
            let Some(n) = tet.neighbors[i] else {
                continue;
            };
            if in_cavity.contains(&n)
                || (respect_constraints && mesh.is_constraint_face(&tet.face_key(i)))
            {
                continue;
            }
            if mesh.tet(n).is_some_and(|t| mesh.conflicts(t, vertex)) {
                in_cavity.insert(n);
                order.push(n);
            }
        }
    }

    loop {
        let offender = order.iter().copied().find(|&key| {
            mesh.tet(key).is_some_and(|tet| {
                (0..4).any(|i| {
                    let boundary = tet.neighbors[i].is_none_or(|n| !in_cavity.contains(&n));
                    boundary && mesh.face_orientation(tet, i, &p) >= 0.0
                })
            })
        });
        let Some(offender) = offender else {
            break;
        };
        if offender == seed {
            return Err(InsertionError::DegenerateCavity {
                vertex,
                message: "the containing tetrahedron cannot see the point from all faces"
                    .to_string(),
            });
        }
        in_cavity.remove(&offender);
        order = connected_from(mesh, seed, &in_cavity, respect_constraints);
        in_cavity = order.iter().copied().collect();
    }

    Ok(order.into_iter().collect())
}

/// Tetrahedra of `allowed` reachable from `seed` through shared faces.
fn connected_from(
    mesh: &TetMesh,
    seed: TetKey,
    allowed: &FastHashSet<TetKey>,
    respect_constraints: bool,
) -> Vec<TetKey> {
    let mut seen = FastHashSet::default();
    seen.insert(seed);
    let mut order = vec![seed];
    let mut head = 0;
    while head < order.len() {
        let key = order[head];
        head += 1;
        let Some(tet) = mesh.tet(key) else {
            continue;
        };
        for i in 0..4 {
            if let Some(n) = tet.neighbors[i]
                && allowed.contains(&n)
                && !(respect_constraints && mesh.is_constraint_face(&tet.face_key(i)))
                && seen.insert(n)
            {
                order.push(n);
            }
        }
    }
    order
}

/// Inserts point `vertex` (already added with [`TetMesh::add_point`]).
///
/// # Errors
///
/// Returns [`InsertionError::Outside`] when the point cannot be located
/// (behind a constraint face when `respect_constraints` is set), and the
/// errors of [`find_cavity`] and [`TetMesh::replace`].
pub fn insert_vertex(
    mesh: &mut TetMesh,
    vertex: usize,
    hint: Option<TetKey>,
    respect_constraints: bool,
) -> Result<Inserted, InsertionError> {
    let p = *mesh.point(vertex);
    let LocateResult::Inside(seed) = mesh.locate(&p, hint, respect_constraints) else {
        return Err(InsertionError::Outside { vertex });
    };
    let cavity = find_cavity(mesh, vertex, seed, respect_constraints)?;

    let mut created = Vec::with_capacity(cavity.len() * 2 + 2);
    for &key in &cavity {
        let tet = mesh.tet(key).ok_or(TetMeshError::MissingTet { key })?;
        for i in 0..4 {
            let boundary = tet.neighbors[i].is_none_or(|n| !cavity.contains(&n));
            if boundary {
                let [a, b, c] = tet.face(i);
                created.push([a, c, b, vertex]);
            }
        }
    }

    let removed = cavity.len();
    let created = mesh.replace(&cavity, &created)?;
    tracing::trace!(
        "Inserted vertex {vertex}: removed {removed} tetrahedra, created {}",
        created.len()
    );
    Ok(Inserted {
        vertex,
        created,
        removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn build(points: Vec<Point3<f64>>) -> TetMesh {
        build_ordered(points, None)
    }

    fn build_ordered(points: Vec<Point3<f64>>, tie_order: Option<&[usize]>) -> TetMesh {
        let n = points.len();
        let mut mesh = TetMesh::new(points).unwrap();
        if let Some(order) = tie_order {
            mesh.set_tie_order(order).unwrap();
        }
        let mut hint = None;
        for v in 0..n {
            let inserted = insert_vertex(&mut mesh, v, hint, false).unwrap();
            hint = inserted.created.first().copied();
        }
        mesh
    }

    #[test]
    fn test_single_insertion_stars_super_tetrahedron() {
        let mesh = build(vec![Point3::new(0.1, 0.2, 0.3)]);
        assert_eq!(mesh.number_of_tets(), 4);
        mesh.validate().unwrap();
    }

    #[test]
    fn test_random_points_are_delaunay() {
        let mut rng = StdRng::seed_from_u64(7);
        let points: Vec<Point3<f64>> = (0..60)
            .map(|_| {
                Point3::new(
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                    rng.random_range(-1.0..1.0),
                )
            })
            .collect();
        let mesh = build(points);
        mesh.validate().unwrap();
        assert_eq!(mesh.delaunay_violations(), 0);
    }

    #[test]
    fn test_cospherical_cube_corners() {
        let mut points = Vec::new();
        for i in 0..2 {
            for j in 0..2 {
                for k in 0..2 {
                    points.push(Point3::new(f64::from(i), f64::from(j), f64::from(k)));
                }
            }
        }
        let mesh = build(points);
        mesh.validate().unwrap();
        assert_eq!(mesh.delaunay_violations(), 0);
        let interior = mesh
            .tets()
            .filter(|(_, t)| !mesh.touches_super(t))
            .count();
        assert!((5..=6).contains(&interior));
    }

    #[test]
    fn test_tie_order_picks_quad_diagonal() {
        // The apex is cospherical with the square base.
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.5, 0.5, 1.0),
        ];
        let mesh = build_ordered(points.clone(), Some(&[0, 1, 2, 3, 4]));
        mesh.validate().unwrap();
        assert!(mesh.has_edge(0, 2));
        assert!(!mesh.has_edge(1, 3));

        let mesh = build_ordered(points, Some(&[1, 0, 2, 3, 4]));
        mesh.validate().unwrap();
        assert!(mesh.has_edge(1, 3));
        assert!(!mesh.has_edge(0, 2));
        assert_eq!(mesh.delaunay_violations(), 0);
    }

    #[test]
    fn test_cube_triangulation_follows_tie_order() {
        let mut points = Vec::new();
        for i in 0..2 {
            for j in 0..2 {
                for k in 0..2 {
                    points.push(Point3::new(f64::from(i), f64::from(j), f64::from(k)));
                }
            }
        }
        // Corners 0 and 7 are opposite; every side contains one of them.
        let mesh = build_ordered(points, Some(&[0, 7, 1, 2, 3, 4, 5, 6]));
        mesh.validate().unwrap();
        let interior = mesh
            .tets()
            .filter(|(_, t)| !mesh.touches_super(t))
            .count();
        assert_eq!(interior, 6);
        assert!(mesh.has_edge(0, 7));
        assert!(mesh.has_edge(0, 6));
        assert!(!mesh.has_edge(2, 4));
    }

    #[test]
    fn test_duplicate_point_is_rejected() {
        let points = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 0.0, 0.0),
        ];
        let mut mesh = TetMesh::new(points).unwrap();
        insert_vertex(&mut mesh, 0, None, false).unwrap();
        insert_vertex(&mut mesh, 1, None, false).unwrap();
        let err = insert_vertex(&mut mesh, 2, None, false).unwrap_err();
        assert_eq!(
            err,
            InsertionError::Duplicate {
                vertex: 2,
                existing: 0
            }
        );
        mesh.validate().unwrap();
    }
}
