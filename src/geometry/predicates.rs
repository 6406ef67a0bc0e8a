//! Exact geometric predicates for 3D tetrahedralization.
//!
//! Orientation and in-sphere signs are computed with Shewchuk's adaptive
//! exact arithmetic (`robust` crate), so the sign of every predicate is the
//! sign of the true determinant of the `f64` inputs. Degenerate results are
//! reported as [`Orientation::DEGENERATE`] and [`InSphere::BOUNDARY`].
//! In-sphere ties are resolved by [`in_conflict`] with a symbolic
//! perturbation of the lifting map driven by per-vertex ranks.
//!
//! # Sign conventions
//!
//! A tetrahedron `(a, b, c, d)` is *positive* when
//! `det[b - a, c - a, d - a] > 0`, i.e. `d` lies on the side of the plane
//! `(a, b, c)` into which the right-handed normal `(b - a) × (c - a)` points.
//! This is the opposite of Shewchuk's `orient3d` sign, which is negated here.

use nalgebra::{Point3, Vector3};
use robust::{Coord, Coord3D};

/// Represents the position of a point relative to a circumsphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InSphere {
    /// The point is outside the circumsphere
    OUTSIDE,
    /// The point is exactly on the circumsphere
    BOUNDARY,
    /// The point is inside the circumsphere
    INSIDE,
}

impl std::fmt::Display for InSphere {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OUTSIDE => write!(f, "OUTSIDE"),
            Self::BOUNDARY => write!(f, "BOUNDARY"),
            Self::INSIDE => write!(f, "INSIDE"),
        }
    }
}

/// Represents the orientation of a tetrahedron.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Negative signed volume
    NEGATIVE,
    /// The four points are coplanar
    DEGENERATE,
    /// Positive signed volume
    POSITIVE,
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NEGATIVE => write!(f, "NEGATIVE"),
            Self::DEGENERATE => write!(f, "DEGENERATE"),
            Self::POSITIVE => write!(f, "POSITIVE"),
        }
    }
}

#[inline]
fn coord(p: &Point3<f64>) -> Coord3D<f64> {
    Coord3D {
        x: p.x,
        y: p.y,
        z: p.z,
    }
}

/// Exact orientation determinant of `(a, b, c, d)`.
///
/// Positive when `d` lies on the side of plane `(a, b, c)` pointed to by
/// `(b - a) × (c - a)`. Only the sign is exact; the magnitude is an
/// approximation of six times the signed volume.
///
/// # Examples
///
/// ```
/// use nalgebra::Point3;
/// use volmesh::geometry::predicates::orient3d;
///
/// let a = Point3::new(0.0, 0.0, 0.0);
/// let b = Point3::new(1.0, 0.0, 0.0);
/// let c = Point3::new(0.0, 1.0, 0.0);
/// let d = Point3::new(0.0, 0.0, 1.0);
/// assert!(orient3d(&a, &b, &c, &d) > 0.0);
/// assert!(orient3d(&a, &c, &b, &d) < 0.0);
/// ```
#[inline]
#[must_use]
pub fn orient3d(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>, d: &Point3<f64>) -> f64 {
    -robust::orient3d(coord(a), coord(b), coord(c), coord(d))
}

/// Classifies the orientation of `(a, b, c, d)`.
#[must_use]
pub fn orientation(
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    d: &Point3<f64>,
) -> Orientation {
    let det = orient3d(a, b, c, d);
    if det > 0.0 {
        Orientation::POSITIVE
    } else if det < 0.0 {
        Orientation::NEGATIVE
    } else {
        Orientation::DEGENERATE
    }
}

/// Exact in-sphere test of `e` against the circumsphere of `(a, b, c, d)`.
///
/// The result does not depend on the orientation of the tetrahedron; a
/// degenerate (flat) tetrahedron has no circumsphere and reports
/// [`InSphere::BOUNDARY`].
#[must_use]
pub fn insphere(
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    d: &Point3<f64>,
    e: &Point3<f64>,
) -> InSphere {
    let orient = orient3d(a, b, c, d);
    if orient == 0.0 {
        return InSphere::BOUNDARY;
    }
    // Shewchuk: positive for "inside" when (a, b, c, d) has positive orientation in
    // his convention, which is negative in ours.
    let det = robust::insphere(coord(a), coord(b), coord(c), coord(d), coord(e));
    let signed = if orient > 0.0 { -det } else { det };
    if signed > 0.0 {
        InSphere::INSIDE
    } else if signed < 0.0 {
        InSphere::OUTSIDE
    } else {
        InSphere::BOUNDARY
    }
}

/// Conflict test used by cavity construction.
///
/// Returns `true` when `p` lies strictly inside the circumsphere of `tet`.
/// Exact cospherical ties are broken by lowering every point below the
/// paraboloid by an infinitesimal that is larger for a smaller rank
/// (`ranks[4]` is the rank of `p`). The point of smallest rank whose four
/// companions form a non-flat tetrahedron decides, so the perturbed
/// triangulation does not depend on the insertion order. Lowering a point
/// connects it more: the four cocircular corners of a planar quadrilateral
/// get the diagonal through the corner of smallest rank.
#[must_use]
pub fn in_conflict(tet: [&Point3<f64>; 4], p: &Point3<f64>, ranks: [usize; 5]) -> bool {
    match insphere(tet[0], tet[1], tet[2], tet[3], p) {
        InSphere::INSIDE => true,
        InSphere::OUTSIDE => false,
        InSphere::BOUNDARY => perturbed_conflict(tet, p, ranks),
    }
}

fn perturbed_conflict(tet: [&Point3<f64>; 4], p: &Point3<f64>, ranks: [usize; 5]) -> bool {
    let orient = orient3d(tet[0], tet[1], tet[2], tet[3]);
    if orient == 0.0 {
        return false;
    }
    let points = [tet[0], tet[1], tet[2], tet[3], p];
    let mut order = [0, 1, 2, 3, 4];
    order.sort_unstable_by_key(|&i| ranks[i]);
    for i in order {
        let mut rest = [points[0]; 4];
        for (n, (_, q)) in points.iter().enumerate().filter(|&(k, _)| k != i).enumerate() {
            rest[n] = *q;
        }
        let minor = orient3d(rest[0], rest[1], rest[2], rest[3]);
        if minor != 0.0 {
            // Cofactor of the lifted coordinate of point `i`.
            let cofactor = if i % 2 == 0 { minor } else { -minor };
            return (cofactor > 0.0) == (orient > 0.0);
        }
    }
    false
}

// =============================================================================
// COLLINEARITY AND COPLANAR TESTS
// =============================================================================

/// Index of the coordinate axis to drop when projecting points of a plane with
/// normal `n` to 2D.
fn dominant_axis(n: &Vector3<f64>) -> usize {
    let abs = n.abs();
    if abs.x >= abs.y && abs.x >= abs.z {
        0
    } else if abs.y >= abs.z {
        1
    } else {
        2
    }
}

fn project(p: &Point3<f64>, drop_axis: usize) -> Coord<f64> {
    match drop_axis {
        0 => Coord { x: p.y, y: p.z },
        1 => Coord { x: p.z, y: p.x },
        _ => Coord { x: p.x, y: p.y },
    }
}

/// Exact 2D orientation of coplanar points after projection along `drop_axis`.
fn orient2d_projected(
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    drop_axis: usize,
) -> f64 {
    robust::orient2d(
        project(a, drop_axis),
        project(b, drop_axis),
        project(c, drop_axis),
    )
}

/// Exact collinearity test (all three coordinate projections degenerate).
#[must_use]
pub fn collinear(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> bool {
    (0..3).all(|axis| orient2d_projected(a, b, c, axis) == 0.0)
}

/// Returns `true` if `p` lies strictly between `a` and `b` on segment `ab`.
#[must_use]
pub fn point_in_open_segment(p: &Point3<f64>, a: &Point3<f64>, b: &Point3<f64>) -> bool {
    if p == a || p == b || !collinear(a, b, p) {
        return false;
    }
    let ab = b - a;
    let t = (p - a).dot(&ab);
    t > 0.0 && t < ab.norm_squared()
}

/// Returns `true` if the coplanar segments `ab` and `uv` cross at a single
/// point interior to both.
#[must_use]
pub fn coplanar_segments_cross(
    a: &Point3<f64>,
    b: &Point3<f64>,
    u: &Point3<f64>,
    v: &Point3<f64>,
) -> bool {
    let normal = (b - a).cross(&(v - u));
    if normal.norm_squared() == 0.0 {
        return false;
    }
    let axis = dominant_axis(&normal);
    let s1 = orient2d_projected(a, b, u, axis);
    let s2 = orient2d_projected(a, b, v, axis);
    let s3 = orient2d_projected(u, v, a, axis);
    let s4 = orient2d_projected(u, v, b, axis);
    s1 * s2 < 0.0 && s3 * s4 < 0.0
}

/// Returns `true` if `p` is coplanar with triangle `abc` and strictly inside it.
#[must_use]
pub fn point_in_open_triangle(
    p: &Point3<f64>,
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
) -> bool {
    if orient3d(a, b, c, p) != 0.0 {
        return false;
    }
    let normal = (b - a).cross(&(c - a));
    if normal.norm_squared() == 0.0 {
        return false;
    }
    let axis = dominant_axis(&normal);
    let s1 = orient2d_projected(a, b, p, axis);
    let s2 = orient2d_projected(b, c, p, axis);
    let s3 = orient2d_projected(c, a, p, axis);
    (s1 > 0.0 && s2 > 0.0 && s3 > 0.0) || (s1 < 0.0 && s2 < 0.0 && s3 < 0.0)
}

// =============================================================================
// SEGMENT / TRIANGLE INTERSECTION
// =============================================================================

/// Returns `true` if the open segment `ab` crosses the open triangle `uvw`
/// transversally (endpoints strictly on opposite sides, crossing point
/// strictly inside the triangle).
#[must_use]
pub fn segment_crosses_triangle(
    a: &Point3<f64>,
    b: &Point3<f64>,
    u: &Point3<f64>,
    v: &Point3<f64>,
    w: &Point3<f64>,
) -> bool {
    let sa = orient3d(u, v, w, a);
    let sb = orient3d(u, v, w, b);
    if sa * sb >= 0.0 {
        return false;
    }
    let t1 = orient3d(a, b, u, v);
    let t2 = orient3d(a, b, v, w);
    let t3 = orient3d(a, b, w, u);
    (t1 > 0.0 && t2 > 0.0 && t3 > 0.0) || (t1 < 0.0 && t2 < 0.0 && t3 < 0.0)
}

/// Returns `true` if two triangles intersect in a way that is not explained
/// by shared vertices or a shared edge.
///
/// Only transversal crossings are detected (an edge of one triangle piercing
/// the other). Used to name the offending facet pair when boundary recovery
/// fails.
#[must_use]
pub fn triangles_intersect(t1: [&Point3<f64>; 3], t2: [&Point3<f64>; 3]) -> bool {
    let edge_pierces = |tri_a: [&Point3<f64>; 3], tri_b: [&Point3<f64>; 3]| {
        (0..3).any(|i| {
            let p = tri_a[i];
            let q = tri_a[(i + 1) % 3];
            segment_crosses_triangle(p, q, tri_b[0], tri_b[1], tri_b[2])
        })
    };
    edge_pierces(t1, t2) || edge_pierces(t2, t1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_tet() -> [Point3<f64>; 4] {
        [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ]
    }

    #[test]
    fn test_orientation_sign_convention() {
        let [a, b, c, d] = unit_tet();
        assert_eq!(orientation(&a, &b, &c, &d), Orientation::POSITIVE);
        assert_eq!(orientation(&b, &a, &c, &d), Orientation::NEGATIVE);
        let e = Point3::new(0.5, 0.5, 0.0);
        assert_eq!(orientation(&a, &b, &c, &e), Orientation::DEGENERATE);
    }

    #[test]
    fn test_insphere_is_orientation_independent() {
        let [a, b, c, d] = unit_tet();
        let inside = Point3::new(0.25, 0.25, 0.25);
        let outside = Point3::new(3.0, 3.0, 3.0);
        assert_eq!(insphere(&a, &b, &c, &d, &inside), InSphere::INSIDE);
        assert_eq!(insphere(&b, &a, &c, &d, &inside), InSphere::INSIDE);
        assert_eq!(insphere(&a, &b, &c, &d, &outside), InSphere::OUTSIDE);
        assert_eq!(insphere(&b, &a, &c, &d, &outside), InSphere::OUTSIDE);
    }

    #[test]
    fn test_cospherical_tie_follows_ranks() {
        // Cube corners are cospherical.
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 0.0, 0.0);
        let c = Point3::new(0.0, 1.0, 0.0);
        let d = Point3::new(0.0, 0.0, 1.0);
        let e = Point3::new(1.0, 1.0, 1.0);
        assert_eq!(insphere(&a, &b, &c, &d, &e), InSphere::BOUNDARY);
        // Lowering `e` or the opposite corner `a` pulls `e` inside.
        assert!(in_conflict([&a, &b, &c, &d], &e, [1, 2, 3, 4, 0]));
        assert!(in_conflict([&a, &b, &c, &d], &e, [0, 1, 2, 3, 4]));
        // Lowering `b` lifts the sphere over `e`.
        assert!(!in_conflict([&a, &b, &c, &d], &e, [4, 0, 1, 2, 3]));
        // The decision does not depend on the tetrahedron's orientation.
        assert!(!in_conflict([&b, &a, &c, &d], &e, [0, 4, 1, 2, 3]));
    }

    #[test]
    fn test_strict_conflicts_ignore_ranks() {
        let [a, b, c, d] = unit_tet();
        let inside = Point3::new(0.25, 0.25, 0.25);
        let outside = Point3::new(3.0, 3.0, 3.0);
        assert!(in_conflict([&a, &b, &c, &d], &inside, [4, 3, 2, 1, 0]));
        assert!(!in_conflict([&a, &b, &c, &d], &outside, [0, 1, 2, 3, 4]));
    }

    #[test]
    fn test_point_in_open_segment() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(2.0, 2.0, 2.0);
        assert!(point_in_open_segment(&Point3::new(1.0, 1.0, 1.0), &a, &b));
        assert!(!point_in_open_segment(&b, &a, &b));
        assert!(!point_in_open_segment(&Point3::new(3.0, 3.0, 3.0), &a, &b));
        assert!(!point_in_open_segment(&Point3::new(1.0, 1.0, 0.0), &a, &b));
    }

    #[test]
    fn test_coplanar_segments_cross() {
        let a = Point3::new(1.0, 0.0, 0.0);
        let b = Point3::new(1.0, 1.0, 0.0);
        let u = Point3::new(0.5, 0.5, 0.0);
        let v = Point3::new(1.5, 0.5, 0.0);
        assert!(coplanar_segments_cross(&a, &b, &u, &v));
        let w = Point3::new(0.9, 0.5, 0.0);
        assert!(!coplanar_segments_cross(&a, &b, &u, &w));
    }

    #[test]
    fn test_segment_crosses_triangle() {
        let [a, b, c, _] = unit_tet();
        let top = Point3::new(0.2, 0.2, 1.0);
        let bottom = Point3::new(0.2, 0.2, -1.0);
        assert!(segment_crosses_triangle(&top, &bottom, &a, &b, &c));
        // Through a vertex is not a transversal crossing of the open triangle.
        let through_vertex = Point3::new(0.0, 0.0, -1.0);
        let above_vertex = Point3::new(0.0, 0.0, 1.0);
        assert!(!segment_crosses_triangle(
            &above_vertex,
            &through_vertex,
            &a,
            &b,
            &c
        ));
    }

    #[test]
    fn test_triangles_intersect_ignores_shared_edges() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 0.0, 0.0);
        let c = Point3::new(0.0, 1.0, 0.0);
        let d = Point3::new(0.0, 0.0, 1.0);
        assert!(!triangles_intersect([&a, &b, &c], [&a, &b, &d]));

        let p = Point3::new(0.2, 0.2, -1.0);
        let q = Point3::new(0.2, 0.2, 1.0);
        let r = Point3::new(0.3, 0.6, 1.0);
        assert!(triangles_intersect([&a, &b, &c], [&p, &q, &r]));
    }

    #[test]
    fn test_point_in_open_triangle() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 0.0, 0.0);
        let c = Point3::new(0.0, 1.0, 0.0);
        assert!(point_in_open_triangle(&Point3::new(0.2, 0.2, 0.0), &a, &b, &c));
        assert!(!point_in_open_triangle(&Point3::new(0.5, 0.0, 0.0), &a, &b, &c));
        assert!(!point_in_open_triangle(&Point3::new(0.2, 0.2, 0.1), &a, &b, &c));
    }
}
