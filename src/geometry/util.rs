//! Geometric measures of tetrahedra and pyramids.
//!
//! Magnitudes (volumes, radii, lengths) are ordinary floating-point
//! quantities; decisions about sign are made with the exact predicates in
//! [`crate::geometry::predicates`].

use nalgebra::{Matrix3, Point3, Vector3};
use thiserror::Error;

/// Errors that can occur while computing a circumsphere.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CircumcenterError {
    /// The four points are (nearly) coplanar and have no finite circumsphere.
    #[error("Degenerate tetrahedron: cannot compute circumcenter (volume ≈ {volume:e})")]
    Degenerate {
        /// Signed volume of the offending tetrahedron.
        volume: f64,
    },
}

/// Signed volume of tetrahedron `(a, b, c, d)`, positive for positive
/// orientation.
#[inline]
#[must_use]
pub fn tet_volume(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>, d: &Point3<f64>) -> f64 {
    (b - a).cross(&(c - a)).dot(&(d - a)) / 6.0
}

/// Signed volume of a pyramid with base `(c0, c1, c2, c3)` and `apex`.
///
/// The base is split along the `c0-c2` diagonal. The volume is positive when
/// the apex lies on the side pointed to by the right-handed base normal.
#[must_use]
pub fn pyramid_volume(base: [&Point3<f64>; 4], apex: &Point3<f64>) -> f64 {
    tet_volume(base[0], base[1], base[2], apex) + tet_volume(base[0], base[2], base[3], apex)
}

/// Arithmetic mean of a set of points.
///
/// Returns the origin for an empty slice.
#[must_use]
pub fn centroid(points: &[&Point3<f64>]) -> Point3<f64> {
    if points.is_empty() {
        return Point3::origin();
    }
    let sum = points
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords);
    #[expect(clippy::cast_precision_loss)]
    let n = points.len() as f64;
    Point3::from(sum / n)
}

/// Circumcenter of tetrahedron `(a, b, c, d)`.
///
/// Solves the 3x3 system of perpendicular-bisector planes relative to `a`.
///
/// # Errors
///
/// Returns [`CircumcenterError::Degenerate`] if the tetrahedron is flat.
pub fn circumcenter(
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    d: &Point3<f64>,
) -> Result<Point3<f64>, CircumcenterError> {
    let ab = b - a;
    let ac = c - a;
    let ad = d - a;
    let m = Matrix3::from_rows(&[ab.transpose(), ac.transpose(), ad.transpose()]);
    let rhs = Vector3::new(ab.norm_squared(), ac.norm_squared(), ad.norm_squared()) * 0.5;
    let volume = tet_volume(a, b, c, d);
    let offset = m
        .lu()
        .solve(&rhs)
        .filter(|x| x.iter().all(|v| v.is_finite()))
        .ok_or(CircumcenterError::Degenerate { volume })?;
    Ok(a + offset)
}

/// Circumradius of tetrahedron `(a, b, c, d)`.
///
/// # Errors
///
/// Returns [`CircumcenterError::Degenerate`] if the tetrahedron is flat.
pub fn circumradius(
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    d: &Point3<f64>,
) -> Result<f64, CircumcenterError> {
    circumcenter(a, b, c, d).map(|center| (center - a).norm())
}

/// Area of triangle `(a, b, c)`.
#[inline]
#[must_use]
pub fn triangle_area(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> f64 {
    0.5 * (b - a).cross(&(c - a)).norm()
}

/// Inradius of tetrahedron `(a, b, c, d)`: `3 |V| / S` where `S` is the total
/// face area. Zero for a degenerate tetrahedron.
#[must_use]
pub fn inradius(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>, d: &Point3<f64>) -> f64 {
    let area = triangle_area(a, b, c)
        + triangle_area(a, b, d)
        + triangle_area(a, c, d)
        + triangle_area(b, c, d);
    if area <= 0.0 {
        return 0.0;
    }
    3.0 * tet_volume(a, b, c, d).abs() / area
}

/// Minimum and maximum edge length of tetrahedron `(a, b, c, d)`.
#[must_use]
pub fn edge_length_range(
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    d: &Point3<f64>,
) -> (f64, f64) {
    let lengths = [
        (b - a).norm(),
        (c - a).norm(),
        (d - a).norm(),
        (c - b).norm(),
        (d - b).norm(),
        (d - c).norm(),
    ];
    lengths
        .iter()
        .fold((f64::INFINITY, 0.0_f64), |(lo, hi), &l| (lo.min(l), hi.max(l)))
}

/// Barycentric coordinates of `p` with respect to tetrahedron `(a, b, c, d)`.
///
/// Returns `None` for a degenerate tetrahedron.
#[must_use]
pub fn barycentric(
    tet: [&Point3<f64>; 4],
    p: &Point3<f64>,
) -> Option<[f64; 4]> {
    let total = tet_volume(tet[0], tet[1], tet[2], tet[3]);
    if total == 0.0 {
        return None;
    }
    let l0 = tet_volume(p, tet[1], tet[2], tet[3]) / total;
    let l1 = tet_volume(tet[0], p, tet[2], tet[3]) / total;
    let l2 = tet_volume(tet[0], tet[1], p, tet[3]) / total;
    Some([l0, l1, l2, 1.0 - l0 - l1 - l2])
}
