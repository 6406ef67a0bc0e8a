//! Shape quality measures for tetrahedra.
//!
//! All measures are normalized so that a regular tetrahedron scores `1.0` and
//! a flat (zero-volume) tetrahedron scores `0.0`. Inverted tetrahedra score
//! negative values for the volume-based measures.
//!
//! # Quality Metrics
//!
//! - **Rho**: minimum edge length over maximum edge length. Cheap, but blind
//!   to slivers (flat tetrahedra with four similar edges).
//! - **Gamma**: `12 r / (√6 l_max)` where `r` is the inradius. Detects
//!   slivers.
//! - **Radius ratio**: `3 r / R`, inradius over circumradius.
//!
//! # References
//!
//! - Shewchuk, J.R. "What Is a Good Linear Element? Interpolation, Conditioning,
//!   Anisotropy, and Quality Measures" (2002)
//! - Liu, A. and Joe, B. "Relationship between tetrahedron shape measures"
//!   *BIT Numerical Mathematics* 34.2 (1994): 268-287

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::{error::Error, fmt};

use crate::geometry::util::{circumradius, edge_length_range, inradius, tet_volume};

/// Errors that can occur during quality metric computation.
#[derive(Debug, Clone, PartialEq)]
pub enum QualityError {
    /// Tetrahedron is degenerate (zero or near-zero volume)
    DegenerateTetrahedron {
        /// Signed volume of the tetrahedron
        volume: f64,
    },
}

impl fmt::Display for QualityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DegenerateTetrahedron { volume } => {
                write!(f, "Degenerate tetrahedron with volume ≈ {volume:e}")
            }
        }
    }
}

impl Error for QualityError {}

/// Shape measure selected for refinement and flip scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityMeasure {
    /// Minimum edge over maximum edge.
    Rho,
    /// Inradius normalized by the longest edge.
    #[default]
    Gamma,
}

impl QualityMeasure {
    /// Evaluates this measure on tetrahedron `(a, b, c, d)`.
    #[must_use]
    pub fn evaluate(
        self,
        a: &Point3<f64>,
        b: &Point3<f64>,
        c: &Point3<f64>,
        d: &Point3<f64>,
    ) -> f64 {
        match self {
            Self::Rho => rho_shape_measure(a, b, c, d),
            Self::Gamma => gamma_shape_measure(a, b, c, d),
        }
    }
}

/// Minimum edge length over maximum edge length.
///
/// Returns `0.0` when all vertices coincide.
#[must_use]
pub fn rho_shape_measure(
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    d: &Point3<f64>,
) -> f64 {
    let (min_edge, max_edge) = edge_length_range(a, b, c, d);
    if max_edge <= 0.0 {
        return 0.0;
    }
    min_edge / max_edge
}

/// Gamma shape measure, `12 r / (√6 l_max)`, signed by orientation.
#[must_use]
pub fn gamma_shape_measure(
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    d: &Point3<f64>,
) -> f64 {
    let (_, max_edge) = edge_length_range(a, b, c, d);
    if max_edge <= 0.0 {
        return 0.0;
    }
    let r = inradius(a, b, c, d);
    let gamma = 12.0 * r / (6.0_f64.sqrt() * max_edge);
    if tet_volume(a, b, c, d) < 0.0 {
        -gamma
    } else {
        gamma
    }
}

/// Radius ratio `3 r / R`.
///
/// # Errors
///
/// Returns [`QualityError::DegenerateTetrahedron`] when the circumsphere
/// does not exist.
pub fn radius_ratio(
    a: &Point3<f64>,
    b: &Point3<f64>,
    c: &Point3<f64>,
    d: &Point3<f64>,
) -> Result<f64, QualityError> {
    let volume = tet_volume(a, b, c, d);
    let big_r = circumradius(a, b, c, d)
        .map_err(|_| QualityError::DegenerateTetrahedron { volume })?;
    if big_r <= 0.0 || !big_r.is_finite() {
        return Err(QualityError::DegenerateTetrahedron { volume });
    }
    Ok(3.0 * inradius(a, b, c, d) / big_r)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn regular() -> [Point3<f64>; 4] {
        [
            Point3::new(1.0, 1.0, 1.0),
            Point3::new(-1.0, 1.0, -1.0),
            Point3::new(1.0, -1.0, -1.0),
            Point3::new(-1.0, -1.0, 1.0),
        ]
    }

    #[test]
    fn test_regular_tet_scores_one() {
        let [a, b, c, d] = regular();
        assert!(tet_volume(&a, &b, &c, &d) > 0.0);
        assert_relative_eq!(rho_shape_measure(&a, &b, &c, &d), 1.0, epsilon = 1e-12);
        assert_relative_eq!(gamma_shape_measure(&a, &b, &c, &d), 1.0, epsilon = 1e-12);
        assert_relative_eq!(radius_ratio(&a, &b, &c, &d).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inverted_tet_has_negative_gamma() {
        let [a, b, c, d] = regular();
        assert!(gamma_shape_measure(&b, &a, &c, &d) < 0.0);
        assert!(rho_shape_measure(&b, &a, &c, &d) > 0.0);
    }

    #[test]
    fn test_sliver_scores_low_gamma_but_high_rho() {
        // Four points near a square, slightly lifted: a classic sliver.
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 0.0, 0.01);
        let c = Point3::new(1.0, 1.0, 0.0);
        let d = Point3::new(0.0, 1.0, 0.01);
        let rho = rho_shape_measure(&a, &b, &c, &d);
        let gamma = gamma_shape_measure(&a, &b, &c, &d).abs();
        assert!(rho > 0.7);
        assert!(gamma < 0.05);
    }

    #[test]
    fn test_flat_tet_radius_ratio_errors() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(1.0, 0.0, 0.0);
        let c = Point3::new(0.0, 1.0, 0.0);
        let d = Point3::new(1.0, 1.0, 0.0);
        assert!(radius_ratio(&a, &b, &c, &d).is_err());
        let err = radius_ratio(&a, &b, &c, &d).unwrap_err();
        assert!(err.to_string().contains("Degenerate"));
    }

    #[test]
    fn test_quality_measure_dispatch() {
        let [a, b, c, d] = regular();
        assert_relative_eq!(
            QualityMeasure::Rho.evaluate(&a, &b, &c, &d),
            rho_shape_measure(&a, &b, &c, &d)
        );
        assert_relative_eq!(
            QualityMeasure::Gamma.evaluate(&a, &b, &c, &d),
            gamma_shape_measure(&a, &b, &c, &d)
        );
    }
}
