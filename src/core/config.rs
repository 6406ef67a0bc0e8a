//! Meshing options.
//!
//! [`MeshOptions`] collects the scalar and enum options the volume mesher
//! reads. It can be built with [`MeshOptionsBuilder`] or deserialized from an
//! option file, and must pass [`MeshOptions::validate`] before any region is
//! touched.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::geometry::quality::QualityMeasure;

/// Volume meshing back end.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm3D {
    /// Constrained Delaunay pipeline with refinement and pyramids.
    #[default]
    Delaunay,
    /// Advancing-front back end.
    Frontal,
    /// Post-hoc refinement back end.
    Mmg3d,
}

impl fmt::Display for Algorithm3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Delaunay => "Delaunay",
            Self::Frontal => "Frontal",
            Self::Mmg3d => "MMG3D",
        };
        f.write_str(name)
    }
}

/// Invalid option value.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Invalid option {name}: {message}")]
pub struct OptionsError {
    /// Option name.
    pub name: &'static str,
    /// What is wrong with it.
    pub message: String,
}

/// Options read by the volume mesher.
///
/// # Examples
///
/// ```rust
/// use volmesh::core::config::{Algorithm3D, MeshOptionsBuilder};
///
/// let options = MeshOptionsBuilder::default()
///     .algorithm_3d(Algorithm3D::Delaunay)
///     .characteristic_length_factor(0.5)
///     .build()
///     .unwrap();
/// assert!(options.validate().is_ok());
/// assert!(options.optimize_quality);
/// ```
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[builder(default)]
#[serde(default)]
pub struct MeshOptions {
    /// Back end used for every region.
    pub algorithm_3d: Algorithm3D,
    /// Multiplier applied to every characteristic length.
    pub characteristic_length_factor: f64,
    /// Lower clamp for characteristic lengths.
    pub characteristic_length_min: f64,
    /// Upper clamp for characteristic lengths.
    pub characteristic_length_max: f64,
    /// Enables the refinement loop.
    pub optimize_quality: bool,
    /// Cap on refinement iterations (insertion attempts).
    pub max_refinement_iterations: usize,
    /// Shape measure used for quality-driven refinement.
    pub quality_measure: QualityMeasure,
    /// Tetrahedra below this quality are refined. Zero disables
    /// quality-driven refinement.
    pub quality_threshold: f64,
    /// Skip regions that are not visible.
    pub mesh_only_visible: bool,
    /// Flips allowed per missing boundary edge or facet during recovery.
    pub recovery_max_flips: usize,
    /// Number of damping steps tried when relocating a pyramid apex.
    pub relocation_damping_steps: usize,
}

impl Default for MeshOptions {
    fn default() -> Self {
        Self {
            algorithm_3d: Algorithm3D::Delaunay,
            characteristic_length_factor: 1.0,
            characteristic_length_min: 0.0,
            characteristic_length_max: 1e22,
            optimize_quality: true,
            max_refinement_iterations: 100_000,
            quality_measure: QualityMeasure::Gamma,
            quality_threshold: 0.0,
            mesh_only_visible: false,
            recovery_max_flips: 256,
            relocation_damping_steps: 6,
        }
    }
}

impl MeshOptions {
    /// Checks option values.
    ///
    /// # Errors
    ///
    /// Returns an [`OptionsError`] naming the first invalid option.
    pub fn validate(&self) -> Result<(), OptionsError> {
        let invalid = |name: &'static str, message: String| Err(OptionsError { name, message });
        if !(self.characteristic_length_factor.is_finite() && self.characteristic_length_factor > 0.0)
        {
            return invalid(
                "characteristic_length_factor",
                format!("must be positive, got {}", self.characteristic_length_factor),
            );
        }
        if self.characteristic_length_min.is_nan() || self.characteristic_length_min < 0.0 {
            return invalid(
                "characteristic_length_min",
                format!("must be non-negative, got {}", self.characteristic_length_min),
            );
        }
        if self.characteristic_length_max.is_nan()
            || self.characteristic_length_max <= 0.0
            || self.characteristic_length_max < self.characteristic_length_min
        {
            return invalid(
                "characteristic_length_max",
                format!(
                    "must be positive and at least {}, got {}",
                    self.characteristic_length_min, self.characteristic_length_max
                ),
            );
        }
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return invalid(
                "quality_threshold",
                format!("must lie in [0, 1], got {}", self.quality_threshold),
            );
        }
        if self.relocation_damping_steps == 0 {
            return invalid("relocation_damping_steps", "must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let options = MeshOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.algorithm_3d, Algorithm3D::Delaunay);
        assert_eq!(options.recovery_max_flips, 256);
    }

    #[test]
    fn test_builder_keeps_unset_defaults() {
        let options = MeshOptionsBuilder::default()
            .quality_threshold(0.3)
            .mesh_only_visible(true)
            .build()
            .unwrap();
        assert_eq!(options.quality_threshold, 0.3);
        assert!(options.mesh_only_visible);
        assert_eq!(options.characteristic_length_factor, 1.0);
        assert_eq!(options.max_refinement_iterations, 100_000);
    }

    #[test]
    fn test_invalid_values_are_named() {
        let options = MeshOptions {
            characteristic_length_min: 2.0,
            characteristic_length_max: 1.0,
            ..MeshOptions::default()
        };
        assert_eq!(options.validate().unwrap_err().name, "characteristic_length_max");

        let options = MeshOptions {
            characteristic_length_factor: f64::NAN,
            ..MeshOptions::default()
        };
        assert_eq!(
            options.validate().unwrap_err().name,
            "characteristic_length_factor"
        );
    }

    #[test]
    fn test_partial_options_deserialize() {
        let options: MeshOptions =
            serde_json::from_str(r#"{ "algorithm_3d": "Frontal", "optimize_quality": false }"#)
                .unwrap();
        assert_eq!(options.algorithm_3d, Algorithm3D::Frontal);
        assert!(!options.optimize_quality);
        assert_eq!(options.relocation_damping_steps, 6);
        assert_eq!(Algorithm3D::Mmg3d.to_string(), "MMG3D");
    }
}
