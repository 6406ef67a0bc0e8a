//! Characteristic lengths driving refinement.
//!
//! Every boundary vertex gets a raw size equal to the mean length of its
//! incident boundary edges. Steiner points inherit sizes interpolated from
//! the tetrahedron they were created in. The effective size at a vertex is
//! the background [`SizeField`] value when one is set and defined there
//! (otherwise the raw size), scaled by the length factor and clamped to
//! `[min, max]`.

use nalgebra::Point3;
use std::fmt;

use crate::core::collections::FastHashSet;
use crate::core::config::MeshOptions;
use crate::core::facet::canonical;
use crate::core::tet_mesh::TetMesh;
use crate::geometry::util::barycentric;

/// Background size field overriding the boundary-derived sizes.
pub trait SizeField: fmt::Debug + Send + Sync {
    /// Target element size at `p`, or `None` where the field is undefined.
    fn size_at(&self, p: &Point3<f64>) -> Option<f64>;
}

/// The same size everywhere.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantSize(pub f64);

impl SizeField for ConstantSize {
    fn size_at(&self, _p: &Point3<f64>) -> Option<f64> {
        Some(self.0)
    }
}

/// One size inside an axis-aligned box, undefined outside.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxSize {
    /// Lower corner.
    pub min: Point3<f64>,
    /// Upper corner.
    pub max: Point3<f64>,
    /// Size inside the box.
    pub size: f64,
}

impl SizeField for BoxSize {
    fn size_at(&self, p: &Point3<f64>) -> Option<f64> {
        let inside = (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i]);
        inside.then_some(self.size)
    }
}

/// Per-vertex sizes of a working mesh.
#[derive(Debug)]
pub struct VertexSizes<'f> {
    raw: Vec<f64>,
    factor: f64,
    min: f64,
    max: f64,
    field: Option<&'f dyn SizeField>,
}

impl<'f> VertexSizes<'f> {
    /// Computes raw sizes of the points of `mesh` from the boundary facets.
    ///
    /// Points not on any facet get an infinite raw size, which the clamp
    /// turns into the maximum size.
    #[must_use]
    pub fn from_boundary(
        mesh: &TetMesh,
        facets: &[[usize; 3]],
        options: &MeshOptions,
        field: Option<&'f dyn SizeField>,
    ) -> Self {
        let n = mesh.points().len();
        let mut sum = vec![0.0; n];
        let mut count = vec![0_usize; n];
        let mut seen = FastHashSet::default();
        for &[a, b, c] in facets {
            for edge in [canonical([a, b]), canonical([b, c]), canonical([a, c])] {
                if !seen.insert(edge) {
                    continue;
                }
                let length = (mesh.point(edge[1]) - mesh.point(edge[0])).norm();
                for v in edge {
                    sum[v] += length;
                    count[v] += 1;
                }
            }
        }
        let raw = sum
            .iter()
            .zip(&count)
            .map(|(&s, &c)| {
                if c == 0 {
                    return f64::INFINITY;
                }
                #[expect(clippy::cast_precision_loss)]
                let c = c as f64;
                s / c
            })
            .collect();
        Self {
            raw,
            factor: options.characteristic_length_factor,
            min: options.characteristic_length_min,
            max: options.characteristic_length_max,
            field,
        }
    }

    /// Raw (unscaled, unclamped) size of point `v`.
    #[must_use]
    pub fn raw(&self, v: usize) -> f64 {
        self.raw.get(v).copied().unwrap_or(f64::INFINITY)
    }

    /// Effective size at point `v` located at `p`.
    #[must_use]
    pub fn size(&self, v: usize, p: &Point3<f64>) -> f64 {
        let base = self
            .field
            .and_then(|f| f.size_at(p))
            .unwrap_or_else(|| self.raw(v));
        (base * self.factor).clamp(self.min, self.max)
    }

    /// Target size of tetrahedron `vertices`: the mean effective size of its
    /// vertices.
    #[must_use]
    pub fn target(&self, mesh: &TetMesh, vertices: [usize; 4]) -> f64 {
        vertices
            .iter()
            .map(|&v| self.size(v, mesh.point(v)))
            .sum::<f64>()
            / 4.0
    }

    /// Records the raw size of a new point `v` at `p` created from the
    /// tetrahedron `vertices`, interpolating barycentrically. Weights are
    /// clamped to be non-negative so points outside the tetrahedron take the
    /// size of its nearest part.
    pub fn push_interpolated(
        &mut self,
        mesh: &TetMesh,
        v: usize,
        vertices: [usize; 4],
        p: &Point3<f64>,
    ) {
        let corners = vertices.map(|u| mesh.point(u));
        let sizes = vertices.map(|u| self.raw(u));
        let value = match barycentric(corners, p) {
            Some(weights) => {
                let clamped = weights.map(|w| w.max(0.0));
                let total: f64 = clamped.iter().sum();
                if total > 0.0 {
                    clamped.iter().zip(&sizes).map(|(w, s)| w * s).sum::<f64>() / total
                } else {
                    sizes.iter().sum::<f64>() / 4.0
                }
            }
            None => sizes.iter().sum::<f64>() / 4.0,
        };
        if self.raw.len() <= v {
            self.raw.resize(v + 1, f64::INFINITY);
        }
        self.raw[v] = value;
    }

    /// Drops the raw size of the most recent point after a rejected
    /// insertion.
    pub fn truncate(&mut self, len: usize) {
        self.raw.truncate(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn mesh() -> TetMesh {
        TetMesh::new(vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
            Point3::new(0.0, 0.0, 2.0),
        ])
        .unwrap()
    }

    const FACETS: [[usize; 3]; 4] = [[1, 2, 3], [0, 3, 2], [0, 1, 3], [0, 2, 1]];

    #[test]
    fn test_raw_size_is_mean_incident_edge_length() {
        let mesh = mesh();
        let options = MeshOptions::default();
        let sizes = VertexSizes::from_boundary(&mesh, &FACETS, &options, None);
        // Vertex 0 has three edges of length 2.
        assert_relative_eq!(sizes.raw(0), 2.0);
        // Vertex 1 has one edge of length 2 and two of length 2√2.
        assert_relative_eq!(sizes.raw(1), (2.0 + 4.0 * 2.0_f64.sqrt()) / 3.0);
        assert!(sizes.raw(4).is_infinite());
    }

    #[test]
    fn test_effective_size_scales_clamps_and_overrides() {
        let mesh = mesh();
        let options = MeshOptions {
            characteristic_length_factor: 0.5,
            characteristic_length_max: 0.8,
            ..MeshOptions::default()
        };
        let sizes = VertexSizes::from_boundary(&mesh, &FACETS, &options, None);
        assert_relative_eq!(sizes.size(0, mesh.point(0)), 0.8);

        let field = BoxSize {
            min: Point3::new(-0.1, -0.1, -0.1),
            max: Point3::new(0.1, 0.1, 0.1),
            size: 0.2,
        };
        let sizes = VertexSizes::from_boundary(&mesh, &FACETS, &options, Some(&field));
        assert_relative_eq!(sizes.size(0, mesh.point(0)), 0.1);
        assert_relative_eq!(sizes.size(1, mesh.point(1)), 0.8);
    }

    #[test]
    fn test_steiner_size_interpolates() {
        let mut mesh = mesh();
        let options = MeshOptions::default();
        let mut sizes = VertexSizes::from_boundary(&mesh, &FACETS, &options, None);
        let p = Point3::new(0.0, 0.0, 0.0);
        let v = mesh.add_point(p);
        sizes.push_interpolated(&mesh, v, [0, 1, 2, 3], &p);
        assert_relative_eq!(sizes.raw(v), 2.0);
        sizes.truncate(v);
        assert!(sizes.raw(v).is_infinite());
    }
}
