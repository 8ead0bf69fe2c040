//! Displaced detector weighting.
//!
//! When the detector is shifted sideways relative to the projection of the
//! rotation axis, opposite views of a full scan measure part of the object
//! twice and part of it once. Backprojecting such data unweighted doubles the
//! contribution of the overlap band. The classical correction weights each
//! detector column before backprojection: zero on the unmeasured side, a
//! smooth `sin^2` feather across the doubly-measured overlap band, and 2 on
//! the singly-measured side, so that a column and its conjugate always sum
//! to 2.
//!
//! The weight profile depends only on the detector's physical u-extent, so it
//! is computed once per geometry binding and cached as a single row applied to
//! every view. The stage mutates only the projection buffer it is handed and
//! never touches the geometry.

use ndarray::Array1;

use crate::error::{ReconError, ReconErrorKind};
use crate::geometry::ProjectionGeometry;
use crate::image::{GridMeta, ProjectionStack};

/// Per-projection geometric correction for off-center detectors.
#[derive(Debug, Clone, Default)]
pub struct DisplacedDetectorWeighting {
    disabled: bool,
    /// Cached per-column weights; `None` means identity (centered detector,
    /// degenerate overlap, or not yet bound).
    weights: Option<Array1<f32>>,
}

impl DisplacedDetectorWeighting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bypasses the correction entirely. Required when the geometry is
    /// centered or when downstream consumers need raw projection values.
    pub fn set_disable(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Computes and caches the weight profile for a geometry and projection
    /// grid. Re-binding replaces any previous cache, so the surrounding
    /// metadata phase may call this repeatedly.
    pub fn bind(&mut self, geometry: &ProjectionGeometry, proj_meta: &GridMeta) {
        self.weights = None;
        if geometry.is_empty() {
            return;
        }

        let nu = proj_meta.shape[1];
        let su = proj_meta.spacing[1];
        let u_first = proj_meta.origin[1];
        let u_last = u_first + (nu.saturating_sub(1)) as f64 * su;
        let u_min = u_first.min(u_last);
        let u_max = u_first.max(u_last);
        let offset = 0.5 * (u_min + u_max);

        // A detector centered to within a fraction of a pixel needs no
        // correction.
        if offset.abs() < 0.25 * su.abs() {
            return;
        }

        // Half-width of the band measured by both a view and its conjugate.
        let overlap = u_min.abs().min(u_max.abs());
        if overlap <= 0.0 {
            log::warn!(
                "displaced detector does not cover the rotation axis (offset {offset:.3}); \
                 weighting left as identity"
            );
            return;
        }

        let sign = offset.signum();
        let profile = Array1::from_shape_fn(nu, |iu| {
            let u = sign * (u_first + iu as f64 * su);
            let w = if u <= -overlap {
                0.0
            } else if u >= overlap {
                2.0
            } else {
                let s = (std::f64::consts::PI * (u + overlap) / (4.0 * overlap)).sin();
                2.0 * s * s
            };
            w as f32
        });
        self.weights = Some(profile);
    }

    /// Applies the cached weights in place, column by column, identically for
    /// every view. Identity when disabled or when no correction is needed.
    pub fn apply(&self, stack: &mut ProjectionStack) -> Result<(), ReconError> {
        if self.disabled {
            return Ok(());
        }
        let Some(weights) = &self.weights else {
            return Ok(());
        };
        if weights.len() != stack.meta.shape[1] {
            return Err(ReconErrorKind::ShapeMismatch {
                what: "displaced detector weights".to_string(),
                expected: [stack.meta.shape[0], weights.len(), stack.meta.shape[2]],
                actual: stack.meta.shape,
            }
            .into());
        }
        for ((_, iu, _), value) in stack.data.indexed_iter_mut() {
            *value *= weights[iu];
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ProjectionMatrix;

    fn one_view_geometry() -> ProjectionGeometry {
        let m: ProjectionMatrix = [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ];
        let mut g = ProjectionGeometry::new();
        g.add_matrix(m);
        g
    }

    #[test]
    fn centered_detector_is_identity() {
        let meta = GridMeta::new([1, 8, 1], [1.0, 1.0, 1.0], [0.0, -3.5, 0.0]);
        let mut stage = DisplacedDetectorWeighting::new();
        stage.bind(&one_view_geometry(), &meta);
        let mut stack = ProjectionStack::from_elem(meta, 1.0);
        stage.apply(&mut stack).unwrap();
        assert!(stack.data.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn conjugate_columns_sum_to_two_in_the_overlap() {
        // Columns at u = -2..5: offset 1.5, overlap half-width 2.
        let meta = GridMeta::new([1, 8, 1], [1.0, 1.0, 1.0], [0.0, -2.0, 0.0]);
        let mut stage = DisplacedDetectorWeighting::new();
        stage.bind(&one_view_geometry(), &meta);

        let mut stack = ProjectionStack::from_elem(meta, 1.0);
        stage.apply(&mut stack).unwrap();

        // u = -1 and u = 1 are conjugates inside the overlap band.
        let w_minus = stack.data[(0, 1, 0)] as f64;
        let w_plus = stack.data[(0, 3, 0)] as f64;
        assert!((w_minus + w_plus - 2.0).abs() < 1e-6);
        // The unmeasured edge is zeroed, the singly-measured side doubled.
        assert!((stack.data[(0, 0, 0)] as f64).abs() < 1e-6);
        assert!((stack.data[(0, 7, 0)] as f64 - 2.0).abs() < 1e-6);
    }

    #[test]
    fn disabled_stage_leaves_data_untouched() {
        let meta = GridMeta::new([1, 8, 1], [1.0, 1.0, 1.0], [0.0, -2.0, 0.0]);
        let mut stage = DisplacedDetectorWeighting::new();
        stage.bind(&one_view_geometry(), &meta);
        stage.set_disable(true);
        let mut stack = ProjectionStack::from_elem(meta, 3.0);
        stage.apply(&mut stack).unwrap();
        assert!(stack.data.iter().all(|&v| v == 3.0));
    }
}
