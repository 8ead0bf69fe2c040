//! In-memory grid data model: volumes and projection stacks.
//!
//! Both containers pair an [`ndarray::Array3`] of `f32` samples with explicit
//! shape, spacing, and origin metadata ([`GridMeta`]). The conjugate gradient
//! recurrence only ever needs a handful of vector-space operations on these
//! grids (dot products, scaled in-place updates, elementwise masking), all of
//! which accumulate in `f64` to keep the scalar CG coefficients stable on
//! large volumes.
//!
//! A support mask is simply a [`Volume`] over the same grid as the candidate
//! volume; per-pixel inverse covariance weights are a [`ProjectionStack`] over
//! the same grid as the measured projections.

use ndarray::Array3;

use crate::error::{ReconError, ReconErrorKind};

/// Shape, spacing, and origin of a regular 3-D grid.
///
/// For volumes the index order is `(z, y, x)`; for projection stacks it is
/// `(v, u, view)` with the last axis indexing the acquired view. `spacing` and
/// `origin` are per-axis physical quantities in the same index order, so the
/// physical coordinate along axis `a` of index `i` is
/// `origin[a] + i * spacing[a]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridMeta {
    pub shape: [usize; 3],
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
}

impl GridMeta {
    pub fn new(shape: [usize; 3], spacing: [f64; 3], origin: [f64; 3]) -> Self {
        Self {
            shape,
            spacing,
            origin,
        }
    }

    #[inline]
    pub fn dim(&self) -> (usize, usize, usize) {
        (self.shape[0], self.shape[1], self.shape[2])
    }

    /// Physical coordinate of a grid index, per axis.
    #[inline]
    pub fn position(&self, index: [usize; 3]) -> [f64; 3] {
        [
            self.origin[0] + index[0] as f64 * self.spacing[0],
            self.origin[1] + index[1] as f64 * self.spacing[1],
            self.origin[2] + index[2] as f64 * self.spacing[2],
        ]
    }

    pub(crate) fn ensure_same_shape(&self, other: &GridMeta, what: &str) -> Result<(), ReconError> {
        if self.shape == other.shape {
            Ok(())
        } else {
            Err(ReconErrorKind::ShapeMismatch {
                what: what.to_string(),
                expected: self.shape,
                actual: other.shape,
            }
            .into())
        }
    }
}

fn dot_arrays(a: &Array3<f32>, b: &Array3<f32>) -> f64 {
    debug_assert_eq!(a.dim(), b.dim());
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| x as f64 * y as f64)
        .sum()
}

/// A 3-D scalar field over a regular grid, index order `(z, y, x)`.
#[derive(Debug, Clone)]
pub struct Volume {
    pub meta: GridMeta,
    pub data: Array3<f32>,
}

impl Volume {
    pub fn zeros(meta: GridMeta) -> Self {
        Self {
            meta,
            data: Array3::zeros(meta.dim()),
        }
    }

    pub fn from_elem(meta: GridMeta, value: f32) -> Self {
        Self {
            meta,
            data: Array3::from_elem(meta.dim(), value),
        }
    }

    /// Euclidean inner product with `f64` accumulation.
    pub fn dot(&self, other: &Volume) -> f64 {
        dot_arrays(&self.data, &other.data)
    }

    pub fn norm_sq(&self) -> f64 {
        self.dot(self)
    }

    /// `self += alpha * other`.
    pub fn scaled_add(&mut self, alpha: f64, other: &Volume) {
        self.data.scaled_add(alpha as f32, &other.data);
    }

    /// Elementwise product, used for support-mask restriction.
    pub fn multiply_by(&mut self, other: &Volume) {
        self.data.zip_mut_with(&other.data, |a, &b| *a *= b);
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }
}

/// A stack of 2-D projections, index order `(v, u, view)`.
#[derive(Debug, Clone)]
pub struct ProjectionStack {
    pub meta: GridMeta,
    pub data: Array3<f32>,
}

impl ProjectionStack {
    pub fn zeros(meta: GridMeta) -> Self {
        Self {
            meta,
            data: Array3::zeros(meta.dim()),
        }
    }

    pub fn from_elem(meta: GridMeta, value: f32) -> Self {
        Self {
            meta,
            data: Array3::from_elem(meta.dim(), value),
        }
    }

    /// Number of views, i.e. the length of the last axis.
    pub fn n_views(&self) -> usize {
        self.meta.shape[2]
    }

    pub fn dot(&self, other: &ProjectionStack) -> f64 {
        dot_arrays(&self.data, &other.data)
    }

    /// Elementwise product, used for inverse-covariance weighting.
    pub fn multiply_by(&mut self, other: &ProjectionStack) {
        self.data.zip_mut_with(&other.data, |a, &b| *a *= b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> GridMeta {
        GridMeta::new([2, 3, 4], [1.0, 0.5, 0.5], [-0.5, -0.75, -1.0])
    }

    #[test]
    fn position_uses_spacing_and_origin() {
        let m = meta();
        assert_eq!(m.position([0, 0, 0]), [-0.5, -0.75, -1.0]);
        assert_eq!(m.position([1, 2, 3]), [0.5, 0.25, 0.5]);
    }

    #[test]
    fn dot_and_scaled_add_agree_with_manual_computation() {
        let mut x = Volume::from_elem(meta(), 2.0);
        let y = Volume::from_elem(meta(), 3.0);
        let n = (2 * 3 * 4) as f64;
        assert_eq!(x.dot(&y), 6.0 * n);

        x.scaled_add(-0.5, &y);
        assert_eq!(x.data[(0, 0, 0)], 0.5);
        assert_eq!(x.norm_sq(), 0.25 * n);
    }

    #[test]
    fn shape_mismatch_is_reported_with_context() {
        let a = meta();
        let b = GridMeta::new([2, 3, 5], a.spacing, a.origin);
        let err = a.ensure_same_shape(&b, "support mask").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Shape mismatch for support mask: expected [2, 3, 4], got [2, 3, 5]."
        );
    }

    #[test]
    fn masking_is_elementwise() {
        let mut x = Volume::from_elem(meta(), 5.0);
        let mut mask = Volume::zeros(meta());
        mask.data[(1, 1, 1)] = 1.0;
        x.multiply_by(&mask);
        assert_eq!(x.data[(1, 1, 1)], 5.0);
        assert_eq!(x.data[(0, 0, 0)], 0.0);
    }
}
