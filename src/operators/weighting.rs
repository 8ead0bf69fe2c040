//! Statistical (generalized least squares) weighting stage.
//!
//! For GLS minimization the projection-domain residuals are weighted by an
//! estimated inverse covariance. The supplied field is the diagonal of
//! `M^T M` itself, one scalar per projection pixel, so applying the stage is
//! a single elementwise product. The stage participates twice in the
//! pipeline: when building the right-hand side from the measured projections
//! and inside the normal operator's data-fidelity term.

use crate::error::ReconError;
use crate::image::ProjectionStack;

/// Optional per-pixel inverse-covariance weighting of projection-domain data.
///
/// When no weights are present the stage is skipped entirely rather than
/// multiplied through; running it with unit weights would produce the same
/// numbers, just slower.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatisticalWeighting<'a> {
    weights: Option<&'a ProjectionStack>,
}

impl<'a> StatisticalWeighting<'a> {
    pub fn new(weights: Option<&'a ProjectionStack>) -> Self {
        Self { weights }
    }

    pub fn is_active(&self) -> bool {
        self.weights.is_some()
    }

    /// Multiplies the buffer elementwise by `M^T M`. No-op without weights.
    pub fn apply(&self, buffer: &mut ProjectionStack) -> Result<(), ReconError> {
        if let Some(weights) = self.weights {
            weights
                .meta
                .ensure_same_shape(&buffer.meta, "inverse covariance weights")?;
            buffer.multiply_by(weights);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::GridMeta;

    #[test]
    fn absent_weights_short_circuit() {
        let meta = GridMeta::new([2, 2, 1], [1.0; 3], [0.0; 3]);
        let mut buffer = ProjectionStack::from_elem(meta, 7.0);
        let stage = StatisticalWeighting::new(None);
        assert!(!stage.is_active());
        stage.apply(&mut buffer).unwrap();
        assert!(buffer.data.iter().all(|&v| v == 7.0));
    }

    #[test]
    fn weights_multiply_elementwise() {
        let meta = GridMeta::new([2, 2, 1], [1.0; 3], [0.0; 3]);
        let mut weights = ProjectionStack::from_elem(meta, 0.5);
        weights.data[(0, 0, 0)] = 2.0;
        let mut buffer = ProjectionStack::from_elem(meta, 4.0);
        StatisticalWeighting::new(Some(&weights))
            .apply(&mut buffer)
            .unwrap();
        assert_eq!(buffer.data[(0, 0, 0)], 8.0);
        assert_eq!(buffer.data[(1, 1, 0)], 2.0);
    }

    #[test]
    fn mismatched_weights_are_rejected() {
        let meta = GridMeta::new([2, 2, 1], [1.0; 3], [0.0; 3]);
        let other = GridMeta::new([2, 3, 1], [1.0; 3], [0.0; 3]);
        let weights = ProjectionStack::from_elem(other, 1.0);
        let mut buffer = ProjectionStack::from_elem(meta, 1.0);
        let err = StatisticalWeighting::new(Some(&weights))
            .apply(&mut buffer)
            .unwrap_err();
        assert!(err.to_string().contains("inverse covariance weights"));
    }
}
