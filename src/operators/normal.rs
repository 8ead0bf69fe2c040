//! The regularized normal operator, i.e. the implicit matrix `A` of the
//! conjugate gradient solve.
//!
//! For a candidate volume `x` the operator produces
//!
//! ```text
//! A(x) = S .* Backward( MtM . DisplacedWeight( Forward(x) ) )
//!        + gamma * L(x) + tikhonov * x
//! ```
//!
//! where `L` is the 6-neighbor graph Laplacian and `S` the optional support
//! mask. The mask multiplies only the backprojected data-fidelity term; the
//! input volume and the regularization terms are left unrestricted. The
//! right-hand side and the final output are masked the same way by the
//! orchestrator, which confines the solver's residuals and search directions
//! to the support without touching the fidelity term's interior. This
//! asymmetry is a deliberate preconditioning choice, not an oversight.
//!
//! The geometry is bound once per reconstruction run and shared read-only by
//! every suboperator.

use crate::error::ReconError;
use crate::geometry::ProjectionGeometry;
use crate::image::{GridMeta, ProjectionStack, Volume};
use crate::operators::displaced_detector::DisplacedDetectorWeighting;
use crate::operators::weighting::StatisticalWeighting;
use crate::operators::ProjectorPair;
use crate::solvers::VolumeOperator;

/// `out += gamma * L(x)` where `L` is the 6-neighbor graph Laplacian with
/// Neumann boundary handling: a voxel is penalized only against neighbors
/// that exist, which keeps `L` symmetric positive semi-definite.
fn add_scaled_graph_laplacian(x: &Volume, gamma: f64, out: &mut Volume) {
    let (nz, ny, nx) = x.meta.dim();
    let g = gamma as f32;
    for iz in 0..nz {
        for iy in 0..ny {
            for ix in 0..nx {
                let center = x.data[(iz, iy, ix)];
                let mut acc = 0.0f32;
                if iz > 0 {
                    acc += center - x.data[(iz - 1, iy, ix)];
                }
                if iz + 1 < nz {
                    acc += center - x.data[(iz + 1, iy, ix)];
                }
                if iy > 0 {
                    acc += center - x.data[(iz, iy - 1, ix)];
                }
                if iy + 1 < ny {
                    acc += center - x.data[(iz, iy + 1, ix)];
                }
                if ix > 0 {
                    acc += center - x.data[(iz, iy, ix - 1)];
                }
                if ix + 1 < nx {
                    acc += center - x.data[(iz, iy, ix + 1)];
                }
                out.data[(iz, iy, ix)] += g * acc;
            }
        }
    }
}

/// The composed operator `A` applied by every CG iteration.
pub struct RegularizedNormalOperator<'a> {
    projector: &'a dyn ProjectorPair,
    geometry: &'a ProjectionGeometry,
    displaced: &'a DisplacedDetectorWeighting,
    weighting: StatisticalWeighting<'a>,
    mask: Option<&'a Volume>,
    gamma: f64,
    tikhonov: f64,
    proj_scratch: ProjectionStack,
}

impl<'a> RegularizedNormalOperator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        projector: &'a dyn ProjectorPair,
        geometry: &'a ProjectionGeometry,
        displaced: &'a DisplacedDetectorWeighting,
        weighting: StatisticalWeighting<'a>,
        mask: Option<&'a Volume>,
        gamma: f64,
        tikhonov: f64,
        projection_meta: GridMeta,
    ) -> Self {
        Self {
            projector,
            geometry,
            displaced,
            weighting,
            mask,
            gamma,
            tikhonov,
            proj_scratch: ProjectionStack::zeros(projection_meta),
        }
    }
}

impl VolumeOperator for RegularizedNormalOperator<'_> {
    fn apply(&mut self, x: &Volume, out: &mut Volume) -> Result<(), ReconError> {
        // Data-fidelity term: Backward(MtM . DisplacedWeight(Forward(x))).
        self.projector
            .forward(x, self.geometry, &mut self.proj_scratch)?;
        self.displaced.apply(&mut self.proj_scratch)?;
        self.weighting.apply(&mut self.proj_scratch)?;
        self.projector
            .backward(&self.proj_scratch, self.geometry, out)?;

        if let Some(mask) = self.mask {
            out.multiply_by(mask);
        }
        if self.gamma != 0.0 {
            add_scaled_graph_laplacian(x, self.gamma, out);
        }
        if self.tikhonov != 0.0 {
            out.scaled_add(self.tikhonov, x);
        }
        Ok(())
    }
}
