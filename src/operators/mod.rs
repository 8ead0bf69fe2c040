//! Linear operator contracts for the reconstruction pipeline.
//!
//! Iterative reconstruction never materializes the system matrix. Every
//! algorithm in this crate is written against abstract linear operators whose
//! fundamental actions are forward projection (volume to projection stack) and
//! backprojection (projection stack to volume). This matrix-free approach
//! keeps the solver independent of the ray-traversal strategy:
//!
//! 1. **Generality**: the conjugate gradient recurrence is implemented once
//!    and runs unchanged on the portable voxel-driven pair, on test stubs, or
//!    on an accelerated backend registered at runtime.
//! 2. **Testability**: the same solver is validated on stubs whose results
//!    can be computed analytically, then deployed on the real projectors.
//! 3. **Encapsulation**: parallelization across views or voxels lives inside
//!    the operator implementation and is opaque to the recurrence.
//!
//! The one correctness requirement the pairing must satisfy is adjointness:
//! `<forward(v), p> == <v, backward(p)>` up to floating-point tolerance, for
//! any volume `v` and projection stack `p` over matching grids. The
//! [`validate_adjoint`] diagnostic checks this inner-product identity.

pub mod displaced_detector;
pub mod normal;
pub mod voxel_driven;
pub mod weighting;

use crate::error::{ReconError, ReconErrorKind};
use crate::geometry::ProjectionGeometry;
use crate::image::{ProjectionStack, Volume};

/// Maps a volume to a stack of simulated projections given geometry.
///
/// Implementations write into the pre-allocated `out` buffer so composed
/// operators can reuse scratch storage across iterations. The output must be
/// fully overwritten; the contract is `out = F(volume)`, not accumulation.
pub trait ForwardProjector: Sync {
    fn forward(
        &self,
        volume: &Volume,
        geometry: &ProjectionGeometry,
        out: &mut ProjectionStack,
    ) -> Result<(), ReconError>;
}

/// Maps a projection stack back into volume space (adjoint direction).
///
/// Same in-place contract as [`ForwardProjector`]: `out = B(projections)`.
pub trait BackProjector: Sync {
    fn backward(
        &self,
        projections: &ProjectionStack,
        geometry: &ProjectionGeometry,
        out: &mut Volume,
    ) -> Result<(), ReconError>;
}

/// A matched forward/back projector pair. One backend is one pair; the
/// orchestrator fixes the pair for a whole run and never switches mid-solve.
pub trait ProjectorPair: ForwardProjector + BackProjector {}

impl<T: ForwardProjector + BackProjector> ProjectorPair for T {}

/// Checks the adjoint contract of a projector pair on caller-supplied probe
/// fields, typically random ones.
///
/// Computes both sides of `<F v, p> == <v, B p>` and fails with an adjoint
/// violation when the relative discrepancy exceeds `tolerance`. This is a
/// diagnostic for validation and test builds; a regular solve never runs it.
pub fn validate_adjoint(
    pair: &dyn ProjectorPair,
    geometry: &ProjectionGeometry,
    volume: &Volume,
    projections: &ProjectionStack,
    tolerance: f64,
) -> Result<(), ReconError> {
    let mut fv = ProjectionStack::zeros(projections.meta);
    pair.forward(volume, geometry, &mut fv)?;
    let mut bp = Volume::zeros(volume.meta);
    pair.backward(projections, geometry, &mut bp)?;

    let lhs = fv.dot(projections);
    let rhs = volume.dot(&bp);
    let scale = lhs.abs().max(rhs.abs()).max(f64::EPSILON);
    let discrepancy = (lhs - rhs).abs() / scale;
    if discrepancy > tolerance {
        return Err(ReconErrorKind::AdjointViolation {
            discrepancy,
            tolerance,
        }
        .into());
    }
    Ok(())
}
