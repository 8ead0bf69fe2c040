//! Reconstruction orchestrator: wires geometry, projectors, weighting stages,
//! regularization, and the conjugate gradient solver into a runtime pipeline.
//!
//! Execution is split in two phases, mirroring a lazy dataflow contract:
//!
//! - **Metadata phase** ([`configure`](ConjugateGradientReconstruction::configure)):
//!   validates every parameter, infers the output grid (identical to the input
//!   volume grid), selects the backend, and caches the displaced-detector
//!   weight profile. No pixel data is touched. The phase is idempotent and
//!   must be re-run whenever any upstream parameter changes.
//! - **Execution phase** ([`run`](ConjugateGradientReconstruction::run)):
//!   numerical work only. Builds the right-hand side, drives the solver,
//!   applies the final mask multiplication, and releases intermediate buffers
//!   at their last use.
//!
//! Backend selection follows a strategy pattern: the portable voxel-driven
//! pair is the default, and an accelerated [`ProjectorPair`] registered at
//! runtime is used instead when requested. The chosen backend is fixed for
//! the whole run.

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{ReconError, ReconErrorKind};
use crate::geometry::ProjectionGeometry;
use crate::image::{GridMeta, ProjectionStack, Volume};
use crate::operators::displaced_detector::DisplacedDetectorWeighting;
use crate::operators::normal::RegularizedNormalOperator;
use crate::operators::voxel_driven::VoxelDrivenProjector;
use crate::operators::weighting::StatisticalWeighting;
use crate::operators::ProjectorPair;
use crate::solvers::ConjugateGradientSolver;
use crate::utils::perf::peak_rss_kb;

/// Runtime parameters of a reconstruction, mirroring the caller-facing
/// `configure(...)` contract.
#[derive(Debug, Clone, Copy)]
pub struct ReconstructionConfig {
    /// CG iteration budget, always enforced as an upper bound.
    pub iterations: usize,
    /// Weight of the Laplacian smoothness regularizer.
    pub gamma: f64,
    /// Weight of the Tikhonov regularizer.
    pub tikhonov: f64,
    /// Whether a support mask will be supplied to `run`.
    pub enable_mask: bool,
    /// Whether inverse-covariance weights will be supplied to `run`.
    pub enable_weighting: bool,
    /// Bypass the displaced detector correction (identity weighting).
    pub disable_displaced_detector: bool,
    /// Early-stop threshold on the sum of squared differences between
    /// consecutive iterates; 0 disables the check.
    pub target_ssd_between_iterates: f64,
    /// Measure and log wall-clock duration and peak memory.
    pub measure_times: bool,
    /// Record the objective value at every iterate.
    pub track_iteration_cost: bool,
    /// Use the registered accelerated backend when present.
    pub prefer_accelerated: bool,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            iterations: 3,
            gamma: 0.0,
            tikhonov: 0.0,
            enable_mask: false,
            enable_weighting: false,
            disable_displaced_detector: false,
            target_ssd_between_iterates: 0.0,
            measure_times: false,
            track_iteration_cost: false,
            prefer_accelerated: false,
        }
    }
}

/// Which projector pair drives the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    Portable,
    Accelerated,
}

/// Everything the metadata phase resolved; consumed read-only by `run`.
struct ReconPlan {
    geometry: ProjectionGeometry,
    volume_meta: GridMeta,
    projection_meta: GridMeta,
    displaced: DisplacedDetectorWeighting,
    backend: Backend,
}

/// Output of a reconstruction run.
#[derive(Debug)]
pub struct Reconstruction {
    pub volume: Volume,
    /// Objective value per iteration, when tracking was enabled.
    pub iteration_costs: Option<Vec<f64>>,
    /// Wall-clock duration of the solve, when measurement was enabled.
    pub elapsed: Option<Duration>,
}

/// The iterative cone-beam reconstruction pipeline.
pub struct ConjugateGradientReconstruction {
    config: ReconstructionConfig,
    portable: VoxelDrivenProjector,
    accelerated: Option<Box<dyn ProjectorPair>>,
    plan: Option<ReconPlan>,
}

impl ConjugateGradientReconstruction {
    pub fn new(config: ReconstructionConfig) -> Self {
        Self {
            config,
            portable: VoxelDrivenProjector,
            accelerated: None,
            plan: None,
        }
    }

    pub fn config(&self) -> &ReconstructionConfig {
        &self.config
    }

    /// Replaces the configuration and invalidates any existing plan; a new
    /// metadata phase is required before the next run.
    pub fn set_config(&mut self, config: ReconstructionConfig) {
        self.config = config;
        self.plan = None;
    }

    /// Registers an accelerated projector pair. It is only used when
    /// `prefer_accelerated` is set at the next `configure`.
    pub fn register_accelerated(&mut self, pair: Box<dyn ProjectorPair>) {
        self.accelerated = Some(pair);
        self.plan = None;
    }

    /// Metadata phase: validates parameters and grid metadata, selects the
    /// backend, and caches derived weights. Touches no pixel data. Re-running
    /// replaces the previous plan wholesale.
    pub fn configure(
        &mut self,
        geometry: &ProjectionGeometry,
        volume_meta: GridMeta,
        projection_meta: GridMeta,
    ) -> Result<(), ReconError> {
        if geometry.is_empty() {
            return Err(ReconError::config("geometry holds no projection matrices"));
        }
        if geometry.len() != projection_meta.shape[2] {
            return Err(ReconErrorKind::ViewCountMismatch {
                geometry_views: geometry.len(),
                stack_views: projection_meta.shape[2],
            }
            .into());
        }
        if volume_meta.shape.iter().any(|&n| n == 0) {
            return Err(ReconError::config("volume grid has an empty axis"));
        }
        if projection_meta.shape[..2].iter().any(|&n| n == 0) {
            return Err(ReconError::config("projection grid has an empty axis"));
        }
        for &s in volume_meta
            .spacing
            .iter()
            .chain(projection_meta.spacing[..2].iter())
        {
            if !(s.is_finite() && s != 0.0) {
                return Err(ReconError::config("grid spacing must be finite and nonzero"));
            }
        }
        if !(self.config.gamma.is_finite() && self.config.gamma >= 0.0) {
            return Err(ReconError::config("gamma must be finite and non-negative"));
        }
        if !(self.config.tikhonov.is_finite() && self.config.tikhonov >= 0.0) {
            return Err(ReconError::config(
                "tikhonov weight must be finite and non-negative",
            ));
        }
        if !(self.config.target_ssd_between_iterates.is_finite()
            && self.config.target_ssd_between_iterates >= 0.0)
        {
            return Err(ReconError::config(
                "target sum of squares between iterates must be finite and non-negative",
            ));
        }

        let backend = if self.config.prefer_accelerated {
            if self.accelerated.is_some() {
                Backend::Accelerated
            } else {
                warn!("accelerated backend requested but none registered; using portable projectors");
                Backend::Portable
            }
        } else {
            Backend::Portable
        };
        debug!("reconstruction backend: {backend:?}");

        let mut displaced = DisplacedDetectorWeighting::new();
        displaced.set_disable(self.config.disable_displaced_detector);
        displaced.bind(geometry, &projection_meta);

        // The reconstructed volume lives on the same grid as the input
        // estimate, so output shape inference is the identity here.
        self.plan = Some(ReconPlan {
            geometry: geometry.clone(),
            volume_meta,
            projection_meta,
            displaced,
            backend,
        });
        Ok(())
    }

    /// Execution phase: runs the solver and returns exactly one output
    /// volume, plus the optional diagnostics enabled in the configuration.
    pub fn run(
        &self,
        measured: &ProjectionStack,
        initial: &Volume,
        mask: Option<&Volume>,
        weights: Option<&ProjectionStack>,
    ) -> Result<Reconstruction, ReconError> {
        let plan = self
            .plan
            .as_ref()
            .ok_or_else(|| ReconError::config("run requires a successful configure"))?;

        plan.projection_meta
            .ensure_same_shape(&measured.meta, "measured projections")?;
        plan.volume_meta
            .ensure_same_shape(&initial.meta, "initial volume estimate")?;
        let mask = self.checked_mask(plan, mask)?;
        let weights = self.checked_weights(plan, weights)?;

        let start = self.config.measure_times.then(Instant::now);

        let projector: &dyn ProjectorPair = match (plan.backend, self.accelerated.as_deref()) {
            (Backend::Accelerated, Some(pair)) => pair,
            _ => &self.portable,
        };
        let weighting = StatisticalWeighting::new(weights);

        // Right-hand side: B = S .* Backward(MtM . DisplacedWeight(measured)).
        let mut weighted = measured.clone();
        plan.displaced.apply(&mut weighted)?;
        weighting.apply(&mut weighted)?;

        // Constant part of the objective, 0.5 <MtM m, m>, evaluated while the
        // weighted projections are still alive.
        let cost_constant = if self.config.track_iteration_cost {
            0.5 * weighted.dot(measured)
        } else {
            0.0
        };

        let mut b = Volume::zeros(plan.volume_meta);
        projector.backward(&weighted, &plan.geometry, &mut b)?;
        drop(weighted); // transient, released before the solve
        if let Some(mask) = mask {
            b.multiply_by(mask);
        }

        let mut operator = RegularizedNormalOperator::new(
            projector,
            &plan.geometry,
            &plan.displaced,
            weighting,
            mask,
            self.config.gamma,
            self.config.tikhonov,
            plan.projection_meta,
        );
        let solver = ConjugateGradientSolver {
            iterations: self.config.iterations,
            target_ssd_between_iterates: self.config.target_ssd_between_iterates,
            track_cost: self.config.track_iteration_cost,
            cost_constant,
        };
        let solve = solver.solve(&mut operator, &b, initial.clone())?;
        drop(b);

        let mut volume = solve.x;
        if let Some(mask) = mask {
            volume.multiply_by(mask);
        }

        let elapsed = start.map(|t| t.elapsed());
        if let Some(elapsed) = elapsed {
            info!(
                "conjugate gradient solve finished in {elapsed:?} ({} iterations, peak RSS {} kB)",
                solve.iterations_run,
                peak_rss_kb()
            );
        }

        Ok(Reconstruction {
            volume,
            iteration_costs: solve.costs,
            elapsed,
        })
    }

    fn checked_mask<'m>(
        &self,
        plan: &ReconPlan,
        mask: Option<&'m Volume>,
    ) -> Result<Option<&'m Volume>, ReconError> {
        match (self.config.enable_mask, mask) {
            (true, Some(mask)) => {
                plan.volume_meta.ensure_same_shape(&mask.meta, "support mask")?;
                Ok(Some(mask))
            }
            (true, None) => Err(ReconError::config("support mask enabled but not supplied")),
            (false, Some(_)) => Err(ReconError::config("support mask supplied but not enabled")),
            (false, None) => Ok(None),
        }
    }

    fn checked_weights<'w>(
        &self,
        plan: &ReconPlan,
        weights: Option<&'w ProjectionStack>,
    ) -> Result<Option<&'w ProjectionStack>, ReconError> {
        match (self.config.enable_weighting, weights) {
            (true, Some(weights)) => {
                plan.projection_meta
                    .ensure_same_shape(&weights.meta, "inverse covariance weights")?;
                Ok(Some(weights))
            }
            (true, None) => Err(ReconError::config(
                "statistical weighting enabled but no weights supplied",
            )),
            (false, Some(_)) => Err(ReconError::config(
                "inverse covariance weights supplied but weighting not enabled",
            )),
            (false, None) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ProjectionMatrix;

    fn parallel_view(theta: f64) -> ProjectionMatrix {
        [
            [theta.cos(), 0.0, -theta.sin(), 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }

    fn two_view_geometry() -> ProjectionGeometry {
        let mut g = ProjectionGeometry::new();
        g.add_matrix(parallel_view(0.0));
        g.add_matrix(parallel_view(std::f64::consts::FRAC_PI_2));
        g
    }

    fn metas() -> (GridMeta, GridMeta) {
        (
            GridMeta::new([4, 4, 4], [1.0; 3], [-1.5; 3]),
            GridMeta::new([4, 4, 2], [1.0, 1.0, 1.0], [-1.5, -1.5, 0.0]),
        )
    }

    #[test]
    fn configure_rejects_view_count_mismatch() {
        let (vol, proj) = metas();
        let mut geometry = two_view_geometry();
        geometry.add_matrix(parallel_view(1.0));
        let mut recon = ConjugateGradientReconstruction::new(ReconstructionConfig::default());
        let err = recon.configure(&geometry, vol, proj).unwrap_err();
        assert!(err.to_string().starts_with("View count mismatch"));
    }

    #[test]
    fn configure_rejects_negative_regularization() {
        let (vol, proj) = metas();
        let config = ReconstructionConfig {
            gamma: -0.5,
            ..Default::default()
        };
        let mut recon = ConjugateGradientReconstruction::new(config);
        let err = recon.configure(&two_view_geometry(), vol, proj).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: gamma must be finite and non-negative"
        );
    }

    #[test]
    fn run_before_configure_fails_fast() {
        let (vol, proj) = metas();
        let recon = ConjugateGradientReconstruction::new(ReconstructionConfig::default());
        let measured = ProjectionStack::zeros(proj);
        let initial = Volume::zeros(vol);
        let err = recon.run(&measured, &initial, None, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: run requires a successful configure"
        );
    }

    #[test]
    fn mask_flag_and_argument_must_agree() {
        let (vol, proj) = metas();
        let config = ReconstructionConfig {
            enable_mask: true,
            iterations: 1,
            ..Default::default()
        };
        let mut recon = ConjugateGradientReconstruction::new(config);
        recon.configure(&two_view_geometry(), vol, proj).unwrap();
        let measured = ProjectionStack::from_elem(proj, 1.0);
        let initial = Volume::zeros(vol);
        let err = recon.run(&measured, &initial, None, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: support mask enabled but not supplied"
        );
    }

    #[test]
    fn configure_is_idempotent_and_rerunnable() {
        let (vol, proj) = metas();
        let mut recon = ConjugateGradientReconstruction::new(ReconstructionConfig::default());
        let geometry = two_view_geometry();
        recon.configure(&geometry, vol, proj).unwrap();
        recon.configure(&geometry, vol, proj).unwrap();
    }

    #[test]
    fn portable_run_produces_a_finite_volume() {
        let (vol, proj) = metas();
        let config = ReconstructionConfig {
            iterations: 2,
            measure_times: true,
            ..Default::default()
        };
        let mut recon = ConjugateGradientReconstruction::new(config);
        recon.configure(&two_view_geometry(), vol, proj).unwrap();

        let measured = ProjectionStack::from_elem(proj, 1.0);
        let initial = Volume::zeros(vol);
        let result = recon.run(&measured, &initial, None, None).unwrap();
        assert_eq!(result.volume.meta, vol);
        assert!(result.elapsed.is_some());
        assert!(result.volume.data.iter().all(|v| v.is_finite()));
    }
}
