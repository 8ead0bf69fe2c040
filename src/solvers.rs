//! Matrix-free conjugate gradient solver.
//!
//! Solves `A x = B` for a symmetric positive semi-definite operator `A` that
//! is only available through its action on a volume. The recurrence is the
//! textbook one: with residual `r_k = B - A x_k` and conjugate direction
//! `p_k`,
//!
//! ```text
//! alpha_k = <r_k, r_k> / <p_k, A p_k>
//! x_{k+1} = x_k + alpha_k p_k
//! r_{k+1} = r_k - alpha_k A p_k
//! beta_k  = <r_{k+1}, r_{k+1}> / <r_k, r_k>
//! p_{k+1} = r_{k+1} + beta_k p_k
//! ```
//!
//! Iteration `k+1` depends on the full result of iteration `k`; there is no
//! cross-iteration parallelism. Whatever parallelism exists lives inside the
//! operator application and is invisible here.
//!
//! Numerical non-convergence is not an error: the solver always returns the
//! iterate it reached at the configured stop condition, and interpreting
//! reconstruction quality is the caller's responsibility.

use crate::error::ReconError;
use crate::image::Volume;

/// An implicit symmetric linear operator on volumes, `out = A(x)`.
///
/// `apply` takes `&mut self` so implementations can reuse internal scratch
/// buffers across iterations.
pub trait VolumeOperator {
    fn apply(&mut self, x: &Volume, out: &mut Volume) -> Result<(), ReconError>;
}

/// Lifecycle of a [`SolverState`]. There is no transition back to
/// `Initialized`; a new solve builds a new state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SolverPhase {
    Initialized,
    Iterating,
    Terminated,
}

/// Exclusive working state of one solve: the current iterate, residual,
/// conjugate direction, an `A p` scratch buffer, and the iteration counter.
/// Created at solver start, mutated each iteration, consumed when the final
/// iterate is extracted; never shared outside the solver.
struct SolverState {
    x: Volume,
    r: Volume,
    p: Volume,
    ap: Volume,
    iterations_run: usize,
    phase: SolverPhase,
    costs: Option<Vec<f64>>,
}

impl SolverState {
    fn new<A: VolumeOperator>(
        a: &mut A,
        b: &Volume,
        x0: Volume,
        track_cost: bool,
    ) -> Result<Self, ReconError> {
        // r_0 = B - A x_0, p_0 = r_0.
        let mut r = b.clone();
        let mut ax0 = Volume::zeros(x0.meta);
        a.apply(&x0, &mut ax0)?;
        r.scaled_add(-1.0, &ax0);
        let p = r.clone();
        let ap = ax0; // reused as the A p scratch buffer
        Ok(Self {
            x: x0,
            r,
            p,
            ap,
            iterations_run: 0,
            phase: SolverPhase::Initialized,
            costs: track_cost.then(Vec::new),
        })
    }
}

/// Configuration of a conjugate gradient solve.
///
/// Two independent stopping policies may be active: the fixed iteration
/// budget `iterations` (always enforced as an upper bound) and, when
/// `target_ssd_between_iterates > 0`, an early stop triggered as soon as the
/// sum of squared differences between consecutive iterates falls below the
/// target. A target of 0 disables the early stop.
#[derive(Debug, Clone, Copy)]
pub struct ConjugateGradientSolver {
    pub iterations: usize,
    pub target_ssd_between_iterates: f64,
    /// Track the GLS objective value at each iterate as a diagnostic.
    pub track_cost: bool,
    /// Constant part of the objective, `0.5 <MtM m, m>` over the measured
    /// projections; supplied by the orchestrator so the per-iteration numbers
    /// are absolute costs rather than offsets.
    pub cost_constant: f64,
}

impl ConjugateGradientSolver {
    pub fn new(iterations: usize) -> Self {
        Self {
            iterations,
            target_ssd_between_iterates: 0.0,
            track_cost: false,
            cost_constant: 0.0,
        }
    }
}

/// Result of a solve: the final iterate, how many iterations actually ran,
/// and the optional per-iteration cost history.
#[derive(Debug)]
pub struct SolveOutput {
    pub x: Volume,
    pub iterations_run: usize,
    pub costs: Option<Vec<f64>>,
}

impl ConjugateGradientSolver {
    /// Runs the CG recurrence on `(a, b, x0)` and returns the iterate at the
    /// stop condition, whichever policy triggered it.
    pub fn solve<A: VolumeOperator>(
        &self,
        a: &mut A,
        b: &Volume,
        x0: Volume,
    ) -> Result<SolveOutput, ReconError> {
        if !(self.target_ssd_between_iterates >= 0.0) {
            return Err(ReconError::config(
                "target sum of squares between iterates must be non-negative",
            ));
        }
        b.meta.ensure_same_shape(&x0.meta, "initial volume estimate")?;

        let mut state = SolverState::new(a, b, x0, self.track_cost)?;
        debug_assert_eq!(state.phase, SolverPhase::Initialized);
        state.phase = SolverPhase::Iterating;
        let mut rr = state.r.norm_sq();

        for _ in 0..self.iterations {
            // Cost tracking is a pure side channel computed before the
            // update; it never alters the iterate sequence. Using
            // A x = B - r avoids an extra operator application:
            // 0.5 <A x, x> - <B, x> + c = c - 0.5 (<B, x> + <r, x>).
            if let Some(costs) = &mut state.costs {
                costs.push(self.cost_constant - 0.5 * (b.dot(&state.x) + state.r.dot(&state.x)));
            }

            // A vanishing residual means the system is solved exactly.
            if rr == 0.0 {
                break;
            }

            a.apply(&state.p, &mut state.ap)?;
            let p_ap = state.p.dot(&state.ap);
            // For a PSD operator <p, A p> >= 0; a null direction with a
            // nonzero residual cannot make further progress.
            if !(p_ap > 0.0) {
                break;
            }

            let alpha = rr / p_ap;
            state.x.scaled_add(alpha, &state.p);
            state.r.scaled_add(-alpha, &state.ap);
            state.iterations_run += 1;

            if self.target_ssd_between_iterates > 0.0 {
                // ||x_{k+1} - x_k||^2 = alpha^2 <p, p>.
                let ssd = alpha * alpha * state.p.norm_sq();
                if ssd < self.target_ssd_between_iterates {
                    break;
                }
            }

            let rr_next = state.r.norm_sq();
            let beta = (rr_next / rr) as f32;
            state
                .p
                .data
                .zip_mut_with(&state.r.data, |p, &r| *p = r + beta * *p);
            rr = rr_next;
        }

        state.phase = SolverPhase::Terminated;
        Ok(SolveOutput {
            x: state.x,
            iterations_run: state.iterations_run,
            costs: state.costs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::GridMeta;

    /// Diagonal test operator: `A x = d .* x`.
    struct DiagonalOperator {
        diagonal: Volume,
    }

    impl VolumeOperator for DiagonalOperator {
        fn apply(&mut self, x: &Volume, out: &mut Volume) -> Result<(), ReconError> {
            out.data.assign(&x.data);
            out.multiply_by(&self.diagonal);
            Ok(())
        }
    }

    fn meta() -> GridMeta {
        GridMeta::new([2, 2, 2], [1.0; 3], [0.0; 3])
    }

    #[test]
    fn scaled_identity_converges_in_one_iteration() {
        let lambda = 4.0;
        let mut a = DiagonalOperator {
            diagonal: Volume::from_elem(meta(), lambda),
        };
        let b = Volume::from_elem(meta(), 2.0);
        let solver = ConjugateGradientSolver::new(1);
        let out = solver.solve(&mut a, &b, Volume::zeros(meta())).unwrap();
        assert_eq!(out.iterations_run, 1);
        for &v in out.x.data.iter() {
            assert!((v - 2.0 / lambda).abs() < 1e-6);
        }
    }

    #[test]
    fn diagonal_system_converges_to_elementwise_quotient() {
        let mut diagonal = Volume::zeros(meta());
        for (i, v) in diagonal.data.iter_mut().enumerate() {
            *v = (i + 1) as f32;
        }
        let mut a = DiagonalOperator { diagonal };
        let b = Volume::from_elem(meta(), 1.0);
        let solver = ConjugateGradientSolver::new(20);
        let out = solver.solve(&mut a, &b, Volume::zeros(meta())).unwrap();
        for (i, &v) in out.x.data.iter().enumerate() {
            assert!((v - 1.0 / (i + 1) as f32).abs() < 1e-4);
        }
    }

    #[test]
    fn zero_iteration_budget_returns_the_initial_iterate() {
        let mut a = DiagonalOperator {
            diagonal: Volume::from_elem(meta(), 1.0),
        };
        let b = Volume::from_elem(meta(), 3.0);
        let x0 = Volume::from_elem(meta(), 9.0);
        let out = solver_with_budget(0).solve(&mut a, &b, x0).unwrap();
        assert_eq!(out.iterations_run, 0);
        assert!(out.x.data.iter().all(|&v| v == 9.0));
    }

    #[test]
    fn cost_history_is_recorded_per_iteration_and_decreases() {
        let mut diagonal = Volume::zeros(meta());
        for (i, v) in diagonal.data.iter_mut().enumerate() {
            *v = 1.0 + (i % 3) as f32;
        }
        let mut a = DiagonalOperator { diagonal };
        let b = Volume::from_elem(meta(), 1.0);
        let mut solver = ConjugateGradientSolver::new(5);
        solver.track_cost = true;
        let out = solver.solve(&mut a, &b, Volume::zeros(meta())).unwrap();
        let costs = out.costs.unwrap();
        assert!(!costs.is_empty() && costs.len() <= 5);
        // CG minimizes the objective over a growing Krylov subspace, so the
        // recorded costs must be non-increasing.
        for pair in costs.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-9);
        }
    }

    #[test]
    fn negative_target_ssd_is_a_configuration_error() {
        let mut a = DiagonalOperator {
            diagonal: Volume::from_elem(meta(), 1.0),
        };
        let b = Volume::from_elem(meta(), 1.0);
        let mut solver = ConjugateGradientSolver::new(1);
        solver.target_ssd_between_iterates = -1.0;
        let err = solver.solve(&mut a, &b, Volume::zeros(meta())).unwrap_err();
        assert!(err.to_string().starts_with("Invalid configuration"));
    }

    fn solver_with_budget(n: usize) -> ConjugateGradientSolver {
        ConjugateGradientSolver::new(n)
    }
}
