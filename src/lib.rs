//! Iterative, regularized cone-beam reconstruction by matrix-free conjugate
//! gradient.
//!
//! This crate reconstructs a 3-D volume from a set of 2-D cone-beam X-ray
//! projections by solving the regularized normal equations
//!
//! ```text
//! ( Bw Mw F  +  gamma L  +  tikhonov I ) x  =  Bw Mw m
//! ```
//!
//! where `F` is forward projection, `Bw` backprojection of displaced-detector
//! weighted data, `Mw` the optional inverse-covariance (GLS) weighting, `L` a
//! Laplacian smoothness operator, and `m` the measured projections. The
//! system matrix is never materialized: every conjugate gradient iteration
//! applies the composed operator to the current search direction, so the
//! solver runs unchanged on the portable CPU projectors, on analytically
//! trivial test stubs, or on an accelerated backend registered at runtime.
//!
//! ## Pipeline
//!
//! - [`geometry::ProjectionGeometry`] holds one 3x4 homogeneous matrix per
//!   acquired view, append-only and then frozen for the run.
//! - [`operators`] defines the forward/back projector contracts (formal
//!   adjoints of one another, checked by
//!   [`operators::validate_adjoint`]), the displaced-detector and
//!   statistical weighting stages, and the composed
//!   [`operators::normal::RegularizedNormalOperator`].
//! - [`solvers::ConjugateGradientSolver`] drives the recurrence with a fixed
//!   iteration budget and an optional early stop on the distance between
//!   consecutive iterates.
//! - [`reconstruct::ConjugateGradientReconstruction`] splits every run into
//!   a metadata phase (`configure`: validation, shape inference, backend
//!   selection, no pixel data) and an execution phase (`run`: numerics only).
//!
//! ## Example
//!
//! Reconstruct a small volume from two synthetic parallel views:
//!
//! ```rust
//! use conebeam_cg::geometry::ProjectionGeometry;
//! use conebeam_cg::image::{GridMeta, ProjectionStack, Volume};
//! use conebeam_cg::{ConjugateGradientReconstruction, ReconstructionConfig};
//!
//! let mut geometry = ProjectionGeometry::new();
//! for k in 0..2 {
//!     let theta = std::f64::consts::FRAC_PI_2 * k as f64;
//!     geometry.add_matrix([
//!         [theta.cos(), 0.0, -theta.sin(), 0.0],
//!         [0.0, 1.0, 0.0, 0.0],
//!         [0.0, 0.0, 0.0, 1.0],
//!     ]);
//! }
//!
//! let volume_meta = GridMeta::new([8, 8, 8], [1.0; 3], [-3.5; 3]);
//! let projection_meta = GridMeta::new([8, 8, 2], [1.0, 1.0, 1.0], [-3.5, -3.5, 0.0]);
//!
//! let config = ReconstructionConfig {
//!     iterations: 2,
//!     ..Default::default()
//! };
//! let mut recon = ConjugateGradientReconstruction::new(config);
//! recon.configure(&geometry, volume_meta, projection_meta)?;
//!
//! let measured = ProjectionStack::from_elem(projection_meta, 1.0);
//! let initial = Volume::zeros(volume_meta);
//! let result = recon.run(&measured, &initial, None, None)?;
//! assert_eq!(result.volume.meta.shape, [8, 8, 8]);
//! # Ok::<(), conebeam_cg::ReconError>(())
//! ```
//!
//! ## Concurrency
//!
//! The reconstruction is a sequential iterative algorithm: iteration `k+1`
//! depends on the full result of iteration `k`. Parallelism is exploited
//! only *within* a single operator application (across views or volume
//! slabs, via [`ndarray`]'s rayon bridge) and is opaque to the recurrence.
//! Geometry, support mask, and weights are read-only for the duration of a
//! solve and safe to share across the operator-internal parallel tasks.

// Declare the modules that form the crate's API structure.
pub mod error;
pub mod geometry;
pub mod image;
pub mod operators;
pub mod reconstruct;
pub mod solvers;
pub mod utils;

// Re-export the main entry points for convenient access.
pub use error::ReconError;
pub use reconstruct::{ConjugateGradientReconstruction, Reconstruction, ReconstructionConfig};
pub use solvers::{ConjugateGradientSolver, SolveOutput, VolumeOperator};
