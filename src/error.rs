//! This module defines the custom error types for the library.
//!
//! All failure conditions that can arise while configuring or executing a
//! reconstruction are centralized into a single, comprehensive enum:
//! [`ReconErrorKind`], wrapped by the public [`ReconError`] type.
//!
//! Using the [`thiserror`] crate allows us to create idiomatic error types with
//! minimal boilerplate. The kind enum is kept private so that the set of error
//! variants can evolve without breaking downstream matches; callers that need
//! to distinguish categories can rely on the `Display` output.
use thiserror::Error;

/// Represents all possible errors that can occur during a reconstruction run.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct ReconError(#[from] pub(crate) ReconErrorKind);

/// Private enum containing the distinct kinds of errors.
/// This separation allows for a clean `Display` implementation via
/// [`thiserror`] while keeping the variant set out of the public API.
#[derive(Error, Debug, PartialEq)]
pub(crate) enum ReconErrorKind {
    /// An invalid parameter was supplied during the metadata phase. Raised
    /// before any numerical work begins; a failed configuration aborts the
    /// whole run rather than silently defaulting.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The number of projection matrices held by the geometry disagrees with
    /// the view-axis length of the projection stack.
    #[error(
        "View count mismatch: geometry holds {geometry_views} projection matrices but the projection stack has {stack_views} views."
    )]
    ViewCountMismatch {
        geometry_views: usize,
        stack_views: usize,
    },

    /// Two grids that must share the same shape do not.
    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}.")]
    ShapeMismatch {
        what: String,
        expected: [usize; 3],
        actual: [usize; 3],
    },

    /// A forward/back projector pair failed the inner-product adjointness
    /// check beyond tolerance. Diagnostic: emitted by validation and test
    /// builds, never during a regular solve.
    #[error(
        "Adjoint contract violation: relative discrepancy {discrepancy:.3e} exceeds tolerance {tolerance:.3e}."
    )]
    AdjointViolation { discrepancy: f64, tolerance: f64 },

    /// A projection matrix was requested at an index outside the geometry.
    #[error("Requested projection matrix index {index} is out of bounds (geometry holds {len}).")]
    IndexOutOfBounds { index: usize, len: usize },
}

// Manually implement PartialEq for the public error type.
// We compare the inner `ReconErrorKind`.
impl PartialEq for ReconError {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl ReconError {
    /// Convenience constructor for configuration failures.
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        ReconErrorKind::Configuration(msg.into()).into()
    }
}
