//! Projection geometry: the ordered collection of per-view projection matrices.
//!
//! Each acquired view of a cone-beam scan is described by a 3x4 homogeneous
//! matrix. Multiplying a 3-D point in physical coordinates (as a homogeneous
//! column `[x, y, z, 1]`) by the i-th matrix yields the homogeneous detector
//! coordinate of that point on the i-th projection. The geometry is append-only
//! during construction and is then shared read-only by every operator for the
//! lifetime of a reconstruction run; no reordering or deletion of individual
//! entries is supported.

use crate::error::{ReconError, ReconErrorKind};

/// A 3x4 homogeneous projection matrix, row-major.
pub type ProjectionMatrix = [[f64; 4]; 3];

/// Applies a projection matrix to a physical point, returning the homogeneous
/// detector coordinate `[u*w, v*w, w]`.
#[inline]
pub fn project_point(m: &ProjectionMatrix, p: [f64; 3]) -> [f64; 3] {
    let mut out = [0.0; 3];
    for (row, o) in m.iter().zip(out.iter_mut()) {
        *o = row[0] * p[0] + row[1] * p[1] + row[2] * p[2] + row[3];
    }
    out
}

/// Ordered, append-only collection of per-view projection matrices, plus a
/// derived in-plane rotation angle per view.
///
/// Indices are 0-based and stable for the lifetime of a reconstruction run.
/// [`clear`](ProjectionGeometry::clear) is the only way to empty the geometry;
/// operators that cached anything derived from it must re-bind afterwards.
#[derive(Debug, Clone, Default)]
pub struct ProjectionGeometry {
    matrices: Vec<ProjectionMatrix>,
    angles: Vec<f64>,
}

impl ProjectionGeometry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a projection matrix and refreshes the derived angle cache.
    pub fn add_matrix(&mut self, m: ProjectionMatrix) {
        // The third row of the homogeneous matrix carries the principal-axis
        // direction; its in-plane components give the gantry rotation.
        self.angles.push(f64::atan2(m[2][0], m[2][2]));
        self.matrices.push(m);
    }

    /// Returns the i-th projection matrix, or an out-of-bounds error when `i`
    /// exceeds the number of views.
    pub fn matrix_at(&self, i: usize) -> Result<&ProjectionMatrix, ReconError> {
        self.matrices.get(i).ok_or_else(|| {
            ReconErrorKind::IndexOutOfBounds {
                index: i,
                len: self.matrices.len(),
            }
            .into()
        })
    }

    /// Read-only view of the full ordered matrix sequence.
    pub fn matrices(&self) -> &[ProjectionMatrix] {
        &self.matrices
    }

    /// Derived in-plane rotation angle of the i-th view, in radians.
    pub fn gantry_angle(&self, i: usize) -> Result<f64, ReconError> {
        self.matrix_at(i)?;
        Ok(self.angles[i])
    }

    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    /// Empties the geometry. Any caches derived from it become invalid.
    pub fn clear(&mut self) {
        self.matrices.clear();
        self.angles.clear();
    }
}
