//! Portable CPU projector pair.
//!
//! The voxel-driven strategy maps every voxel center through the per-view
//! projection matrix, dehomogenizes to detector coordinates, and touches the
//! bilinear footprint of the landing point. Forward projection *splats* the
//! voxel value into the footprint; backprojection *gathers* from the same
//! footprint with the same weights. Because both directions visit identical
//! (pixel, voxel) pairs with identical weights, the pair is an exact adjoint
//! by construction, which is the property the conjugate gradient solver
//! relies on.
//!
//! Parallelism stays inside a single operator application: forward projection
//! runs views in parallel (each view owns its slice of the stack), while
//! backprojection runs volume z-slabs in parallel (each slab gathers from the
//! read-only stack). The solver above sees a plain synchronous call.

use ndarray::parallel::prelude::*;
use ndarray::Axis;

use crate::error::{ReconError, ReconErrorKind};
use crate::geometry::{project_point, ProjectionGeometry, ProjectionMatrix};
use crate::image::{GridMeta, ProjectionStack, Volume};
use crate::operators::{BackProjector, ForwardProjector};

/// Matched voxel-driven forward/back projector. Stateless; the geometry and
/// grid metadata arrive with every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct VoxelDrivenProjector;

fn ensure_view_count(geometry: &ProjectionGeometry, stack_views: usize) -> Result<(), ReconError> {
    if geometry.len() != stack_views {
        return Err(ReconErrorKind::ViewCountMismatch {
            geometry_views: geometry.len(),
            stack_views,
        }
        .into());
    }
    Ok(())
}

/// Visits the in-bounds bilinear footprint of a world point on the detector.
///
/// Rays whose homogeneous scale vanishes (point at infinity for this view)
/// and footprint corners falling off the detector are skipped silently; a
/// displaced detector legitimately truncates the footprint.
#[inline]
fn visit_detector_footprint(
    m: &ProjectionMatrix,
    world: [f64; 3],
    proj_meta: &GridMeta,
    mut visit: impl FnMut(usize, usize, f32),
) {
    let h = project_point(m, world);
    if h[2].abs() < 1e-12 {
        return;
    }
    let u = h[0] / h[2];
    let v = h[1] / h[2];
    let fu = (u - proj_meta.origin[1]) / proj_meta.spacing[1];
    let fv = (v - proj_meta.origin[0]) / proj_meta.spacing[0];
    let iu0 = fu.floor();
    let iv0 = fv.floor();
    let du = fu - iu0;
    let dv = fv - iv0;
    let nv = proj_meta.shape[0] as isize;
    let nu = proj_meta.shape[1] as isize;
    let corners = [
        (iv0 as isize, iu0 as isize, (1.0 - dv) * (1.0 - du)),
        (iv0 as isize, iu0 as isize + 1, (1.0 - dv) * du),
        (iv0 as isize + 1, iu0 as isize, dv * (1.0 - du)),
        (iv0 as isize + 1, iu0 as isize + 1, dv * du),
    ];
    for (iv, iu, w) in corners {
        if (0..nv).contains(&iv) && (0..nu).contains(&iu) && w > 0.0 {
            visit(iv as usize, iu as usize, w as f32);
        }
    }
}

impl ForwardProjector for VoxelDrivenProjector {
    fn forward(
        &self,
        volume: &Volume,
        geometry: &ProjectionGeometry,
        out: &mut ProjectionStack,
    ) -> Result<(), ReconError> {
        ensure_view_count(geometry, out.meta.shape[2])?;
        let proj_meta = out.meta;
        let matrices = geometry.matrices();
        let (nz, ny, nx) = volume.meta.dim();

        out.data.fill(0.0);
        out.data
            .axis_iter_mut(Axis(2))
            .into_par_iter()
            .enumerate()
            .for_each(|(k, mut view)| {
                let m = &matrices[k];
                for iz in 0..nz {
                    for iy in 0..ny {
                        for ix in 0..nx {
                            let value = volume.data[(iz, iy, ix)];
                            if value == 0.0 {
                                continue;
                            }
                            let pos = volume.meta.position([iz, iy, ix]);
                            // GridMeta index order is (z, y, x); the matrix
                            // expects a world point (x, y, z).
                            let world = [pos[2], pos[1], pos[0]];
                            visit_detector_footprint(m, world, &proj_meta, |iv, iu, w| {
                                view[(iv, iu)] += w * value;
                            });
                        }
                    }
                }
            });
        Ok(())
    }
}

impl BackProjector for VoxelDrivenProjector {
    fn backward(
        &self,
        projections: &ProjectionStack,
        geometry: &ProjectionGeometry,
        out: &mut Volume,
    ) -> Result<(), ReconError> {
        ensure_view_count(geometry, projections.n_views())?;
        let proj_meta = projections.meta;
        let matrices = geometry.matrices();
        let vol_meta = out.meta;
        let (_, ny, nx) = vol_meta.dim();

        out.data
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(iz, mut slab)| {
                for iy in 0..ny {
                    for ix in 0..nx {
                        let pos = vol_meta.position([iz, iy, ix]);
                        let world = [pos[2], pos[1], pos[0]];
                        // f64 accumulation over views keeps the gather stable
                        // for long scans.
                        let mut acc = 0.0f64;
                        for (k, m) in matrices.iter().enumerate() {
                            visit_detector_footprint(m, world, &proj_meta, |iv, iu, w| {
                                acc += w as f64 * projections.data[(iv, iu, k)] as f64;
                            });
                        }
                        slab[(iy, ix)] = acc as f32;
                    }
                }
            });
        Ok(())
    }
}
