//! Closed-form intrinsics from plane homographies (Zhang, 2000).
//!
//! Every view of a planar target constrains the image of the absolute conic
//! `B = K^-T K^-1` through two linear equations in its six entries. Stacking
//! the equations of at least three views and taking the null vector gives
//! `B` up to scale, from which the focal lengths and principal point follow.

use mvcam_pnp::CameraIntrinsics;
use nalgebra::{DMatrix, Matrix3, SVector};

use crate::error::CalibrationError;

/// Minimum number of views for a unique solution.
pub const MIN_VIEWS: usize = 3;

fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> SVector<f64, 6> {
    let hi = h.column(i);
    let hj = h.column(j);
    SVector::<f64, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Estimate zero-skew intrinsics from homographies mapping the target plane
/// to the image.
///
/// The homographies should be expressed in a well conditioned image frame;
/// [`crate::solver`] feeds them pixel coordinates that were centred and
/// scaled first.
pub fn intrinsics_from_homographies(
    homographies: &[Matrix3<f64>],
) -> Result<CameraIntrinsics, CalibrationError> {
    if homographies.len() < MIN_VIEWS {
        return Err(CalibrationError::Solver(format!(
            "closed-form intrinsics need {MIN_VIEWS} views, got {}",
            homographies.len()
        )));
    }

    let mut v = DMatrix::<f64>::zeros(2 * homographies.len(), 6);
    for (k, h) in homographies.iter().enumerate() {
        let v12 = v_ij(h, 0, 1);
        let diff = v_ij(h, 0, 0) - v_ij(h, 1, 1);
        v.row_mut(2 * k).copy_from(&v12.transpose());
        v.row_mut(2 * k + 1).copy_from(&diff.transpose());
    }

    // null vector of V: right singular vector of the smallest singular value
    let svd = v.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| CalibrationError::Solver("SVD of the conic system failed".to_string()))?;
    let smallest = (0..svd.singular_values.len())
        .min_by(|&a, &b| svd.singular_values[a].total_cmp(&svd.singular_values[b]))
        .unwrap_or(5);
    let b = v_t.row(smallest);
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    let scale = b11 * b11 + b22 * b22;
    if scale <= 0.0 || denom.abs() / scale < 1e-9 {
        return Err(CalibrationError::Solver(
            "views do not constrain the principal point".to_string(),
        ));
    }

    let cy = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + cy * (b12 * b13 - b11 * b23)) / b11;
    if lambda / b11 <= 0.0 || lambda * b11 / denom <= 0.0 {
        return Err(CalibrationError::Solver(
            "homographies are inconsistent with a real camera".to_string(),
        ));
    }

    let fx = (lambda / b11).sqrt();
    let fy = (lambda * b11 / denom).sqrt();
    let skew = -b12 * fx * fx * fy / lambda;
    let cx = skew * cy / fy - b13 * fx * fx / lambda;
    log::trace!("closed-form intrinsics fx={fx} fy={fy} cx={cx} cy={cy} (skew {skew} dropped)");

    Ok(CameraIntrinsics::new(fx, fy, cx, cy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use mvcam_pnp::PnPResult;

    fn plane_homography(k: &Matrix3<f64>, pose: &PnPResult) -> Matrix3<f64> {
        let r = &pose.rotation;
        let t = &pose.translation;
        let rt = Matrix3::new(
            r[0][0], r[0][1], t[0], //
            r[1][0], r[1][1], t[1], //
            r[2][0], r[2][1], t[2],
        );
        k * rt
    }

    #[test]
    fn test_recovers_intrinsics() -> Result<(), CalibrationError> {
        let k = Matrix3::new(1.2, 0.0, 0.1, 0.0, 1.1, -0.05, 0.0, 0.0, 1.0);
        let hs: Vec<_> = [
            PnPResult::from_rvec([0.3, 0.0, 0.05], [0.1, -0.05, 1.0]),
            PnPResult::from_rvec([-0.1, 0.35, -0.1], [-0.05, 0.1, 1.2]),
            PnPResult::from_rvec([0.2, -0.25, 0.0], [0.0, 0.0, 0.9]),
            PnPResult::from_rvec([-0.3, -0.1, 0.3], [0.02, 0.03, 1.1]),
        ]
        .iter()
        .map(|pose| plane_homography(&k, pose))
        .collect();

        let intrinsics = intrinsics_from_homographies(&hs)?;
        assert_relative_eq!(intrinsics.fx, 1.2, epsilon = 1e-9);
        assert_relative_eq!(intrinsics.fy, 1.1, epsilon = 1e-9);
        assert_relative_eq!(intrinsics.cx, 0.1, epsilon = 1e-9);
        assert_relative_eq!(intrinsics.cy, -0.05, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_too_few_views() {
        let hs = vec![Matrix3::identity(); 2];
        assert!(matches!(
            intrinsics_from_homographies(&hs),
            Err(CalibrationError::Solver(_))
        ));
    }
}
