//! Linear least-squares estimate of Brown-Conrady coefficients.
//!
//! With the intrinsics fixed, the homography of each view predicts where a
//! target corner would land without distortion. The difference to the
//! observed corner is linear in the distortion coefficients:
//!
//! ```text
//! xd - x = x (k1 r² + k2 r⁴ + k3 r⁶) + 2 p1 x y + p2 (r² + 2x²)
//! yd - y = y (k1 r² + k2 r⁴ + k3 r⁶) + p1 (r² + 2y²) + 2 p2 x y
//! ```

use mvcam_pnp::homography::transfer;
use mvcam_pnp::{CameraIntrinsics, PolynomialDistortion};
use nalgebra::{DMatrix, DVector, Matrix3};

use crate::error::CalibrationError;

/// One view of the target for the distortion fit.
#[derive(Debug, Clone, Copy)]
pub struct DistortionView<'a> {
    /// Homography from target plane to undistorted pixels
    pub homography: Matrix3<f64>,
    /// Target corners on the plane
    pub plane: &'a [[f64; 2]],
    /// Observed (distorted) pixels, paired by index with `plane`
    pub pixels: &'a [[f64; 2]],
}

/// Coefficients estimated by the fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DistortionFitOptions {
    /// Keep `k3` at zero
    pub fix_k3: bool,
    /// Keep `p1` and `p2` at zero
    pub fix_tangential: bool,
}

/// Fit distortion coefficients against fixed intrinsics.
pub fn fit_distortion(
    intrinsics: &CameraIntrinsics,
    views: &[DistortionView<'_>],
    options: DistortionFitOptions,
) -> Result<PolynomialDistortion, CalibrationError> {
    // column layout: k1, k2, [k3], [p1, p2]
    let k3_col = (!options.fix_k3).then_some(2);
    let p_col = (!options.fix_tangential).then_some(2 + usize::from(!options.fix_k3));
    let n_params = 2 + usize::from(!options.fix_k3) + 2 * usize::from(!options.fix_tangential);

    let n_points: usize = views.iter().map(|v| v.plane.len().min(v.pixels.len())).sum();
    if 2 * n_points < n_params {
        return Err(CalibrationError::Solver(format!(
            "distortion fit needs {n_params} equations, got {}",
            2 * n_points
        )));
    }

    let mut a = DMatrix::<f64>::zeros(2 * n_points, n_params);
    let mut b = DVector::<f64>::zeros(2 * n_points);
    let mut row = 0;
    let mut max_r2 = 0.0f64;

    for view in views {
        for (plane, pixel) in view.plane.iter().zip(view.pixels) {
            let ideal = transfer(&view.homography, plane);
            let [x, y] = intrinsics.normalize(ideal[0], ideal[1]);
            let [xd, yd] = intrinsics.normalize(pixel[0], pixel[1]);
            let r2 = x * x + y * y;
            max_r2 = max_r2.max(r2);

            let (ru, rv) = (row, row + 1);
            a[(ru, 0)] = x * r2;
            a[(ru, 1)] = x * r2 * r2;
            a[(rv, 0)] = y * r2;
            a[(rv, 1)] = y * r2 * r2;
            if let Some(c) = k3_col {
                a[(ru, c)] = x * r2 * r2 * r2;
                a[(rv, c)] = y * r2 * r2 * r2;
            }
            if let Some(c) = p_col {
                a[(ru, c)] = 2.0 * x * y;
                a[(ru, c + 1)] = r2 + 2.0 * x * x;
                a[(rv, c)] = r2 + 2.0 * y * y;
                a[(rv, c + 1)] = 2.0 * x * y;
            }
            b[ru] = xd - x;
            b[rv] = yd - y;
            row += 2;
        }
    }

    if max_r2 < 1e-8 {
        return Err(CalibrationError::Solver(
            "every corner lies on the optical axis".to_string(),
        ));
    }

    let coeffs = a
        .svd(true, true)
        .solve(&b, 1e-14)
        .map_err(|e| CalibrationError::Solver(format!("distortion least squares: {e}")))?;

    let mut distortion = PolynomialDistortion::radial(coeffs[0], coeffs[1]);
    if let Some(c) = k3_col {
        distortion.k3 = coeffs[c];
    }
    if let Some(c) = p_col {
        distortion.p1 = coeffs[c];
        distortion.p2 = coeffs[c + 1];
    }
    Ok(distortion)
}
