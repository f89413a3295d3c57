//! Levenberg-Marquardt pose refinement against distorted pixel observations.

use crate::camera::CameraModel;
use crate::pnp::PnPError;
use glam::DVec3;
use mvcam_lie::so3::SO3;

/// Residual assigned to each coordinate of a point that lands behind the camera.
const BEHIND_CAMERA_PENALTY: f64 = 1e6;

/// Parameters controlling the LM pose refinement.
#[derive(Debug, Clone)]
pub struct LMParams {
    /// Maximum number of LM iterations.
    pub max_iters: usize,
    /// Convergence threshold on the decrease of the squared reprojection error.
    pub eps: f64,
    /// Initial damping factor (lambda).
    pub lambda_init: f64,
    /// Multiplicative factor to increase/decrease lambda.
    pub lambda_mul: f64,
}

impl Default for LMParams {
    fn default() -> Self {
        Self {
            max_iters: 20,
            eps: 1e-10,
            lambda_init: 1e-3,
            lambda_mul: 10.0,
        }
    }
}

/// Refine a pose `(rvec, t)` by minimizing the pixel reprojection error.
///
/// Projection goes through the full camera model, lens distortion included,
/// so `points_image` are raw detector pixels.
///
/// Returns `(rmse, num_iters, converged)` and writes the refined pose in place.
pub fn refine_pose_lm(
    points_world: &[[f64; 3]],
    points_image: &[[f64; 2]],
    camera: &CameraModel,
    rvec: &mut [f64; 3],
    t: &mut [f64; 3],
    params: &LMParams,
) -> Result<(f64, usize, bool), PnPError> {
    if points_world.len() != points_image.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "world points",
            left_len: points_world.len(),
            right_name: "image points",
            right_len: points_image.len(),
        });
    }

    let n = points_world.len();
    if n < 3 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 3,
            actual: n,
        });
    }

    let residuals_at = |x: &[f64; 6], out: &mut [f64]| -> f64 {
        let r_mat = SO3::exp(DVec3::new(x[0], x[1], x[2])).matrix();
        let t_vec = DVec3::new(x[3], x[4], x[5]);

        let mut sum_sq = 0.0;
        for (i, (pw, uv)) in points_world.iter().zip(points_image.iter()).enumerate() {
            let pc = r_mat * DVec3::from_array(*pw) + t_vec;
            let (du, dv) = match camera.project(pc.to_array()) {
                Some([u, v]) => (u - uv[0], v - uv[1]),
                None => (BEHIND_CAMERA_PENALTY, BEHIND_CAMERA_PENALTY),
            };
            out[2 * i] = du;
            out[2 * i + 1] = dv;
            sum_sq += du.mul_add(du, dv * dv);
        }
        sum_sq
    };

    let mut x = [rvec[0], rvec[1], rvec[2], t[0], t[1], t[2]];

    let mut residuals = vec![0.0; 2 * n];
    let mut residuals_p = vec![0.0; 2 * n];
    let mut residuals_m = vec![0.0; 2 * n];
    let mut jac = vec![0.0; 2 * n * 6];

    let mut lambda = params.lambda_init;
    let mut err_sq = residuals_at(&x, &mut residuals);

    let mut iters = 0;
    let mut converged = err_sq < params.eps;

    while !converged && iters < params.max_iters {
        iters += 1;

        const H_ROT: f64 = 1e-6;
        let t_scale = x[3].abs().max(x[4].abs()).max(x[5].abs()).max(1.0);
        let h_trans = 1e-6 * t_scale;

        for k in 0..6 {
            let h = if k < 3 { H_ROT } else { h_trans };
            let mut x_plus = x;
            let mut x_minus = x;
            x_plus[k] += h;
            x_minus[k] -= h;
            residuals_at(&x_plus, &mut residuals_p);
            residuals_at(&x_minus, &mut residuals_m);
            for i in 0..(2 * n) {
                jac[i * 6 + k] = (residuals_p[i] - residuals_m[i]) / (2.0 * h);
            }
        }

        // (J^T J + lambda I) delta = -J^T r
        let mut a = [0.0; 36];
        let mut b = [0.0; 6];
        for (row, &r) in jac.chunks_exact(6).zip(residuals.iter()) {
            for c in 0..6 {
                b[c] -= row[c] * r;
                for d in 0..6 {
                    a[c * 6 + d] += row[c] * row[d];
                }
            }
        }
        for d in 0..6 {
            a[d * 6 + d] += lambda * a[d * 6 + d].max(1e-9);
        }

        let Some(delta) = solve_6x6(&mut a, &mut b) else {
            lambda *= params.lambda_mul;
            continue;
        };

        let mut x_new = x;
        for (xi, di) in x_new.iter_mut().zip(delta.iter()) {
            *xi += di;
        }
        let err_new = residuals_at(&x_new, &mut residuals_p);

        if err_new < err_sq {
            let decrease = err_sq - err_new;
            x = x_new;
            residuals.copy_from_slice(&residuals_p);
            err_sq = err_new;
            lambda = (lambda / params.lambda_mul).max(1e-12);
            if decrease < params.eps || err_sq < params.eps {
                converged = true;
            }
        } else {
            lambda *= params.lambda_mul;
            if lambda > 1e12 {
                // no further descent available from here
                converged = true;
            }
        }
    }

    rvec.copy_from_slice(&x[0..3]);
    t.copy_from_slice(&x[3..6]);

    let rmse = (err_sq / n as f64).sqrt();
    log::trace!("pose refinement: rmse {rmse:.4} px after {iters} iterations");
    Ok((rmse, iters, converged))
}

/// Gaussian elimination with partial pivoting on a row-major 6x6 system.
pub(crate) fn solve_6x6(a: &mut [f64; 36], b: &mut [f64; 6]) -> Option<[f64; 6]> {
    for i in 0..6 {
        let piv = (i..6).max_by(|&r, &s| a[r * 6 + i].abs().total_cmp(&a[s * 6 + i].abs()))?;
        if a[piv * 6 + i].abs() < 1e-15 {
            return None;
        }
        if piv != i {
            for c in 0..6 {
                a.swap(i * 6 + c, piv * 6 + c);
            }
            b.swap(i, piv);
        }

        let diag = a[i * 6 + i];
        for c in i..6 {
            a[i * 6 + c] /= diag;
        }
        b[i] /= diag;

        for r in (i + 1)..6 {
            let factor = a[r * 6 + i];
            if factor == 0.0 {
                continue;
            }
            for c in i..6 {
                a[r * 6 + c] -= factor * a[i * 6 + c];
            }
            b[r] -= factor * b[i];
        }
    }

    for i in (0..6).rev() {
        for r in 0..i {
            let factor = a[r * 6 + i];
            if factor != 0.0 {
                a[r * 6 + i] = 0.0;
                b[r] -= factor * b[i];
            }
        }
    }
    Some(*b)
}
