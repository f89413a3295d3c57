//! Multi-view calibration of a planar target.
//!
//! The solver alternates the closed-form pieces (homographies, Zhang
//! intrinsics, linear distortion fit) for an initial model, solves the pose of
//! every view with IPPE, then refines intrinsics, distortion and all poses
//! jointly with Levenberg-Marquardt on the pixel reprojection error. The
//! normal equations are reduced to the intrinsics block with the Schur
//! complement, so each iteration is linear in the number of views.

use glam::DVec3;
use mvcam_lie::so3::SO3;
use mvcam_pnp::{
    find_homography, solve_pnp, CameraIntrinsics, CameraModel, PnPMethod, PnPResult,
    PolynomialDistortion,
};
use nalgebra::{DMatrix, DVector, Matrix3};
use serde::{Deserialize, Serialize};

use crate::distortion_fit::{fit_distortion, DistortionFitOptions, DistortionView};
use crate::error::CalibrationError;
use crate::zhang::{intrinsics_from_homographies, MIN_VIEWS};

const BEHIND_CAMERA_PENALTY: f64 = 1e6;
const POSE_STEP: f64 = 1e-7;
const N_INTRINSICS: usize = 9;

/// Options of the multi-view solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Rounds of homography / closed-form intrinsics / distortion fit.
    pub linear_iterations: usize,
    /// Maximum Levenberg-Marquardt iterations of the joint refinement.
    pub iterations: usize,
    /// Relative cost decrease below which the refinement stops.
    pub tolerance: f64,
    /// Keep `k3` at zero.
    pub fix_k3: bool,
    /// Keep `p1` and `p2` at zero.
    pub fix_tangential: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            linear_iterations: 3,
            iterations: 50,
            tolerance: 1e-10,
            fix_k3: true,
            fix_tangential: false,
        }
    }
}

/// Camera model and per-view poses estimated from a set of views.
#[derive(Debug, Clone)]
pub struct CalibrationSolution {
    /// Intrinsics and distortion
    pub camera: CameraModel,
    /// Pose of the target in each view, in input order
    pub poses: Vec<PnPResult>,
    /// Root-mean-square reprojection error over every corner, in pixels
    pub rms_px: f64,
    /// Refinement iterations performed
    pub iterations: usize,
}

/// Calibrate from several views of a planar `template` (`z = 0`).
///
/// Each view lists the detected pixels of every template corner, in template order.
pub fn calibrate_views(
    template: &[[f64; 3]],
    views: &[&[[f64; 2]]],
    options: &SolverOptions,
) -> Result<CalibrationSolution, CalibrationError> {
    check_input(template, views)?;
    let plane: Vec<[f64; 2]> = template.iter().map(|p| [p[0], p[1]]).collect();

    let camera = initial_camera(&plane, views, options)?;
    log::debug!(
        "initial model fx={:.3} fy={:.3} cx={:.3} cy={:.3}",
        camera.intrinsics.fx,
        camera.intrinsics.fy,
        camera.intrinsics.cx,
        camera.intrinsics.cy
    );

    let mut poses = Vec::with_capacity(views.len());
    for view in views {
        let pose = solve_pnp(template, view, &camera, PnPMethod::IppeDefault)?;
        let mut x = [0.0; 6];
        x[..3].copy_from_slice(&pose.rvec);
        x[3..].copy_from_slice(&pose.translation);
        poses.push(x);
    }

    let problem = BundleProblem {
        template,
        views,
        free: free_intrinsics(options),
    };
    let mut params = pack_camera(&camera);
    let (cost, iterations) = problem.refine(&mut params, &mut poses, options)?;

    let camera = unpack_camera(&params);
    let n_points = (views.len() * template.len()) as f64;
    let rms_px = (cost / n_points).sqrt();
    log::debug!(
        "refined {} views in {iterations} iterations, rms {rms_px:.4} px",
        views.len()
    );

    let poses = poses
        .iter()
        .zip(views)
        .map(|(x, view)| {
            let mut pose = PnPResult::from_rvec([x[0], x[1], x[2]], [x[3], x[4], x[5]]);
            pose.reproj_rmse = mvcam_pnp::reprojection_rmse(template, view, &pose, &camera).ok();
            pose
        })
        .collect();

    Ok(CalibrationSolution {
        camera,
        poses,
        rms_px,
        iterations,
    })
}

fn check_input(template: &[[f64; 3]], views: &[&[[f64; 2]]]) -> Result<(), CalibrationError> {
    if template.len() < 4 {
        return Err(CalibrationError::InvalidPattern(format!(
            "template has {} corners, at least 4 are required",
            template.len()
        )));
    }
    if let Some(p) = template.iter().find(|p| p[2] != 0.0) {
        return Err(CalibrationError::InvalidPattern(format!(
            "template corner {p:?} is off the z = 0 plane"
        )));
    }
    if views.len() < MIN_VIEWS {
        return Err(CalibrationError::Solver(format!(
            "calibration needs at least {MIN_VIEWS} views, got {}",
            views.len()
        )));
    }
    if let Some(view) = views.iter().find(|v| v.len() != template.len()) {
        return Err(CalibrationError::Solver(format!(
            "view has {} corners, template has {}",
            view.len(),
            template.len()
        )));
    }
    Ok(())
}

/// Centre and scale every observed pixel to mean distance sqrt(2) from the origin.
fn conditioning(views: &[&[[f64; 2]]]) -> ([f64; 2], f64) {
    let n = views.iter().map(|v| v.len()).sum::<usize>().max(1) as f64;
    let (sx, sy) = views
        .iter()
        .flat_map(|v| v.iter())
        .fold((0.0, 0.0), |(ax, ay), p| (ax + p[0], ay + p[1]));
    let mean = [sx / n, sy / n];
    let dist = views
        .iter()
        .flat_map(|v| v.iter())
        .map(|p| (p[0] - mean[0]).hypot(p[1] - mean[1]))
        .sum::<f64>()
        / n;
    let scale = if dist > f64::EPSILON {
        dist / std::f64::consts::SQRT_2
    } else {
        1.0
    };
    (mean, scale)
}

fn initial_camera(
    plane: &[[f64; 2]],
    views: &[&[[f64; 2]]],
    options: &SolverOptions,
) -> Result<CameraModel, CalibrationError> {
    let (mean, scale) = conditioning(views);
    let fit_options = DistortionFitOptions {
        fix_k3: options.fix_k3,
        fix_tangential: options.fix_tangential,
    };

    let mut camera: Option<CameraModel> = None;
    for round in 0..options.linear_iterations.max(1) {
        let undistorted: Vec<Vec<[f64; 2]>> = views
            .iter()
            .map(|view| match &camera {
                Some(cam) => view
                    .iter()
                    .map(|&[u, v]| {
                        let [x, y] = cam.undistort_pixel(u, v);
                        cam.intrinsics.denormalize(x, y)
                    })
                    .collect(),
                None => view.to_vec(),
            })
            .collect();

        let mut conditioned_h = Vec::with_capacity(views.len());
        for pixels in &undistorted {
            let conditioned: Vec<[f64; 2]> = pixels
                .iter()
                .map(|p| [(p[0] - mean[0]) / scale, (p[1] - mean[1]) / scale])
                .collect();
            conditioned_h.push(find_homography(plane, &conditioned)?);
        }

        let k = intrinsics_from_homographies(&conditioned_h)?;
        let intrinsics = CameraIntrinsics::new(
            k.fx * scale,
            k.fy * scale,
            k.cx * scale + mean[0],
            k.cy * scale + mean[1],
        );

        let uncondition = Matrix3::new(scale, 0.0, mean[0], 0.0, scale, mean[1], 0.0, 0.0, 1.0);
        let distortion_views: Vec<DistortionView<'_>> = conditioned_h
            .iter()
            .zip(views)
            .map(|(h, pixels)| DistortionView {
                homography: uncondition * h,
                plane,
                pixels,
            })
            .collect();
        let distortion = fit_distortion(&intrinsics, &distortion_views, fit_options)?;
        log::trace!("linear round {round}: {intrinsics:?} {distortion:?}");

        camera = Some(CameraModel::with_distortion(intrinsics, distortion));
    }

    camera.ok_or_else(|| CalibrationError::Solver("no linear estimate".to_string()))
}

fn free_intrinsics(options: &SolverOptions) -> Vec<usize> {
    // layout: fx, fy, cx, cy, k1, k2, p1, p2, k3
    (0..N_INTRINSICS)
        .filter(|&i| !(options.fix_tangential && (i == 6 || i == 7)))
        .filter(|&i| !(options.fix_k3 && i == 8))
        .collect()
}

fn pack_camera(camera: &CameraModel) -> [f64; N_INTRINSICS] {
    let k = &camera.intrinsics;
    let d = camera.distortion.unwrap_or_default();
    [k.fx, k.fy, k.cx, k.cy, d.k1, d.k2, d.p1, d.p2, d.k3]
}

fn unpack_camera(c: &[f64; N_INTRINSICS]) -> CameraModel {
    CameraModel::with_distortion(
        CameraIntrinsics::new(c[0], c[1], c[2], c[3]),
        PolynomialDistortion {
            k1: c[4],
            k2: c[5],
            p1: c[6],
            p2: c[7],
            k3: c[8],
        },
    )
}

/// Residuals of one view, `2 * n` entries. Returns the squared norm.
fn view_residuals(
    camera: &CameraModel,
    pose: &[f64; 6],
    template: &[[f64; 3]],
    observed: &[[f64; 2]],
    out: &mut [f64],
) -> f64 {
    let r = SO3::exp(DVec3::new(pose[0], pose[1], pose[2])).matrix();
    let t = DVec3::new(pose[3], pose[4], pose[5]);

    let mut sum_sq = 0.0;
    for (i, (pw, uv)) in template.iter().zip(observed).enumerate() {
        let pc = r * DVec3::from_array(*pw) + t;
        let (du, dv) = match camera.project(pc.to_array()) {
            Some([u, v]) => (u - uv[0], v - uv[1]),
            None => (BEHIND_CAMERA_PENALTY, BEHIND_CAMERA_PENALTY),
        };
        out[2 * i] = du;
        out[2 * i + 1] = dv;
        sum_sq += du.mul_add(du, dv * dv);
    }
    sum_sq
}

fn total_cost(
    camera: &CameraModel,
    poses: &[[f64; 6]],
    template: &[[f64; 3]],
    views: &[&[[f64; 2]]],
) -> f64 {
    let mut scratch = vec![0.0; 2 * template.len()];
    poses
        .iter()
        .zip(views)
        .map(|(pose, view)| view_residuals(camera, pose, template, view, &mut scratch))
        .sum()
}

/// Linearisation of one view: the pose block `V`, the coupling `W` with the
/// intrinsics and the pose gradient.
struct ViewBlock {
    v: DMatrix<f64>,
    w: DMatrix<f64>,
    g: DVector<f64>,
}

struct BundleProblem<'a> {
    template: &'a [[f64; 3]],
    views: &'a [&'a [[f64; 2]]],
    free: Vec<usize>,
}

impl BundleProblem<'_> {
    /// Jacobian of the residuals of one view with respect to the free intrinsics.
    fn intrinsics_jacobian(&self, camera: &CameraModel, pose: &[f64; 6]) -> DMatrix<f64> {
        let r = SO3::exp(DVec3::new(pose[0], pose[1], pose[2])).matrix();
        let t = DVec3::new(pose[3], pose[4], pose[5]);
        let k = &camera.intrinsics;
        let d = camera.distortion.unwrap_or_default();

        let mut jac = DMatrix::<f64>::zeros(2 * self.template.len(), self.free.len());
        for (i, pw) in self.template.iter().enumerate() {
            let pc = r * DVec3::from_array(*pw) + t;
            if pc.z <= f64::EPSILON {
                continue;
            }
            let (x, y) = (pc.x / pc.z, pc.y / pc.z);
            let [xd, yd] = d.distort(x, y);
            let r2 = x * x + y * y;
            let xy2 = 2.0 * x * y;

            for (col, &param) in self.free.iter().enumerate() {
                let (du, dv) = match param {
                    0 => (xd, 0.0),
                    1 => (0.0, yd),
                    2 => (1.0, 0.0),
                    3 => (0.0, 1.0),
                    4 => (k.fx * x * r2, k.fy * y * r2),
                    5 => (k.fx * x * r2 * r2, k.fy * y * r2 * r2),
                    6 => (k.fx * xy2, k.fy * (r2 + 2.0 * y * y)),
                    7 => (k.fx * (r2 + 2.0 * x * x), k.fy * xy2),
                    _ => (k.fx * x * r2 * r2 * r2, k.fy * y * r2 * r2 * r2),
                };
                jac[(2 * i, col)] = du;
                jac[(2 * i + 1, col)] = dv;
            }
        }
        jac
    }

    /// Central-difference Jacobian of the residuals of one view with respect to its pose.
    fn pose_jacobian(
        &self,
        camera: &CameraModel,
        pose: &[f64; 6],
        observed: &[[f64; 2]],
    ) -> DMatrix<f64> {
        let n = 2 * self.template.len();
        let mut jac = DMatrix::<f64>::zeros(n, 6);
        let mut plus = vec![0.0; n];
        let mut minus = vec![0.0; n];

        for k in 0..6 {
            let mut xp = *pose;
            let mut xm = *pose;
            xp[k] += POSE_STEP;
            xm[k] -= POSE_STEP;
            view_residuals(camera, &xp, self.template, observed, &mut plus);
            view_residuals(camera, &xm, self.template, observed, &mut minus);
            for row in 0..n {
                jac[(row, k)] = (plus[row] - minus[row]) / (2.0 * POSE_STEP);
            }
        }
        jac
    }

    /// Joint Levenberg-Marquardt refinement. Returns the final cost and the iteration count.
    fn refine(
        &self,
        params: &mut [f64; N_INTRINSICS],
        poses: &mut [[f64; 6]],
        options: &SolverOptions,
    ) -> Result<(f64, usize), CalibrationError> {
        let nf = self.free.len();
        let mut camera = unpack_camera(params);
        let mut cost = total_cost(&camera, poses, self.template, self.views);
        let mut lambda = 1e-3;
        let mut residuals = vec![0.0; 2 * self.template.len()];
        let mut iterations = 0;

        while iterations < options.iterations {
            iterations += 1;

            let mut u = DMatrix::<f64>::zeros(nf, nf);
            let mut g_c = DVector::<f64>::zeros(nf);
            let mut blocks = Vec::with_capacity(poses.len());

            for (pose, view) in poses.iter().zip(self.views) {
                view_residuals(&camera, pose, self.template, view, &mut residuals);
                let r = DVector::from_column_slice(&residuals);
                let jc = self.intrinsics_jacobian(&camera, pose);
                let jp = self.pose_jacobian(&camera, pose, view);

                u += jc.tr_mul(&jc);
                g_c += jc.tr_mul(&r);
                blocks.push(ViewBlock {
                    v: jp.tr_mul(&jp),
                    w: jc.tr_mul(&jp),
                    g: jp.tr_mul(&r),
                });
            }

            let mut improved = false;
            while lambda < 1e12 {
                let Some((dc, dp)) = solve_damped(&u, &g_c, &blocks, lambda) else {
                    lambda *= 10.0;
                    continue;
                };

                let mut candidate = *params;
                for (j, &param) in self.free.iter().enumerate() {
                    candidate[param] += dc[j];
                }
                if candidate[0] <= 0.0 || candidate[1] <= 0.0 {
                    lambda *= 10.0;
                    continue;
                }
                let candidate_poses: Vec<[f64; 6]> = poses
                    .iter()
                    .zip(&dp)
                    .map(|(x, d)| std::array::from_fn(|k| x[k] + d[k]))
                    .collect();

                let candidate_camera = unpack_camera(&candidate);
                let new_cost =
                    total_cost(&candidate_camera, &candidate_poses, self.template, self.views);
                if new_cost < cost {
                    let decrease = (cost - new_cost) / cost.max(f64::MIN_POSITIVE);
                    *params = candidate;
                    poses.copy_from_slice(&candidate_poses);
                    camera = candidate_camera;
                    cost = new_cost;
                    lambda = (lambda / 10.0).max(1e-12);
                    improved = decrease > options.tolerance;
                    break;
                }
                lambda *= 10.0;
            }

            log::trace!("iteration {iterations}: cost {cost:.6e} lambda {lambda:.1e}");
            if !improved || cost < 1e-20 {
                break;
            }
        }

        if !cost.is_finite() {
            return Err(CalibrationError::Solver("refinement diverged".to_string()));
        }
        Ok((cost, iterations))
    }
}

/// Solve the damped normal equations through the Schur complement of the pose blocks.
fn solve_damped(
    u: &DMatrix<f64>,
    g_c: &DVector<f64>,
    blocks: &[ViewBlock],
    lambda: f64,
) -> Option<(DVector<f64>, Vec<[f64; 6]>)> {
    let mut s = damped(u, lambda);
    let mut rhs = -g_c;
    let mut v_inv = Vec::with_capacity(blocks.len());

    for block in blocks {
        let inv = damped(&block.v, lambda).cholesky()?.inverse();
        let w_vinv = &block.w * &inv;
        s -= &w_vinv * block.w.transpose();
        rhs += &w_vinv * &block.g;
        v_inv.push(inv);
    }

    let dc = s.cholesky()?.solve(&rhs);
    let dp = blocks
        .iter()
        .zip(&v_inv)
        .map(|(block, inv)| {
            let step = inv * (-&block.g - block.w.tr_mul(&dc));
            std::array::from_fn(|k| step[k])
        })
        .collect();
    Some((dc, dp))
}

/// `A + lambda * diag(A)`, with a floor on the diagonal for unconstrained parameters.
fn damped(a: &DMatrix<f64>, lambda: f64) -> DMatrix<f64> {
    let mut out = a.clone();
    for i in 0..a.nrows() {
        out[(i, i)] += lambda * a[(i, i)].max(1e-9);
    }
    out
}
