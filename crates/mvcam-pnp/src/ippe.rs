//! Infinitesimal Plane-based Pose Estimation (IPPE)
//!
//! Estimates the two candidate poses of a planar target from 2D-3D
//! correspondences. The homography between the centred target plane and the
//! normalized image is differentiated at the plane origin, and the two rotations
//! consistent with that first-order model are recovered in closed form.
//!
//! References:
//! - T. Collins and A. Bartoli, "Infinitesimal Plane-based Pose Estimation"
//! - OpenCV implementation reference: modules/calib3d/src/ippe.hpp/.cpp

use crate::camera::CameraModel;
use crate::homography::find_homography;
use crate::ops::{compute_centroid, reprojection_rmse};
use crate::pnp::{PnPError, PnPResult, PnPSolver};
use crate::refine::{refine_pose_lm, LMParams};
use nalgebra::{Matrix3, Vector3};

/// Maximum deviation from `z = const` accepted for target points.
const PLANARITY_TOLERANCE: f64 = 1e-9;

/// Result holding the two IPPE pose solutions sorted by reprojection error (best first).
#[derive(Debug, Clone)]
pub struct IPPEResult {
    /// Lowest-error pose solution.
    pub first: PnPResult,
    /// Second pose solution.
    pub second: PnPResult,
}

/// Parameters for the IPPE solver when used through [`PnPSolver`].
#[derive(Debug, Clone)]
pub struct IPPEParams {
    /// Levenberg-Marquardt refinement of the best solution in pixel space.
    pub refine_lm: Option<LMParams>,
}

impl Default for IPPEParams {
    fn default() -> Self {
        Self {
            refine_lm: Some(LMParams::default()),
        }
    }
}

/// Marker type for the IPPE solver.
pub struct IPPE;

impl IPPE {
    /// Estimate two candidate poses for a square planar object from its four image corners.
    ///
    /// The object points are the corners of a square of side `square_length`
    /// on the `z = 0` plane in the order:
    ///  - p0 = [-L/2,  L/2, 0]
    ///  - p1 = [ L/2,  L/2, 0]
    ///  - p2 = [ L/2, -L/2, 0]
    ///  - p3 = [-L/2, -L/2, 0]
    ///
    /// `image_points_norm` are undistorted, normalized image coordinates.
    pub fn solve_square(
        image_points_norm: &[[f64; 2]; 4],
        square_length: f64,
    ) -> Result<IPPEResult, PnPError> {
        if square_length <= 0.0 {
            return Err(PnPError::Degenerate("square length must be positive"));
        }
        let h = square_length / 2.0;
        let object = [[-h, h, 0.0], [h, h, 0.0], [h, -h, 0.0], [-h, -h, 0.0]];
        Self::solve_planar(&object, image_points_norm)
    }

    /// Estimate both candidate poses of a planar target.
    ///
    /// `points_world` must share a single `z` value. `points_norm` are the
    /// undistorted, normalized image coordinates of the same points.
    pub fn solve_planar(
        points_world: &[[f64; 3]],
        points_norm: &[[f64; 2]],
    ) -> Result<IPPEResult, PnPError> {
        if points_world.len() != points_norm.len() {
            return Err(PnPError::MismatchedArrayLengths {
                left_name: "world points",
                left_len: points_world.len(),
                right_name: "image points",
                right_len: points_norm.len(),
            });
        }
        let n = points_world.len();
        if n < 4 {
            return Err(PnPError::InsufficientCorrespondences {
                required: 4,
                actual: n,
            });
        }

        let centroid = compute_centroid(points_world);
        let z0 = points_world[0][2];
        let deviation = points_world
            .iter()
            .map(|p| (p[2] - z0).abs())
            .fold(0.0, f64::max);
        if deviation > PLANARITY_TOLERANCE {
            return Err(PnPError::NonPlanar(deviation));
        }

        let origin = [centroid[0], centroid[1], z0];
        let plane: Vec<[f64; 2]> = points_world
            .iter()
            .map(|p| [p[0] - origin[0], p[1] - origin[1]])
            .collect();

        let h = find_homography(&plane, points_norm)?;
        if h[(2, 2)].abs() < 1e-12 {
            return Err(PnPError::Degenerate("target origin projects to infinity"));
        }
        let h = h / h[(2, 2)];

        let j00 = h[(0, 0)] - h[(2, 0)] * h[(0, 2)];
        let j01 = h[(0, 1)] - h[(2, 1)] * h[(0, 2)];
        let j10 = h[(1, 0)] - h[(2, 0)] * h[(1, 2)];
        let j11 = h[(1, 1)] - h[(2, 1)] * h[(1, 2)];

        let (r1, r2) = rotations_from_jacobian(j00, j01, j10, j11, h[(0, 2)], h[(1, 2)])?;

        let centred: Vec<[f64; 3]> = plane.iter().map(|p| [p[0], p[1], 0.0]).collect();
        let mut solutions = Vec::with_capacity(2);
        for r in [r1, r2] {
            let t = translation_for_rotation(&centred, points_norm, &r)?;
            let t_world = r * Vector3::new(origin[0], origin[1], origin[2]);
            let translation = [t.x - t_world.x, t.y - t_world.y, t.z - t_world.z];

            let mut pose = PnPResult::from_rotation(matrix_rows(&r), translation);
            pose.reproj_rmse = Some(reprojection_rmse(
                points_world,
                points_norm,
                &pose,
                &CameraModel::normalized(),
            )?);
            solutions.push(pose);
        }

        solutions.sort_by(|a, b| {
            a.reproj_rmse
                .unwrap_or(f64::INFINITY)
                .total_cmp(&b.reproj_rmse.unwrap_or(f64::INFINITY))
        });
        let second = solutions.pop().ok_or(PnPError::Degenerate("no pose"))?;
        let first = solutions.pop().ok_or(PnPError::Degenerate("no pose"))?;
        Ok(IPPEResult { first, second })
    }
}

impl PnPSolver for IPPE {
    type Param = IPPEParams;

    fn solve(
        points_world: &[[f64; 3]],
        points_image: &[[f64; 2]],
        camera: &CameraModel,
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError> {
        let points_norm = camera.undistort_pixels(points_image);
        let IPPEResult { first, .. } = Self::solve_planar(points_world, &points_norm)?;

        let Some(lm) = &params.refine_lm else {
            let mut pose = first;
            pose.reproj_rmse = Some(reprojection_rmse(points_world, points_image, &pose, camera)?);
            return Ok(pose);
        };

        let mut rvec = first.rvec;
        let mut t = first.translation;
        let (rmse, iters, converged) =
            refine_pose_lm(points_world, points_image, camera, &mut rvec, &mut t, lm)?;

        let mut pose = PnPResult::from_rvec(rvec, t);
        pose.reproj_rmse = Some(rmse);
        pose.num_iterations = Some(iters);
        pose.converged = Some(converged);
        Ok(pose)
    }
}

/// Rotation taking the unit vector along `v` to the z axis.
fn rotate_vec_to_z(v: Vector3<f64>) -> Matrix3<f64> {
    let a = v.normalize();
    let (ax, ay, c) = (a.x, a.y, a.z);
    if (1.0 + c).abs() < 1e-12 {
        return Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, -1.0);
    }
    let d = 1.0 / (1.0 + c);
    Matrix3::new(
        1.0 - ax * ax * d,
        -ax * ay * d,
        -ax,
        -ax * ay * d,
        1.0 - ay * ay * d,
        -ay,
        ax,
        ay,
        1.0 - (ax * ax + ay * ay) * d,
    )
}

/// The two rotations compatible with the homography Jacobian `J` at the image point `(p, q)`.
fn rotations_from_jacobian(
    j00: f64,
    j01: f64,
    j10: f64,
    j11: f64,
    p: f64,
    q: f64,
) -> Result<(Matrix3<f64>, Matrix3<f64>), PnPError> {
    let rv = rotate_vec_to_z(Vector3::new(p, q, 1.0)).transpose();

    let b00 = rv[(0, 0)] - p * rv[(2, 0)];
    let b01 = rv[(0, 1)] - p * rv[(2, 1)];
    let b10 = rv[(1, 0)] - q * rv[(2, 0)];
    let b11 = rv[(1, 1)] - q * rv[(2, 1)];

    let det = b00 * b11 - b01 * b10;
    if det.abs() < 1e-15 {
        return Err(PnPError::Degenerate("singular view direction"));
    }
    let inv = 1.0 / det;
    let (bi00, bi01, bi10, bi11) = (inv * b11, -inv * b01, -inv * b10, inv * b00);

    let a00 = bi00 * j00 + bi01 * j10;
    let a01 = bi00 * j01 + bi01 * j11;
    let a10 = bi10 * j00 + bi11 * j10;
    let a11 = bi10 * j01 + bi11 * j11;

    let ata00 = a00 * a00 + a01 * a01;
    let ata01 = a00 * a10 + a01 * a11;
    let ata11 = a10 * a10 + a11 * a11;

    let gamma2 =
        0.5 * (ata00 + ata11 + ((ata00 - ata11).powi(2) + 4.0 * ata01 * ata01).sqrt());
    if gamma2.is_nan() || gamma2 <= 1e-24 {
        return Err(PnPError::Degenerate("vanishing homography jacobian"));
    }
    let gamma = gamma2.sqrt();

    let (r00, r01, r10, r11) = (a00 / gamma, a01 / gamma, a10 / gamma, a11 / gamma);

    let b0 = (1.0 - r00 * r00 - r10 * r10).max(0.0).sqrt();
    let mut b1 = (1.0 - r01 * r01 - r11 * r11).max(0.0).sqrt();
    if -r00 * r01 - r10 * r11 < 0.0 {
        b1 = -b1;
    }

    let build = |s: f64| {
        let c0 = Vector3::new(r00, r10, s * b0);
        let c1 = Vector3::new(r01, r11, s * b1);
        let c2 = c0.cross(&c1);
        rv * Matrix3::from_columns(&[c0, c1, c2])
    };

    Ok((build(1.0), build(-1.0)))
}

/// Least-squares translation for a fixed rotation from normalized observations.
fn translation_for_rotation(
    points: &[[f64; 3]],
    points_norm: &[[f64; 2]],
    r: &Matrix3<f64>,
) -> Result<Vector3<f64>, PnPError> {
    let mut ata = Matrix3::<f64>::zeros();
    let mut atb = Vector3::<f64>::zeros();

    for (p, uv) in points.iter().zip(points_norm.iter()) {
        let rp = r * Vector3::new(p[0], p[1], p[2]);
        let (u, v) = (uv[0], uv[1]);

        let row_u = Vector3::new(1.0, 0.0, -u);
        let row_v = Vector3::new(0.0, 1.0, -v);
        ata += row_u * row_u.transpose() + row_v * row_v.transpose();
        atb += row_u * (u * rp.z - rp.x) + row_v * (v * rp.z - rp.y);
    }

    ata.try_inverse()
        .map(|inv| inv * atb)
        .ok_or(PnPError::Degenerate("translation system is singular"))
}

fn matrix_rows(m: &Matrix3<f64>) -> [[f64; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::project_points;
    use approx::assert_relative_eq;

    fn assert_pose_eq(a: &PnPResult, b: &PnPResult, eps: f64) {
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(a.rotation[i][j], b.rotation[i][j], epsilon = eps);
            }
            assert_relative_eq!(a.translation[i], b.translation[i], epsilon = eps);
        }
    }

    #[test]
    fn test_solve_square_recovers_pose() -> Result<(), PnPError> {
        let gt = PnPResult::from_rvec([0.15, -0.1, 0.3], [0.02, -0.01, 0.6]);
        let l = 0.1;
        let h = l / 2.0;
        let object = [[-h, h, 0.0], [h, h, 0.0], [h, -h, 0.0], [-h, -h, 0.0]];
        let norm = project_points(&object, &gt, &CameraModel::normalized());
        let norm: [[f64; 2]; 4] = [norm[0], norm[1], norm[2], norm[3]];

        let res = IPPE::solve_square(&norm, l)?;
        assert_pose_eq(&res.first, &gt, 1e-8);
        assert!(res.first.reproj_rmse <= res.second.reproj_rmse);
        Ok(())
    }

    #[test]
    fn test_solve_planar_offset_plane() -> Result<(), PnPError> {
        let gt = PnPResult::from_rvec([-0.3, 0.25, -0.1], [-0.12, 0.05, 1.1]);
        let object: Vec<[f64; 3]> = (0..5)
            .flat_map(|r| (0..7).map(move |c| [0.04 * c as f64 + 0.2, 0.04 * r as f64 - 0.1, 0.05]))
            .collect();
        let norm = project_points(&object, &gt, &CameraModel::normalized());

        let res = IPPE::solve_planar(&object, &norm)?;
        assert_pose_eq(&res.first, &gt, 1e-8);
        Ok(())
    }

    #[test]
    fn test_non_planar_rejected() {
        let object = [
            [0.0, 0.0, 0.0],
            [0.1, 0.0, 0.0],
            [0.1, 0.1, 0.02],
            [0.0, 0.1, 0.0],
        ];
        let norm = [[0.0, 0.0], [0.1, 0.0], [0.1, 0.1], [0.0, 0.1]];
        assert!(matches!(
            IPPE::solve_planar(&object, &norm),
            Err(PnPError::NonPlanar(_))
        ));
    }

    #[test]
    fn test_rotate_vec_to_z() {
        let v = Vector3::new(0.3, -0.2, 1.0);
        let r = rotate_vec_to_z(v);
        let z = r * v.normalize();
        assert_relative_eq!(z.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(z.y, 0.0, epsilon = 1e-12);
        assert_relative_eq!(z.z, 1.0, epsilon = 1e-12);
    }
}
