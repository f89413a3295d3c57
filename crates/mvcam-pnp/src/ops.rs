//! Projection and error helpers shared by the solvers.

use crate::camera::CameraModel;
use crate::pnp::{PnPError, PnPResult};

/// Project world points into pixels through a pose and a camera model.
///
/// Points behind the camera are projected through their (negative) depth as
/// is, which makes their reprojection error large rather than undefined.
pub fn project_points(
    points_world: &[[f64; 3]],
    pose: &PnPResult,
    camera: &CameraModel,
) -> Vec<[f64; 2]> {
    points_world
        .iter()
        .map(|pw| {
            let pc = pose.transform(pw);
            let z = if pc[2].abs() < f64::EPSILON {
                f64::EPSILON
            } else {
                pc[2]
            };
            camera.distort_normalized(pc[0] / z, pc[1] / z)
        })
        .collect()
}

/// Per-point Euclidean reprojection errors in pixels.
pub fn reprojection_errors(
    points_world: &[[f64; 3]],
    points_image: &[[f64; 2]],
    pose: &PnPResult,
    camera: &CameraModel,
) -> Result<Vec<f64>, PnPError> {
    if points_world.len() != points_image.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "world points",
            left_len: points_world.len(),
            right_name: "image points",
            right_len: points_image.len(),
        });
    }

    Ok(project_points(points_world, pose, camera)
        .iter()
        .zip(points_image.iter())
        .map(|(p, q)| ((p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2)).sqrt())
        .collect())
}

/// Root-mean-square reprojection error in pixels.
pub fn reprojection_rmse(
    points_world: &[[f64; 3]],
    points_image: &[[f64; 2]],
    pose: &PnPResult,
    camera: &CameraModel,
) -> Result<f64, PnPError> {
    let errors = reprojection_errors(points_world, points_image, pose, camera)?;
    if errors.is_empty() {
        return Ok(0.0);
    }
    let sum_sq: f64 = errors.iter().map(|e| e * e).sum();
    Ok((sum_sq / errors.len() as f64).sqrt())
}

/// Compute the centroid of a set of points.
pub fn compute_centroid(pts: &[[f64; 3]]) -> [f64; 3] {
    if pts.is_empty() {
        return [0.0; 3];
    }
    let mut c = [0.0; 3];
    for p in pts {
        c[0] += p[0];
        c[1] += p[1];
        c[2] += p[2];
    }
    let inv_n = 1.0 / pts.len() as f64;
    [c[0] * inv_n, c[1] * inv_n, c[2] * inv_n]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_compute_centroid() {
        let pts = [[0.0, 0.0, 0.0], [2.0, 0.0, 0.0], [2.0, 4.0, 0.0], [0.0, 4.0, 0.0]];
        assert_eq!(compute_centroid(&pts), [1.0, 2.0, 0.0]);
        assert_eq!(compute_centroid(&[]), [0.0; 3]);
    }

    #[test]
    fn test_reprojection_errors_zero_at_truth() -> Result<(), PnPError> {
        let camera = CameraModel::default();
        let pose = PnPResult::from_rvec([0.05, 0.1, 0.0], [0.0, 0.0, 1.5]);
        let world = [[0.0, 0.0, 0.0], [0.1, 0.0, 0.0], [0.1, 0.1, 0.0], [0.0, 0.1, 0.0]];
        let image = project_points(&world, &pose, &camera);

        let errors = reprojection_errors(&world, &image, &pose, &camera)?;
        assert!(errors.iter().all(|e| *e < 1e-12));

        let shifted: Vec<[f64; 2]> = image.iter().map(|p| [p[0] + 3.0, p[1] - 4.0]).collect();
        assert_relative_eq!(
            reprojection_rmse(&world, &shifted, &pose, &camera)?,
            5.0,
            epsilon = 1e-9
        );
        Ok(())
    }
}
