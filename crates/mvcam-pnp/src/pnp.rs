//! Common data types shared across Perspective-n-Point (PnP) solvers.

use crate::camera::CameraModel;
use glam::DVec3;
use mvcam_lie::so3::SO3;
use thiserror::Error;

/// Error types for PnP solvers.
#[derive(Debug, Error)]
pub enum PnPError {
    /// Invalid input data - insufficient correspondences for the specific solver
    #[error("PnP solver requires at least {required} 2D-3D correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum number of correspondences required by the solver
        required: usize,
        /// Actual number of correspondences provided
        actual: usize,
    },

    /// Invalid input data - mismatched array lengths with descriptive labels.
    #[error("Mismatched array lengths: {left_name} ({left_len}) != {right_name} ({right_len})")]
    MismatchedArrayLengths {
        /// Label for the left-hand slice
        left_name: &'static str,
        /// Length of the left-hand slice
        left_len: usize,
        /// Label for the right-hand slice
        right_name: &'static str,
        /// Length of the right-hand slice
        right_len: usize,
    },

    /// Singular value decomposition failed
    #[error("SVD computation failed: {0}")]
    SvdFailed(String),

    /// The point configuration does not constrain the model.
    #[error("Degenerate point configuration: {0}")]
    Degenerate(&'static str),

    /// The object points do not lie on a common `z = const` plane.
    #[error("Object points are not coplanar (max deviation {0})")]
    NonPlanar(f64),

    /// The estimated pose is not physically valid.
    #[error("Invalid pose: {0}")]
    InvalidPose(&'static str),

    /// Invalid camera intrinsics matrix
    #[error("Invalid camera intrinsics matrix: {0}")]
    InvalidIntrinsics(String),

    /// Invalid distortion parameters
    #[error("Invalid distortion parameters: {0}")]
    InvalidDistortion(String),
}

/// Result returned by a PnP solver.
#[derive(Debug, Clone, PartialEq)]
pub struct PnPResult {
    /// Row-major rotation **world -> camera**.
    pub rotation: [[f64; 3]; 3],
    /// Translation **world -> camera**.
    pub translation: [f64; 3],
    /// Rotation as a Rodrigues (axis * angle) vector.
    pub rvec: [f64; 3],
    /// Root-mean-square reprojection error in pixels, when computed.
    pub reproj_rmse: Option<f64>,
    /// Number of refinement iterations, when refined.
    pub num_iterations: Option<usize>,
    /// Whether the refinement converged, when refined.
    pub converged: Option<bool>,
}

impl PnPResult {
    /// Build a result from a rotation vector and translation.
    pub fn from_rvec(rvec: [f64; 3], translation: [f64; 3]) -> Self {
        let rotation = SO3::exp(DVec3::from_array(rvec)).to_rows();
        Self {
            rotation,
            translation,
            rvec,
            reproj_rmse: None,
            num_iterations: None,
            converged: None,
        }
    }

    /// Build a result from a row-major rotation matrix and translation.
    pub fn from_rotation(rotation: [[f64; 3]; 3], translation: [f64; 3]) -> Self {
        let rvec = SO3::from_rows(&rotation).log().to_array();
        Self {
            rotation,
            translation,
            rvec,
            reproj_rmse: None,
            num_iterations: None,
            converged: None,
        }
    }

    /// Transform a world point into the camera frame.
    #[inline]
    pub fn transform(&self, p: &[f64; 3]) -> [f64; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0],
            r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1],
            r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2],
        ]
    }

    /// Camera projection matrix `P = K [R | t]` (3x4, row-major).
    pub fn projection_matrix(&self, k: &[[f64; 3]; 3]) -> [[f64; 4]; 3] {
        let mut rt = [[0.0; 4]; 3];
        for (row, rt_row) in rt.iter_mut().enumerate() {
            rt_row[..3].copy_from_slice(&self.rotation[row]);
            rt_row[3] = self.translation[row];
        }

        let mut p = [[0.0; 4]; 3];
        for i in 0..3 {
            for j in 0..4 {
                p[i][j] = (0..3).map(|m| k[i][m] * rt[m][j]).sum();
            }
        }
        p
    }

    /// Camera center in world coordinates, `C = -R^T t`.
    pub fn camera_center(&self) -> [f64; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            -(r[0][0] * t[0] + r[1][0] * t[1] + r[2][0] * t[2]),
            -(r[0][1] * t[0] + r[1][1] * t[1] + r[2][1] * t[2]),
            -(r[0][2] * t[0] + r[1][2] * t[1] + r[2][2] * t[2]),
        ]
    }
}

/// A trait implemented by every PnP solver.
pub trait PnPSolver {
    /// Solver specific parameters.
    type Param;

    /// Solve for the camera pose from 3D world points and their pixel observations.
    fn solve(
        points_world: &[[f64; 3]],
        points_image: &[[f64; 2]],
        camera: &CameraModel,
        params: &Self::Param,
    ) -> Result<PnPResult, PnPError>;
}
