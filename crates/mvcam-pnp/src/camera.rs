//! Pinhole camera model with Brown-Conrady lens distortion.

use crate::pnp::PnPError;

/// Maximum number of fixed-point iterations used to invert the distortion model.
const UNDISTORT_MAX_ITERATIONS: usize = 20;
const UNDISTORT_EPSILON: f64 = 1e-12;

/// Represents the intrinsic parameters of a pinhole camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraIntrinsics {
    /// Focal length in x direction
    pub fx: f64,
    /// Focal length in y direction
    pub fy: f64,
    /// Principal point x coordinate
    pub cx: f64,
    /// Principal point y coordinate
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Create camera intrinsics from focal lengths and principal point.
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    /// Create camera intrinsics from a row-major 3x3 intrinsics matrix.
    ///
    /// Skew is not modelled, the `[0][1]` entry must be zero.
    pub fn from_matrix(k: &[[f64; 3]; 3]) -> Result<Self, PnPError> {
        if k[0][1] != 0.0 || k[1][0] != 0.0 || k[2][0] != 0.0 || k[2][1] != 0.0 || k[2][2] != 1.0
        {
            return Err(PnPError::InvalidIntrinsics(
                "matrix must have form [[fx, 0, cx], [0, fy, cy], [0, 0, 1]]".to_string(),
            ));
        }
        if k[0][0] <= 0.0 || k[1][1] <= 0.0 {
            return Err(PnPError::InvalidIntrinsics(format!(
                "focal lengths must be positive, got fx={} fy={}",
                k[0][0], k[1][1]
            )));
        }

        Ok(Self {
            fx: k[0][0],
            fy: k[1][1],
            cx: k[0][2],
            cy: k[1][2],
        })
    }

    /// Convert to a row-major 3x3 intrinsics matrix.
    pub fn to_matrix(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Pixel to normalized image coordinates (K^-1 applied).
    #[inline]
    pub fn normalize(&self, u: f64, v: f64) -> [f64; 2] {
        [(u - self.cx) / self.fx, (v - self.cy) / self.fy]
    }

    /// Normalized image coordinates to pixel.
    #[inline]
    pub fn denormalize(&self, x: f64, y: f64) -> [f64; 2] {
        [self.fx * x + self.cx, self.fy * y + self.cy]
    }
}

/// Brown-Conrady distortion with three radial and two tangential terms.
///
/// Coefficients are stored and exchanged in the usual `k1, k2, p1, p2, k3` order.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PolynomialDistortion {
    /// First radial coefficient
    pub k1: f64,
    /// Second radial coefficient
    pub k2: f64,
    /// First tangential coefficient
    pub p1: f64,
    /// Second tangential coefficient
    pub p2: f64,
    /// Third radial coefficient
    pub k3: f64,
}

impl PolynomialDistortion {
    /// Create distortion parameters with all coefficients set to zero (no distortion).
    pub fn none() -> Self {
        Self::default()
    }

    /// Create distortion parameters with only the first two radial coefficients.
    pub fn radial(k1: f64, k2: f64) -> Self {
        Self {
            k1,
            k2,
            ..Default::default()
        }
    }

    /// Create distortion parameters from a coefficient slice in `k1, k2, p1, p2[, k3]` order.
    pub fn from_coefficients(coeffs: &[f64]) -> Result<Self, PnPError> {
        match *coeffs {
            [] => Ok(Self::none()),
            [k1, k2, p1, p2] => Ok(Self {
                k1,
                k2,
                p1,
                p2,
                k3: 0.0,
            }),
            [k1, k2, p1, p2, k3] => Ok(Self { k1, k2, p1, p2, k3 }),
            _ => Err(PnPError::InvalidDistortion(format!(
                "expected 0, 4 or 5 coefficients, got {}",
                coeffs.len()
            ))),
        }
    }

    /// Coefficients in `k1, k2, p1, p2, k3` order.
    pub fn coefficients(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    /// Check if there is any distortion.
    pub fn has_distortion(&self) -> bool {
        self.coefficients().iter().any(|&c| c != 0.0)
    }

    /// Apply the distortion model to a normalized image point.
    pub fn distort(&self, x: f64, y: f64) -> [f64; 2] {
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let xy2 = 2.0 * x * y;
        [
            x * radial + self.p1 * xy2 + self.p2 * (r2 + 2.0 * x * x),
            y * radial + self.p1 * (r2 + 2.0 * y * y) + self.p2 * xy2,
        ]
    }

    /// Invert the distortion model for a normalized image point by fixed-point iteration.
    pub fn undistort(&self, xd: f64, yd: f64) -> [f64; 2] {
        let mut x = xd;
        let mut y = yd;
        for _ in 0..UNDISTORT_MAX_ITERATIONS {
            let [px, py] = self.distort(x, y);
            let dx = xd - px;
            let dy = yd - py;
            x += dx;
            y += dy;
            if dx.abs() < UNDISTORT_EPSILON && dy.abs() < UNDISTORT_EPSILON {
                break;
            }
        }
        [x, y]
    }
}

/// A complete camera model with intrinsics and optional distortion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    /// Camera intrinsics
    pub intrinsics: CameraIntrinsics,
    /// Distortion parameters (None for no distortion)
    pub distortion: Option<PolynomialDistortion>,
}

impl CameraModel {
    /// Create a camera model without distortion.
    pub fn pinhole(intrinsics: CameraIntrinsics) -> Self {
        Self {
            intrinsics,
            distortion: None,
        }
    }

    /// Create a camera model with distortion.
    pub fn with_distortion(intrinsics: CameraIntrinsics, distortion: PolynomialDistortion) -> Self {
        Self {
            intrinsics,
            distortion: Some(distortion),
        }
    }

    /// Identity camera operating directly on normalized image coordinates.
    pub fn normalized() -> Self {
        Self::pinhole(CameraIntrinsics::new(1.0, 1.0, 0.0, 0.0))
    }

    /// Build a camera model from a 3x3 intrinsics matrix and a coefficient slice.
    pub fn from_parts(k: &[[f64; 3]; 3], coeffs: &[f64]) -> Result<Self, PnPError> {
        let intrinsics = CameraIntrinsics::from_matrix(k)?;
        let distortion = PolynomialDistortion::from_coefficients(coeffs)?;
        Ok(if distortion.has_distortion() {
            Self::with_distortion(intrinsics, distortion)
        } else {
            Self::pinhole(intrinsics)
        })
    }

    /// Check if the camera has distortion.
    pub fn has_distortion(&self) -> bool {
        self.distortion.is_some_and(|d| d.has_distortion())
    }

    /// Get the intrinsics matrix.
    pub fn intrinsics_matrix(&self) -> [[f64; 3]; 3] {
        self.intrinsics.to_matrix()
    }

    /// Map a normalized (undistorted) image point to a distorted pixel.
    pub fn distort_normalized(&self, x: f64, y: f64) -> [f64; 2] {
        let [xd, yd] = match &self.distortion {
            Some(d) => d.distort(x, y),
            None => [x, y],
        };
        self.intrinsics.denormalize(xd, yd)
    }

    /// Map a distorted pixel to its undistorted normalized image point.
    pub fn undistort_pixel(&self, u: f64, v: f64) -> [f64; 2] {
        let [xd, yd] = self.intrinsics.normalize(u, v);
        match &self.distortion {
            Some(d) => d.undistort(xd, yd),
            None => [xd, yd],
        }
    }

    /// Undistort multiple pixels into normalized image coordinates.
    pub fn undistort_pixels(&self, points: &[[f64; 2]]) -> Vec<[f64; 2]> {
        points
            .iter()
            .map(|&[u, v]| self.undistort_pixel(u, v))
            .collect()
    }

    /// Project a point expressed in the camera frame to pixels.
    ///
    /// Returns `None` for points on or behind the image plane.
    pub fn project(&self, pc: [f64; 3]) -> Option<[f64; 2]> {
        if pc[2] <= f64::EPSILON {
            return None;
        }
        let inv_z = 1.0 / pc[2];
        Some(self.distort_normalized(pc[0] * inv_z, pc[1] * inv_z))
    }
}

impl Default for CameraModel {
    fn default() -> Self {
        Self::pinhole(CameraIntrinsics::new(1000.0, 1000.0, 640.0, 480.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_camera_intrinsics_from_matrix() -> Result<(), PnPError> {
        let k = [[1000.0, 0.0, 640.0], [0.0, 1000.0, 480.0], [0.0, 0.0, 1.0]];
        let intrinsics = CameraIntrinsics::from_matrix(&k)?;
        assert_eq!(intrinsics.fx, 1000.0);
        assert_eq!(intrinsics.cy, 480.0);
        assert_eq!(intrinsics.to_matrix(), k);
        Ok(())
    }

    #[test]
    fn test_camera_intrinsics_rejects_skew() {
        let k = [[1000.0, 2.0, 640.0], [0.0, 1000.0, 480.0], [0.0, 0.0, 1.0]];
        assert!(matches!(
            CameraIntrinsics::from_matrix(&k),
            Err(PnPError::InvalidIntrinsics(_))
        ));
    }

    #[test]
    fn test_distortion_from_coefficients() -> Result<(), PnPError> {
        let d = PolynomialDistortion::from_coefficients(&[0.1, -0.05, 0.001, 0.002])?;
        assert_eq!(d.coefficients(), [0.1, -0.05, 0.001, 0.002, 0.0]);
        assert!(d.has_distortion());
        assert!(PolynomialDistortion::from_coefficients(&[0.1, 0.2]).is_err());
        assert!(!PolynomialDistortion::from_coefficients(&[])?.has_distortion());
        Ok(())
    }

    #[test]
    fn test_undistort_inverts_distort() {
        let camera = CameraModel::with_distortion(
            CameraIntrinsics::new(1200.0, 1180.0, 960.0, 540.0),
            PolynomialDistortion {
                k1: -0.12,
                k2: 0.03,
                p1: 0.001,
                p2: -0.0008,
                k3: 0.0,
            },
        );

        let normalized = [0.31, -0.22];
        let pixel = camera.distort_normalized(normalized[0], normalized[1]);
        let back = camera.undistort_pixel(pixel[0], pixel[1]);
        assert_relative_eq!(back[0], normalized[0], epsilon = 1e-9);
        assert_relative_eq!(back[1], normalized[1], epsilon = 1e-9);
    }

    #[test]
    fn test_project_behind_camera() {
        let camera = CameraModel::default();
        assert!(camera.project([0.0, 0.0, -1.0]).is_none());
        let p = camera.project([0.0, 0.0, 2.0]).unwrap();
        assert_eq!(p, [640.0, 480.0]);
    }
}
