use glam::{DMat3, DQuat, DVec3};
use std::ops::Mul;

/// Below this angle the exponential and logarithm maps use their Taylor expansions.
const SMALL_ANGLE: f64 = 1e-10;

/// A 3D rotation stored as a unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SO3 {
    /// Unit quaternion representation of the rotation.
    pub q: DQuat,
}

impl SO3 {
    /// The identity rotation.
    pub const IDENTITY: Self = Self { q: DQuat::IDENTITY };

    /// Create a rotation from a (not necessarily normalized) quaternion.
    pub fn from_quaternion(q: DQuat) -> Self {
        Self { q: q.normalize() }
    }

    /// Create a rotation from a rotation matrix.
    ///
    /// The matrix must be orthonormal with determinant +1.
    pub fn from_matrix(mat: &DMat3) -> Self {
        Self {
            q: DQuat::from_mat3(mat).normalize(),
        }
    }

    /// Create a rotation from a row-major 3x3 array.
    pub fn from_rows(rows: &[[f64; 3]; 3]) -> Self {
        Self::from_matrix(&DMat3::from_cols_array_2d(rows).transpose())
    }

    /// The rotation as a 3x3 matrix.
    pub fn matrix(&self) -> DMat3 {
        DMat3::from_quat(self.q)
    }

    /// The rotation as a row-major 3x3 array.
    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        self.matrix().transpose().to_cols_array_2d()
    }

    /// Exponential map: rotation vector (axis * angle) to rotation.
    pub fn exp(v: DVec3) -> Self {
        let theta = v.length();
        let (w, b) = if theta < SMALL_ANGLE {
            (1.0, 0.5)
        } else {
            let half = 0.5 * theta;
            (half.cos(), half.sin() / theta)
        };
        let xyz = v * b;
        Self::from_quaternion(DQuat::from_xyzw(xyz.x, xyz.y, xyz.z, w))
    }

    /// Logarithm map: rotation to rotation vector with angle in `[0, pi]`.
    pub fn log(&self) -> DVec3 {
        // q and -q encode the same rotation, pick the one with w >= 0
        let q = if self.q.w < 0.0 { -self.q } else { self.q };
        let xyz = DVec3::new(q.x, q.y, q.z);
        let n = xyz.length();
        if n < SMALL_ANGLE {
            xyz * (2.0 / q.w)
        } else {
            xyz * (2.0 * n.atan2(q.w) / n)
        }
    }

    /// Vector to skew-symmetric matrix.
    pub fn hat(v: DVec3) -> DMat3 {
        DMat3::from_cols(
            DVec3::new(0.0, v.z, -v.y),
            DVec3::new(-v.z, 0.0, v.x),
            DVec3::new(v.y, -v.x, 0.0),
        )
    }

    /// Skew-symmetric matrix to vector.
    pub fn vee(omega: DMat3) -> DVec3 {
        DVec3::new(omega.y_axis.z, omega.z_axis.x, omega.x_axis.y)
    }

    /// The inverse rotation.
    pub fn inverse(&self) -> Self {
        Self {
            q: self.q.conjugate(),
        }
    }

    /// Rotate a point.
    #[inline]
    pub fn transform(&self, p: DVec3) -> DVec3 {
        self.q * p
    }
}

impl Default for SO3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mul for SO3 {
    type Output = SO3;

    fn mul(self, rhs: Self) -> Self::Output {
        Self::from_quaternion(self.q * rhs.q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identity() {
        let s = SO3::IDENTITY;
        assert_eq!(s.q, DQuat::from_xyzw(0.0, 0.0, 0.0, 1.0));
        assert_eq!(s.log(), DVec3::ZERO);
    }

    #[test]
    fn test_exp_log() {
        let v = DVec3::new(0.3, -0.2, 1.1);
        let r = SO3::exp(v);
        let w = r.log();
        assert_relative_eq!(v.x, w.x, epsilon = 1e-12);
        assert_relative_eq!(v.y, w.y, epsilon = 1e-12);
        assert_relative_eq!(v.z, w.z, epsilon = 1e-12);
    }

    #[test]
    fn test_small_angle() {
        let v = DVec3::new(1e-12, -2e-12, 0.0);
        let w = SO3::exp(v).log();
        assert_relative_eq!(v.x, w.x, epsilon = 1e-15);
        assert_relative_eq!(v.y, w.y, epsilon = 1e-15);
    }

    #[test]
    fn test_matrix_rows() {
        let r = SO3::exp(DVec3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2));
        let rows = r.to_rows();
        // rotation of +90 deg about z maps x to y
        assert_relative_eq!(rows[0][1], -1.0, epsilon = 1e-12);
        assert_relative_eq!(rows[1][0], 1.0, epsilon = 1e-12);
        let back = SO3::from_rows(&rows);
        assert_relative_eq!(back.log().z, std::f64::consts::FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_hat_vee() {
        let v = DVec3::new(1.0, 2.0, 3.0);
        let m = SO3::hat(v);
        assert_eq!(SO3::vee(m), v);
        // hat(v) * u == v x u
        let u = DVec3::new(-0.5, 0.25, 2.0);
        let lhs = m * u;
        let rhs = v.cross(u);
        assert_relative_eq!(lhs.x, rhs.x, epsilon = 1e-12);
        assert_relative_eq!(lhs.y, rhs.y, epsilon = 1e-12);
        assert_relative_eq!(lhs.z, rhs.z, epsilon = 1e-12);
    }

    #[test]
    fn test_compose_inverse() {
        let a = SO3::exp(DVec3::new(0.1, 0.4, -0.3));
        let id = a * a.inverse();
        assert_relative_eq!(id.log().length(), 0.0, epsilon = 1e-12);
    }
}
