//! Plane-to-image homography estimation with the normalized DLT.

use crate::pnp::PnPError;
use nalgebra::{DMatrix, Matrix3, Vector3};

/// Estimate `H` such that `dst ~ H * src` from at least four correspondences.
///
/// Both point sets are translated and scaled (Hartley normalization) before
/// the direct linear transform, and the result is scaled so that `H[2][2] = 1`
/// whenever that entry is not vanishing.
pub fn find_homography(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Result<Matrix3<f64>, PnPError> {
    if src.len() != dst.len() {
        return Err(PnPError::MismatchedArrayLengths {
            left_name: "source points",
            left_len: src.len(),
            right_name: "destination points",
            right_len: dst.len(),
        });
    }
    let n = src.len();
    if n < 4 {
        return Err(PnPError::InsufficientCorrespondences {
            required: 4,
            actual: n,
        });
    }

    let t_src = normalization_transform(src)?;
    let t_dst = normalization_transform(dst)?;

    // the null vector needs a square system, pad with zero rows for n == 4
    let rows = (2 * n).max(9);
    let mut a = DMatrix::<f64>::zeros(rows, 9);

    for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
        let ps = t_src * Vector3::new(s[0], s[1], 1.0);
        let pd = t_dst * Vector3::new(d[0], d[1], 1.0);
        let (x, y) = (ps.x, ps.y);
        let (u, v) = (pd.x, pd.y);

        let r0 = 2 * i;
        let r1 = r0 + 1;

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| PnPError::SvdFailed("failed to compute V^T".to_string()))?;

    // nalgebra sorts singular values in descending order
    let h = v_t.row(v_t.nrows() - 1);
    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or(PnPError::Degenerate("normalization transform is singular"))?;
    let mut hmat = t_dst_inv * h_norm * t_src;

    let scale = hmat[(2, 2)];
    if scale.abs() > 1e-12 {
        hmat /= scale;
    } else {
        let norm = hmat.norm();
        if norm < f64::EPSILON {
            return Err(PnPError::Degenerate("homography vanished"));
        }
        hmat /= norm;
    }

    Ok(hmat)
}

/// Apply a homography to a 2D point.
#[inline]
pub fn transfer(h: &Matrix3<f64>, p: &[f64; 2]) -> [f64; 2] {
    let q = h * Vector3::new(p[0], p[1], 1.0);
    [q.x / q.z, q.y / q.z]
}

/// Similarity transform moving the centroid to the origin with mean distance sqrt(2).
fn normalization_transform(points: &[[f64; 2]]) -> Result<Matrix3<f64>, PnPError> {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(ax, ay), p| (ax + p[0], ay + p[1]));
    let (mx, my) = (sx / n, sy / n);

    let mean_dist = points
        .iter()
        .map(|p| ((p[0] - mx).powi(2) + (p[1] - my).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    if mean_dist < 1e-12 {
        return Err(PnPError::Degenerate("all points coincide"));
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    Ok(Matrix3::new(s, 0.0, -s * mx, 0.0, s, -s * my, 0.0, 0.0, 1.0))
}
