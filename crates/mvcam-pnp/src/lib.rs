#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # mvcam PnP (Perspective-n-Point)
//!
//! Camera pose estimation for planar calibration targets.
//!
//! ## Key Features
//!
//! - **IPPE**: closed-form planar pose with both ambiguous solutions
//! - **Levenberg-Marquardt refinement** in pixel space
//! - **Distortion handling** through the Brown-Conrady camera model
//! - **Homography estimation** with the normalized DLT
//!
//! ## Example
//!
//! ```rust
//! use mvcam_pnp::{solve_pnp, CameraModel, PnPMethod, PnPResult};
//!
//! // 4x3 grid of target corners on the z = 0 plane
//! let world: Vec<[f64; 3]> = (0..3)
//!     .flat_map(|r| (0..4).map(move |c| [c as f64 * 0.02, r as f64 * 0.02, 0.0]))
//!     .collect();
//!
//! let camera = CameraModel::default();
//! let truth = PnPResult::from_rvec([0.1, -0.05, 0.02], [-0.03, -0.02, 0.5]);
//! let image = mvcam_pnp::project_points(&world, &truth, &camera);
//!
//! let pose = solve_pnp(&world, &image, &camera, PnPMethod::IppeDefault)?;
//! println!("Rotation: {:?}", pose.rotation);
//! println!("Translation: {:?}", pose.translation);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Pinhole camera model with lens distortion.
pub mod camera;

/// Plane-to-image homography estimation.
pub mod homography;

/// Infinitesimal Plane-based Pose Estimation (IPPE) solver.
pub mod ippe;

/// Common data types and traits for PnP solvers.
///
/// Defines the interface and result types shared across different PnP algorithms.
pub mod pnp;

/// Non-linear refinement of PnP solutions.
pub mod refine;

mod ops;

pub use camera::{CameraIntrinsics, CameraModel, PolynomialDistortion};
pub use homography::find_homography;
pub use ippe::{IPPEParams, IPPEResult, IPPE};
pub use ops::{compute_centroid, project_points, reprojection_errors, reprojection_rmse};
pub use pnp::{PnPError, PnPResult, PnPSolver};
pub use refine::{refine_pose_lm, LMParams};

/// Enumeration of the Perspective-n-Point algorithms available in this crate.
#[derive(Debug, Clone)]
pub enum PnPMethod {
    /// IPPE with a user-supplied parameter object.
    Ippe(IPPEParams),
    /// IPPE with the crate's default parameters.
    IppeDefault,
}

/// Dispatch function that routes to the chosen PnP solver.
pub fn solve_pnp(
    world: &[[f64; 3]],
    image: &[[f64; 2]],
    camera: &CameraModel,
    method: PnPMethod,
) -> Result<PnPResult, PnPError> {
    match method {
        PnPMethod::Ippe(params) => IPPE::solve(world, image, camera, &params),
        PnPMethod::IppeDefault => IPPE::solve(world, image, camera, &IPPEParams::default()),
    }
}
