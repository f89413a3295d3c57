#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # SO(3)
//!
//! Double precision rotations used by the pose solvers and the calibration
//! engine. Rotation vectors (axis times angle, a.k.a. Rodrigues vectors) are
//! the Lie algebra of the group and are what gets persisted to disk.
//!
//! ```rust
//! use glam::DVec3;
//! use mvcam_lie::so3::SO3;
//!
//! let rot = SO3::exp(DVec3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2));
//! let p = rot.transform(DVec3::X);
//! assert!((p - DVec3::Y).length() < 1e-12);
//! ```

/// Special Orthogonal group SO(3) for 3D rotations.
pub mod so3;
