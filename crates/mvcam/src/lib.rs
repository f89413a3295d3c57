#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! Re-exports the workspace crates under one roof:
//!
//! - [`io`]: device capability interface, simulated backend, acquisition
//!   controller and frame pipeline.
//! - [`calib`]: chessboard calibration and reference pose estimation.
//! - [`pnp`]: camera model, homography and planar PnP.
//! - [`lie`]: rotations as SO(3) elements.

#[doc(inline)]
pub use mvcam_io as io;

#[doc(inline)]
pub use mvcam_calib as calib;

#[doc(inline)]
pub use mvcam_pnp as pnp;

#[doc(inline)]
pub use mvcam_lie as lie;
