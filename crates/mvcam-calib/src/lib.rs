#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Calibration
//!
//! [`engine::CalibrationEngine`] runs the whole procedure against any
//! [`mvcam_io::FrameSource`]:
//!
//! 1. **capture**: every frame of a bounded window is kept as is,
//! 2. **detect**: chessboard corners are searched in parallel afterwards and
//!    near-duplicate views are dropped,
//! 3. **solve**: random subsets of the samples are calibrated independently
//!    and the resulting models are averaged elementwise,
//! 4. **validate**: single views are split in halves, the pose is solved from
//!    one half and the other half is reprojected; the mean error must stay
//!    below a threshold for the result to be accepted and stored.
//!
//! [`pose::PoseEstimator`] then locates a calibrated camera relative to a
//! reference chessboard and produces `P = K [R | t]`.
//!
//! ```rust
//! use mvcam_calib::engine::{CalibrationEngine, CalibrationParams};
//! use mvcam_calib::pattern::{ChessboardPattern, PatternSize};
//! use mvcam_calib::synthetic::SyntheticBoard;
//! use mvcam_io::frame::ImageSize;
//! use mvcam_pnp::{CameraIntrinsics, CameraModel};
//!
//! let pattern = ChessboardPattern::new(PatternSize::new(9, 6), 0.025)?;
//! let camera = CameraModel::pinhole(CameraIntrinsics::new(1000.0, 1000.0, 640.0, 480.0));
//! let board = SyntheticBoard::orbit(pattern, camera, 40);
//!
//! let frames = (0..board.len())
//!     .map(|view| board.frame(Some(view), ImageSize::new(8, 8)).map(std::sync::Arc::new))
//!     .collect::<Result<Vec<_>, _>>()?;
//!
//! let params = CalibrationParams {
//!     dedup_threshold_px: None,
//!     iterations_per_batch: 1,
//!     random_seed: Some(1),
//!     ..Default::default()
//! };
//! let mut engine = CalibrationEngine::new(board.detector(), params);
//! let samples = engine.detect(&frames, pattern.size);
//! let average = engine.solve(&pattern, &samples)?;
//! let error = engine.validate(&pattern, &samples, &average.camera)?;
//! assert!(error < 1.0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Linear least-squares fit of lens distortion coefficients.
pub mod distortion_fit;

/// Corner detection capability and calibration samples.
pub mod detector;

/// Calibration run: capture, detection, resampling and validation.
pub mod engine;

/// Error types for calibration and pose estimation.
pub mod error;

/// Chessboard geometry and object-space templates.
pub mod pattern;

/// Reference pose estimation of a calibrated camera.
pub mod pose;

/// Joint multi-view calibration of a planar target.
pub mod solver;

/// Calibration and pose records persisted per camera.
pub mod storage;

/// Synthetic chessboard views for tests and demos.
pub mod synthetic;

/// Closed-form intrinsics from plane homographies.
pub mod zhang;

pub use detector::{CalibrationSample, ChessboardDetector};
pub use engine::{CalibrationEngine, CalibrationParams, CalibrationReport};
pub use error::CalibrationError;
pub use pattern::{ChessboardPattern, PatternSize, PoseOptions};
pub use pose::PoseEstimator;
pub use solver::SolverOptions;
pub use storage::{CalibrationResult, CalibrationStore, PoseResult, PoseStore};
