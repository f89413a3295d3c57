use mvcam_io::error::{CameraError, StorageError};
use mvcam_pnp::PnPError;

/// Errors raised by calibration and pose estimation.
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    /// Too few usable chessboard observations to calibrate.
    #[error("found {found} valid samples, at least {required} are required")]
    InsufficientSamples {
        /// Samples that survived detection
        found: usize,
        /// Minimum accepted number of samples
        required: usize,
    },

    /// The held-out reprojection error exceeds the acceptance threshold.
    #[error("validation error {error_px:.3} px exceeds {threshold_px:.3} px")]
    CalibrationRejected {
        /// Mean held-out reprojection error in pixels
        error_px: f64,
        /// Acceptance threshold in pixels
        threshold_px: f64,
    },

    /// The reference image does not show the full pattern.
    #[error("chessboard pattern {cols}x{rows} not found")]
    PatternNotFound {
        /// Inner corners per row
        cols: usize,
        /// Inner corners per column
        rows: usize,
    },

    /// No calibration exists for the camera.
    #[error("no calibration for camera {0}")]
    CalibrationMissing(String),

    /// The pattern geometry cannot be used.
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    /// The multi-view solver could not produce a model.
    #[error("calibration solver failed: {0}")]
    Solver(String),

    /// A pose solve failed.
    #[error(transparent)]
    Pnp(#[from] PnPError),

    /// Frame acquisition failed.
    #[error(transparent)]
    Camera(#[from] CameraError),

    /// Reading or writing a persisted record failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
