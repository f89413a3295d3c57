use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mvcam_io::error::StorageError;
use mvcam_io::frame::Frame;
use mvcam_io::slot::FrameSource;
use mvcam_pnp::{solve_pnp, CameraModel, PnPMethod};

use crate::detector::ChessboardDetector;
use crate::error::CalibrationError;
use crate::pattern::{ChessboardPattern, PoseOptions};
use crate::storage::{CalibrationResult, CalibrationStore, PoseResult, PoseStore};

/// Extrinsic pose of a calibrated camera from one view of the reference target.
pub struct PoseEstimator<D> {
    detector: D,
    options: PoseOptions,
    calibration: Option<(CalibrationResult, CameraModel)>,
}

impl<D: ChessboardDetector> PoseEstimator<D> {
    /// Create an estimator without a resident calibration.
    pub fn new(detector: D, options: PoseOptions) -> Self {
        Self {
            detector,
            options,
            calibration: None,
        }
    }

    /// Use `calibration` for every following estimate.
    pub fn with_calibration(
        mut self,
        calibration: CalibrationResult,
    ) -> Result<Self, CalibrationError> {
        let camera = calibration.camera_model()?;
        self.calibration = Some((calibration, camera));
        Ok(self)
    }

    /// The resident calibration, if any.
    pub fn calibration(&self) -> Option<&CalibrationResult> {
        self.calibration.as_ref().map(|(result, _)| result)
    }

    /// Load the calibration of `serial` unless one is already resident.
    pub fn ensure_calibration(
        &mut self,
        store: &CalibrationStore,
        serial: &str,
    ) -> Result<&CalibrationResult, CalibrationError> {
        if self.calibration.is_none() {
            let result = store.load(serial).map_err(|e| match e {
                StorageError::NotFound(_) => {
                    CalibrationError::CalibrationMissing(serial.to_string())
                }
                other => other.into(),
            })?;
            let camera = result.camera_model()?;
            log::debug!("loaded calibration of {serial}");
            self.calibration = Some((result, camera));
        }
        self.calibration
            .as_ref()
            .map(|(result, _)| result)
            .ok_or_else(|| CalibrationError::CalibrationMissing(serial.to_string()))
    }

    /// Solve the pose of the reference target seen in `reference`.
    ///
    /// The calibration of `serial` is loaded from `calibrations` unless one is
    /// resident. `offset` overrides the configured placement of the first corner.
    pub fn estimate_pose(
        &mut self,
        reference: &Frame,
        pattern: &ChessboardPattern,
        offset: Option<[f64; 3]>,
        calibrations: &CalibrationStore,
        serial: &str,
    ) -> Result<PoseResult, CalibrationError> {
        self.ensure_calibration(calibrations, serial)?;
        let Some((calibration, camera)) = &self.calibration else {
            return Err(CalibrationError::CalibrationMissing(serial.to_string()));
        };

        let corners = self
            .detector
            .detect(reference, pattern.size)
            .filter(|c| c.len() == pattern.corner_count())
            .ok_or(CalibrationError::PatternNotFound {
                cols: pattern.size.cols,
                rows: pattern.size.rows,
            })?;

        let options = PoseOptions {
            reference_offset: offset.or(self.options.reference_offset),
            ..self.options
        };
        let world = pattern.reference_template(&options);
        // planar IPPE over every corner; the square-target case is its four-point form
        let pose = solve_pnp(&world, &corners, camera, PnPMethod::IppeDefault)?;

        let result = PoseResult::from_pose(&pose, &calibration.camera_matrix);
        let [x, y, z] = result.camera_position();
        log::info!(
            "pose of {serial} from frame #{}: camera at ({x:.4}, {y:.4}, {z:.4}), rms {:.3} px",
            reference.sequence(),
            pose.reproj_rmse.unwrap_or(f64::NAN)
        );
        Ok(result)
    }

    /// Estimate the pose of `serial` and persist it. A failed estimate leaves
    /// any stored pose untouched.
    pub fn estimate_and_store(
        &mut self,
        reference: &Frame,
        pattern: &ChessboardPattern,
        offset: Option<[f64; 3]>,
        calibrations: &CalibrationStore,
        poses: &PoseStore,
        serial: &str,
    ) -> Result<(PoseResult, PathBuf), CalibrationError> {
        let result = self.estimate_pose(reference, pattern, offset, calibrations, serial)?;
        let path = poses.save(serial, &result)?;
        Ok((result, path))
    }

    /// Pull frames from `source` until one shows the full pattern.
    ///
    /// Fails with [`CalibrationError::PatternNotFound`] once `timeout` elapses.
    pub fn acquire_reference<S: FrameSource + ?Sized>(
        &self,
        source: &mut S,
        pattern: &ChessboardPattern,
        timeout: Duration,
    ) -> Result<Arc<Frame>, CalibrationError> {
        let deadline = Instant::now() + timeout;
        let mut inspected = 0usize;

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let Some(frame) = source.next_frame(deadline - now)? else {
                continue;
            };
            inspected += 1;
            if self
                .detector
                .detect(&frame, pattern.size)
                .is_some_and(|c| c.len() == pattern.corner_count())
            {
                log::debug!("reference frame #{} after {inspected} frames", frame.sequence());
                return Ok(frame);
            }
        }

        log::warn!(
            "no reference frame with pattern {} in {inspected} frames",
            pattern.size
        );
        Err(CalibrationError::PatternNotFound {
            cols: pattern.size.cols,
            rows: pattern.size.rows,
        })
    }
}
