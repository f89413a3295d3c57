use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use mvcam_io::frame::Frame;
use mvcam_io::slot::FrameSource;
use mvcam_pnp::{
    reprojection_errors, solve_pnp, CameraIntrinsics, CameraModel, PnPMethod,
    PolynomialDistortion,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::detector::{mean_corner_difference, CalibrationSample, ChessboardDetector};
use crate::error::CalibrationError;
use crate::pattern::{ChessboardPattern, PatternSize};
use crate::solver::{calibrate_views, SolverOptions};
use crate::storage::{CalibrationResult, CalibrationStore};

/// Samples per batch of resampling iterations.
const SAMPLES_PER_BATCH: usize = 30;

/// Parameters of a calibration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParams {
    /// Wall-clock length of the capture window in milliseconds.
    pub capture_window_ms: u64,
    /// Stop capturing once this many frames are held.
    pub max_frames: Option<usize>,
    /// Longest wait for a single frame in milliseconds.
    pub frame_timeout_ms: u64,
    /// Fewest valid samples accepted for a solve.
    pub min_samples: usize,
    /// Views per random subset.
    pub subset_size: usize,
    /// Subset solves per 30 valid samples.
    pub iterations_per_batch: usize,
    /// Single-view trials of the held-out validation.
    pub validation_trials: usize,
    /// Acceptance threshold of the mean held-out reprojection error, in pixels.
    pub max_validation_error_px: f64,
    /// Discard a sample closer than this mean corner distance to an accepted one.
    pub dedup_threshold_px: Option<f64>,
    /// Attempts allowed by [`CalibrationEngine::calibrate_with_retry`].
    pub max_attempts: usize,
    /// Seed of the resampling; `None` draws from the operating system.
    pub random_seed: Option<u64>,
    /// Multi-view solver options.
    pub solver: SolverOptions,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            capture_window_ms: 30_000,
            max_frames: None,
            frame_timeout_ms: 100,
            min_samples: 30,
            subset_size: 50,
            iterations_per_batch: 10,
            validation_trials: 50,
            max_validation_error_px: 1.0,
            dedup_threshold_px: Some(50.0),
            max_attempts: 3,
            random_seed: None,
            solver: SolverOptions::default(),
        }
    }
}

impl CalibrationParams {
    /// Length of the capture window.
    pub fn capture_window(&self) -> Duration {
        Duration::from_millis(self.capture_window_ms)
    }

    /// Longest wait for a single frame.
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    /// Number of subset solves for `samples` valid samples.
    pub fn iterations_for(&self, samples: usize) -> usize {
        (samples / SAMPLES_PER_BATCH).max(1) * self.iterations_per_batch.max(1)
    }
}

/// Camera model averaged over random subsets of the samples.
#[derive(Debug, Clone)]
pub struct SubsetAverage {
    /// Elementwise mean of the candidate models
    pub camera: CameraModel,
    /// Subset solves that produced a candidate
    pub candidates: usize,
    /// Mean in-subset reprojection error of the candidates, in pixels
    pub mean_rms_px: f64,
}

/// Outcome of an accepted calibration.
#[derive(Debug, Clone)]
pub struct CalibrationReport {
    /// The persisted record
    pub result: CalibrationResult,
    /// The calibrated camera
    pub camera: CameraModel,
    /// Frames held by the capture window
    pub frames: usize,
    /// Valid samples after detection
    pub samples: usize,
    /// Subset solves averaged into the result
    pub candidates: usize,
    /// Mean held-out reprojection error, in pixels
    pub validation_error_px: f64,
    /// Where the result was written, when stored
    pub path: Option<PathBuf>,
}

/// Chessboard calibration of one camera: capture, detect, resample and validate.
///
/// A run owns its samples; concurrent runs on the same camera must be
/// serialised by the caller.
pub struct CalibrationEngine<D> {
    detector: D,
    params: CalibrationParams,
    rng: StdRng,
}

impl<D: ChessboardDetector> CalibrationEngine<D> {
    /// Create an engine using `detector` for corner detection.
    pub fn new(detector: D, params: CalibrationParams) -> Self {
        let rng = match params.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            detector,
            params,
            rng,
        }
    }

    /// The run parameters.
    pub fn params(&self) -> &CalibrationParams {
        &self.params
    }

    /// Retain every frame delivered during the capture window.
    ///
    /// No detection happens here so the loop keeps up with the stream.
    pub fn capture<S: FrameSource + ?Sized>(
        &self,
        source: &mut S,
    ) -> Result<Vec<Arc<Frame>>, CalibrationError> {
        let start = Instant::now();
        let deadline = start + self.params.capture_window();
        let limit = self.params.max_frames.unwrap_or(usize::MAX);
        let mut frames = Vec::new();

        while frames.len() < limit {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = self.params.frame_timeout().min(deadline - now);
            if let Some(frame) = source.next_frame(wait)? {
                frames.push(frame);
            }
        }

        log::info!(
            "captured {} frames in {:.1} s",
            frames.len(),
            start.elapsed().as_secs_f64()
        );
        Ok(frames)
    }

    /// Detect the full pattern in every frame, in parallel, then drop near duplicates.
    ///
    /// Samples keep the order of their frames.
    pub fn detect(&self, frames: &[Arc<Frame>], size: PatternSize) -> Vec<CalibrationSample> {
        let detected: Vec<CalibrationSample> = frames
            .par_iter()
            .filter_map(|frame| CalibrationSample::detect(&self.detector, frame, size))
            .collect();
        let found = detected.len();

        let samples = match self.params.dedup_threshold_px {
            Some(threshold) => {
                let mut accepted: Vec<CalibrationSample> = Vec::with_capacity(found);
                for sample in detected {
                    let distinct = accepted
                        .iter()
                        .all(|a| mean_corner_difference(&sample.corners, &a.corners) >= threshold);
                    if distinct {
                        accepted.push(sample);
                    }
                }
                accepted
            }
            None => detected,
        };

        log::info!(
            "pattern {size} found in {found} of {} frames, {} valid samples",
            frames.len(),
            samples.len()
        );
        samples
    }

    /// Solve random subsets of the samples and average the candidate models elementwise.
    pub fn solve(
        &mut self,
        pattern: &ChessboardPattern,
        samples: &[CalibrationSample],
    ) -> Result<SubsetAverage, CalibrationError> {
        if samples.len() < self.params.min_samples {
            return Err(CalibrationError::InsufficientSamples {
                found: samples.len(),
                required: self.params.min_samples,
            });
        }

        let subset_size = self.params.subset_size.clamp(1, samples.len());
        let iterations = self.params.iterations_for(samples.len());
        let subsets: Vec<Vec<usize>> = (0..iterations)
            .map(|_| {
                let mut indices: Vec<usize> = (0..samples.len()).collect();
                indices.shuffle(&mut self.rng);
                indices.truncate(subset_size);
                indices
            })
            .collect();

        let template = pattern.template();
        let options = self.params.solver;
        let solutions: Vec<_> = subsets
            .par_iter()
            .map(|subset| {
                let views: Vec<&[[f64; 2]]> = subset
                    .iter()
                    .map(|&i| samples[i].corners.as_slice())
                    .collect();
                calibrate_views(&template, &views, &options)
            })
            .collect();

        let mut sum = [0.0; 9];
        let mut rms_sum = 0.0;
        let mut candidates = 0;
        let mut first_error = None;
        for solution in solutions {
            match solution {
                Ok(solution) => {
                    let k = &solution.camera.intrinsics;
                    let d = solution.camera.distortion.unwrap_or_default().coefficients();
                    let values = [k.fx, k.fy, k.cx, k.cy, d[0], d[1], d[2], d[3], d[4]];
                    sum.iter_mut().zip(values).for_each(|(s, v)| *s += v);
                    rms_sum += solution.rms_px;
                    candidates += 1;
                }
                Err(e) => {
                    log::warn!("subset solve failed: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        if candidates == 0 {
            return Err(first_error
                .unwrap_or_else(|| CalibrationError::Solver("no subset was solved".to_string())));
        }

        let n = candidates as f64;
        let mean = sum.map(|s| s / n);
        let camera = CameraModel::with_distortion(
            CameraIntrinsics::new(mean[0], mean[1], mean[2], mean[3]),
            PolynomialDistortion {
                k1: mean[4],
                k2: mean[5],
                p1: mean[6],
                p2: mean[7],
                k3: mean[8],
            },
        );
        log::debug!("averaged {candidates} of {iterations} subset solves: {camera:?}");

        Ok(SubsetAverage {
            camera,
            candidates,
            mean_rms_px: rms_sum / n,
        })
    }

    /// Mean reprojection error of held-out corners over random single-view trials.
    ///
    /// Each trial splits the corners of one random sample in two halves, solves
    /// the pose from the first half and reprojects the second.
    pub fn validate(
        &mut self,
        pattern: &ChessboardPattern,
        samples: &[CalibrationSample],
        camera: &CameraModel,
    ) -> Result<f64, CalibrationError> {
        if samples.is_empty() {
            return Err(CalibrationError::InsufficientSamples {
                found: 0,
                required: self.params.min_samples.max(1),
            });
        }
        let template = pattern.template();
        if template.len() < 8 {
            return Err(CalibrationError::InvalidPattern(format!(
                "validation needs 8 corners, pattern {} has {}",
                pattern.size,
                template.len()
            )));
        }

        let half = template.len() / 2;
        let mut indices: Vec<usize> = (0..template.len()).collect();
        let mut errors = Vec::with_capacity(self.params.validation_trials);
        let mut first_error = None;

        for _ in 0..self.params.validation_trials.max(1) {
            let sample = &samples[self.rng.random_range(0..samples.len())];
            indices.shuffle(&mut self.rng);
            let (train, held) = indices.split_at(half);

            let world: Vec<[f64; 3]> = train.iter().map(|&i| template[i]).collect();
            let image: Vec<[f64; 2]> = train.iter().map(|&i| sample.corners[i]).collect();
            let pose = match solve_pnp(&world, &image, camera, PnPMethod::IppeDefault) {
                Ok(pose) => pose,
                Err(e) => {
                    log::debug!("validation trial on frame #{} failed: {e}", sample.sequence);
                    first_error.get_or_insert(e);
                    continue;
                }
            };

            let world: Vec<[f64; 3]> = held.iter().map(|&i| template[i]).collect();
            let image: Vec<[f64; 2]> = held.iter().map(|&i| sample.corners[i]).collect();
            let held_errors = reprojection_errors(&world, &image, &pose, camera)?;
            errors.push(held_errors.iter().sum::<f64>() / held_errors.len() as f64);
        }

        if errors.is_empty() {
            return Err(match first_error {
                Some(e) => e.into(),
                None => CalibrationError::Solver("no validation trial succeeded".to_string()),
            });
        }
        Ok(errors.iter().sum::<f64>() / errors.len() as f64)
    }

    /// Run one full calibration: capture, detect, resample and validate.
    pub fn calibrate<S: FrameSource + ?Sized>(
        &mut self,
        source: &mut S,
        pattern: &ChessboardPattern,
    ) -> Result<CalibrationReport, CalibrationError> {
        let frames = self.capture(source)?;
        let samples = self.detect(&frames, pattern.size);
        let frame_count = frames.len();
        drop(frames);

        let average = self.solve(pattern, &samples)?;
        let validation_error_px = self.validate(pattern, &samples, &average.camera)?;

        let threshold_px = self.params.max_validation_error_px;
        if validation_error_px.is_nan() || validation_error_px > threshold_px {
            log::warn!(
                "calibration rejected: held-out error {validation_error_px:.3} px > {threshold_px:.3} px"
            );
            return Err(CalibrationError::CalibrationRejected {
                error_px: validation_error_px,
                threshold_px,
            });
        }

        log::info!(
            "calibration accepted from {} samples ({} subsets), held-out error {validation_error_px:.3} px",
            samples.len(),
            average.candidates
        );
        Ok(CalibrationReport {
            result: CalibrationResult::from_camera(&average.camera),
            camera: average.camera,
            frames: frame_count,
            samples: samples.len(),
            candidates: average.candidates,
            validation_error_px,
            path: None,
        })
    }

    /// Calibrate and persist the result for `serial`. Nothing is written on failure.
    pub fn calibrate_and_store<S: FrameSource + ?Sized>(
        &mut self,
        source: &mut S,
        pattern: &ChessboardPattern,
        store: &CalibrationStore,
        serial: &str,
    ) -> Result<CalibrationReport, CalibrationError> {
        let mut report = self.calibrate(source, pattern)?;
        report.path = Some(store.save(serial, &report.result)?);
        Ok(report)
    }

    /// Calibrate and store, restarting from an empty capture after a
    /// recoverable failure for as long as `retry` agrees and attempts remain.
    ///
    /// `retry` receives the failure and the number of attempts made so far.
    pub fn calibrate_with_retry<S, F>(
        &mut self,
        source: &mut S,
        pattern: &ChessboardPattern,
        store: &CalibrationStore,
        serial: &str,
        mut retry: F,
    ) -> Result<CalibrationReport, CalibrationError>
    where
        S: FrameSource + ?Sized,
        F: FnMut(&CalibrationError, usize) -> bool,
    {
        let max_attempts = self.params.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.calibrate_and_store(source, pattern, store, serial) {
                Ok(report) => return Ok(report),
                Err(e) if is_recoverable(&e) && attempt < max_attempts && retry(&e, attempt) => {
                    log::warn!("calibration attempt {attempt} failed: {e}, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_recoverable(error: &CalibrationError) -> bool {
    matches!(
        error,
        CalibrationError::CalibrationRejected { .. } | CalibrationError::InsufficientSamples { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iterations_scale_with_samples() {
        let params = CalibrationParams {
            iterations_per_batch: 4,
            ..Default::default()
        };
        assert_eq!(params.iterations_for(10), 4);
        assert_eq!(params.iterations_for(59), 4);
        assert_eq!(params.iterations_for(60), 8);
        assert_eq!(params.iterations_for(150), 20);
    }

    #[test]
    fn test_params_from_json() -> Result<(), serde_json::Error> {
        let params: CalibrationParams =
            serde_json::from_str(r#"{ "capture_window_ms": 5000, "random_seed": 3 }"#)?;
        assert_eq!(params.capture_window(), Duration::from_secs(5));
        assert_eq!(params.random_seed, Some(3));
        assert_eq!(params.min_samples, 30);
        assert_eq!(params.dedup_threshold_px, Some(50.0));
        Ok(())
    }
}
