use std::time::Duration;

use approx::assert_relative_eq;
use mvcam_calib::detector::ChessboardDetector;
use mvcam_calib::error::CalibrationError;
use mvcam_calib::pattern::{ChessboardPattern, PatternSize, PoseOptions};
use mvcam_calib::pose::PoseEstimator;
use mvcam_calib::storage::{CalibrationResult, CalibrationStore, PoseStore};
use mvcam_calib::synthetic::SyntheticBoard;
use mvcam_io::controller::{AcquisitionController, StartMode};
use mvcam_io::library::DeviceLibrary;
use mvcam_io::sim::{SimProvider, DEFAULT_SERIAL};
use mvcam_io::{CameraConfig, ControllerOptions, ImageSize, Roi};
use mvcam_pnp::{CameraIntrinsics, CameraModel};

const SERIAL: &str = "4104380123";

fn board() -> SyntheticBoard {
    let pattern = ChessboardPattern::new(PatternSize::new(9, 6), 0.03).unwrap();
    let camera = CameraModel::pinhole(CameraIntrinsics::new(1400.0, 1400.0, 968.0, 608.0));
    SyntheticBoard::orbit(pattern, camera, 6)
}

fn calibrated(dir: &std::path::Path, board: &SyntheticBoard) -> CalibrationStore {
    let store = CalibrationStore::new(dir.join("camera_parameters"));
    store
        .save(SERIAL, &CalibrationResult::from_camera(board.camera()))
        .unwrap();
    store
}

#[test]
fn pose_matches_the_reference_placement() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let board = board();
    let calibrations = calibrated(dir.path(), &board);
    let poses = PoseStore::new(dir.path().join("WorldReference"));
    let pattern = *board.pattern();
    let sq = pattern.square_size;

    let view = 3;
    let frame = board.frame(Some(view), ImageSize::new(8, 2))?;
    let mut estimator = PoseEstimator::new(board.detector(), PoseOptions::default());
    let (pose, path) =
        estimator.estimate_and_store(&frame, &pattern, None, &calibrations, &poses, SERIAL)?;
    assert_eq!(path, poses.path(SERIAL));
    assert!(estimator.calibration().is_some());

    // the reference frame flips the board rows and shifts its first corner
    let c = board.poses()[view].camera_center();
    let expected = [c[0] + sq, -c[1] + 2.0 * sq, -c[2]];
    let position = pose.camera_position();
    for (p, e) in position.iter().zip(expected) {
        assert_relative_eq!(*p, e, epsilon = 1e-6);
    }

    let world = pattern.reference_template(&PoseOptions::default());
    let pixels = board.corners(view).unwrap();
    let p = &pose.projection_matrix;
    for (w, px) in world.iter().zip(pixels) {
        let h: Vec<f64> = p
            .iter()
            .map(|row| row[0] * w[0] + row[1] * w[1] + row[2] * w[2] + row[3])
            .collect();
        assert!(h[2] > 0.0);
        assert_relative_eq!(h[0] / h[2], px[0], epsilon = 1e-6);
        assert_relative_eq!(h[1] / h[2], px[1], epsilon = 1e-6);
    }

    let stored = poses.load(SERIAL)?.camera_position();
    for (s, p) in stored.iter().zip(position) {
        assert_relative_eq!(*s, p, epsilon = 1e-9);
    }
    Ok(())
}

#[test]
fn explicit_offset_moves_the_camera() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let board = board();
    let calibrations = calibrated(dir.path(), &board);
    let pattern = *board.pattern();
    let frame = board.frame(Some(1), ImageSize::new(8, 2))?;

    let mut estimator = PoseEstimator::new(board.detector(), PoseOptions::default());
    let origin = estimator.estimate_pose(&frame, &pattern, Some([0.0; 3]), &calibrations, SERIAL)?;
    let shifted =
        estimator.estimate_pose(&frame, &pattern, Some([1.0, -2.0, 0.5]), &calibrations, SERIAL)?;

    let (a, b) = (origin.camera_position(), shifted.camera_position());
    assert_relative_eq!(b[0] - a[0], 1.0, epsilon = 1e-6);
    assert_relative_eq!(b[1] - a[1], -2.0, epsilon = 1e-6);
    assert_relative_eq!(b[2] - a[2], 0.5, epsilon = 1e-6);
    Ok(())
}

#[test]
fn missing_pattern_keeps_the_previous_pose() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let board = board();
    let calibrations = calibrated(dir.path(), &board);
    let poses = PoseStore::new(dir.path().join("WorldReference"));
    let pattern = *board.pattern();

    let mut estimator = PoseEstimator::new(board.detector(), PoseOptions::default());
    let good = board.frame(Some(0), ImageSize::new(8, 2))?;
    estimator.estimate_and_store(&good, &pattern, None, &calibrations, &poses, SERIAL)?;
    let before = std::fs::read(poses.path(SERIAL))?;

    let blank = board.frame(None, ImageSize::new(8, 2))?;
    let result = estimator.estimate_and_store(&blank, &pattern, None, &calibrations, &poses, SERIAL);
    assert!(matches!(
        result,
        Err(CalibrationError::PatternNotFound { cols: 9, rows: 6 })
    ));
    assert_eq!(std::fs::read(poses.path(SERIAL))?, before);
    Ok(())
}

#[test]
fn pose_needs_a_calibration() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let board = board();
    let calibrations = CalibrationStore::new(dir.path());
    let frame = board.frame(Some(0), ImageSize::new(8, 2))?;

    let mut estimator = PoseEstimator::new(board.detector(), PoseOptions::default());
    let result = estimator.estimate_pose(&frame, board.pattern(), None, &calibrations, SERIAL);
    match result {
        Err(CalibrationError::CalibrationMissing(serial)) => assert_eq!(serial, SERIAL),
        other => panic!("expected a missing calibration, got {other:?}"),
    }
    assert!(estimator.calibration().is_none());
    Ok(())
}

#[test]
fn reference_frame_from_a_streaming_camera() -> Result<(), Box<dyn std::error::Error>> {
    let board = board();
    let pattern = *board.pattern();
    let provider = SimProvider::new();
    provider.set_frame_generator(DEFAULT_SERIAL, board.still_generator(None))?;

    let mut camera = AcquisitionController::new(
        DeviceLibrary::new(provider.clone()),
        ControllerOptions::default(),
    );
    camera.open(None)?;
    camera.prepare()?;
    camera.configure(&CameraConfig::manual(Roi::new(0, 0, 64, 48), 60.0, 1.0, 1_000.0))?;
    camera.allocate_buffers()?;
    camera.start(StartMode::Production)?;
    let mut reader = camera.frame_reader();

    let estimator = PoseEstimator::new(board.detector(), PoseOptions::default());
    let result = estimator.acquire_reference(&mut reader, &pattern, Duration::from_millis(300));
    assert!(matches!(result, Err(CalibrationError::PatternNotFound { .. })));

    provider.set_frame_generator(DEFAULT_SERIAL, board.still_generator(Some(2)))?;
    let frame = estimator.acquire_reference(&mut reader, &pattern, Duration::from_secs(5))?;
    let corners = board.detector().detect(&frame, pattern.size);
    assert_eq!(corners.as_deref(), board.corners(2));

    camera.stop()?;
    camera.close()?;
    Ok(())
}
