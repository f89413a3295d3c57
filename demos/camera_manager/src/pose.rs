use std::time::Duration;

use argh::FromArgs;
use mvcam::calib::pattern::PoseOptions;
use mvcam::calib::pose::PoseEstimator;
use mvcam::calib::storage::{
    CalibrationStore, PoseStore, DEFAULT_CALIBRATION_DIR, DEFAULT_POSE_DIR,
};
use mvcam::io::sim::DEFAULT_SERIAL;

use crate::rig;

#[derive(FromArgs)]
#[argh(subcommand, name = "pose")]
/// Locate the camera from a reference chessboard
pub struct PoseArgs {
    /// inner corners along a row
    #[argh(option, default = "9")]
    cols: usize,

    /// inner corners along a column
    #[argh(option, default = "6")]
    rows: usize,

    /// side length of one square
    #[argh(option, default = "0.025")]
    square: f64,

    /// world position of the first corner as `x,y,z`
    #[argh(option, from_str_fn(parse_offset))]
    offset: Option<[f64; 3]>,

    /// which simulated board placement the camera sees
    #[argh(option, default = "0")]
    view: usize,

    /// seconds to wait for a frame showing the pattern
    #[argh(option, short = 't', default = "10")]
    timeout: u64,

    /// directory of the calibration files
    #[argh(option, default = "String::from(DEFAULT_CALIBRATION_DIR)")]
    calibration_dir: String,

    /// directory of the pose files
    #[argh(option, default = "String::from(DEFAULT_POSE_DIR)")]
    pose_dir: String,
}

fn parse_offset(value: &str) -> Result<[f64; 3], String> {
    let parts: Vec<f64> = value
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|e| format!("invalid offset `{value}`: {e}"))?;
    parts
        .try_into()
        .map_err(|_| format!("offset `{value}` must have three components"))
}

pub fn run(serial: Option<&str>, args: PoseArgs) -> Result<(), Box<dyn std::error::Error>> {
    let board = rig::board(args.cols, args.rows, args.square, args.view + 1)?;
    let pattern = *board.pattern();
    let mut camera = rig::start_board_stream(serial, board.still_generator(Some(args.view)))?;
    let serial = camera.serial().unwrap_or(DEFAULT_SERIAL).to_string();

    let calibrations = CalibrationStore::new(&args.calibration_dir);
    let poses = PoseStore::new(&args.pose_dir);
    let mut estimator = PoseEstimator::new(board.detector(), PoseOptions::default());
    estimator.ensure_calibration(&calibrations, &serial)?;

    let mut reader = camera.frame_reader();
    let reference =
        estimator.acquire_reference(&mut reader, &pattern, Duration::from_secs(args.timeout))?;
    camera.stop()?;

    let (pose, path) = estimator.estimate_and_store(
        &reference,
        &pattern,
        args.offset,
        &calibrations,
        &poses,
        &serial,
    )?;
    let [x, y, z] = pose.camera_position();
    println!("camera position ({x:.4}, {y:.4}, {z:.4})");
    println!("rotation vector {:?}", pose.rotation_vector);
    println!("saved to {}", path.display());

    camera.close()?;
    Ok(())
}
