use std::io::{BufRead, Write};
use std::path::PathBuf;

use argh::FromArgs;
use mvcam::calib::engine::{CalibrationEngine, CalibrationParams};
use mvcam::calib::storage::{CalibrationStore, DEFAULT_CALIBRATION_DIR};
use mvcam::io::sim::DEFAULT_SERIAL;

use crate::rig;

#[derive(FromArgs)]
#[argh(subcommand, name = "calibrate")]
/// Calibrate the camera intrinsics from a moving chessboard
pub struct CalibrateArgs {
    /// inner corners along a row
    #[argh(option, default = "9")]
    cols: usize,

    /// inner corners along a column
    #[argh(option, default = "6")]
    rows: usize,

    /// side length of one square
    #[argh(option, default = "0.025")]
    square: f64,

    /// JSON file with calibration parameters
    #[argh(option, short = 'p')]
    params: Option<PathBuf>,

    /// capture window in seconds, overrides the parameters file
    #[argh(option, short = 'w')]
    window: Option<u64>,

    /// directory of the calibration files
    #[argh(option, default = "String::from(DEFAULT_CALIBRATION_DIR)")]
    output_dir: String,

    /// retry rejected attempts without asking
    #[argh(switch, short = 'y')]
    yes: bool,
}

pub fn run(serial: Option<&str>, args: CalibrateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut params: CalibrationParams = match &args.params {
        Some(path) => serde_json::from_reader(std::fs::File::open(path)?)?,
        None => CalibrationParams::default(),
    };
    if let Some(secs) = args.window {
        params.capture_window_ms = secs * 1_000;
    }

    let board = rig::board(args.cols, args.rows, args.square, 60)?;
    let pattern = *board.pattern();
    let mut camera = rig::start_board_stream(serial, board.cycle_generator(Some(4)))?;
    let serial = camera.serial().unwrap_or(DEFAULT_SERIAL).to_string();
    let store = CalibrationStore::new(&args.output_dir);

    println!(
        "capturing pattern {} for {:.0} s, move the board through the field of view",
        pattern.size,
        params.capture_window().as_secs_f64()
    );
    let mut engine = CalibrationEngine::new(board.detector(), params);
    let mut reader = camera.frame_reader();
    let result = engine.calibrate_with_retry(&mut reader, &pattern, &store, &serial, |e, attempt| {
        log::warn!("calibration attempt {attempt} failed: {e}");
        println!("attempt {attempt} failed: {e}");
        args.yes || confirm("retry?")
    });
    camera.stop()?;

    let report = result?;

    let k = report.camera.intrinsics;
    println!(
        "fx {:.2} fy {:.2} cx {:.2} cy {:.2}  distortion {:?}",
        k.fx, k.fy, k.cx, k.cy, report.result.distortion_coefficients
    );
    println!(
        "{} samples from {} frames, held-out error {:.3} px",
        report.samples, report.frames, report.validation_error_px
    );
    if let Some(path) = report.path {
        println!("saved to {}", path.display());
    }
    camera.close()?;
    Ok(())
}

fn confirm(question: &str) -> bool {
    print!("{question} [y/N] ");
    if std::io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match std::io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim(), "y" | "Y" | "yes"),
        Err(_) => false,
    }
}
