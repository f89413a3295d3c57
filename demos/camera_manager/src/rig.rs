use mvcam::calib::pattern::{ChessboardPattern, PatternSize};
use mvcam::calib::synthetic::SyntheticBoard;
use mvcam::io::config::{CameraConfig, ControllerOptions, Roi};
use mvcam::io::controller::{AcquisitionController, StartMode};
use mvcam::io::library::DeviceLibrary;
use mvcam::io::sim::{FrameGenerator, SimProvider, DEFAULT_SERIAL};
use mvcam::pnp::{CameraIntrinsics, CameraModel, PolynomialDistortion};

/// Region streamed while a chessboard is being captured.
const BOARD_ROI: Roi = Roi {
    offset_x: 0,
    offset_y: 0,
    width: 256,
    height: 128,
};

pub type SimCamera = AcquisitionController<SimProvider>;

/// A controller over a fresh simulated backend.
pub fn controller(options: ControllerOptions) -> (SimProvider, SimCamera) {
    let provider = SimProvider::new();
    let camera = AcquisitionController::new(DeviceLibrary::new(provider.clone()), options);
    (provider, camera)
}

/// The lens the simulated camera looks through.
pub fn lens() -> CameraModel {
    CameraModel::with_distortion(
        CameraIntrinsics::new(1400.0, 1400.0, 968.0, 608.0),
        PolynomialDistortion::radial(-0.12, 0.03),
    )
}

/// A chessboard seen by the simulated camera from `views` positions.
pub fn board(
    cols: usize,
    rows: usize,
    square: f64,
    views: usize,
) -> Result<SyntheticBoard, Box<dyn std::error::Error>> {
    let pattern = ChessboardPattern::new(PatternSize::new(cols, rows), square)?;
    Ok(SyntheticBoard::orbit(pattern, lens(), views))
}

/// Stream `generator` frames from the camera `serial` in production mode.
pub fn start_board_stream(
    serial: Option<&str>,
    generator: FrameGenerator,
) -> Result<SimCamera, Box<dyn std::error::Error>> {
    let (provider, mut camera) = controller(ControllerOptions::default());
    provider.set_frame_generator(serial.unwrap_or(DEFAULT_SERIAL), generator)?;

    camera.open(serial)?;
    camera.prepare()?;
    camera.configure(&CameraConfig::manual(BOARD_ROI, 30.0, 1.0, 10_000.0))?;
    camera.allocate_buffers()?;
    camera.start(StartMode::Production)?;
    Ok(camera)
}
