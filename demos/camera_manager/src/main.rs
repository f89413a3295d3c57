use argh::FromArgs;

mod calibrate;
mod menu;
mod pose;
mod rig;
mod stream;
mod tune;

#[derive(FromArgs)]
/// Acquire, tune, calibrate and locate a machine-vision camera
struct Args {
    /// serial number of the camera, the first available one when omitted
    #[argh(option, short = 's')]
    serial: Option<String>,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Stream(stream::StreamArgs),
    Tune(tune::TuneArgs),
    Calibrate(calibrate::CalibrateArgs),
    Pose(pose::PoseArgs),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: Args = argh::from_env();
    let serial = args.serial.as_deref();

    match args.command {
        Command::Stream(args) => stream::run(serial, args),
        Command::Tune(args) => tune::run(serial, args),
        Command::Calibrate(args) => calibrate::run(serial, args),
        Command::Pose(args) => pose::run(serial, args),
    }
}
