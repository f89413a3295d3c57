use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use argh::FromArgs;
use mvcam::io::config::ControllerOptions;
use mvcam::io::frame::ColorMode;
use mvcam::io::settings::{SettingsStore, DEFAULT_SETTINGS_DIR};
use mvcam::io::slot::FrameSource;

use crate::rig;

#[derive(FromArgs)]
#[argh(subcommand, name = "stream")]
/// Stream frames and report the frame rate
pub struct StreamArgs {
    /// apply the saved settings instead of the automatic defaults
    #[argh(switch, short = 'l')]
    load: bool,

    /// directory of the settings files
    #[argh(option, default = "String::from(DEFAULT_SETTINGS_DIR)")]
    settings_dir: String,

    /// publish color frames
    #[argh(switch)]
    color: bool,

    /// the duration in seconds to run the app
    #[argh(option, short = 'd')]
    duration: Option<u64>,
}

pub fn run(serial: Option<&str>, args: StreamArgs) -> Result<(), Box<dyn std::error::Error>> {
    let options = ControllerOptions {
        color_mode: if args.color {
            ColorMode::Bgr8
        } else {
            ColorMode::Mono8
        },
        ..Default::default()
    };
    let (_provider, mut camera) = rig::controller(options);

    let config = if args.load {
        camera.start_with_settings(serial, &SettingsStore::new(&args.settings_dir))?
    } else {
        camera.start_auto(serial)?
    };
    println!(
        "streaming {}x{}+{}+{} at {:.1} fps",
        config.roi.width, config.roi.height, config.roi.offset_x, config.roi.offset_y, config.fps
    );

    // create a cancel token to stop the acquisition
    let cancel_token = Arc::new(AtomicBool::new(false));

    ctrlc::set_handler({
        let cancel_token = cancel_token.clone();
        move || {
            println!("Received Ctrl-C signal. Sending cancel signal !!");
            cancel_token.store(true, Ordering::SeqCst);
        }
    })?;

    if let Some(duration_secs) = args.duration {
        std::thread::spawn({
            let cancel_token = cancel_token.clone();
            move || {
                std::thread::sleep(Duration::from_secs(duration_secs));
                cancel_token.store(true, Ordering::SeqCst);
            }
        });
    }

    let mut reader = camera.frame_reader();
    let mut last_report = Instant::now();
    while !cancel_token.load(Ordering::SeqCst) {
        let Some(frame) = reader.next_frame(Duration::from_millis(200))? else {
            continue;
        };
        if last_report.elapsed() >= Duration::from_secs(1) {
            let stats = camera.stats();
            println!(
                "frame #{} {} {:?}  fps: {:.1}  dropped: {}",
                frame.sequence(),
                frame.size(),
                frame.format(),
                stats.fps,
                stats.dropped
            );
            last_report = Instant::now();
        }
    }

    camera.stop()?;
    camera.close()?;
    Ok(())
}
