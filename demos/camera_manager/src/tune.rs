use std::io::{BufRead, Write};

use argh::FromArgs;
use mvcam::io::config::ControllerOptions;
use mvcam::io::device::ControlMode;
use mvcam::io::error::CameraError;
use mvcam::io::settings::{SettingsStore, DEFAULT_SETTINGS_DIR};

use crate::menu::{self, MenuCommand};
use crate::rig::{self, SimCamera};

#[derive(FromArgs)]
#[argh(subcommand, name = "tune")]
/// Tune ROI, frame rate, gain and exposure interactively
pub struct TuneArgs {
    /// directory of the settings files
    #[argh(option, default = "String::from(DEFAULT_SETTINGS_DIR)")]
    settings_dir: String,
}

pub fn run(serial: Option<&str>, args: TuneArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = SettingsStore::new(&args.settings_dir);
    let (_provider, mut camera) = rig::controller(ControllerOptions::default());
    camera.start_manual(serial, &store)?;
    show(&camera)?;
    println!("{}", menu::HELP);

    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let command = match menu::parse(&line?) {
            Ok(command) => command,
            Err(menu::MenuError::Empty) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        if command == MenuCommand::Quit {
            break;
        }
        // a rejected value leaves the camera as it was, keep the menu open
        if let Err(e) = dispatch(&mut camera, &store, command) {
            log::warn!("menu command failed: {e}");
            println!("error: {e}");
        }
    }

    camera.stop()?;
    camera.close()?;
    Ok(())
}

fn dispatch(
    camera: &mut SimCamera,
    store: &SettingsStore,
    command: MenuCommand,
) -> Result<(), CameraError> {
    match command {
        MenuCommand::Show => return show(camera),
        MenuCommand::Help => println!("{}", menu::HELP),
        MenuCommand::Roi(roi) => camera.set_roi(roi)?,
        MenuCommand::OffsetX(v) => camera.set_offset_x(v)?,
        MenuCommand::OffsetY(v) => camera.set_offset_y(v)?,
        MenuCommand::Width(v) => camera.set_width(v)?,
        MenuCommand::Height(v) => camera.set_height(v)?,
        MenuCommand::Fps(fps) => camera.set_frame_rate(fps)?,
        MenuCommand::Gain(None) => {
            let gain = camera.current_config()?.gain;
            camera.set_gain(ControlMode::Auto, gain)?
        }
        MenuCommand::Gain(Some(gain)) => camera.set_gain(ControlMode::Manual, gain)?,
        MenuCommand::Exposure(None) => {
            let exposure_us = camera.current_config()?.exposure_us;
            camera.set_exposure(ControlMode::Auto, exposure_us)?
        }
        MenuCommand::Exposure(Some(ms)) => {
            camera.set_exposure(ControlMode::Manual, ms * 1_000.0)?
        }
        MenuCommand::Save => {
            let path = camera.save_settings(store)?;
            println!("saved to {}", path.display());
        }
        MenuCommand::Load => {
            camera.load_settings(store)?;
            show(camera)?;
        }
        MenuCommand::Quit => {}
    }
    Ok(())
}

fn show(camera: &SimCamera) -> Result<(), CameraError> {
    let config = camera.current_config()?;
    let stats = camera.stats();
    println!(
        "roi {}x{}+{}+{}  fps {:.2}  gain {:?} {:.2}  exposure {:?} {:.3} ms  [{:.1} fps, {} frames]",
        config.roi.width,
        config.roi.height,
        config.roi.offset_x,
        config.roi.offset_y,
        config.fps,
        config.gain_mode,
        config.gain,
        config.exposure_mode,
        config.exposure_us / 1_000.0,
        stats.fps,
        stats.frames
    );
    Ok(())
}
