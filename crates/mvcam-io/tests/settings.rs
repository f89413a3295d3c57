use std::fs;

use mvcam_io::controller::{AcquisitionController, ControllerState, StartMode};
use mvcam_io::device::ControlMode;
use mvcam_io::error::StorageError;
use mvcam_io::library::DeviceLibrary;
use mvcam_io::settings::SettingsStore;
use mvcam_io::sim::{SimProvider, DEFAULT_SERIAL};
use mvcam_io::{CameraConfig, CameraError, ControllerOptions, Roi};

fn controller(provider: &SimProvider) -> AcquisitionController<SimProvider> {
    AcquisitionController::new(
        DeviceLibrary::new(provider.clone()),
        ControllerOptions::default(),
    )
}

fn scenario_config() -> CameraConfig {
    CameraConfig {
        roi: Roi::new(0, 0, 1920, 1080),
        fps: 30.0,
        gain_mode: ControlMode::Manual,
        gain: 5.0,
        exposure_mode: ControlMode::Manual,
        exposure_us: 10_000.0,
    }
}

#[test]
fn saved_settings_reproduce_on_a_fresh_controller() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = SettingsStore::new(dir.path());
    let provider = SimProvider::new();

    let mut camera = controller(&provider);
    camera.open(None)?;
    camera.prepare()?;
    camera.configure(&scenario_config())?;
    let path = camera.save_settings(&store)?;
    assert_eq!(path, dir.path().join(format!("{DEFAULT_SERIAL}.json")));
    camera.close()?;

    let json: serde_json::Value = serde_json::from_slice(&fs::read(&path)?)?;
    assert_eq!(json["Exposure"], serde_json::json!(10.0));
    assert_eq!(json["ROI"]["Width"], serde_json::json!(1920));

    let mut fresh = controller(&provider);
    fresh.open(None)?;
    fresh.prepare()?;
    assert_ne!(fresh.current_config()?, scenario_config());
    let loaded = fresh.load_settings(&store)?;
    assert_eq!(loaded, scenario_config());
    assert_eq!(fresh.current_config()?, scenario_config());
    Ok(())
}

#[test]
fn missing_or_malformed_settings_leave_the_camera_untouched() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = SettingsStore::new(dir.path());
    let provider = SimProvider::new();

    let mut camera = controller(&provider);
    camera.open(None)?;
    camera.prepare()?;
    let before = camera.current_config()?;

    assert!(matches!(
        camera.load_settings(&store),
        Err(CameraError::Storage(StorageError::NotFound(_)))
    ));
    assert_eq!(camera.current_config()?, before);

    fs::write(store.path(DEFAULT_SERIAL), br#"{ "ROI": { "OffsetX": 0 }, "FPS": "fast" }"#)?;
    assert!(matches!(
        camera.load_settings(&store),
        Err(CameraError::Storage(StorageError::Json { .. }))
    ));
    assert_eq!(camera.current_config()?, before);
    assert_eq!(camera.state(), ControllerState::Prepared);
    Ok(())
}

#[test]
fn settings_outside_the_sensor_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = SettingsStore::new(dir.path());
    fs::write(
        store.path(DEFAULT_SERIAL),
        br#"{ "ROI": { "OffsetX": 100, "OffsetY": 0, "Width": 1920, "Height": 1080 },
              "FPS": 30.0, "Gain": 5.0, "Exposure": 10.0 }"#,
    )?;

    let provider = SimProvider::new();
    let mut camera = controller(&provider);
    camera.open(None)?;
    let before = camera.current_config()?;
    assert!(matches!(
        camera.load_settings(&store),
        Err(CameraError::OutOfRange { .. })
    ));
    assert_eq!(camera.current_config()?, before);
    Ok(())
}

#[test]
fn startup_with_settings() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let store = SettingsStore::new(dir.path());
    let provider = SimProvider::new();

    // nothing saved yet: the whole startup is abandoned
    let mut camera = controller(&provider);
    assert!(camera.start_with_settings(None, &store).is_err());
    assert_eq!(camera.state(), ControllerState::Stopped);
    assert!(!provider.probe(DEFAULT_SERIAL).unwrap().is_open);

    // manual startup falls back to the automatic defaults, tuning is then saved
    let config = camera.start_manual(None, &store)?;
    assert_eq!(camera.mode(), StartMode::Manual);
    assert_eq!(config.exposure_mode, ControlMode::Auto);
    camera.configure(&scenario_config())?;
    camera.wait_next_frame()?;
    camera.save_settings(&store)?;
    camera.close()?;

    let mut production = controller(&provider);
    let config = production.start_with_settings(Some(DEFAULT_SERIAL), &store)?;
    assert_eq!(config, scenario_config());
    assert_eq!(production.state(), ControllerState::Streaming);
    assert_eq!(production.mode(), StartMode::Production);
    let frame = production.wait_next_frame()?;
    assert_eq!((frame.width(), frame.height()), (1920, 1080));
    production.stop()?;
    Ok(())
}
