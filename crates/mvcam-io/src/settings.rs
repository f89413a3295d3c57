use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{CameraConfig, Roi};
use crate::device::ControlMode;
use crate::error::StorageError;
use crate::storage::JsonStore;

/// Default directory of the settings files.
pub const DEFAULT_SETTINGS_DIR: &str = "camera_settings";

/// Region of interest as written to a settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RoiRecord {
    /// Horizontal offset in pixels
    pub offset_x: u32,
    /// Vertical offset in pixels
    pub offset_y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

/// Settings file of one camera.
///
/// Gain and exposure are stored as manual values; exposure is in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    /// Region of interest
    #[serde(rename = "ROI")]
    pub roi: RoiRecord,
    /// Frame rate in frames per second
    #[serde(rename = "FPS")]
    pub fps: f64,
    /// Gain
    #[serde(rename = "Gain")]
    pub gain: f64,
    /// Exposure time in milliseconds
    #[serde(rename = "Exposure")]
    pub exposure_ms: f64,
}

impl CameraSettings {
    /// The configuration these settings describe, with manual gain and exposure.
    pub fn to_config(&self) -> CameraConfig {
        let roi = Roi::new(
            self.roi.offset_x,
            self.roi.offset_y,
            self.roi.width,
            self.roi.height,
        );
        CameraConfig::manual(roi, self.fps, self.gain, self.exposure_ms * 1e3)
    }
}

impl From<&CameraConfig> for CameraSettings {
    fn from(config: &CameraConfig) -> Self {
        Self {
            roi: RoiRecord {
                offset_x: config.roi.offset_x,
                offset_y: config.roi.offset_y,
                width: config.roi.width,
                height: config.roi.height,
            },
            fps: config.fps,
            gain: config.gain,
            exposure_ms: config.exposure_us / 1e3,
        }
    }
}

impl From<&CameraSettings> for CameraConfig {
    fn from(settings: &CameraSettings) -> Self {
        settings.to_config()
    }
}

/// Settings files, one `<serial>.json` per camera.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsStore {
    store: JsonStore,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(DEFAULT_SETTINGS_DIR)
    }
}

impl SettingsStore {
    /// Settings stored under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            store: JsonStore::new(dir),
        }
    }

    /// Path of the settings file of `serial`.
    pub fn path(&self, serial: &str) -> PathBuf {
        self.store.path(serial)
    }

    /// Whether settings exist for `serial`.
    pub fn exists(&self, serial: &str) -> bool {
        self.store.exists(serial)
    }

    /// Write the settings of `serial`.
    pub fn save(&self, serial: &str, settings: &CameraSettings) -> Result<PathBuf, StorageError> {
        let path = self.store.save(serial, settings)?;
        log::info!("camera settings saved to {}", path.display());
        Ok(path)
    }

    /// Read the settings of `serial`.
    pub fn load(&self, serial: &str) -> Result<CameraSettings, StorageError> {
        self.store.load(serial)
    }
}

/// Whether a configuration keeps gain and exposure under manual control,
/// the only form a settings file can reproduce.
pub fn is_reproducible(config: &CameraConfig) -> bool {
    config.gain_mode == ControlMode::Manual && config.exposure_mode == ControlMode::Manual
}
