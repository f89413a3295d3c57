use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::ControlMode;
use crate::frame::{ColorMode, ImageSize};

/// Region of interest read out from the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Roi {
    /// Horizontal offset in pixels
    pub offset_x: u32,
    /// Vertical offset in pixels
    pub offset_y: u32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Roi {
    /// Create a new region of interest.
    pub fn new(offset_x: u32, offset_y: u32, width: u32, height: u32) -> Self {
        Self {
            offset_x,
            offset_y,
            width,
            height,
        }
    }

    /// The whole sensor.
    pub fn full(sensor: ImageSize) -> Self {
        Self::new(0, 0, sensor.width as u32, sensor.height as u32)
    }

    /// Image size of the region.
    pub fn size(&self) -> ImageSize {
        ImageSize::new(self.width as usize, self.height as usize)
    }

    /// Whether the region lies inside a sensor of the given size.
    pub fn fits(&self, sensor: ImageSize) -> bool {
        self.offset_x as usize + self.width as usize <= sensor.width
            && self.offset_y as usize + self.height as usize <= sensor.height
    }
}

/// Acquisition parameters of one camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Sensor region read out per frame
    pub roi: Roi,
    /// Frame rate in frames per second
    pub fps: f64,
    /// Gain control
    pub gain_mode: ControlMode,
    /// Gain applied in manual mode
    pub gain: f64,
    /// Exposure control
    pub exposure_mode: ControlMode,
    /// Exposure time in microseconds applied in manual mode
    pub exposure_us: f64,
}

impl CameraConfig {
    /// Full sensor at `max_fps` with automatic gain and exposure.
    pub fn auto_defaults(sensor: ImageSize, max_fps: f64) -> Self {
        Self {
            roi: Roi::full(sensor),
            fps: max_fps,
            gain_mode: ControlMode::Auto,
            gain: 1.0,
            exposure_mode: ControlMode::Auto,
            exposure_us: 0.0,
        }
    }

    /// Manual gain and exposure over the given region.
    pub fn manual(roi: Roi, fps: f64, gain: f64, exposure_us: f64) -> Self {
        Self {
            roi,
            fps,
            gain_mode: ControlMode::Manual,
            gain,
            exposure_mode: ControlMode::Manual,
            exposure_us,
        }
    }
}

/// How the controller reconciles exposure time with the frame period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExposureFpsPolicy {
    /// Each value is validated against the device bounds on its own.
    #[default]
    Independent,
    /// A manual exposure longer than the frame period lowers the frame rate,
    /// and a frame rate whose period is shorter than the manual exposure
    /// switches exposure to automatic.
    Coupled,
}

/// Options of an [`crate::controller::AcquisitionController`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerOptions {
    /// Bound on each wait for a filled buffer, in milliseconds
    pub buffer_timeout_ms: u64,
    /// Pixel format frames are published in
    pub color_mode: ColorMode,
    /// Exposure and frame rate coupling
    pub exposure_fps_policy: ExposureFpsPolicy,
}

impl ControllerOptions {
    /// Bound on each wait for a filled buffer.
    pub fn buffer_timeout(&self) -> Duration {
        Duration::from_millis(self.buffer_timeout_ms)
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            buffer_timeout_ms: 100,
            color_mode: ColorMode::Mono8,
            exposure_fps_policy: ExposureFpsPolicy::Independent,
        }
    }
}
