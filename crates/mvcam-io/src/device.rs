use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DeviceError;
use crate::frame::{ImageSize, ImageView};

/// Acquisition parameter nodes the controller drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    /// Horizontal ROI offset in pixels
    OffsetX,
    /// Vertical ROI offset in pixels
    OffsetY,
    /// ROI width in pixels
    Width,
    /// ROI height in pixels
    Height,
    /// Acquisition frame rate in frames per second
    FrameRate,
    /// Analog gain
    Gain,
    /// Exposure time in microseconds
    ExposureTime,
}

impl Param {
    /// Name of the node in the device's feature tree.
    pub fn node_name(&self) -> &'static str {
        match self {
            Param::OffsetX => "OffsetX",
            Param::OffsetY => "OffsetY",
            Param::Width => "Width",
            Param::Height => "Height",
            Param::FrameRate => "AcquisitionFrameRate",
            Param::Gain => "Gain",
            Param::ExposureTime => "ExposureTime",
        }
    }

    /// Whether the node holds an integer pixel quantity.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Param::OffsetX | Param::OffsetY | Param::Width | Param::Height
        )
    }
}

impl std::fmt::Display for Param {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.node_name())
    }
}

/// Features with an automatic control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AutoFeature {
    /// `GainAuto`
    Gain,
    /// `ExposureAuto`
    Exposure,
}

/// Automatic or manual control of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControlMode {
    /// The device adjusts the value continuously
    #[default]
    Auto,
    /// The value is set explicitly
    Manual,
}

/// Current value of a node with its accepted bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    /// Current value
    pub value: f64,
    /// Minimum accepted value
    pub min: f64,
    /// Maximum accepted value
    pub max: f64,
}

impl ParamRange {
    /// Whether `value` lies within `[min, max]`.
    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// An enumerated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Serial number, used as the camera identity
    pub serial: String,
    /// Model name
    pub model: String,
    /// Whether the device can currently be claimed
    pub openable: bool,
}

/// Handle of a buffer announced to a data stream.
pub type BufferId = u64;

/// Ownership state of an announced buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Known to the transport but not available for filling
    Announced,
    /// Waiting in the input queue to be filled
    Queued,
    /// Filled and handed to the host
    Filled,
    /// Removed from the stream
    Revoked,
}

/// Entry point of a camera backend.
pub trait DeviceProvider: Send + Sync + 'static {
    /// Session type produced by [`DeviceProvider::open`].
    type Session: DeviceSession;

    /// Initialise the backend library.
    fn initialize(&self) -> Result<(), DeviceError>;

    /// Release the backend library.
    fn close(&self) -> Result<(), DeviceError>;

    /// List the attached devices.
    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError>;

    /// Claim a device exclusively.
    fn open(&self, descriptor: &DeviceDescriptor) -> Result<Self::Session, DeviceError>;
}

/// An exclusively claimed device. Dropping the session releases the device.
pub trait DeviceSession: Send + 'static {
    /// Data stream type produced by [`DeviceSession::open_data_stream`].
    type Stream: DataStream;

    /// Serial number of the device.
    fn serial_number(&self) -> &str;

    /// Open the first data stream of the device.
    fn open_data_stream(&mut self) -> Result<Self::Stream, DeviceError>;

    /// Read a node with its current bounds.
    fn parameter(&self, param: Param) -> Result<ParamRange, DeviceError>;

    /// Write a node.
    fn set_parameter(&mut self, param: Param, value: f64) -> Result<(), DeviceError>;

    /// Full sensor size (`WidthMax`, `HeightMax`).
    fn sensor_size(&self) -> Result<ImageSize, DeviceError>;

    /// Read the auto mode of a feature.
    fn auto_mode(&self, feature: AutoFeature) -> Result<ControlMode, DeviceError>;

    /// Select the auto mode of a feature.
    fn set_auto_mode(&mut self, feature: AutoFeature, mode: ControlMode) -> Result<(), DeviceError>;

    /// Bytes per frame for the current configuration.
    fn payload_size(&self) -> Result<usize, DeviceError>;

    /// Lock or unlock the transport layer parameters (`TLParamsLocked`).
    fn set_transport_params_locked(&mut self, locked: bool) -> Result<(), DeviceError>;

    /// Execute `AcquisitionStart`.
    fn acquisition_start(&mut self) -> Result<(), DeviceError>;

    /// Execute `AcquisitionStop`.
    fn acquisition_stop(&mut self) -> Result<(), DeviceError>;
}

/// Buffer handling of a device data stream.
pub trait DataStream: Send + 'static {
    /// Minimum number of buffers needed to stream without stalling.
    fn min_buffers_required(&self) -> Result<usize, DeviceError>;

    /// Allocate and announce a buffer of `payload_size` bytes.
    fn announce_buffer(&mut self, payload_size: usize) -> Result<BufferId, DeviceError>;

    /// Hand a buffer to the transport for filling.
    fn queue_buffer(&mut self, id: BufferId) -> Result<(), DeviceError>;

    /// Wait for the next filled buffer, `Ok(None)` on timeout.
    fn wait_for_filled_buffer(&mut self, timeout: Duration)
        -> Result<Option<BufferId>, DeviceError>;

    /// Pixel content of a filled buffer, `None` when it carries no valid image.
    fn buffer_image(&self, id: BufferId) -> Option<ImageView<'_>>;

    /// State of an announced buffer.
    fn buffer_state(&self, id: BufferId) -> Option<BufferState>;

    /// Remove a buffer from the stream. The buffer must not be queued.
    fn revoke_buffer(&mut self, id: BufferId) -> Result<(), DeviceError>;

    /// Move every queued or filled buffer back to the announced state.
    fn flush(&mut self) -> Result<(), DeviceError>;

    /// Buffers currently announced to the stream.
    fn announced_buffers(&self) -> Vec<BufferId>;

    /// Start the stream side of the acquisition.
    fn start_acquisition(&mut self) -> Result<(), DeviceError>;

    /// Stop the stream side of the acquisition.
    fn stop_acquisition(&mut self) -> Result<(), DeviceError>;
}
