use std::path::PathBuf;

use crate::controller::ControllerState;
use crate::device::Param;

/// Failures reported by a device backend.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The device library has not been initialised.
    #[error("device library is not initialised")]
    NotInitialized,

    /// The device is already claimed by another session.
    #[error("device {0} is already open")]
    Busy(String),

    /// No device with the requested identity exists.
    #[error("no device with serial {0}")]
    UnknownDevice(String),

    /// The device exposes no data stream.
    #[error("device {0} has no data stream")]
    NoDataStream(String),

    /// A parameter node is not available on this device.
    #[error("node {0} is not available")]
    NodeNotAvailable(Param),

    /// A parameter node is currently not writable.
    #[error("node {0} is locked")]
    NodeLocked(Param),

    /// A value was rejected by a parameter node.
    #[error("value {value} rejected by node {param}")]
    InvalidValue {
        /// The node that rejected the value
        param: Param,
        /// The rejected value
        value: f64,
    },

    /// The referenced buffer does not belong to the stream.
    #[error("unknown buffer {0}")]
    UnknownBuffer(u64),

    /// The stream has not been started.
    #[error("data stream is not started")]
    NotStarted,

    /// Generic transport layer failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors surfaced by the acquisition layer.
#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    /// No device matches the requested identity.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The matched device cannot be claimed exclusively.
    #[error("device busy: {0}")]
    DeviceBusy(String),

    /// A parameter value lies outside the device-reported bounds.
    #[error("{param} = {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// The parameter being set
        param: Param,
        /// The requested value
        value: f64,
        /// Minimum accepted value at the time of the request
        min: f64,
        /// Maximum accepted value at the time of the request
        max: f64,
    },

    /// The transport rejected the buffer announcement.
    #[error("buffer allocation failed: {0}")]
    AllocationFailed(DeviceError),

    /// The hardware rejected the acquisition start.
    #[error("acquisition start failed: {0}")]
    StartFailed(DeviceError),

    /// The streaming session hit an unrecoverable fault.
    #[error("acquisition fault: {0}")]
    AcquisitionFault(String),

    /// The operation is not allowed in the current controller state.
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        /// The attempted operation
        operation: &'static str,
        /// The controller state at the time of the call
        state: ControllerState,
    },

    /// Parameters are locked while streaming in production mode.
    #[error("parameter {0} is locked while streaming")]
    ParametersLocked(Param),

    /// No session is streaming.
    #[error("camera is not streaming")]
    NotStreaming,

    /// Pixel data does not match the declared frame geometry.
    #[error("frame data has {actual} bytes, expected {expected}")]
    InvalidFrame {
        /// Bytes implied by the geometry
        expected: usize,
        /// Bytes provided
        actual: usize,
    },

    /// A device backend call failed.
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Reading or writing a persisted record failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors raised while persisting records.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The record does not exist.
    #[error("file does not exist: {0}")]
    NotFound(PathBuf),

    /// Failed to access the file.
    #[error("failed to access {path}: {source}")]
    Io {
        /// The file being accessed
        path: PathBuf,
        /// The underlying error
        #[source]
        source: std::io::Error,
    },

    /// The record could not be encoded or decoded.
    #[error("malformed record {path}: {source}")]
    Json {
        /// The file being decoded
        path: PathBuf,
        /// The underlying error
        #[source]
        source: serde_json::Error,
    },
}
