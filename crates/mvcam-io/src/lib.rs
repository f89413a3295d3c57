#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Acquisition
//!
//! An [`controller::AcquisitionController`] drives one camera through
//! `open → prepare → configure → allocate → start → stop → close`. While
//! streaming, a dedicated pump thread moves filled hardware buffers into a
//! shared [`slot::FrameSlot`] and hands them straight back to the transport.
//! Consumers read the most recent frame or block until a newer one arrives.
//!
//! ```rust
//! use mvcam_io::controller::{AcquisitionController, StartMode};
//! use mvcam_io::config::ControllerOptions;
//! use mvcam_io::library::DeviceLibrary;
//! use mvcam_io::sim::SimProvider;
//!
//! let library = DeviceLibrary::new(SimProvider::new());
//! let mut camera = AcquisitionController::new(library, ControllerOptions::default());
//!
//! camera.open(None)?;
//! camera.prepare()?;
//! camera.apply_auto_defaults()?;
//! camera.allocate_buffers()?;
//! camera.start(StartMode::Production)?;
//!
//! let frame = camera.wait_next_frame()?;
//! println!("frame #{} {}", frame.sequence(), frame.size());
//!
//! camera.stop()?;
//! # Ok::<(), mvcam_io::error::CameraError>(())
//! ```

/// Camera configuration records and controller options.
pub mod config;

/// The acquisition state machine.
///
/// See [`controller::AcquisitionController`].
pub mod controller;

/// Device capability interface implemented by camera backends.
///
/// A backend provides enumeration, parameter nodes, buffer handling and
/// acquisition commands through [`device::DeviceProvider`],
/// [`device::DeviceSession`] and [`device::DataStream`].
pub mod device;

/// Error types for acquisition, device and persistence failures.
pub mod error;

/// Frame rate counter for the acquisition loop.
///
/// Track and measure frames per second (FPS) during video capture and processing.
pub mod fps_counter;

/// Image frames published by the acquisition loop.
pub mod frame;

/// Process-wide device library lifetime.
pub mod library;

/// Buffer pool management and the frame pump loop.
pub mod pipeline;

/// Per-camera settings files.
pub mod settings;

/// In-memory camera backend with frame pacing and fault injection.
pub mod sim;

/// Latest-frame slot shared between the pump and any number of readers.
pub mod slot;

/// JSON records keyed by camera serial number.
pub mod storage;

pub use config::{CameraConfig, ControllerOptions, ExposureFpsPolicy, Roi};
pub use controller::{AcquisitionController, ControllerState, StartMode};
pub use error::{CameraError, DeviceError, StorageError};
pub use frame::{ColorMode, Frame, ImageSize, PixelFormat};
pub use slot::{FrameReader, FrameSlot, FrameSource, SlotStats};
