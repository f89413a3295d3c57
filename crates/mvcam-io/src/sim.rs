//! A software camera backend.
//!
//! [`SimProvider`] implements the device capability traits entirely in memory.
//! Each simulated device has a sensor of fixed size, parameter nodes whose
//! bounds depend on each other the way they do on real area-scan cameras
//! (offsets bounded by the ROI, frame rate bounded by the ROI height, exposure
//! bounded by the frame period) and a data stream that fills queued buffers at
//! the configured frame rate. Frames arriving while no buffer is queued are
//! dropped, as a transport would.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::device::{
    AutoFeature, BufferId, BufferState, ControlMode, DataStream, DeviceDescriptor, DeviceProvider,
    DeviceSession, Param, ParamRange,
};
use crate::error::DeviceError;
use crate::frame::{ImageSize, ImageView, PixelFormat};

/// Sensor size of the default simulated device.
pub const DEFAULT_SENSOR: ImageSize = ImageSize {
    width: 1936,
    height: 1216,
};

/// Serial number of the default simulated device.
pub const DEFAULT_SERIAL: &str = "4104380001";

const MIN_ROI: f64 = 32.0;
// rows read out per second, 60 fps at full sensor height
const LINE_RATE: f64 = 72_960.0;
const MAX_FPS: f64 = 120.0;
const MIN_FPS: f64 = 1.0;
const MIN_EXPOSURE_US: f64 = 20.0;
const MIN_GAIN: f64 = 1.0;
const MAX_GAIN: f64 = 16.0;
const MIN_BUFFERS: usize = 3;
const IDLE_POLL: Duration = Duration::from_millis(5);

/// Fills a frame: `(frame index, Mono8 pixels, geometry)`.
pub type FrameGenerator = Box<dyn FnMut(u64, &mut [u8], ImageSize) + Send>;

/// Static description of a simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimDeviceSpec {
    /// Serial number
    pub serial: String,
    /// Model name
    pub model: String,
    /// Full sensor size
    pub sensor: ImageSize,
}

impl SimDeviceSpec {
    /// A device with the default model and sensor.
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            model: "SIM-U3-3040CP".to_string(),
            sensor: DEFAULT_SENSOR,
        }
    }
}

/// Faults that can be injected into a simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    /// Deliver buffers without image content once `after_frames` frames were delivered.
    EmptyBuffer {
        /// Number of good frames delivered first
        after_frames: u64,
    },
    /// Deliver buffers holding only half of their image once `after_frames` frames were delivered.
    TruncatedBuffer {
        /// Number of good frames delivered first
        after_frames: u64,
    },
    /// Reject `AcquisitionStart`.
    RejectStart,
    /// Reject `AcquisitionStop`; the device keeps acquiring.
    RejectStop,
    /// Reject buffer announcement.
    RejectAnnounce,
}

/// Observable state of a simulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimProbe {
    /// A session currently holds the device
    pub is_open: bool,
    /// `AcquisitionStart` was executed and not yet stopped
    pub acquisition_running: bool,
    /// `TLParamsLocked` is set
    pub transport_locked: bool,
    /// Buffers announced to the data stream
    pub announced_buffers: usize,
    /// Buffers waiting in the input queue
    pub queued_buffers: usize,
    /// Frames handed to the host
    pub frames_delivered: u64,
    /// Frames lost because no buffer was queued
    pub frames_dropped: u64,
}

#[derive(Debug, Clone, Copy)]
struct Nodes {
    offset_x: f64,
    offset_y: f64,
    width: f64,
    height: f64,
    fps: f64,
    gain: f64,
    exposure_us: f64,
    gain_auto: ControlMode,
    exposure_auto: ControlMode,
    tl_locked: bool,
}

impl Nodes {
    fn defaults(sensor: ImageSize) -> Self {
        Self {
            offset_x: 0.0,
            offset_y: 0.0,
            width: sensor.width as f64,
            height: sensor.height as f64,
            fps: 25.0,
            gain: MIN_GAIN,
            exposure_us: 20_000.0,
            gain_auto: ControlMode::Auto,
            exposure_auto: ControlMode::Auto,
            tl_locked: false,
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    reject_start: bool,
    reject_stop: bool,
    reject_announce: bool,
    empty_after: Option<u64>,
    truncate_after: Option<u64>,
}

struct DeviceState {
    spec: SimDeviceSpec,
    nodes: Nodes,
    open: bool,
    acquiring: bool,
    faults: Faults,
    generator: Option<FrameGenerator>,
    probe: SimProbe,
}

fn max_fps(height: f64) -> f64 {
    (LINE_RATE / height.max(1.0)).min(MAX_FPS)
}

impl DeviceState {
    fn new(spec: SimDeviceSpec) -> Self {
        Self {
            nodes: Nodes::defaults(spec.sensor),
            spec,
            open: false,
            acquiring: false,
            faults: Faults::default(),
            generator: None,
            probe: SimProbe::default(),
        }
    }

    fn range(&self, param: Param) -> ParamRange {
        let n = &self.nodes;
        let sensor_w = self.spec.sensor.width as f64;
        let sensor_h = self.spec.sensor.height as f64;
        let (value, min, max) = match param {
            Param::OffsetX => (n.offset_x, 0.0, sensor_w - n.width),
            Param::OffsetY => (n.offset_y, 0.0, sensor_h - n.height),
            Param::Width => (n.width, MIN_ROI, sensor_w - n.offset_x),
            Param::Height => (n.height, MIN_ROI, sensor_h - n.offset_y),
            Param::FrameRate => (n.fps, MIN_FPS, max_fps(n.height)),
            Param::Gain => (n.gain, MIN_GAIN, MAX_GAIN),
            Param::ExposureTime => (n.exposure_us, MIN_EXPOSURE_US, 1e6 / n.fps),
        };
        ParamRange { value, min, max }
    }

    fn set(&mut self, param: Param, value: f64) -> Result<(), DeviceError> {
        let roi = matches!(
            param,
            Param::OffsetX | Param::OffsetY | Param::Width | Param::Height
        );
        if roi && (self.nodes.tl_locked || self.acquiring) {
            return Err(DeviceError::NodeLocked(param));
        }
        if (param == Param::Gain && self.nodes.gain_auto == ControlMode::Auto)
            || (param == Param::ExposureTime && self.nodes.exposure_auto == ControlMode::Auto)
        {
            return Err(DeviceError::NodeLocked(param));
        }

        let value = if param.is_integer() { value.round() } else { value };
        if !value.is_finite() || !self.range(param).contains(value) {
            return Err(DeviceError::InvalidValue { param, value });
        }

        let n = &mut self.nodes;
        match param {
            Param::OffsetX => n.offset_x = value,
            Param::OffsetY => n.offset_y = value,
            Param::Width => n.width = value,
            Param::Height => n.height = value,
            Param::FrameRate => n.fps = value,
            Param::Gain => n.gain = value,
            Param::ExposureTime => n.exposure_us = value,
        }

        // dependent nodes follow, as the sensor timing requires
        n.fps = n.fps.min(max_fps(n.height));
        n.exposure_us = n.exposure_us.min(1e6 / n.fps);
        Ok(())
    }

    fn roi_size(&self) -> ImageSize {
        ImageSize::new(self.nodes.width as usize, self.nodes.height as usize)
    }
}

struct SimShared {
    devices: Vec<DeviceState>,
    initialized: bool,
    init_count: usize,
    close_count: usize,
}

impl SimShared {
    fn device_mut(&mut self, serial: &str) -> Result<&mut DeviceState, DeviceError> {
        self.devices
            .iter_mut()
            .find(|d| d.spec.serial == serial)
            .ok_or_else(|| DeviceError::UnknownDevice(serial.to_string()))
    }
}

/// In-memory camera backend. Clones share the same devices.
#[derive(Clone)]
pub struct SimProvider {
    shared: Arc<Mutex<SimShared>>,
}

impl Default for SimProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimProvider {
    /// A backend with a single default device.
    pub fn new() -> Self {
        Self::with_devices(vec![SimDeviceSpec::new(DEFAULT_SERIAL)])
    }

    /// A backend with the given devices.
    pub fn with_devices(specs: Vec<SimDeviceSpec>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(SimShared {
                devices: specs.into_iter().map(DeviceState::new).collect(),
                initialized: false,
                init_count: 0,
                close_count: 0,
            })),
        }
    }

    /// Replace the pixel generator of a device.
    pub fn set_frame_generator(
        &self,
        serial: &str,
        generator: FrameGenerator,
    ) -> Result<(), DeviceError> {
        self.shared.lock().device_mut(serial)?.generator = Some(generator);
        Ok(())
    }

    /// Arm a fault on a device.
    pub fn inject_fault(&self, serial: &str, fault: SimFault) -> Result<(), DeviceError> {
        let mut shared = self.shared.lock();
        let faults = &mut shared.device_mut(serial)?.faults;
        match fault {
            SimFault::EmptyBuffer { after_frames } => faults.empty_after = Some(after_frames),
            SimFault::TruncatedBuffer { after_frames } => {
                faults.truncate_after = Some(after_frames)
            }
            SimFault::RejectStart => faults.reject_start = true,
            SimFault::RejectStop => faults.reject_stop = true,
            SimFault::RejectAnnounce => faults.reject_announce = true,
        }
        Ok(())
    }

    /// Disarm every fault of a device.
    pub fn clear_faults(&self, serial: &str) -> Result<(), DeviceError> {
        self.shared.lock().device_mut(serial)?.faults = Faults::default();
        Ok(())
    }

    /// Observable state of a device.
    pub fn probe(&self, serial: &str) -> Option<SimProbe> {
        let shared = self.shared.lock();
        let dev = shared.devices.iter().find(|d| d.spec.serial == serial)?;
        Some(SimProbe {
            is_open: dev.open,
            acquisition_running: dev.acquiring,
            transport_locked: dev.nodes.tl_locked,
            ..dev.probe
        })
    }

    /// How many times the library was initialised and closed.
    pub fn library_counts(&self) -> (usize, usize) {
        let shared = self.shared.lock();
        (shared.init_count, shared.close_count)
    }
}

impl DeviceProvider for SimProvider {
    type Session = SimSession;

    fn initialize(&self) -> Result<(), DeviceError> {
        let mut shared = self.shared.lock();
        shared.initialized = true;
        shared.init_count += 1;
        Ok(())
    }

    fn close(&self) -> Result<(), DeviceError> {
        let mut shared = self.shared.lock();
        shared.initialized = false;
        shared.close_count += 1;
        Ok(())
    }

    fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let shared = self.shared.lock();
        if !shared.initialized {
            return Err(DeviceError::NotInitialized);
        }
        Ok(shared
            .devices
            .iter()
            .map(|d| DeviceDescriptor {
                serial: d.spec.serial.clone(),
                model: d.spec.model.clone(),
                openable: !d.open,
            })
            .collect())
    }

    fn open(&self, descriptor: &DeviceDescriptor) -> Result<SimSession, DeviceError> {
        let mut shared = self.shared.lock();
        if !shared.initialized {
            return Err(DeviceError::NotInitialized);
        }
        let index = shared
            .devices
            .iter()
            .position(|d| d.spec.serial == descriptor.serial)
            .ok_or_else(|| DeviceError::UnknownDevice(descriptor.serial.clone()))?;

        let dev = &mut shared.devices[index];
        if dev.open {
            return Err(DeviceError::Busy(descriptor.serial.clone()));
        }
        // opening loads the default user set
        dev.open = true;
        dev.acquiring = false;
        dev.nodes = Nodes::defaults(dev.spec.sensor);

        Ok(SimSession {
            shared: self.shared.clone(),
            index,
            serial: descriptor.serial.clone(),
        })
    }
}

/// An open simulated device.
pub struct SimSession {
    shared: Arc<Mutex<SimShared>>,
    index: usize,
    serial: String,
}

impl SimSession {
    fn with_device<R>(&self, f: impl FnOnce(&mut DeviceState) -> R) -> R {
        let mut shared = self.shared.lock();
        f(&mut shared.devices[self.index])
    }
}

impl Drop for SimSession {
    fn drop(&mut self) {
        self.with_device(|dev| {
            dev.open = false;
            dev.acquiring = false;
            dev.nodes.tl_locked = false;
        });
    }
}

impl DeviceSession for SimSession {
    type Stream = SimStream;

    fn serial_number(&self) -> &str {
        &self.serial
    }

    fn open_data_stream(&mut self) -> Result<SimStream, DeviceError> {
        Ok(SimStream::new(self.shared.clone(), self.index))
    }

    fn parameter(&self, param: Param) -> Result<ParamRange, DeviceError> {
        Ok(self.with_device(|dev| dev.range(param)))
    }

    fn set_parameter(&mut self, param: Param, value: f64) -> Result<(), DeviceError> {
        self.with_device(|dev| dev.set(param, value))
    }

    fn sensor_size(&self) -> Result<ImageSize, DeviceError> {
        Ok(self.with_device(|dev| dev.spec.sensor))
    }

    fn auto_mode(&self, feature: AutoFeature) -> Result<ControlMode, DeviceError> {
        Ok(self.with_device(|dev| match feature {
            AutoFeature::Gain => dev.nodes.gain_auto,
            AutoFeature::Exposure => dev.nodes.exposure_auto,
        }))
    }

    fn set_auto_mode(&mut self, feature: AutoFeature, mode: ControlMode) -> Result<(), DeviceError> {
        self.with_device(|dev| match feature {
            AutoFeature::Gain => dev.nodes.gain_auto = mode,
            AutoFeature::Exposure => dev.nodes.exposure_auto = mode,
        });
        Ok(())
    }

    fn payload_size(&self) -> Result<usize, DeviceError> {
        Ok(self.with_device(|dev| dev.roi_size().area() * PixelFormat::Mono8.channels()))
    }

    fn set_transport_params_locked(&mut self, locked: bool) -> Result<(), DeviceError> {
        self.with_device(|dev| dev.nodes.tl_locked = locked);
        Ok(())
    }

    fn acquisition_start(&mut self) -> Result<(), DeviceError> {
        self.with_device(|dev| {
            if dev.faults.reject_start {
                return Err(DeviceError::Transport("AcquisitionStart rejected".to_string()));
            }
            dev.acquiring = true;
            Ok(())
        })
    }

    fn acquisition_stop(&mut self) -> Result<(), DeviceError> {
        self.with_device(|dev| {
            if dev.faults.reject_stop {
                return Err(DeviceError::Transport("AcquisitionStop rejected".to_string()));
            }
            dev.acquiring = false;
            Ok(())
        })
    }
}

struct SimBuffer {
    data: Vec<u8>,
    state: BufferState,
    // geometry, timestamp and the number of valid bytes
    image: Option<(ImageSize, u64, usize)>,
}

/// Data stream of a simulated device.
pub struct SimStream {
    shared: Arc<Mutex<SimShared>>,
    index: usize,
    buffers: HashMap<BufferId, SimBuffer>,
    input: VecDeque<BufferId>,
    next_id: BufferId,
    started: bool,
    epoch: Instant,
    next_frame_at: Instant,
    frame_index: u64,
}

impl SimStream {
    fn new(shared: Arc<Mutex<SimShared>>, index: usize) -> Self {
        let now = Instant::now();
        Self {
            shared,
            index,
            buffers: HashMap::new(),
            input: VecDeque::new(),
            next_id: 1,
            started: false,
            epoch: now,
            next_frame_at: now,
            frame_index: 0,
        }
    }

    fn sync_probe(&self) {
        let queued = self
            .buffers
            .values()
            .filter(|b| b.state == BufferState::Queued)
            .count();
        let mut shared = self.shared.lock();
        let probe = &mut shared.devices[self.index].probe;
        probe.announced_buffers = self.buffers.len();
        probe.queued_buffers = queued;
    }

    fn buffer_mut(&mut self, id: BufferId) -> Result<&mut SimBuffer, DeviceError> {
        self.buffers
            .get_mut(&id)
            .ok_or(DeviceError::UnknownBuffer(id))
    }

    /// Fill the oldest queued buffer with the next frame, or count a drop.
    fn fill_next(&mut self) -> Option<BufferId> {
        let timestamp_ns = self.epoch.elapsed().as_nanos() as u64;
        let Some(id) = self.input.pop_front() else {
            self.shared.lock().devices[self.index].probe.frames_dropped += 1;
            return None;
        };
        self.frame_index += 1;
        let frame_index = self.frame_index;

        let mut shared = self.shared.lock();
        let dev = &mut shared.devices[self.index];
        let size = dev.roi_size();
        let payload = size.area();
        let empty = dev.faults.empty_after.is_some_and(|n| frame_index > n);
        let valid = match dev.faults.truncate_after {
            Some(n) if frame_index > n => payload / 2,
            _ => payload,
        };

        let buffer = self.buffers.get_mut(&id)?;
        buffer.state = BufferState::Filled;
        buffer.image = if empty || buffer.data.len() < payload {
            None
        } else {
            let pixels = &mut buffer.data[..payload];
            match dev.generator.as_mut() {
                Some(generator) => generator(frame_index, pixels, size),
                None => gradient(frame_index, pixels, size),
            }
            Some((size, timestamp_ns, valid))
        };
        dev.probe.frames_delivered += 1;
        dev.probe.queued_buffers = dev.probe.queued_buffers.saturating_sub(1);
        Some(id)
    }
}

fn gradient(frame_index: u64, pixels: &mut [u8], size: ImageSize) {
    for (y, row) in pixels.chunks_mut(size.width.max(1)).enumerate() {
        for (x, px) in row.iter_mut().enumerate() {
            *px = ((x + y) as u64 + frame_index) as u8;
        }
    }
}

impl Drop for SimStream {
    fn drop(&mut self) {
        let mut shared = self.shared.lock();
        let probe = &mut shared.devices[self.index].probe;
        probe.announced_buffers = 0;
        probe.queued_buffers = 0;
    }
}

impl DataStream for SimStream {
    fn min_buffers_required(&self) -> Result<usize, DeviceError> {
        Ok(MIN_BUFFERS)
    }

    fn announce_buffer(&mut self, payload_size: usize) -> Result<BufferId, DeviceError> {
        if self.shared.lock().devices[self.index].faults.reject_announce {
            return Err(DeviceError::Transport("buffer announcement rejected".to_string()));
        }
        let id = self.next_id;
        self.next_id += 1;
        self.buffers.insert(
            id,
            SimBuffer {
                data: vec![0; payload_size],
                state: BufferState::Announced,
                image: None,
            },
        );
        self.sync_probe();
        Ok(id)
    }

    fn queue_buffer(&mut self, id: BufferId) -> Result<(), DeviceError> {
        let buffer = self.buffer_mut(id)?;
        if buffer.state != BufferState::Queued {
            buffer.state = BufferState::Queued;
            buffer.image = None;
            self.input.push_back(id);
        }
        self.sync_probe();
        Ok(())
    }

    fn wait_for_filled_buffer(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<BufferId>, DeviceError> {
        if !self.started {
            return Err(DeviceError::NotStarted);
        }
        let deadline = Instant::now() + timeout;

        loop {
            let (acquiring, fps) = {
                let shared = self.shared.lock();
                let dev = &shared.devices[self.index];
                (dev.acquiring, dev.nodes.fps)
            };
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            if !acquiring {
                std::thread::sleep(IDLE_POLL.min(deadline - now));
                continue;
            }

            let period = Duration::from_secs_f64(1.0 / fps.max(MIN_FPS));
            if self.next_frame_at + period < now {
                // resynchronise after an idle phase instead of bursting
                self.next_frame_at = now;
            }
            if self.next_frame_at > deadline {
                std::thread::sleep(deadline - now);
                return Ok(None);
            }
            if self.next_frame_at > now {
                std::thread::sleep(self.next_frame_at - now);
            }
            self.next_frame_at += period;

            if let Some(id) = self.fill_next() {
                return Ok(Some(id));
            }
        }
    }

    fn buffer_image(&self, id: BufferId) -> Option<ImageView<'_>> {
        let buffer = self.buffers.get(&id)?;
        if buffer.state != BufferState::Filled {
            return None;
        }
        let (size, timestamp_ns, valid) = buffer.image?;
        Some(ImageView {
            size,
            stride: size.width,
            format: PixelFormat::Mono8,
            timestamp_ns,
            data: &buffer.data[..valid],
        })
    }

    fn buffer_state(&self, id: BufferId) -> Option<BufferState> {
        self.buffers.get(&id).map(|b| b.state)
    }

    fn revoke_buffer(&mut self, id: BufferId) -> Result<(), DeviceError> {
        if self.buffer_mut(id)?.state == BufferState::Queued {
            return Err(DeviceError::Transport(format!(
                "buffer {id} is still queued"
            )));
        }
        self.buffers.remove(&id);
        self.sync_probe();
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        for buffer in self.buffers.values_mut() {
            buffer.state = BufferState::Announced;
            buffer.image = None;
        }
        self.input.clear();
        self.sync_probe();
        Ok(())
    }

    fn announced_buffers(&self) -> Vec<BufferId> {
        let mut ids: Vec<BufferId> = self.buffers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn start_acquisition(&mut self) -> Result<(), DeviceError> {
        self.started = true;
        self.next_frame_at = Instant::now();
        Ok(())
    }

    fn stop_acquisition(&mut self) -> Result<(), DeviceError> {
        self.started = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_default(provider: &SimProvider) -> Result<SimSession, DeviceError> {
        provider.initialize()?;
        let devices = provider.enumerate()?;
        provider.open(&devices[0])
    }

    #[test]
    fn test_exclusive_open() -> Result<(), DeviceError> {
        let provider = SimProvider::new();
        let session = open_default(&provider)?;

        let devices = provider.enumerate()?;
        assert!(!devices[0].openable);
        assert!(matches!(
            provider.open(&devices[0]),
            Err(DeviceError::Busy(_))
        ));

        drop(session);
        assert!(provider.enumerate()?[0].openable);
        Ok(())
    }

    #[test]
    fn test_dependent_ranges() -> Result<(), DeviceError> {
        let provider = SimProvider::new();
        let mut session = open_default(&provider)?;

        session.set_parameter(Param::Width, 1000.0)?;
        assert_eq!(session.parameter(Param::OffsetX)?.max, 936.0);

        session.set_parameter(Param::Height, 608.0)?;
        assert_eq!(session.parameter(Param::FrameRate)?.max, 120.0);

        session.set_parameter(Param::FrameRate, 100.0)?;
        assert_eq!(session.parameter(Param::ExposureTime)?.max, 10_000.0);

        session.set_parameter(Param::Height, 1216.0)?;
        assert_eq!(session.parameter(Param::FrameRate)?.value, 60.0);

        assert!(matches!(
            session.set_parameter(Param::Width, 4000.0),
            Err(DeviceError::InvalidValue { .. })
        ));
        assert!(matches!(
            session.set_parameter(Param::Gain, 2.0),
            Err(DeviceError::NodeLocked(Param::Gain))
        ));
        Ok(())
    }

    #[test]
    fn test_stream_fills_queued_buffers() -> Result<(), DeviceError> {
        let provider = SimProvider::new();
        let mut session = open_default(&provider)?;
        session.set_parameter(Param::Width, 64.0)?;
        session.set_parameter(Param::Height, 48.0)?;
        session.set_parameter(Param::FrameRate, 120.0)?;

        let mut stream = session.open_data_stream()?;
        let payload = session.payload_size()?;
        let id = stream.announce_buffer(payload)?;
        stream.queue_buffer(id)?;
        assert_eq!(provider.probe(DEFAULT_SERIAL).unwrap().queued_buffers, 1);

        stream.start_acquisition()?;
        session.acquisition_start()?;

        let filled = stream.wait_for_filled_buffer(Duration::from_secs(1))?;
        assert_eq!(filled, Some(id));
        let view = stream.buffer_image(id).unwrap();
        assert_eq!(view.size, ImageSize::new(64, 48));
        assert_eq!(view.data.len(), payload);

        // nothing queued: frames are dropped and the wait times out
        assert_eq!(stream.wait_for_filled_buffer(Duration::from_millis(30))?, None);
        assert!(provider.probe(DEFAULT_SERIAL).unwrap().frames_dropped > 0);

        assert!(stream.revoke_buffer(id).is_ok());
        Ok(())
    }

    #[test]
    fn test_queued_buffer_cannot_be_revoked() -> Result<(), DeviceError> {
        let provider = SimProvider::new();
        let mut session = open_default(&provider)?;
        let mut stream = session.open_data_stream()?;
        let id = stream.announce_buffer(16)?;
        stream.queue_buffer(id)?;

        assert!(stream.revoke_buffer(id).is_err());
        stream.flush()?;
        assert_eq!(stream.buffer_state(id), Some(BufferState::Announced));
        stream.revoke_buffer(id)?;
        assert!(stream.announced_buffers().is_empty());
        Ok(())
    }
}
