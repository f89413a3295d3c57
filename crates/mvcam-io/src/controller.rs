use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{CameraConfig, ControllerOptions, ExposureFpsPolicy, Roi};
use crate::device::{
    AutoFeature, ControlMode, DeviceDescriptor, DeviceProvider, DeviceSession, Param, ParamRange,
};
use crate::error::{CameraError, DeviceError};
use crate::frame::Frame;
use crate::library::{DeviceLibrary, LibraryGuard};
use crate::pipeline::FrameBufferPipeline;
use crate::settings::{is_reproducible, CameraSettings, SettingsStore};
use crate::slot::{FrameReader, FrameSlot, SlotStats};

type StreamOf<P> = <<P as DeviceProvider>::Session as DeviceSession>::Stream;

/// Lifecycle states of an [`AcquisitionController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No device is held.
    Closed,
    /// A device is claimed.
    Opened,
    /// The data stream is open.
    Prepared,
    /// Parameters were applied.
    Configured,
    /// The pump is running.
    Streaming,
    /// Streaming ended and the device was released.
    Stopped,
}

/// How parameters behave while streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartMode {
    /// Parameters and transport settings are locked.
    #[default]
    Production,
    /// Parameters stay writable for interactive tuning.
    Manual,
}

const ALL_PARAMS: [Param; 7] = [
    Param::OffsetX,
    Param::OffsetY,
    Param::Width,
    Param::Height,
    Param::FrameRate,
    Param::Gain,
    Param::ExposureTime,
];

/// Node values captured before a change so a failed change can be undone.
#[derive(Debug, Clone, Copy, PartialEq)]
struct NodeSnapshot {
    values: [f64; 7],
    gain_mode: ControlMode,
    exposure_mode: ControlMode,
}

impl NodeSnapshot {
    fn read<S: DeviceSession>(session: &S) -> Result<Self, DeviceError> {
        let mut values = [0.0; 7];
        for (value, param) in values.iter_mut().zip(ALL_PARAMS) {
            *value = session.parameter(param)?.value;
        }
        Ok(Self {
            values,
            gain_mode: session.auto_mode(AutoFeature::Gain)?,
            exposure_mode: session.auto_mode(AutoFeature::Exposure)?,
        })
    }

    fn value(&self, param: Param) -> f64 {
        let index = ALL_PARAMS.iter().position(|p| *p == param).unwrap_or(0);
        self.values[index]
    }

    /// Write back every node that differs from the snapshot. Failures are logged.
    fn restore<S: DeviceSession>(&self, session: &mut S) {
        let current = match Self::read(session) {
            Ok(current) => current,
            Err(e) => {
                log::warn!("cannot read nodes to restore them: {e}");
                return;
            }
        };
        if current == *self {
            return;
        }

        let roi = [Param::OffsetX, Param::OffsetY, Param::Width, Param::Height];
        if roi.iter().any(|p| current.value(*p) != self.value(*p)) {
            for (param, value) in [
                (Param::OffsetX, 0.0),
                (Param::OffsetY, 0.0),
                (Param::Width, self.value(Param::Width)),
                (Param::Height, self.value(Param::Height)),
                (Param::OffsetX, self.value(Param::OffsetX)),
                (Param::OffsetY, self.value(Param::OffsetY)),
            ] {
                logged(session.set_parameter(param, value), param);
            }
        }
        logged(
            session.set_parameter(Param::FrameRate, self.value(Param::FrameRate)),
            Param::FrameRate,
        );

        for (feature, param, mode) in [
            (AutoFeature::Gain, Param::Gain, self.gain_mode),
            (AutoFeature::Exposure, Param::ExposureTime, self.exposure_mode),
        ] {
            let restored = session
                .set_auto_mode(feature, ControlMode::Manual)
                .and_then(|_| session.set_parameter(param, self.value(param)))
                .and_then(|_| session.set_auto_mode(feature, mode));
            logged(restored, param);
        }
    }
}

fn logged(result: Result<(), DeviceError>, param: Param) {
    if let Err(e) = result {
        log::warn!("failed to restore {param}: {e}");
    }
}

/// Validate `value` against the bounds the device reports right now.
fn checked_value<S: DeviceSession>(
    session: &S,
    param: Param,
    value: f64,
) -> Result<f64, CameraError> {
    let ParamRange { min, max, .. } = session.parameter(param)?;
    let rounded = if param.is_integer() {
        value.round()
    } else {
        value
    };
    if !rounded.is_finite() || rounded < min || rounded > max {
        return Err(CameraError::OutOfRange {
            param,
            value,
            min,
            max,
        });
    }
    Ok(rounded)
}

fn write_checked<S: DeviceSession>(
    session: &mut S,
    param: Param,
    value: f64,
) -> Result<(), CameraError> {
    let value = checked_value(session, param, value)?;
    session.set_parameter(param, value)?;
    log::debug!("{param} = {value}");
    Ok(())
}

fn apply_roi<S: DeviceSession>(session: &mut S, roi: Roi) -> Result<(), CameraError> {
    let sensor = session.sensor_size()?;
    for (param, offset, extent, limit) in [
        (Param::Width, roi.offset_x, roi.width, sensor.width),
        (Param::Height, roi.offset_y, roi.height, sensor.height),
    ] {
        if offset as usize + extent as usize > limit {
            return Err(CameraError::OutOfRange {
                param,
                value: extent as f64,
                min: session.parameter(param)?.min,
                max: limit.saturating_sub(offset as usize) as f64,
            });
        }
    }

    // zero offsets first so the extents can use the whole sensor
    write_checked(session, Param::OffsetX, 0.0)?;
    write_checked(session, Param::OffsetY, 0.0)?;
    write_checked(session, Param::Width, roi.width as f64)?;
    write_checked(session, Param::Height, roi.height as f64)?;
    write_checked(session, Param::OffsetX, roi.offset_x as f64)?;
    write_checked(session, Param::OffsetY, roi.offset_y as f64)
}

fn apply_frame_rate<S: DeviceSession>(
    session: &mut S,
    policy: ExposureFpsPolicy,
    fps: f64,
) -> Result<(), CameraError> {
    let fps = checked_value(session, Param::FrameRate, fps)?;
    if policy == ExposureFpsPolicy::Coupled
        && session.auto_mode(AutoFeature::Exposure)? == ControlMode::Manual
    {
        let exposure_us = session.parameter(Param::ExposureTime)?.value;
        if exposure_us > 1e6 / fps {
            session.set_auto_mode(AutoFeature::Exposure, ControlMode::Auto)?;
            log::debug!("exposure {exposure_us} us exceeds the frame period, switched to auto");
        }
    }
    session.set_parameter(Param::FrameRate, fps)?;
    log::debug!("{} = {fps}", Param::FrameRate);
    Ok(())
}

fn apply_gain<S: DeviceSession>(
    session: &mut S,
    mode: ControlMode,
    gain: f64,
) -> Result<(), CameraError> {
    if mode == ControlMode::Manual {
        let gain = checked_value(session, Param::Gain, gain)?;
        session.set_auto_mode(AutoFeature::Gain, ControlMode::Manual)?;
        session.set_parameter(Param::Gain, gain)?;
        log::debug!("{} = {gain}", Param::Gain);
    } else {
        session.set_auto_mode(AutoFeature::Gain, ControlMode::Auto)?;
        log::debug!("gain auto");
    }
    Ok(())
}

fn apply_exposure<S: DeviceSession>(
    session: &mut S,
    policy: ExposureFpsPolicy,
    mode: ControlMode,
    exposure_us: f64,
) -> Result<(), CameraError> {
    if mode == ControlMode::Auto {
        session.set_auto_mode(AutoFeature::Exposure, ControlMode::Auto)?;
        log::debug!("exposure auto");
        return Ok(());
    }

    if policy == ExposureFpsPolicy::Coupled {
        let fps = session.parameter(Param::FrameRate)?;
        if exposure_us > 1e6 / fps.value {
            let lowered = (1e6 / exposure_us).clamp(fps.min, fps.max);
            session.set_parameter(Param::FrameRate, lowered)?;
            log::debug!("frame rate lowered to {lowered} for exposure {exposure_us} us");
        }
    }

    let exposure_us = checked_value(session, Param::ExposureTime, exposure_us)?;
    session.set_auto_mode(AutoFeature::Exposure, ControlMode::Manual)?;
    session.set_parameter(Param::ExposureTime, exposure_us)?;
    log::debug!("{} = {exposure_us}", Param::ExposureTime);
    Ok(())
}

/// Drives one camera through its acquisition lifecycle.
///
/// ```text
/// Closed → Opened → Prepared → Configured → Streaming → Stopped → Closed
/// ```
///
/// The controller owns the device session and the buffer pool. Frames are
/// published into a [`FrameSlot`] that any number of readers can share.
/// Parameter changes are validated against the bounds the device reports at
/// call time and either apply completely or leave every node unchanged.
pub struct AcquisitionController<P: DeviceProvider> {
    library: DeviceLibrary<P>,
    options: ControllerOptions,
    state: ControllerState,
    mode: StartMode,
    serial: Option<String>,
    slot: Arc<FrameSlot>,
    pipeline: Option<FrameBufferPipeline<StreamOf<P>>>,
    session: Option<P::Session>,
    guard: Option<LibraryGuard<P>>,
}

impl<P: DeviceProvider> AcquisitionController<P> {
    /// Create a closed controller on a device library.
    pub fn new(library: DeviceLibrary<P>, options: ControllerOptions) -> Self {
        Self {
            library,
            options,
            state: ControllerState::Closed,
            mode: StartMode::Production,
            serial: None,
            slot: Arc::new(FrameSlot::new()),
            pipeline: None,
            session: None,
            guard: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Mode of the current or last streaming session.
    pub fn mode(&self) -> StartMode {
        self.mode
    }

    /// Options the controller was created with.
    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// Serial number of the device resolved by [`AcquisitionController::open`].
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    fn invalid_state(&self, operation: &'static str) -> CameraError {
        CameraError::InvalidState {
            operation,
            state: self.state,
        }
    }

    fn session(&self, operation: &'static str) -> Result<&P::Session, CameraError> {
        self.session
            .as_ref()
            .ok_or_else(|| self.invalid_state(operation))
    }

    fn session_mut(&mut self, operation: &'static str) -> Result<&mut P::Session, CameraError> {
        let state = self.state;
        self.session
            .as_mut()
            .ok_or(CameraError::InvalidState { operation, state })
    }

    #[allow(clippy::type_complexity)]
    fn parts(
        &mut self,
        operation: &'static str,
    ) -> Result<(&mut P::Session, &mut FrameBufferPipeline<StreamOf<P>>), CameraError> {
        let state = self.state;
        match (self.session.as_mut(), self.pipeline.as_mut()) {
            (Some(session), Some(pipeline)) => Ok((session, pipeline)),
            _ => Err(CameraError::InvalidState { operation, state }),
        }
    }

    fn resolved_serial(&self, operation: &'static str) -> Result<&str, CameraError> {
        self.serial
            .as_deref()
            .ok_or_else(|| self.invalid_state(operation))
    }

    /// Claim a device: the one with serial number `serial`, or the first
    /// openable one.
    pub fn open(&mut self, serial: Option<&str>) -> Result<(), CameraError> {
        if !matches!(
            self.state,
            ControllerState::Closed | ControllerState::Stopped
        ) {
            return Err(self.invalid_state("open"));
        }

        let guard = self.library.acquire()?;
        let devices = guard.provider().enumerate()?;
        let descriptor: &DeviceDescriptor = match serial {
            Some(serial) => devices
                .iter()
                .find(|d| d.serial == serial)
                .ok_or_else(|| CameraError::DeviceNotFound(serial.to_string()))?,
            None => devices
                .iter()
                .find(|d| d.openable)
                .or_else(|| devices.first())
                .ok_or_else(|| CameraError::DeviceNotFound("no device attached".to_string()))?,
        };
        if !descriptor.openable {
            return Err(CameraError::DeviceBusy(descriptor.serial.clone()));
        }

        let session = guard.provider().open(descriptor).map_err(|e| match e {
            DeviceError::Busy(serial) => CameraError::DeviceBusy(serial),
            e => CameraError::Device(e),
        })?;

        log::info!("opened camera {} ({})", descriptor.serial, descriptor.model);
        self.serial = Some(descriptor.serial.clone());
        self.session = Some(session);
        self.guard = Some(guard);
        self.state = ControllerState::Opened;
        Ok(())
    }

    /// Open the data stream of the claimed device.
    pub fn prepare(&mut self) -> Result<(), CameraError> {
        if self.state != ControllerState::Opened {
            return Err(self.invalid_state("prepare"));
        }
        let stream = self.session_mut("prepare")?.open_data_stream()?;
        self.pipeline = Some(FrameBufferPipeline::new(
            stream,
            self.slot.clone(),
            self.options.buffer_timeout(),
            self.options.color_mode,
        ));
        self.state = ControllerState::Prepared;
        log::debug!("data stream opened");
        Ok(())
    }

    fn check_mutable(&self, operation: &'static str, param: Param) -> Result<(), CameraError> {
        match (self.state, self.mode) {
            (ControllerState::Opened | ControllerState::Prepared | ControllerState::Configured, _) => {
                Ok(())
            }
            (ControllerState::Streaming, StartMode::Manual) => Ok(()),
            (ControllerState::Streaming, StartMode::Production) => {
                Err(CameraError::ParametersLocked(param))
            }
            _ => Err(self.invalid_state(operation)),
        }
    }

    /// Stop the pump and the acquisition, keeping the buffers announced.
    ///
    /// Any failure faults the slot: no frame arrives until the controller
    /// is stopped.
    fn pause(&mut self) -> Result<(), CameraError> {
        let slot = self.slot.clone();
        let (session, pipeline) = self.parts("pause")?;
        let halted: Result<(), CameraError> = (|| {
            pipeline.stop()?;
            session.acquisition_stop()?;
            pipeline.end_acquisition()?;
            Ok(())
        })();
        if let Err(e) = &halted {
            slot.mark_faulted(format!("failed to pause the stream: {e}"));
        }
        halted?;
        log::debug!("stream paused for reconfiguration");
        Ok(())
    }

    /// Reallocate buffers for the current payload size and restart the pump.
    fn resume(&mut self) -> Result<(), CameraError> {
        let (session, pipeline) = self.parts("resume")?;
        let payload = session.payload_size()?;
        pipeline.allocate_buffers(payload)?;
        pipeline.begin_acquisition()?;
        session.acquisition_start()?;
        pipeline.start()?;
        log::debug!("stream resumed with {payload} byte buffers");
        Ok(())
    }

    /// Run `apply` on the session, undoing every node change if it fails.
    fn transact<F>(
        &mut self,
        operation: &'static str,
        param: Param,
        touches_roi: bool,
        apply: F,
    ) -> Result<(), CameraError>
    where
        F: FnOnce(&mut P::Session, ExposureFpsPolicy) -> Result<(), CameraError>,
    {
        self.check_mutable(operation, param)?;
        let policy = self.options.exposure_fps_policy;
        let paused = touches_roi && self.state == ControllerState::Streaming;
        if paused {
            self.pause()?;
        }

        // the stream is resumed or faulted whatever the outcome
        let result = self.apply_or_restore(operation, policy, apply);

        if paused {
            if let Err(e) = self.resume() {
                self.slot
                    .mark_faulted(format!("failed to resume after {operation}: {e}"));
                return Err(e);
            }
        }
        result
    }

    fn apply_or_restore<F>(
        &mut self,
        operation: &'static str,
        policy: ExposureFpsPolicy,
        apply: F,
    ) -> Result<(), CameraError>
    where
        F: FnOnce(&mut P::Session, ExposureFpsPolicy) -> Result<(), CameraError>,
    {
        let session = self.session_mut(operation)?;
        let snapshot = NodeSnapshot::read(session)?;
        let result = apply(session, policy);
        if let Err(e) = &result {
            log::warn!("{operation} failed, restoring previous values: {e}");
            snapshot.restore(session);
        }
        result
    }

    /// Apply a full configuration: ROI first, then frame rate, gain and exposure.
    ///
    /// Nothing changes if any value is rejected.
    pub fn configure(&mut self, config: &CameraConfig) -> Result<(), CameraError> {
        self.check_mutable("configure", Param::Width)?;
        let touches_roi = self.current_config()?.roi != config.roi;
        let config = *config;
        self.transact("configure", Param::Width, touches_roi, |session, policy| {
            if touches_roi {
                apply_roi(session, config.roi)?;
            }
            apply_frame_rate(session, policy, config.fps)?;
            apply_gain(session, config.gain_mode, config.gain)?;
            apply_exposure(session, policy, config.exposure_mode, config.exposure_us)
        })?;

        if self.state == ControllerState::Prepared {
            self.state = ControllerState::Configured;
        }
        log::info!(
            "camera configured: ROI {}x{}+{}+{} at {} fps",
            config.roi.width,
            config.roi.height,
            config.roi.offset_x,
            config.roi.offset_y,
            config.fps
        );
        Ok(())
    }

    /// Set the region of interest. Offset plus extent must fit the sensor.
    ///
    /// While streaming in manual mode the pump is paused and the buffers are
    /// reallocated for the new payload size.
    pub fn set_roi(&mut self, roi: Roi) -> Result<(), CameraError> {
        self.transact("set ROI", Param::Width, true, |session, _| {
            apply_roi(session, roi)
        })
    }

    /// Set the horizontal offset, keeping the other ROI values.
    pub fn set_offset_x(&mut self, offset_x: u32) -> Result<(), CameraError> {
        let roi = self.current_config()?.roi;
        self.set_roi(Roi { offset_x, ..roi })
    }

    /// Set the vertical offset, keeping the other ROI values.
    pub fn set_offset_y(&mut self, offset_y: u32) -> Result<(), CameraError> {
        let roi = self.current_config()?.roi;
        self.set_roi(Roi { offset_y, ..roi })
    }

    /// Set the ROI width, keeping the other ROI values.
    pub fn set_width(&mut self, width: u32) -> Result<(), CameraError> {
        let roi = self.current_config()?.roi;
        self.set_roi(Roi { width, ..roi })
    }

    /// Set the ROI height, keeping the other ROI values.
    pub fn set_height(&mut self, height: u32) -> Result<(), CameraError> {
        let roi = self.current_config()?.roi;
        self.set_roi(Roi { height, ..roi })
    }

    /// Set the frame rate in frames per second.
    pub fn set_frame_rate(&mut self, fps: f64) -> Result<(), CameraError> {
        self.transact("set frame rate", Param::FrameRate, false, |session, policy| {
            apply_frame_rate(session, policy, fps)
        })
    }

    /// Select automatic gain, or manual gain at `gain`.
    pub fn set_gain(&mut self, mode: ControlMode, gain: f64) -> Result<(), CameraError> {
        self.transact("set gain", Param::Gain, false, |session, _| {
            apply_gain(session, mode, gain)
        })
    }

    /// Select automatic exposure, or manual exposure of `exposure_us` microseconds.
    pub fn set_exposure(&mut self, mode: ControlMode, exposure_us: f64) -> Result<(), CameraError> {
        self.transact("set exposure", Param::ExposureTime, false, |session, policy| {
            apply_exposure(session, policy, mode, exposure_us)
        })
    }

    /// Read back the effective configuration from the device.
    pub fn current_config(&self) -> Result<CameraConfig, CameraError> {
        let session = self.session("read configuration")?;
        let value = |param| session.parameter(param).map(|r| r.value);
        Ok(CameraConfig {
            roi: Roi::new(
                value(Param::OffsetX)? as u32,
                value(Param::OffsetY)? as u32,
                value(Param::Width)? as u32,
                value(Param::Height)? as u32,
            ),
            fps: value(Param::FrameRate)?,
            gain_mode: session.auto_mode(AutoFeature::Gain)?,
            gain: value(Param::Gain)?,
            exposure_mode: session.auto_mode(AutoFeature::Exposure)?,
            exposure_us: value(Param::ExposureTime)?,
        })
    }

    /// Current value and bounds of a parameter node.
    pub fn parameter(&self, param: Param) -> Result<ParamRange, CameraError> {
        Ok(self.session("read parameter")?.parameter(param)?)
    }

    /// Full sensor, maximum frame rate, automatic gain and exposure.
    ///
    /// Returns the configuration read back from the device.
    pub fn apply_auto_defaults(&mut self) -> Result<CameraConfig, CameraError> {
        let sensor = self.session("apply defaults")?.sensor_size()?;
        self.set_roi(Roi::full(sensor))?;
        let max_fps = self.parameter(Param::FrameRate)?.max;
        self.configure(&CameraConfig::auto_defaults(sensor, max_fps))?;
        self.current_config()
    }

    /// Announce and queue the buffers needed for the current payload size.
    pub fn allocate_buffers(&mut self) -> Result<usize, CameraError> {
        if !matches!(
            self.state,
            ControllerState::Prepared | ControllerState::Configured
        ) {
            return Err(self.invalid_state("allocate buffers"));
        }
        let (session, pipeline) = self.parts("allocate buffers")?;
        let payload = session.payload_size()?;
        pipeline.allocate_buffers(payload)
    }

    /// Start streaming.
    ///
    /// Buffers are allocated first if none match the current payload size.
    /// Fails with `StartFailed` and leaves the state unchanged when the
    /// hardware rejects the start.
    pub fn start(&mut self, mode: StartMode) -> Result<(), CameraError> {
        if !matches!(
            self.state,
            ControllerState::Prepared | ControllerState::Configured
        ) {
            return Err(self.invalid_state("start"));
        }

        let slot = self.slot.clone();
        let (session, pipeline) = self.parts("start")?;
        let payload = session.payload_size()?;
        if pipeline.buffer_count() == 0 || pipeline.payload_size() != payload {
            pipeline.allocate_buffers(payload)?;
        }

        let launched = (|| {
            session
                .set_transport_params_locked(mode == StartMode::Production)
                .map_err(CameraError::StartFailed)?;
            slot.reopen();
            pipeline
                .begin_acquisition()
                .map_err(CameraError::StartFailed)?;
            session.acquisition_start().map_err(CameraError::StartFailed)?;
            pipeline.start()
        })();

        if let Err(e) = launched {
            log::error!("failed to start acquisition: {e}");
            if let Err(e) = session.acquisition_stop() {
                log::warn!("acquisition stop after failed start: {e}");
            }
            if let Err(e) = pipeline.end_acquisition() {
                log::warn!("stream stop after failed start: {e}");
            }
            if let Err(e) = session.set_transport_params_locked(false) {
                log::warn!("transport unlock after failed start: {e}");
            }
            slot.close();
            return Err(e);
        }

        self.mode = mode;
        self.state = ControllerState::Streaming;
        log::info!(
            "streaming started ({mode:?}, {} buffers of {payload} bytes)",
            self.pipeline.as_ref().map_or(0, |p| p.buffer_count())
        );
        Ok(())
    }

    /// Stop streaming and release the device.
    ///
    /// Safe to call repeatedly and from any state. Every teardown step runs
    /// even if an earlier one fails; the first failure is returned.
    pub fn stop(&mut self) -> Result<(), CameraError> {
        if matches!(
            self.state,
            ControllerState::Closed | ControllerState::Stopped
        ) {
            return Ok(());
        }

        let streaming = self.state == ControllerState::Streaming;
        let mut first_error: Option<CameraError> = None;
        let mut record = |step: &str, result: Result<(), CameraError>| {
            if let Err(e) = result {
                log::warn!("{step} failed during stop: {e}");
                first_error.get_or_insert(e);
            }
        };

        if let Some(pipeline) = self.pipeline.as_mut() {
            record("pump shutdown", pipeline.stop());
        }
        if let Some(session) = self.session.as_mut() {
            if streaming {
                record("acquisition stop", session.acquisition_stop().map_err(Into::into));
            }
            record(
                "transport unlock",
                session.set_transport_params_locked(false).map_err(Into::into),
            );
        }
        if let Some(pipeline) = self.pipeline.as_mut() {
            if streaming {
                record("stream stop", pipeline.end_acquisition().map_err(Into::into));
            }
            record("buffer release", pipeline.release_buffers());
        }
        self.slot.close();

        self.pipeline = None;
        self.session = None;
        self.guard = None;
        self.state = ControllerState::Stopped;
        log::info!(
            "camera {} stopped",
            self.serial.as_deref().unwrap_or("<unknown>")
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop if needed and return to `Closed`.
    pub fn close(&mut self) -> Result<(), CameraError> {
        let stopped = self.stop();
        self.serial = None;
        self.state = ControllerState::Closed;
        stopped
    }

    /// The slot frames are published to.
    pub fn slot(&self) -> &Arc<FrameSlot> {
        &self.slot
    }

    /// Whether the current streaming session hit a fault.
    pub fn is_faulted(&self) -> bool {
        self.slot.is_faulted()
    }

    /// The most recent frame, if any.
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.slot.latest()
    }

    /// Block until a frame newer than the current one is published.
    ///
    /// There is no timeout: a stalled pump stalls the caller. Fails with
    /// `AcquisitionFault` once the session faulted.
    pub fn wait_next_frame(&self) -> Result<Arc<Frame>, CameraError> {
        if self.state != ControllerState::Streaming {
            return Err(CameraError::NotStreaming);
        }
        self.slot.wait_next(self.slot.sequence())
    }

    /// A reader cursor over the published frames.
    pub fn frame_reader(&self) -> FrameReader {
        FrameReader::new(self.slot.clone())
    }

    /// Publish counters of the pump loop.
    pub fn stats(&self) -> SlotStats {
        self.slot.stats()
    }

    /// Write the effective configuration to the settings file of this camera.
    pub fn save_settings(&self, store: &SettingsStore) -> Result<PathBuf, CameraError> {
        let serial = self.resolved_serial("save settings")?;
        let config = self.current_config()?;
        if !is_reproducible(&config) {
            log::warn!("gain or exposure is automatic, saving the current values as manual");
        }
        Ok(store.save(serial, &CameraSettings::from(&config))?)
    }

    /// Apply the settings file of this camera.
    ///
    /// A missing or malformed file leaves the camera untouched.
    pub fn load_settings(&mut self, store: &SettingsStore) -> Result<CameraConfig, CameraError> {
        let serial = self.resolved_serial("load settings")?.to_string();
        let config = store.load(&serial)?.to_config();
        self.configure(&config)?;
        log::info!("camera settings loaded from {}", store.path(&serial).display());
        Ok(config)
    }

    fn startup<F>(
        &mut self,
        serial: Option<&str>,
        mode: StartMode,
        configure: F,
    ) -> Result<CameraConfig, CameraError>
    where
        F: FnOnce(&mut Self) -> Result<CameraConfig, CameraError>,
    {
        let result = self.run_startup(serial, mode, configure);
        if let Err(e) = &result {
            log::error!("camera startup aborted: {e}");
            if let Err(e) = self.stop() {
                log::warn!("cleanup after failed startup: {e}");
            }
        }
        result
    }

    fn run_startup<F>(
        &mut self,
        serial: Option<&str>,
        mode: StartMode,
        configure: F,
    ) -> Result<CameraConfig, CameraError>
    where
        F: FnOnce(&mut Self) -> Result<CameraConfig, CameraError>,
    {
        self.open(serial)?;
        self.prepare()?;
        let config = configure(self)?;
        self.allocate_buffers()?;
        self.start(mode)?;
        Ok(config)
    }

    /// Open, apply the automatic defaults and stream in production mode.
    pub fn start_auto(&mut self, serial: Option<&str>) -> Result<CameraConfig, CameraError> {
        self.startup(serial, StartMode::Production, |c| c.apply_auto_defaults())
    }

    /// Open, apply the saved settings and stream in production mode.
    pub fn start_with_settings(
        &mut self,
        serial: Option<&str>,
        store: &SettingsStore,
    ) -> Result<CameraConfig, CameraError> {
        self.startup(serial, StartMode::Production, |c| c.load_settings(store))
    }

    /// Open and stream in manual mode for interactive tuning.
    ///
    /// Saved settings are applied when they exist, the automatic defaults otherwise.
    pub fn start_manual(
        &mut self,
        serial: Option<&str>,
        store: &SettingsStore,
    ) -> Result<CameraConfig, CameraError> {
        self.startup(serial, StartMode::Manual, |c| {
            let saved = c.serial().is_some_and(|serial| store.exists(serial));
            if saved {
                c.load_settings(store)
            } else {
                c.apply_auto_defaults()
            }
        })
    }
}

impl<P: DeviceProvider> Drop for AcquisitionController<P> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("failed to stop camera on drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimProvider, DEFAULT_SERIAL};

    fn opened() -> Result<(SimProvider, AcquisitionController<SimProvider>), CameraError> {
        let provider = SimProvider::new();
        let mut camera =
            AcquisitionController::new(DeviceLibrary::new(provider.clone()), ControllerOptions::default());
        camera.open(None)?;
        camera.prepare()?;
        Ok((provider, camera))
    }

    #[test]
    fn test_lifecycle_states() -> Result<(), CameraError> {
        let (_, mut camera) = opened()?;
        assert_eq!(camera.state(), ControllerState::Prepared);
        assert_eq!(camera.serial(), Some(DEFAULT_SERIAL));

        camera.configure(&CameraConfig::manual(Roi::new(0, 0, 640, 480), 50.0, 2.0, 5_000.0))?;
        assert_eq!(camera.state(), ControllerState::Configured);

        assert!(matches!(
            camera.prepare(),
            Err(CameraError::InvalidState { operation: "prepare", .. })
        ));

        camera.close()?;
        assert_eq!(camera.state(), ControllerState::Closed);
        assert!(matches!(
            camera.set_frame_rate(10.0),
            Err(CameraError::InvalidState { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_rejected_exposure_restores_mode() -> Result<(), CameraError> {
        let (_, mut camera) = opened()?;
        let before = camera.current_config()?;
        assert_eq!(before.exposure_mode, ControlMode::Auto);

        assert!(matches!(
            camera.set_exposure(ControlMode::Manual, 5.0),
            Err(CameraError::OutOfRange { param: Param::ExposureTime, .. })
        ));
        assert_eq!(camera.current_config()?, before);
        Ok(())
    }

    #[test]
    fn test_coupled_exposure_lowers_frame_rate() -> Result<(), CameraError> {
        let provider = SimProvider::new();
        let options = ControllerOptions {
            exposure_fps_policy: ExposureFpsPolicy::Coupled,
            ..Default::default()
        };
        let mut camera = AcquisitionController::new(DeviceLibrary::new(provider), options);
        camera.open(None)?;
        camera.set_frame_rate(50.0)?;

        camera.set_exposure(ControlMode::Manual, 40_000.0)?;
        let config = camera.current_config()?;
        assert_eq!(config.fps, 25.0);
        assert_eq!(config.exposure_us, 40_000.0);

        camera.set_frame_rate(50.0)?;
        assert_eq!(camera.current_config()?.exposure_mode, ControlMode::Auto);
        Ok(())
    }

    #[test]
    fn test_independent_exposure_is_bounded_by_period() -> Result<(), CameraError> {
        let (_, mut camera) = opened()?;
        camera.set_frame_rate(50.0)?;
        assert!(matches!(
            camera.set_exposure(ControlMode::Manual, 40_000.0),
            Err(CameraError::OutOfRange { max, .. }) if max == 20_000.0
        ));
        assert_eq!(camera.current_config()?.fps, 50.0);
        Ok(())
    }

    #[test]
    fn test_single_roi_setters() -> Result<(), CameraError> {
        let (_, mut camera) = opened()?;
        camera.set_width(1000)?;
        camera.set_offset_x(936)?;
        camera.set_height(600)?;
        camera.set_offset_y(616)?;
        assert_eq!(camera.current_config()?.roi, Roi::new(936, 616, 1000, 600));

        assert!(matches!(
            camera.set_width(1001),
            Err(CameraError::OutOfRange { param: Param::Width, max, .. }) if max == 1000.0
        ));
        assert_eq!(camera.current_config()?.roi, Roi::new(936, 616, 1000, 600));
        Ok(())
    }
}
