use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::device::DataStream;
use crate::error::{CameraError, DeviceError};
use crate::fps_counter::FpsCounter;
use crate::frame::{ColorMode, Frame};
use crate::slot::FrameSlot;

/// A running pump thread. The data stream moves into the thread and comes
/// back when the thread is joined.
pub struct PumpHandle<S: DataStream> {
    running: Arc<AtomicBool>,
    handle: JoinHandle<S>,
}

impl<S: DataStream> PumpHandle<S> {
    /// Whether the pump thread has exited on its own (after a fault).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Clear the running flag, join the thread and return the stream.
    ///
    /// Returns within one buffer-wait timeout.
    pub fn stop(self) -> Result<S, CameraError> {
        self.running.store(false, Ordering::Release);
        self.handle
            .join()
            .map_err(|_| CameraError::AcquisitionFault("pump thread panicked".to_string()))
    }
}

enum StreamSlot<S: DataStream> {
    Idle(S),
    Pumping(PumpHandle<S>),
    Lost,
}

/// Owner of the hardware buffer pool and the pump loop of one camera.
pub struct FrameBufferPipeline<S: DataStream> {
    stream: StreamSlot<S>,
    slot: Arc<FrameSlot>,
    buffer_timeout: Duration,
    color_mode: ColorMode,
    payload_size: usize,
    buffer_count: usize,
}

impl<S: DataStream> FrameBufferPipeline<S> {
    /// Wrap a data stream publishing into `slot`.
    pub fn new(stream: S, slot: Arc<FrameSlot>, buffer_timeout: Duration, color_mode: ColorMode) -> Self {
        Self {
            stream: StreamSlot::Idle(stream),
            slot,
            buffer_timeout,
            color_mode,
            payload_size: 0,
            buffer_count: 0,
        }
    }

    /// The slot frames are published to.
    pub fn slot(&self) -> &Arc<FrameSlot> {
        &self.slot
    }

    /// Whether the pump thread is running.
    pub fn is_pumping(&self) -> bool {
        matches!(self.stream, StreamSlot::Pumping(_))
    }

    /// Number of buffers announced by the last allocation.
    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    /// Payload size of the announced buffers.
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    fn idle_stream(&mut self) -> Result<&mut S, CameraError> {
        match &mut self.stream {
            StreamSlot::Idle(stream) => Ok(stream),
            StreamSlot::Pumping(_) => Err(CameraError::AcquisitionFault(
                "buffers cannot change while the pump is running".to_string(),
            )),
            StreamSlot::Lost => Err(CameraError::AcquisitionFault(
                "data stream was lost".to_string(),
            )),
        }
    }

    /// Discard every previous buffer, then announce and queue the device
    /// minimum of buffers of `payload_size` bytes.
    pub fn allocate_buffers(&mut self, payload_size: usize) -> Result<usize, CameraError> {
        self.release_buffers()?;

        let stream = self.idle_stream()?;
        let count = stream.min_buffers_required()?.max(1);
        let announced = (0..count).try_for_each(|_| {
            let id = stream.announce_buffer(payload_size)?;
            stream.queue_buffer(id)
        });

        if let Err(e) = announced {
            if let Err(cleanup) = self.release_buffers() {
                log::warn!("failed to release partial allocation: {cleanup}");
            }
            return Err(CameraError::AllocationFailed(e));
        }

        self.payload_size = payload_size;
        self.buffer_count = count;
        log::debug!("announced {count} buffers of {payload_size} bytes");
        Ok(count)
    }

    /// Flush the stream and revoke every announced buffer.
    pub fn release_buffers(&mut self) -> Result<(), CameraError> {
        let stream = self.idle_stream()?;
        stream.flush()?;
        for id in stream.announced_buffers() {
            stream.revoke_buffer(id)?;
        }
        self.buffer_count = 0;
        self.payload_size = 0;
        Ok(())
    }

    /// Start the stream side of the acquisition.
    pub fn begin_acquisition(&mut self) -> Result<(), DeviceError> {
        match &mut self.stream {
            StreamSlot::Idle(stream) => stream.start_acquisition(),
            _ => Err(DeviceError::Transport("stream is not idle".to_string())),
        }
    }

    /// Stop the stream side of the acquisition.
    pub fn end_acquisition(&mut self) -> Result<(), DeviceError> {
        match &mut self.stream {
            StreamSlot::Idle(stream) => stream.stop_acquisition(),
            _ => Err(DeviceError::Transport("stream is not idle".to_string())),
        }
    }

    /// Spawn the pump thread.
    pub fn start(&mut self) -> Result<(), CameraError> {
        let stream = match std::mem::replace(&mut self.stream, StreamSlot::Lost) {
            StreamSlot::Idle(stream) => stream,
            other => {
                self.stream = other;
                return Err(CameraError::AcquisitionFault(
                    "pump is already running".to_string(),
                ));
            }
        };

        let running = Arc::new(AtomicBool::new(true));
        let handle = std::thread::Builder::new().name("mvcam-pump".to_string()).spawn({
            let running = running.clone();
            let slot = self.slot.clone();
            let timeout = self.buffer_timeout;
            let color_mode = self.color_mode;
            move || pump_loop(stream, &slot, &running, timeout, color_mode)
        });

        match handle {
            Ok(handle) => {
                self.stream = StreamSlot::Pumping(PumpHandle { running, handle });
                Ok(())
            }
            Err(e) => Err(CameraError::AcquisitionFault(format!(
                "failed to spawn pump thread: {e}"
            ))),
        }
    }

    /// Stop and join the pump thread, if running.
    pub fn stop(&mut self) -> Result<(), CameraError> {
        match std::mem::replace(&mut self.stream, StreamSlot::Lost) {
            StreamSlot::Pumping(pump) => {
                self.stream = StreamSlot::Idle(pump.stop()?);
                Ok(())
            }
            other => {
                self.stream = other;
                Ok(())
            }
        }
    }
}

/// Move filled buffers into the slot until `running` clears or the stream faults.
fn pump_loop<S: DataStream>(
    mut stream: S,
    slot: &FrameSlot,
    running: &AtomicBool,
    timeout: Duration,
    color_mode: ColorMode,
) -> S {
    let mut fps = FpsCounter::new();
    log::debug!("pump started");

    while running.load(Ordering::Acquire) {
        let id = match stream.wait_for_filled_buffer(timeout) {
            Ok(Some(id)) => id,
            Ok(None) => continue,
            Err(e) => {
                slot.mark_faulted(format!("wait for buffer failed: {e}"));
                break;
            }
        };

        let frame = match stream.buffer_image(id) {
            Some(view) => Frame::from_view(&view, color_mode, slot.recycle_buffer())
                .map_err(|e| format!("buffer {id} is malformed: {e}")),
            None => Err(format!("buffer {id} carries no image")),
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(reason) => {
                slot.mark_faulted(reason);
                if let Err(e) = stream.queue_buffer(id) {
                    log::warn!("failed to requeue buffer {id}: {e}");
                }
                break;
            }
        };

        // the buffer goes back before the frame is published
        if let Err(e) = stream.queue_buffer(id) {
            slot.mark_faulted(format!("failed to requeue buffer {id}: {e}"));
            break;
        }

        slot.publish(frame);
        fps.update();
        slot.set_fps(fps.fps());
    }

    log::debug!("pump stopped after {} frames", fps.frames());
    stream
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceProvider, DeviceSession, Param};
    use crate::sim::{SimFault, SimProvider, SimSession, DEFAULT_SERIAL};
    use std::time::Instant;

    fn small_session(provider: &SimProvider) -> Result<SimSession, CameraError> {
        provider.initialize()?;
        let devices = provider.enumerate()?;
        let mut session = provider.open(&devices[0])?;
        session.set_parameter(Param::Width, 64.0)?;
        session.set_parameter(Param::Height, 32.0)?;
        session.set_parameter(Param::FrameRate, 120.0)?;
        Ok(session)
    }

    #[test]
    fn test_pump_publishes_and_requeues() -> Result<(), CameraError> {
        let provider = SimProvider::new();
        let mut session = small_session(&provider)?;
        let slot = Arc::new(FrameSlot::new());
        let mut pipeline = FrameBufferPipeline::new(
            session.open_data_stream()?,
            slot.clone(),
            Duration::from_millis(50),
            ColorMode::Mono8,
        );

        assert_eq!(pipeline.allocate_buffers(session.payload_size()?)?, 3);
        pipeline.begin_acquisition()?;
        session.acquisition_start()?;
        pipeline.start()?;

        let frame = slot.wait_next_timeout(0, Duration::from_secs(1))?.unwrap();
        assert_eq!(frame.width(), 64);
        let next = slot.wait_next_timeout(frame.sequence(), Duration::from_secs(1))?.unwrap();
        assert!(next.sequence() > frame.sequence());

        let t0 = Instant::now();
        pipeline.stop()?;
        assert!(t0.elapsed() < Duration::from_millis(500));

        let probe = provider.probe(DEFAULT_SERIAL).unwrap();
        assert_eq!(probe.announced_buffers, 3);
        assert_eq!(probe.queued_buffers, 3);

        pipeline.release_buffers()?;
        let probe = provider.probe(DEFAULT_SERIAL).unwrap();
        assert_eq!(probe.announced_buffers, 0);
        assert_eq!(probe.queued_buffers, 0);
        Ok(())
    }

    #[test]
    fn test_buffer_without_image_faults_session() -> Result<(), CameraError> {
        let provider = SimProvider::new();
        provider.inject_fault(DEFAULT_SERIAL, SimFault::EmptyBuffer { after_frames: 2 })?;
        let mut session = small_session(&provider)?;
        let slot = Arc::new(FrameSlot::new());
        let mut pipeline = FrameBufferPipeline::new(
            session.open_data_stream()?,
            slot.clone(),
            Duration::from_millis(50),
            ColorMode::Bgr8,
        );

        pipeline.allocate_buffers(session.payload_size()?)?;
        pipeline.begin_acquisition()?;
        session.acquisition_start()?;
        pipeline.start()?;

        let deadline = Instant::now() + Duration::from_secs(2);
        while !slot.is_faulted() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(slot.is_faulted());
        assert_eq!(slot.sequence(), 2);
        assert!(matches!(
            slot.wait_next(2),
            Err(CameraError::AcquisitionFault(_))
        ));

        pipeline.stop()?;
        Ok(())
    }

    #[test]
    fn test_rejected_announce() -> Result<(), CameraError> {
        let provider = SimProvider::new();
        provider.inject_fault(DEFAULT_SERIAL, SimFault::RejectAnnounce)?;
        let mut session = small_session(&provider)?;
        let mut pipeline = FrameBufferPipeline::new(
            session.open_data_stream()?,
            Arc::new(FrameSlot::new()),
            Duration::from_millis(50),
            ColorMode::Mono8,
        );

        assert!(matches!(
            pipeline.allocate_buffers(session.payload_size()?),
            Err(CameraError::AllocationFailed(_))
        ));
        assert_eq!(pipeline.buffer_count(), 0);
        Ok(())
    }
}
