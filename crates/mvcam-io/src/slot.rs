use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::CameraError;
use crate::frame::Frame;

/// Counters maintained by the acquisition loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlotStats {
    /// Smoothed publish rate in frames per second
    pub fps: f32,
    /// Frames published since the slot was created
    pub frames: u64,
    /// Frames replaced before any reader picked them up
    pub dropped: u64,
}

/// The single most recent frame, shared between one writer and many readers.
///
/// Frames are published as whole `Arc<Frame>` snapshots: the writer builds the
/// next frame off-lock and swaps the pointer, so a reader holding a frame is
/// never affected by later publishes. Readers take the lock only to clone the
/// pointer. Sequence numbers start at 1 and never go backwards, even across
/// [`FrameSlot::reopen`].
#[derive(Debug, Default)]
pub struct FrameSlot {
    current: RwLock<Option<Arc<Frame>>>,
    spare: Mutex<Option<Arc<Frame>>>,
    sequence: AtomicU64,
    consumed: AtomicU64,
    closed: AtomicBool,
    fault: Mutex<Option<String>>,
    stats: Mutex<SlotStats>,
    signal_lock: Mutex<()>,
    signal: Condvar,
}

impl FrameSlot {
    /// Create an empty, open slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a frame, returning the sequence number assigned to it.
    pub fn publish(&self, mut frame: Frame) -> u64 {
        let sequence = self.sequence.load(Ordering::Acquire) + 1;
        frame.set_sequence(sequence);
        let frame = Arc::new(frame);

        let previous = std::mem::replace(&mut *self.current.write(), Some(frame));
        self.sequence.store(sequence, Ordering::Release);

        {
            let mut stats = self.stats.lock();
            stats.frames += 1;
            if previous.is_some() && self.consumed.load(Ordering::Acquire) < sequence - 1 {
                stats.dropped += 1;
            }
        }
        *self.spare.lock() = previous;

        let _guard = self.signal_lock.lock();
        self.signal.notify_all();
        sequence
    }

    /// Pixel storage of the frame replaced by the last publish, if no reader still holds it.
    pub(crate) fn recycle_buffer(&self) -> Vec<u8> {
        self.spare
            .lock()
            .take()
            .and_then(|frame| Arc::try_unwrap(frame).ok())
            .map(Frame::into_data)
            .unwrap_or_default()
    }

    /// The most recent frame, if any.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        let frame = self.current.read().clone();
        if let Some(frame) = &frame {
            self.mark_consumed(frame.sequence());
        }
        frame
    }

    /// Sequence number of the most recent frame, 0 before the first publish.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }

    /// Block until a frame newer than `after` is published.
    ///
    /// Fails with `AcquisitionFault` once the session faulted and with
    /// `NotStreaming` once the slot is closed.
    pub fn wait_next(&self, after: u64) -> Result<Arc<Frame>, CameraError> {
        let mut guard = self.signal_lock.lock();
        loop {
            if let Some(frame) = self.poll(after)? {
                return Ok(frame);
            }
            self.signal.wait(&mut guard);
        }
    }

    /// Like [`FrameSlot::wait_next`], returning `Ok(None)` after `timeout`.
    pub fn wait_next_timeout(
        &self,
        after: u64,
        timeout: Duration,
    ) -> Result<Option<Arc<Frame>>, CameraError> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.signal_lock.lock();
        loop {
            if let Some(frame) = self.poll(after)? {
                return Ok(Some(frame));
            }
            if self.signal.wait_until(&mut guard, deadline).timed_out() {
                return self.poll(after);
            }
        }
    }

    /// Record an unrecoverable session fault and wake every waiter.
    pub fn mark_faulted(&self, reason: impl Into<String>) {
        let reason = reason.into();
        log::error!("acquisition fault: {reason}");
        self.fault.lock().get_or_insert(reason);
        let _guard = self.signal_lock.lock();
        self.signal.notify_all();
    }

    /// The fault recorded for the current session, if any.
    pub fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }

    /// Whether the current session faulted.
    pub fn is_faulted(&self) -> bool {
        self.fault.lock().is_some()
    }

    /// End the session: waiters return `NotStreaming`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        let _guard = self.signal_lock.lock();
        self.signal.notify_all();
    }

    /// Whether the slot is closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Begin a new session: clears the fault, the last frame and the rate estimate.
    pub fn reopen(&self) {
        *self.fault.lock() = None;
        *self.current.write() = None;
        *self.spare.lock() = None;
        self.consumed.store(self.sequence(), Ordering::Release);
        self.stats.lock().fps = 0.0;
        self.closed.store(false, Ordering::Release);
    }

    /// Snapshot of the publish counters.
    pub fn stats(&self) -> SlotStats {
        *self.stats.lock()
    }

    pub(crate) fn set_fps(&self, fps: f32) {
        self.stats.lock().fps = fps;
    }

    fn poll(&self, after: u64) -> Result<Option<Arc<Frame>>, CameraError> {
        if let Some(reason) = self.fault() {
            return Err(CameraError::AcquisitionFault(reason));
        }
        if self.sequence() > after {
            if let Some(frame) = self.latest() {
                return Ok(Some(frame));
            }
        }
        if self.is_closed() {
            return Err(CameraError::NotStreaming);
        }
        Ok(None)
    }

    fn mark_consumed(&self, sequence: u64) {
        self.consumed.fetch_max(sequence, Ordering::AcqRel);
    }
}

/// A source of frames consumed by calibration and pose estimation.
pub trait FrameSource {
    /// Wait up to `timeout` for a frame newer than the last one returned.
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<Arc<Frame>>, CameraError>;
}

/// A consumer cursor over a [`FrameSlot`].
///
/// Each reader remembers the last sequence number it returned, so successive
/// calls never yield the same frame twice and never go backwards.
#[derive(Debug, Clone)]
pub struct FrameReader {
    slot: Arc<FrameSlot>,
    last_seen: u64,
}

impl FrameReader {
    /// Create a reader that only returns frames published from now on.
    pub fn new(slot: Arc<FrameSlot>) -> Self {
        let last_seen = slot.sequence();
        Self { slot, last_seen }
    }

    /// The most recent frame without waiting.
    pub fn latest(&mut self) -> Option<Arc<Frame>> {
        let frame = self.slot.latest()?;
        self.last_seen = self.last_seen.max(frame.sequence());
        Some(frame)
    }

    /// Sequence number of the last frame returned.
    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }
}

impl FrameSource for FrameReader {
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<Arc<Frame>>, CameraError> {
        let frame = self.slot.wait_next_timeout(self.last_seen, timeout)?;
        if let Some(frame) = &frame {
            self.last_seen = frame.sequence();
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ImageSize, PixelFormat};
    use std::thread;

    fn frame(value: u8) -> Frame {
        Frame::new(ImageSize::new(4, 4), PixelFormat::Mono8, vec![value; 16]).unwrap()
    }

    #[test]
    fn test_publish_and_latest() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());
        assert_eq!(slot.sequence(), 0);

        assert_eq!(slot.publish(frame(1)), 1);
        assert_eq!(slot.publish(frame(2)), 2);

        let latest = slot.latest().unwrap();
        assert_eq!(latest.sequence(), 2);
        assert_eq!(latest.as_slice()[0], 2);
        assert_eq!(slot.stats().frames, 2);
        assert_eq!(slot.stats().dropped, 1);
    }

    #[test]
    fn test_held_frame_is_not_recycled() {
        let slot = FrameSlot::new();
        slot.publish(frame(1));
        let held = slot.latest().unwrap();
        slot.publish(frame(2));

        assert!(slot.recycle_buffer().is_empty());
        assert_eq!(held.as_slice(), &[1; 16]);

        slot.publish(frame(3));
        assert_eq!(slot.recycle_buffer().len(), 16);
    }

    #[test]
    fn test_wait_next_across_threads() -> Result<(), CameraError> {
        let slot = Arc::new(FrameSlot::new());
        let writer = {
            let slot = slot.clone();
            thread::spawn(move || {
                for v in 0..5 {
                    thread::sleep(Duration::from_millis(5));
                    slot.publish(frame(v));
                }
            })
        };

        let mut last = 0;
        while last < 5 {
            let f = slot.wait_next(last)?;
            assert!(f.sequence() > last);
            last = f.sequence();
        }
        writer.join().unwrap();
        Ok(())
    }

    #[test]
    fn test_timeout_and_close() -> Result<(), CameraError> {
        let slot = Arc::new(FrameSlot::new());
        assert!(slot
            .wait_next_timeout(0, Duration::from_millis(10))?
            .is_none());

        let waiter = {
            let slot = slot.clone();
            thread::spawn(move || slot.wait_next(0))
        };
        thread::sleep(Duration::from_millis(20));
        slot.close();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(CameraError::NotStreaming)
        ));
        Ok(())
    }

    #[test]
    fn test_fault_is_observed_and_cleared() {
        let slot = FrameSlot::new();
        slot.publish(frame(1));
        slot.mark_faulted("buffer without image");

        assert!(slot.is_faulted());
        assert!(matches!(
            slot.wait_next(0),
            Err(CameraError::AcquisitionFault(reason)) if reason == "buffer without image"
        ));

        slot.reopen();
        assert!(!slot.is_faulted());
        assert!(slot.latest().is_none());
        assert_eq!(slot.publish(frame(2)), 2);
    }

    #[test]
    fn test_reader_skips_to_latest() -> Result<(), CameraError> {
        let slot = Arc::new(FrameSlot::new());
        slot.publish(frame(1));
        let mut reader = FrameReader::new(slot.clone());

        assert!(reader.next_frame(Duration::from_millis(5))?.is_none());
        slot.publish(frame(2));
        slot.publish(frame(3));

        let f = reader.next_frame(Duration::from_millis(5))?.unwrap();
        assert_eq!(f.sequence(), 3);
        assert_eq!(reader.last_seen(), 3);
        Ok(())
    }
}
