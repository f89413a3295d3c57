use std::time::Instant;

/// The smoothing factor for the FPS calculation.
const SMOOTHING: f32 = 0.95;

/// An exponentially smoothed frame rate counter.
///
/// # Examples
///
/// ```
/// use mvcam_io::fps_counter::FpsCounter;
///
/// let mut fps_counter = FpsCounter::new();
///
/// for _ in 0..100 {
///    fps_counter.update();
/// }
/// assert_eq!(fps_counter.frames(), 100);
/// ```
#[derive(Debug, Clone)]
pub struct FpsCounter {
    last_time: Instant,
    frames: u64,
    fps: f32,
}

impl FpsCounter {
    /// Creates a new `FpsCounter`.
    pub fn new() -> Self {
        Self {
            last_time: Instant::now(),
            frames: 0,
            fps: 0.0,
        }
    }

    /// Returns the current FPS.
    #[inline]
    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Number of frames counted so far.
    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Count a frame arriving now.
    pub fn update(&mut self) {
        self.update_at(Instant::now());
    }

    /// Count a frame arriving at `now`.
    pub fn update_at(&mut self, now: Instant) {
        self.frames += 1;

        let elapsed = now.saturating_duration_since(self.last_time).as_secs_f32();
        self.last_time = now;
        if elapsed <= f32::EPSILON {
            return;
        }

        let instant_fps = 1.0 / elapsed;
        self.fps = if self.fps == 0.0 {
            instant_fps
        } else {
            self.fps * SMOOTHING + instant_fps * (1.0 - SMOOTHING)
        };
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}
