//! A chessboard seen through a known camera, for exercising calibration and
//! pose estimation without hardware.
//!
//! Frames carry the index of the view they show as a little-endian `u32` in
//! their first four pixels; [`SyntheticDetector`] reads it back and returns the
//! projected corners of that view.

use std::sync::Arc;

use mvcam_io::error::CameraError;
use mvcam_io::frame::{Frame, ImageSize, PixelFormat};
use mvcam_io::sim::FrameGenerator;
use mvcam_pnp::{project_points, CameraModel, PnPResult};

use crate::detector::ChessboardDetector;
use crate::pattern::{ChessboardPattern, PatternSize};

/// Stamp of a frame that shows no pattern.
pub const NO_PATTERN: u32 = u32::MAX;

const BACKGROUND: u8 = 0x80;

/// Write `tag` into the first four pixels.
pub fn stamp(pixels: &mut [u8], tag: u32) {
    pixels.fill(BACKGROUND);
    if let Some(head) = pixels.get_mut(..4) {
        head.copy_from_slice(&tag.to_le_bytes());
    }
}

/// Read the tag written by [`stamp`], whatever the pixel format of the frame.
pub fn read_stamp(frame: &Frame) -> Option<u32> {
    let mut bytes = [0u8; 4];
    for (x, byte) in bytes.iter_mut().enumerate() {
        *byte = frame.intensity(x, 0)?;
    }
    Some(u32::from_le_bytes(bytes))
}

/// A pattern observed from a fixed list of poses.
#[derive(Debug, Clone)]
pub struct SyntheticBoard {
    pattern: ChessboardPattern,
    camera: CameraModel,
    poses: Vec<PnPResult>,
    views: Arc<Vec<Vec<[f64; 2]>>>,
}

impl SyntheticBoard {
    /// Project `pattern` through `camera` for every pose.
    pub fn new(pattern: ChessboardPattern, camera: CameraModel, poses: Vec<PnPResult>) -> Self {
        let template = pattern.template();
        let views = poses
            .iter()
            .map(|pose| project_points(&template, pose, &camera))
            .collect();
        Self {
            pattern,
            camera,
            poses,
            views: Arc::new(views),
        }
    }

    /// `count` tilted views of the board, centred in front of the camera.
    pub fn orbit(pattern: ChessboardPattern, camera: CameraModel, count: usize) -> Self {
        let width = (pattern.size.cols - 1) as f64 * pattern.square_size;
        let height = (pattern.size.rows - 1) as f64 * pattern.square_size;
        let center = [width / 2.0, height / 2.0, 0.0];
        let k = camera.intrinsics;
        // board covers about 40% of the image width at the nominal distance
        let distance = width * k.fx / (0.8 * k.cx.max(1.0));

        let poses = (0..count)
            .map(|i| {
                let a = i as f64;
                let rvec = [
                    0.45 * (2.1 * a + 0.3).sin(),
                    0.45 * (1.3 * a).cos(),
                    0.2 * (0.7 * a).sin(),
                ];
                let rotation = PnPResult::from_rvec(rvec, [0.0; 3]);
                let rc = rotation.transform(&center);
                let target = [
                    0.15 * width * (1.7 * a).sin(),
                    0.15 * height * (2.3 * a).cos(),
                    distance * (1.0 + 0.2 * (0.9 * a).sin()),
                ];
                PnPResult::from_rvec(
                    rvec,
                    [target[0] - rc[0], target[1] - rc[1], target[2] - rc[2]],
                )
            })
            .collect();
        Self::new(pattern, camera, poses)
    }

    /// The observed pattern.
    pub fn pattern(&self) -> &ChessboardPattern {
        &self.pattern
    }

    /// The ground-truth camera.
    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    /// Ground-truth board poses, one per view.
    pub fn poses(&self) -> &[PnPResult] {
        &self.poses
    }

    /// Number of views.
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Whether there are no views.
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Projected corners of `view`.
    pub fn corners(&self, view: usize) -> Option<&[[f64; 2]]> {
        self.views.get(view).map(|v| v.as_slice())
    }

    /// A grayscale frame showing `view`, or no pattern for `None`.
    pub fn frame(&self, view: Option<usize>, size: ImageSize) -> Result<Frame, CameraError> {
        let mut pixels = vec![0; size.area()];
        stamp(&mut pixels, view.map_or(NO_PATTERN, |v| v as u32));
        Frame::new(size, PixelFormat::Mono8, pixels)
    }

    /// Frame generator cycling through the views.
    ///
    /// With `blank_every = Some(n)`, every `n`-th frame shows no pattern.
    pub fn cycle_generator(&self, blank_every: Option<u64>) -> FrameGenerator {
        let count = self.len() as u64;
        Box::new(move |index, pixels, _size| {
            let blank = count == 0 || blank_every.is_some_and(|n| n > 0 && index % n == 0);
            let tag = if blank {
                NO_PATTERN
            } else {
                (index % count) as u32
            };
            stamp(pixels, tag);
        })
    }

    /// Frame generator repeating one view forever, or no pattern for `None`.
    pub fn still_generator(&self, view: Option<usize>) -> FrameGenerator {
        let tag = view.map_or(NO_PATTERN, |v| v as u32);
        Box::new(move |_index, pixels, _size| stamp(pixels, tag))
    }

    /// Detector reporting the projected corners of stamped frames.
    pub fn detector(&self) -> SyntheticDetector {
        SyntheticDetector {
            size: self.pattern.size,
            views: self.views.clone(),
        }
    }
}

/// Corner detector for frames produced by a [`SyntheticBoard`].
#[derive(Debug, Clone)]
pub struct SyntheticDetector {
    size: PatternSize,
    views: Arc<Vec<Vec<[f64; 2]>>>,
}

impl ChessboardDetector for SyntheticDetector {
    fn detect(&self, frame: &Frame, size: PatternSize) -> Option<Vec<[f64; 2]>> {
        if size != self.size {
            return None;
        }
        let tag = read_stamp(frame)?;
        self.views.get(tag as usize).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvcam_pnp::CameraIntrinsics;

    fn board() -> SyntheticBoard {
        let pattern = ChessboardPattern::new(PatternSize::new(9, 6), 0.025).unwrap();
        let camera = CameraModel::pinhole(CameraIntrinsics::new(1000.0, 1000.0, 640.0, 480.0));
        SyntheticBoard::orbit(pattern, camera, 12)
    }

    #[test]
    fn test_stamp_roundtrip() {
        let board = board();
        let detector = board.detector();
        let size = ImageSize::new(16, 4);

        let frame = board.frame(Some(7), size).unwrap();
        assert_eq!(read_stamp(&frame), Some(7));
        let corners = detector.detect(&frame, board.pattern().size).unwrap();
        assert_eq!(corners.as_slice(), board.corners(7).unwrap());

        // color frames carry the same tag
        assert_eq!(read_stamp(&frame.to_bgr()), Some(7));

        let blank = board.frame(None, size).unwrap();
        assert!(detector.detect(&blank, board.pattern().size).is_none());
        assert!(detector.detect(&frame, PatternSize::new(7, 5)).is_none());
    }

    #[test]
    fn test_orbit_views_are_in_front_and_in_frame() {
        let board = board();
        let template = board.pattern().template();
        for (pose, view) in board.poses().iter().zip(0..board.len()) {
            assert!(template.iter().all(|p| pose.transform(p)[2] > 0.0));
            assert!(board
                .corners(view)
                .unwrap()
                .iter()
                .all(|c| (0.0..1280.0).contains(&c[0]) && (0.0..960.0).contains(&c[1])));
        }
    }

    #[test]
    fn test_cycle_generator() {
        let board = board();
        let mut generator = board.cycle_generator(Some(5));
        let mut pixels = vec![0u8; 8];
        let size = ImageSize::new(8, 1);

        generator(3, &mut pixels, size);
        assert_eq!(u32::from_le_bytes(pixels[..4].try_into().unwrap()), 3);
        generator(14, &mut pixels, size);
        assert_eq!(u32::from_le_bytes(pixels[..4].try_into().unwrap()), 2);
        generator(10, &mut pixels, size);
        assert_eq!(u32::from_le_bytes(pixels[..4].try_into().unwrap()), NO_PATTERN);
        assert_eq!(pixels[4], BACKGROUND);
    }
}
