use mvcam_io::frame::Frame;

use crate::pattern::PatternSize;

/// Chessboard corner detection.
///
/// Implementations return every inner corner in row-major order, or `None`
/// when the full pattern is not visible. Partial detections are never
/// returned.
pub trait ChessboardDetector: Sync {
    /// Detect the inner corners of a `size` chessboard in `frame`.
    fn detect(&self, frame: &Frame, size: PatternSize) -> Option<Vec<[f64; 2]>>;
}

impl<D: ChessboardDetector + ?Sized> ChessboardDetector for &D {
    fn detect(&self, frame: &Frame, size: PatternSize) -> Option<Vec<[f64; 2]>> {
        (**self).detect(frame, size)
    }
}

/// One full chessboard observation.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSample {
    /// Sequence number of the frame the corners were found in
    pub sequence: u64,
    /// Image corners paired by index with the pattern template
    pub corners: Vec<[f64; 2]>,
}

impl CalibrationSample {
    /// Run `detector` on `frame`, keeping the result only if every corner was found.
    pub fn detect<D: ChessboardDetector + ?Sized>(
        detector: &D,
        frame: &Frame,
        size: PatternSize,
    ) -> Option<Self> {
        let corners = detector.detect(frame, size)?;
        if corners.len() != size.corner_count() {
            log::debug!(
                "frame #{} yields {} of {} corners",
                frame.sequence(),
                corners.len(),
                size.corner_count()
            );
            return None;
        }
        Some(Self {
            sequence: frame.sequence(),
            corners,
        })
    }
}

/// Mean Euclidean distance between corresponding corners of two observations.
///
/// Returns `f64::INFINITY` for observations of different lengths.
pub fn mean_corner_difference(a: &[[f64; 2]], b: &[[f64; 2]]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return f64::INFINITY;
    }
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(p, q)| (p[0] - q[0]).hypot(p[1] - q[1]))
        .sum();
    sum / a.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use mvcam_io::frame::{ImageSize, PixelFormat};

    struct FixedDetector(Vec<[f64; 2]>);

    impl ChessboardDetector for FixedDetector {
        fn detect(&self, _frame: &Frame, _size: PatternSize) -> Option<Vec<[f64; 2]>> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn test_partial_detection_is_rejected() {
        let frame = Frame::new(ImageSize::new(2, 2), PixelFormat::Mono8, vec![0; 4]).unwrap();
        let size = PatternSize::new(2, 2);

        let partial = FixedDetector(vec![[0.0, 0.0]; 3]);
        assert!(CalibrationSample::detect(&partial, &frame, size).is_none());

        let full = FixedDetector(vec![[1.0, 2.0]; 4]);
        let sample = CalibrationSample::detect(&full, &frame, size).unwrap();
        assert_eq!(sample.corners.len(), 4);
    }

    #[test]
    fn test_mean_corner_difference() {
        let a = [[0.0, 0.0], [10.0, 0.0]];
        let b = [[3.0, 4.0], [10.0, 0.0]];
        assert_eq!(mean_corner_difference(&a, &b), 2.5);
        assert_eq!(mean_corner_difference(&a, &a), 0.0);
        assert!(mean_corner_difference(&a, &b[..1]).is_infinite());
    }
}
