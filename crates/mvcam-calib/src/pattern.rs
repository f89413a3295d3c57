use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;

/// Number of inner corners of a chessboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatternSize {
    /// Inner corners along a row (x direction)
    pub cols: usize,
    /// Inner corners along a column (y direction)
    pub rows: usize,
}

impl PatternSize {
    /// Create a pattern size.
    pub fn new(cols: usize, rows: usize) -> Self {
        Self { cols, rows }
    }

    /// Number of inner corners.
    #[inline]
    pub fn corner_count(&self) -> usize {
        self.cols * self.rows
    }
}

impl std::fmt::Display for PatternSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// A planar chessboard target with square cells.
///
/// Corners are ordered row-major: index `i` sits at column `i % cols` and
/// row `i / cols`. Detectors must report corners in the same order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChessboardPattern {
    /// Inner corner grid
    pub size: PatternSize,
    /// Side length of one square in world units
    pub square_size: f64,
}

impl ChessboardPattern {
    /// Create a pattern, rejecting grids that cannot constrain a homography.
    pub fn new(size: PatternSize, square_size: f64) -> Result<Self, CalibrationError> {
        if size.cols < 2 || size.rows < 2 {
            return Err(CalibrationError::InvalidPattern(format!(
                "pattern {size} needs at least 2x2 inner corners"
            )));
        }
        if !(square_size.is_finite() && square_size > 0.0) {
            return Err(CalibrationError::InvalidPattern(format!(
                "square size must be positive, got {square_size}"
            )));
        }
        Ok(Self { size, square_size })
    }

    /// Number of inner corners.
    pub fn corner_count(&self) -> usize {
        self.size.corner_count()
    }

    /// Object-space corners on the `z = 0` plane.
    pub fn template(&self) -> Vec<[f64; 3]> {
        let cols = self.size.cols;
        (0..self.corner_count())
            .map(|i| {
                [
                    (i % cols) as f64 * self.square_size,
                    (i / cols) as f64 * self.square_size,
                    0.0,
                ]
            })
            .collect()
    }

    /// Object-space corners of the physical reference target, placed in the world frame.
    pub fn reference_template(&self, options: &PoseOptions) -> Vec<[f64; 3]> {
        let offset = options.offset_for(self.square_size);
        let sign_y = if options.mirror_y { -1.0 } else { 1.0 };
        self.template()
            .into_iter()
            .map(|[x, y, z]| [x + offset[0], sign_y * y + offset[1], z + offset[2]])
            .collect()
    }
}

/// Placement of the reference target in the world frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseOptions {
    /// Translation of the first corner; `None` places it at `(square, 2 * square, 0)`.
    pub reference_offset: Option<[f64; 3]>,
    /// Flip the template rows so that y grows towards the first row.
    pub mirror_y: bool,
}

impl Default for PoseOptions {
    fn default() -> Self {
        Self {
            reference_offset: None,
            mirror_y: true,
        }
    }
}

impl PoseOptions {
    /// The offset applied for a pattern with squares of `square_size`.
    pub fn offset_for(&self, square_size: f64) -> [f64; 3] {
        self.reference_offset
            .unwrap_or([square_size, 2.0 * square_size, 0.0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_is_row_major() -> Result<(), CalibrationError> {
        let pattern = ChessboardPattern::new(PatternSize::new(3, 2), 0.5)?;
        assert_eq!(
            pattern.template(),
            vec![
                [0.0, 0.0, 0.0],
                [0.5, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 0.5, 0.0],
                [0.5, 0.5, 0.0],
                [1.0, 0.5, 0.0],
            ]
        );
        Ok(())
    }

    #[test]
    fn test_reference_template() -> Result<(), CalibrationError> {
        let pattern = ChessboardPattern::new(PatternSize::new(2, 2), 10.0)?;
        let placed = pattern.reference_template(&PoseOptions::default());
        assert_eq!(placed[0], [10.0, 20.0, 0.0]);
        assert_eq!(placed[3], [20.0, 10.0, 0.0]);

        let options = PoseOptions {
            reference_offset: Some([1.0, 2.0, 3.0]),
            mirror_y: false,
        };
        assert_eq!(pattern.reference_template(&options)[3], [11.0, 12.0, 3.0]);
        Ok(())
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(ChessboardPattern::new(PatternSize::new(1, 6), 1.0).is_err());
        assert!(ChessboardPattern::new(PatternSize::new(9, 6), 0.0).is_err());
        assert!(ChessboardPattern::new(PatternSize::new(9, 6), f64::NAN).is_err());
    }
}
