use serde::{Deserialize, Serialize};

use crate::error::CameraError;

/// Image size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ImageSize {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
}

impl ImageSize {
    /// Create a new image size.
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    /// Number of pixels.
    #[inline]
    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel layout of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit grayscale
    Mono8,
    /// 8-bit packed blue, green, red
    Bgr8,
}

impl PixelFormat {
    /// Bytes per pixel.
    #[inline]
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Mono8 => 1,
            PixelFormat::Bgr8 => 3,
        }
    }
}

/// Pixel format frames are published in.
///
/// `Bgr8` converts every frame on the pump thread; `Mono8` publishes the
/// sensor data as is and leaves conversion to [`Frame::to_bgr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Publish raw grayscale frames
    #[default]
    Mono8,
    /// Publish packed color frames
    Bgr8,
}

/// Borrowed pixel data of a filled hardware buffer.
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    /// Geometry of the image
    pub size: ImageSize,
    /// Bytes per row
    pub stride: usize,
    /// Pixel layout
    pub format: PixelFormat,
    /// Device timestamp in nanoseconds
    pub timestamp_ns: u64,
    /// Pixel bytes, at least `stride * height` long
    pub data: &'a [u8],
}

/// An owned frame published to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    size: ImageSize,
    stride: usize,
    format: PixelFormat,
    sequence: u64,
    timestamp_ns: u64,
    data: Vec<u8>,
}

impl Frame {
    /// Create a tightly packed frame from raw pixel data.
    pub fn new(size: ImageSize, format: PixelFormat, data: Vec<u8>) -> Result<Self, CameraError> {
        let stride = size.width * format.channels();
        let expected = stride * size.height;
        if data.len() != expected {
            return Err(CameraError::InvalidFrame {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            size,
            stride,
            format,
            sequence: 0,
            timestamp_ns: 0,
            data,
        })
    }

    /// Copy a buffer view into an owned frame, reusing `storage` for the pixels.
    ///
    /// Fails with `InvalidFrame` when the view holds fewer bytes than its
    /// geometry needs or its stride is shorter than a row.
    pub fn from_view(
        view: &ImageView<'_>,
        color_mode: ColorMode,
        mut storage: Vec<u8>,
    ) -> Result<Self, CameraError> {
        let row_bytes = view.size.width * view.format.channels();
        let height = view.size.height;
        let required = match height {
            0 => 0,
            h => view.stride.max(row_bytes) * (h - 1) + row_bytes,
        };
        if view.stride < row_bytes || view.data.len() < required {
            return Err(CameraError::InvalidFrame {
                expected: required,
                actual: view.data.len(),
            });
        }

        let rows = (0..height).map(|y| &view.data[y * view.stride..y * view.stride + row_bytes]);
        storage.clear();
        let format = match (view.format, color_mode) {
            (PixelFormat::Mono8, ColorMode::Bgr8) => {
                storage.reserve(view.size.area() * 3);
                for row in rows {
                    for &v in row {
                        storage.extend_from_slice(&[v, v, v]);
                    }
                }
                PixelFormat::Bgr8
            }
            (format, _) => {
                storage.reserve(row_bytes * height);
                for row in rows {
                    storage.extend_from_slice(row);
                }
                format
            }
        };

        Ok(Self {
            size: view.size,
            stride: view.size.width * format.channels(),
            format,
            sequence: 0,
            timestamp_ns: view.timestamp_ns,
            data: storage,
        })
    }

    /// Image geometry.
    #[inline]
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// Width in pixels.
    #[inline]
    pub fn width(&self) -> usize {
        self.size.width
    }

    /// Height in pixels.
    #[inline]
    pub fn height(&self) -> usize {
        self.size.height
    }

    /// Bytes per row.
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Pixel layout.
    #[inline]
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Slot sequence number, assigned on publish.
    #[inline]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Device timestamp in nanoseconds.
    #[inline]
    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    /// Pixel bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Grayscale intensity at `(x, y)`; color frames are averaged.
    pub fn intensity(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        let offset = y * self.stride + x * self.format.channels();
        match self.format {
            PixelFormat::Mono8 => self.data.get(offset).copied(),
            PixelFormat::Bgr8 => {
                let px = self.data.get(offset..offset + 3)?;
                Some(((px[0] as u16 + px[1] as u16 + px[2] as u16) / 3) as u8)
            }
        }
    }

    /// Packed BGR copy of the frame.
    pub fn to_bgr(&self) -> Frame {
        if self.format == PixelFormat::Bgr8 {
            return self.clone();
        }
        let data = self.data.iter().flat_map(|&v| [v, v, v]).collect();
        Frame {
            size: self.size,
            stride: self.size.width * 3,
            format: PixelFormat::Bgr8,
            sequence: self.sequence,
            timestamp_ns: self.timestamp_ns,
            data,
        }
    }

    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    pub(crate) fn into_data(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_new_checks_length() {
        let size = ImageSize::new(4, 2);
        assert!(Frame::new(size, PixelFormat::Mono8, vec![0; 8]).is_ok());
        assert!(matches!(
            Frame::new(size, PixelFormat::Bgr8, vec![0; 8]),
            Err(CameraError::InvalidFrame {
                expected: 24,
                actual: 8
            })
        ));
    }

    #[test]
    fn test_from_view_strips_padding() -> Result<(), CameraError> {
        let data = [1u8, 2, 3, 0, 4, 5, 6, 0];
        let view = ImageView {
            size: ImageSize::new(3, 2),
            stride: 4,
            format: PixelFormat::Mono8,
            timestamp_ns: 7,
            data: &data,
        };

        let frame = Frame::from_view(&view, ColorMode::Mono8, Vec::new())?;
        assert_eq!(frame.as_slice(), &[1, 2, 3, 4, 5, 6]);
        assert_eq!(frame.stride(), 3);
        assert_eq!(frame.timestamp_ns(), 7);

        let color = Frame::from_view(&view, ColorMode::Bgr8, vec![9; 100])?;
        assert_eq!(color.format(), PixelFormat::Bgr8);
        assert_eq!(color.as_slice().len(), 18);
        assert_eq!(&color.as_slice()[..6], &[1, 1, 1, 2, 2, 2]);
        Ok(())
    }

    #[test]
    fn test_from_view_rejects_short_data() {
        let data = [7u8; 6];
        let short = ImageView {
            size: ImageSize::new(4, 4),
            stride: 4,
            format: PixelFormat::Mono8,
            timestamp_ns: 0,
            data: &data,
        };
        assert!(matches!(
            Frame::from_view(&short, ColorMode::Mono8, Vec::new()),
            Err(CameraError::InvalidFrame {
                expected: 16,
                actual: 6
            })
        ));
        assert!(Frame::from_view(&short, ColorMode::Bgr8, Vec::new()).is_err());

        // the last row needs no padding
        let data = [1u8, 2, 0, 3, 4];
        let padded = ImageView {
            size: ImageSize::new(2, 2),
            stride: 3,
            data: &data,
            ..short
        };
        let frame = Frame::from_view(&padded, ColorMode::Mono8, Vec::new());
        assert_eq!(frame.map(|f| f.as_slice().to_vec()).ok(), Some(vec![1, 2, 3, 4]));

        let overlapping = ImageView {
            stride: 1,
            ..padded
        };
        assert!(Frame::from_view(&overlapping, ColorMode::Mono8, Vec::new()).is_err());
    }

    #[test]
    fn test_to_bgr() -> Result<(), CameraError> {
        let frame = Frame::new(ImageSize::new(2, 1), PixelFormat::Mono8, vec![10, 200])?;
        let bgr = frame.to_bgr();
        assert_eq!(bgr.as_slice(), &[10, 10, 10, 200, 200, 200]);
        assert_eq!(bgr.intensity(1, 0), Some(200));
        assert_eq!(bgr.to_bgr(), bgr);
        assert_eq!(frame.intensity(2, 0), None);
        Ok(())
    }
}
