use std::sync::Arc;

/// A captured camera image.
///
/// Pixels are stored row-major, `channels` bytes per pixel (RGB or RGBA).
/// The buffer is shared on clone and never mutated after construction, so a
/// frame can be held as an episode candidate while the pipeline moves on.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    channels: u8,
    pixels: Arc<[u8]>,
    pub captured_at_ms: i64,
    pub seq: u64,
}

impl Frame {
    /// Build a frame from a raw pixel buffer, checking that its length matches
    /// `width * height * channels`.
    pub fn new(
        width: u32,
        height: u32,
        channels: u8,
        pixels: impl Into<Arc<[u8]>>,
        captured_at_ms: i64,
        seq: u64,
    ) -> Result<Self, FrameError> {
        if channels != 3 && channels != 4 {
            return Err(FrameError::UnsupportedChannels(channels));
        }
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyDimensions { width, height });
        }
        let pixels = pixels.into();
        let expected = width as usize * height as usize * channels as usize;
        if pixels.len() != expected {
            return Err(FrameError::BufferSize {
                got: pixels.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            channels,
            pixels,
            captured_at_ms,
            seq,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Capture time as a UTC timestamp, falling back to now for out-of-range values.
    pub fn captured_at(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(self.captured_at_ms)
            .unwrap_or_else(chrono::Utc::now)
    }

    /// Returns true if both frames share width, height and channel layout.
    pub fn same_shape(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height && self.channels == other.channels
    }

    /// Copy out the RGB triplets, dropping alpha for four-channel frames.
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        if self.channels == 3 {
            return self.pixels.to_vec();
        }
        self.pixels
            .chunks_exact(self.channels as usize)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("unsupported channel count {0}, expected 3 or 4")]
    UnsupportedChannels(u8),
    #[error("frame dimensions must be non-zero, got {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },
    #[error("pixel buffer has {got} bytes, expected {expected}")]
    BufferSize { got: usize, expected: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffer() {
        let err = Frame::new(2, 2, 3, vec![0u8; 11], 0, 0).unwrap_err();
        assert!(matches!(err, FrameError::BufferSize { got: 11, expected: 12 }));
    }

    #[test]
    fn rejects_two_channel_layout() {
        assert!(matches!(
            Frame::new(1, 1, 2, vec![0u8; 2], 0, 0),
            Err(FrameError::UnsupportedChannels(2))
        ));
    }

    #[test]
    fn rgba_drops_alpha() {
        let frame = Frame::new(2, 1, 4, vec![1, 2, 3, 255, 4, 5, 6, 255], 0, 0).unwrap();
        assert_eq!(frame.to_rgb_bytes(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn clone_shares_pixels() {
        let frame = Frame::new(1, 1, 3, vec![9, 9, 9], 1708300000000, 7).unwrap();
        let copy = frame.clone();
        assert!(std::ptr::eq(frame.pixels(), copy.pixels()));
        assert_eq!(copy.seq, 7);
    }

    #[test]
    fn shape_comparison() {
        let a = Frame::new(2, 2, 3, vec![0u8; 12], 0, 0).unwrap();
        let b = Frame::new(2, 2, 4, vec![0u8; 16], 0, 1).unwrap();
        let c = Frame::new(2, 2, 3, vec![1u8; 12], 0, 2).unwrap();
        assert!(!a.same_shape(&b));
        assert!(a.same_shape(&c));
    }

    #[test]
    fn capture_time_from_millis() {
        let frame = Frame::new(1, 1, 3, vec![0, 0, 0], 1739871000123, 0).unwrap();
        let at = frame.captured_at();
        assert_eq!(at.timestamp_millis(), 1739871000123);
        assert_eq!(at.format("%Y-%m-%d").to_string(), "2025-02-18");
    }
}
