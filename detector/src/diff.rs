use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use motion_snap_common::config::{ConfigError, DiffConfig};
use motion_snap_common::frame::Frame;

const RED_WEIGHT: f64 = 0.3;
const GREEN_WEIGHT: f64 = 0.6;
const BLUE_WEIGHT: f64 = 0.1;

/// Outcome of comparing two consecutive frames.
#[derive(Debug, Clone)]
pub struct DiffResult {
    /// Number of diff-resolution pixels whose weighted difference reached the
    /// pixel threshold. Never exceeds `map.width() * map.height()`.
    pub score: u32,
    /// Display-only visualization: green encodes change intensity, red and
    /// blue are zero.
    pub map: RgbImage,
}

/// Frame-differencing scorer.
///
/// Both frames are shrunk to a fixed diff resolution, then compared pixel by
/// pixel using a green-heavy luma weighting of the absolute channel
/// differences:
///
/// `pixel_diff = 0.3 * |dR| + 0.6 * |dG| + 0.1 * |dB|`
///
/// A pixel counts toward the score when `pixel_diff >= pixel_diff_threshold`.
/// Shrinking first bounds the per-frame cost regardless of capture resolution.
#[derive(Debug, Clone)]
pub struct DiffEngine {
    width: u32,
    height: u32,
    pixel_diff_threshold: f64,
    filter: FilterType,
}

impl DiffEngine {
    pub fn new(config: &DiffConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let filter = match config.resample.as_str() {
            "nearest" => FilterType::Nearest,
            _ => FilterType::Triangle,
        };
        Ok(Self {
            width: config.width,
            height: config.height,
            pixel_diff_threshold: config.pixel_diff_threshold,
            filter,
        })
    }

    /// Score `current` against `previous`.
    ///
    /// Fails with [`DiffError::InvalidFrame`] if the frames differ in size or
    /// channel layout. The result is a pure function of the two pixel buffers.
    pub fn diff(&self, previous: &Frame, current: &Frame) -> Result<DiffResult, DiffError> {
        if !previous.same_shape(current) {
            return Err(DiffError::InvalidFrame {
                previous: shape(previous),
                current: shape(current),
            });
        }

        let before = self.downsample(previous)?;
        let after = self.downsample(current)?;

        let scale = 255.0 / self.pixel_diff_threshold;
        let mut map = RgbImage::new(self.width, self.height);
        let mut score = 0u32;

        for ((old, new), out) in before.pixels().zip(after.pixels()).zip(map.pixels_mut()) {
            let pixel_diff = RED_WEIGHT * f64::from(old[0].abs_diff(new[0]))
                + GREEN_WEIGHT * f64::from(old[1].abs_diff(new[1]))
                + BLUE_WEIGHT * f64::from(old[2].abs_diff(new[2]));

            *out = Rgb([0, intensity(pixel_diff, scale), 0]);

            if pixel_diff >= self.pixel_diff_threshold {
                score += 1;
            }
        }

        Ok(DiffResult { score, map })
    }

    fn downsample(&self, frame: &Frame) -> Result<RgbImage, DiffError> {
        let rgb = RgbImage::from_raw(frame.width(), frame.height(), frame.to_rgb_bytes())
            .ok_or_else(|| DiffError::InvalidFrame {
                previous: shape(frame),
                current: shape(frame),
            })?;
        if rgb.dimensions() == (self.width, self.height) {
            return Ok(rgb);
        }
        Ok(imageops::resize(&rgb, self.width, self.height, self.filter))
    }
}

/// Green level for the visualization map. Halves round to even and the result
/// clamps at 255, like a write into a clamped byte array.
fn intensity(pixel_diff: f64, scale: f64) -> u8 {
    (pixel_diff * scale).clamp(0.0, 255.0).round_ties_even() as u8
}

fn shape(frame: &Frame) -> String {
    format!("{}x{}x{}", frame.width(), frame.height(), frame.channels())
}

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("cannot diff frames of different shape: previous {previous}, current {current}")]
    InvalidFrame { previous: String, current: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: u32 = 8;
    const H: u32 = 6;

    fn engine(resample: &str) -> DiffEngine {
        DiffEngine::new(&DiffConfig {
            width: W,
            height: H,
            pixel_diff_threshold: 16.0,
            resample: resample.into(),
        })
        .unwrap()
    }

    /// A frame whose first `lit` pixels are `value` gray and the rest black.
    fn frame_with(width: u32, height: u32, lit: usize, value: u8) -> Frame {
        let mut pixels = vec![0u8; (width * height * 3) as usize];
        for px in pixels.chunks_exact_mut(3).take(lit) {
            px.copy_from_slice(&[value, value, value]);
        }
        Frame::new(width, height, 3, pixels, 0, 0).unwrap()
    }

    #[test]
    fn identical_frames_score_zero() {
        let a = frame_with(W, H, 20, 200);
        let result = engine("triangle").diff(&a, &a).unwrap();
        assert_eq!(result.score, 0);
        assert!(result.map.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn diff_is_deterministic() {
        let a = frame_with(32, 24, 100, 90);
        let b = frame_with(32, 24, 300, 180);
        let e = engine("triangle");
        let first = e.diff(&a, &b).unwrap();
        let second = e.diff(&a, &b).unwrap();
        assert_eq!(first.score, second.score);
        assert_eq!(first.map.as_raw(), second.map.as_raw());
    }

    #[test]
    fn counts_exactly_k_pixels_over_threshold() {
        let e = engine("nearest");
        let before = frame_with(W, H, 0, 0);
        // 7 pixels differ by 20 (weighted 20 >= 16); everything else by 0.
        let after = frame_with(W, H, 7, 20);
        assert_eq!(e.diff(&before, &after).unwrap().score, 7);

        // A difference of 10 on every channel weighs 10, below the threshold.
        let faint = frame_with(W, H, 30, 10);
        assert_eq!(e.diff(&before, &faint).unwrap().score, 0);
    }

    #[test]
    fn green_channel_dominates_weighting() {
        let e = engine("nearest");
        let before = Frame::new(1, 1, 3, vec![0, 0, 0], 0, 0).unwrap();
        let engine_1x1 = DiffEngine {
            width: 1,
            height: 1,
            ..e
        };
        // Red-only change of 50 weighs 15: below threshold.
        let red = Frame::new(1, 1, 3, vec![50, 0, 0], 0, 1).unwrap();
        assert_eq!(engine_1x1.diff(&before, &red).unwrap().score, 0);
        // Green-only change of 30 weighs 18: counts.
        let green = Frame::new(1, 1, 3, vec![0, 30, 0], 0, 1).unwrap();
        assert_eq!(engine_1x1.diff(&before, &green).unwrap().score, 1);
    }

    #[test]
    fn visualization_saturates_at_threshold() {
        let e = engine("nearest");
        let before = frame_with(W, H, 0, 0);
        let after = frame_with(W, H, 2, 4);
        let result = e.diff(&before, &after).unwrap();
        // Weighted diff 4 at threshold 16 maps to a quarter of full intensity.
        assert_eq!(result.map.get_pixel(0, 0).0, [0, 64, 0]);
        let strong = frame_with(W, H, 1, 200);
        let result = e.diff(&before, &strong).unwrap();
        assert_eq!(result.map.get_pixel(0, 0).0, [0, 255, 0]);
        assert_eq!(result.map.get_pixel(1, 0).0, [0, 0, 0]);
    }

    #[test]
    fn visualization_rounds_halves_to_even() {
        // Threshold 510 gives a scale of exactly 0.5.
        assert_eq!(intensity(1.0, 0.5), 0);
        assert_eq!(intensity(3.0, 0.5), 2);
        assert_eq!(intensity(5.0, 0.5), 2);
        assert_eq!(intensity(7.0, 0.5), 4);
        assert_eq!(intensity(1000.0, 0.5), 255);
    }

    #[test]
    fn capture_resolution_is_downsampled() {
        let e = engine("nearest");
        let before = frame_with(64, 48, 0, 0);
        let after = frame_with(64, 48, 64 * 48, 255);
        let result = e.diff(&before, &after).unwrap();
        assert_eq!(result.map.dimensions(), (W, H));
        assert_eq!(result.score, W * H);
    }

    #[test]
    fn alpha_channel_is_ignored() {
        let e = engine("nearest");
        let opaque = Frame::new(W, H, 4, vec![255u8; (W * H * 4) as usize], 0, 0).unwrap();
        let mut clear = vec![255u8; (W * H * 4) as usize];
        for px in clear.chunks_exact_mut(4) {
            px[3] = 0;
        }
        let clear = Frame::new(W, H, 4, clear, 0, 1).unwrap();
        assert_eq!(e.diff(&opaque, &clear).unwrap().score, 0);
    }

    #[test]
    fn mismatched_shapes_are_invalid() {
        let e = engine("triangle");
        let small = frame_with(W, H, 0, 0);
        let large = frame_with(W * 2, H, 0, 0);
        assert!(matches!(
            e.diff(&small, &large),
            Err(DiffError::InvalidFrame { .. })
        ));

        let rgba = Frame::new(W, H, 4, vec![0u8; (W * H * 4) as usize], 0, 0).unwrap();
        assert!(e.diff(&small, &rgba).is_err());
    }

    #[test]
    fn zero_threshold_rejected_at_construction() {
        let config = DiffConfig {
            pixel_diff_threshold: 0.0,
            ..DiffConfig::default()
        };
        assert!(matches!(
            DiffEngine::new(&config),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
