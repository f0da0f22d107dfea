use std::path::PathBuf;

use image::{ImageFormat, RgbImage};
use tracing::{debug, warn};

/// Receives the visualization map of every diff for display.
/// Fire-and-forget: implementations must not fail the pipeline.
pub trait MotionRenderer: Send {
    fn render(&mut self, map: &RgbImage);
}

/// Discards every map.
pub struct NullRenderer;

impl MotionRenderer for NullRenderer {
    fn render(&mut self, _map: &RgbImage) {}
}

/// Overwrites a PNG file with the latest motion map.
///
/// The map is written to a sibling temp file and renamed into place so a
/// viewer polling the file never sees a partial image.
pub struct PngFileRenderer {
    path: PathBuf,
    tmp_path: PathBuf,
    failures: u64,
}

impl PngFileRenderer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        Self {
            path,
            tmp_path: PathBuf::from(tmp),
            failures: 0,
        }
    }

    fn write(&self, map: &RgbImage) -> Result<(), image::ImageError> {
        map.save_with_format(&self.tmp_path, ImageFormat::Png)?;
        std::fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }
}

impl MotionRenderer for PngFileRenderer {
    fn render(&mut self, map: &RgbImage) {
        match self.write(map) {
            Ok(()) => {
                if self.failures > 0 {
                    debug!(failures = self.failures, "motion map writes recovered");
                    self.failures = 0;
                }
            }
            Err(e) => {
                self.failures += 1;
                // Only the first failure in a streak is worth a warning at 10 fps.
                if self.failures == 1 {
                    warn!(error = %e, path = %self.path.display(), "failed to write motion map");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn writes_latest_map() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("motion.png");
        let mut renderer = PngFileRenderer::new(&path);

        renderer.render(&RgbImage::from_pixel(4, 3, Rgb([0, 10, 0])));
        renderer.render(&RgbImage::from_pixel(4, 3, Rgb([0, 200, 0])));

        let written = image::open(&path).unwrap().to_rgb8();
        assert_eq!(written.dimensions(), (4, 3));
        assert_eq!(written.get_pixel(0, 0).0, [0, 200, 0]);
    }

    #[test]
    fn write_failures_are_swallowed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut renderer = PngFileRenderer::new(tmp.path().join("missing/dir/motion.png"));
        renderer.render(&RgbImage::new(2, 2));
        renderer.render(&RgbImage::new(2, 2));
        assert_eq!(renderer.failures, 2);
    }
}
