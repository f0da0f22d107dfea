pub mod directory;
pub mod http;

use std::io::Cursor;

use futures_util::future::BoxFuture;
use image::imageops::FilterType;
use image::ImageReader;
use motion_snap_common::frame::Frame;

pub use directory::DirectorySource;
pub use http::HttpSnapshotSource;

pub type FrameFuture = BoxFuture<'static, Result<Frame, AcquisitionError>>;

/// Supplies camera frames to the pipeline, one per capture tick.
///
/// `produce_frame` returns an owned future so the driver can hold a single
/// acquisition in flight and drop it to cancel.
pub trait FrameSource: Send {
    fn produce_frame(&mut self) -> FrameFuture;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AcquisitionError {
    #[error("frame acquisition denied: {0}")]
    Denied(String),
    #[error("frame source lost: {0}")]
    Lost(String),
    #[error("capture tick failed: {0}")]
    Transient(String),
}

impl AcquisitionError {
    /// Denied and lost sources halt capture until it is restarted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Denied(_) | Self::Lost(_))
    }
}

/// Decode an encoded image (JPEG, PNG, ...) into an RGB frame at capture
/// resolution.
pub fn decode_frame(
    bytes: &[u8],
    width: u32,
    height: u32,
    captured_at_ms: i64,
    seq: u64,
) -> Result<Frame, AcquisitionError> {
    let img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| AcquisitionError::Transient(format!("unreadable image: {e}")))?
        .decode()
        .map_err(|e| AcquisitionError::Transient(format!("failed to decode image: {e}")))?;

    let rgb = if (img.width(), img.height()) == (width, height) {
        img.to_rgb8()
    } else {
        img.resize_exact(width, height, FilterType::Triangle).to_rgb8()
    };

    Frame::new(width, height, 3, rgb.into_raw(), captured_at_ms, seq)
        .map_err(|e| AcquisitionError::Transient(e.to_string()))
}
