use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;
use futures_util::future;
use futures_util::FutureExt;
use tracing::{debug, info};

use super::{decode_frame, AcquisitionError, FrameFuture, FrameSource};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Replays image files from a directory in lexical order, one per tick.
///
/// Once every file has been produced the source reports itself lost, unless
/// looping is enabled, in which case it starts over from the first file.
pub struct DirectorySource {
    files: Vec<PathBuf>,
    cursor: usize,
    loop_frames: bool,
    width: u32,
    height: u32,
    next_seq: u64,
}

impl DirectorySource {
    pub fn open(
        dir: &Path,
        loop_frames: bool,
        width: u32,
        height: u32,
    ) -> Result<Self, AcquisitionError> {
        let entries = std::fs::read_dir(dir).map_err(|e| io_error(dir, e))?;

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(AcquisitionError::Lost(format!(
                "no image files in {}",
                dir.display()
            )));
        }

        info!(
            dir = %dir.display(),
            files = files.len(),
            loop_frames,
            "directory source ready"
        );

        Ok(Self {
            files,
            cursor: 0,
            loop_frames,
            width,
            height,
            next_seq: 0,
        })
    }
}

impl FrameSource for DirectorySource {
    fn produce_frame(&mut self) -> FrameFuture {
        if self.cursor >= self.files.len() {
            if !self.loop_frames {
                return future::ready(Err(AcquisitionError::Lost(
                    "directory exhausted".into(),
                )))
                .boxed();
            }
            debug!("directory exhausted, looping");
            self.cursor = 0;
        }

        let path = self.files[self.cursor].clone();
        self.cursor += 1;
        let (width, height) = (self.width, self.height);
        let seq = self.next_seq;
        self.next_seq += 1;

        async move {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| io_error(&path, e))?;
            let captured_at_ms = Utc::now().timestamp_millis();
            debug!(seq, path = %path.display(), "read frame file");
            decode_frame(&bytes, width, height, captured_at_ms, seq)
        }
        .boxed()
    }

    fn name(&self) -> &str {
        "directory"
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn io_error(path: &Path, e: std::io::Error) -> AcquisitionError {
    let msg = format!("{}: {e}", path.display());
    match e.kind() {
        ErrorKind::PermissionDenied => AcquisitionError::Denied(msg),
        ErrorKind::NotFound => AcquisitionError::Lost(msg),
        _ => AcquisitionError::Transient(msg),
    }
}
