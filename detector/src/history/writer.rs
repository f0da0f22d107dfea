use std::path::PathBuf;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use motion_snap_common::frame::Frame;
use tokio::sync::mpsc;
use tracing::{error, info};

use super::db::{HistoryDb, NewHistoryRecord};
use super::keys::history_jpeg_key;
use super::HistoryError;
use crate::episode::HistoryEntry;

/// Persists committed frames: a JPEG on disk plus a row in the history DB.
pub struct HistoryWriter {
    dir: PathBuf,
    db: Option<Arc<HistoryDb>>,
    jpeg_quality: u8,
}

/// Where a committed frame ended up.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub id: Option<i64>,
    pub key: String,
    pub size_bytes: u64,
}

impl HistoryWriter {
    pub fn new(dir: impl Into<PathBuf>, db: Option<Arc<HistoryDb>>, jpeg_quality: u8) -> Self {
        Self {
            dir: dir.into(),
            db,
            jpeg_quality,
        }
    }

    /// Drain entries in commit order until every sender is dropped.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<HistoryEntry>) {
        let mut stored: u64 = 0;
        while let Some(entry) = rx.recv().await {
            match self.persist(&entry).await {
                Ok(out) => {
                    stored += 1;
                    info!(
                        key = %out.key,
                        id = out.id,
                        score = entry.score,
                        bytes = out.size_bytes,
                        "stored history entry"
                    );
                }
                Err(e) => {
                    error!(error = %e, score = entry.score, seq = entry.frame.seq, "failed to store history entry");
                }
            }
        }
        info!(stored, "history writer stopped");
    }

    pub async fn persist(&self, entry: &HistoryEntry) -> Result<StoredEntry, HistoryError> {
        let frame = entry.frame.clone();
        let quality = self.jpeg_quality;
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality))
            .await
            .map_err(|e| HistoryError::Task(e.to_string()))??;

        let key = history_jpeg_key(entry.frame.captured_at(), entry.frame.seq);
        let path = self.dir.join(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let size_bytes = jpeg.len() as u64;
        tokio::fs::write(&path, jpeg).await?;

        let id = match &self.db {
            Some(db) => Some(db.insert(&NewHistoryRecord {
                seq: entry.frame.seq,
                captured_at_ms: entry.frame.captured_at_ms,
                committed_at_ms: entry.committed_at.timestamp_millis(),
                score: entry.score,
                path: &key,
                width: entry.frame.width(),
                height: entry.frame.height(),
                size_bytes,
            })?),
            None => None,
        };

        Ok(StoredEntry {
            id,
            key,
            size_bytes,
        })
    }
}

fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>, HistoryError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode(
        &frame.to_rgb_bytes(),
        frame.width(),
        frame.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;

    fn entry(seq: u64, score: u32) -> HistoryEntry {
        let frame = Frame::new(16, 12, 4, vec![128u8; 16 * 12 * 4], 1739871000000, seq).unwrap();
        HistoryEntry {
            frame,
            score,
            committed_at: Local::now(),
        }
    }

    #[tokio::test]
    async fn persist_writes_jpeg_and_row() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Arc::new(HistoryDb::open_in_memory().unwrap());
        let writer = HistoryWriter::new(tmp.path(), Some(Arc::clone(&db)), 85);

        let stored = writer.persist(&entry(42, 17)).await.unwrap();
        assert_eq!(stored.key, "2025-02-18/20250218T093000000Z_000042.jpg");
        assert!(stored.id.is_some());

        let decoded = image::open(tmp.path().join(&stored.key)).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 12));

        let rows = db.recent(5).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].score, 17);
        assert_eq!(rows[0].path, stored.key);
    }

    #[tokio::test]
    async fn run_preserves_commit_order() {
        let tmp = tempfile::tempdir().unwrap();
        let db = Arc::new(HistoryDb::open_in_memory().unwrap());
        let writer = HistoryWriter::new(tmp.path(), Some(Arc::clone(&db)), 85);

        let (tx, rx) = mpsc::unbounded_channel();
        for (seq, score) in [(1, 9), (2, 30), (3, 5)] {
            tx.send(entry(seq, score)).unwrap();
        }
        drop(tx);
        writer.run(rx).await;

        let scores: Vec<i64> = db.recent(10).unwrap().iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![5, 30, 9]);
    }
}
