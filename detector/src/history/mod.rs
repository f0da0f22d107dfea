pub mod db;
pub mod keys;
pub mod writer;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::episode::{Committer, HistoryEntry};

pub use db::HistoryDb;
pub use writer::HistoryWriter;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("failed to encode JPEG: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to write history file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to record history entry: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("history task failed: {0}")]
    Task(String),
}

/// Hands committed entries to the history writer task.
///
/// Sending never blocks, so the state machine can enter its cooldown as soon
/// as the hand-off call returns. The channel preserves commit order.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<HistoryEntry>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<HistoryEntry>) -> Self {
        Self { tx }
    }
}

/// Create a sink and the receiver a [`HistoryWriter`] drains.
pub fn channel() -> (ChannelSink, mpsc::UnboundedReceiver<HistoryEntry>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink::new(tx), rx)
}

impl Committer for ChannelSink {
    fn commit(&mut self, entry: HistoryEntry) {
        info!(caption = %entry.caption(), seq = entry.frame.seq, "committed");
        if self.tx.send(entry).is_err() {
            error!("history writer has stopped, committed entry dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use motion_snap_common::frame::Frame;

    #[test]
    fn sink_forwards_in_order() {
        let (mut sink, mut rx) = channel();
        for score in [5, 7] {
            sink.commit(HistoryEntry {
                frame: Frame::new(1, 1, 3, vec![0, 0, 0], 0, score as u64).unwrap(),
                score,
                committed_at: Local::now(),
            });
        }
        assert_eq!(rx.try_recv().unwrap().score, 5);
        assert_eq!(rx.try_recv().unwrap().score, 7);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_writer_does_not_panic() {
        let (mut sink, rx) = channel();
        drop(rx);
        sink.commit(HistoryEntry {
            frame: Frame::new(1, 1, 3, vec![0, 0, 0], 0, 0).unwrap(),
            score: 9,
            committed_at: Local::now(),
        });
    }
}
