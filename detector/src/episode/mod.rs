pub mod state;

use chrono::{DateTime, Local};
use motion_snap_common::frame::Frame;

pub use state::{Candidate, EpisodeStateMachine, Observation, Phase, TimerEvent};

/// The record handed to the history sink when an episode closes.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub frame: Frame,
    pub score: u32,
    /// Wall-clock time of the commit, used for display.
    pub committed_at: DateTime<Local>,
}

impl HistoryEntry {
    /// Human-readable caption, e.g. `"9:41:07 am (score: 12)"`.
    pub fn caption(&self) -> String {
        let time = self.committed_at.format("%-I:%M:%S %p").to_string();
        format!("{} (score: {})", time.to_lowercase(), self.score)
    }
}

/// Receives committed episode winners.
///
/// `commit` is called synchronously from the state machine transition, before
/// the cooldown begins. Implementations that do slow work should hand the
/// entry off (e.g. over a channel) rather than block.
pub trait Committer: Send {
    fn commit(&mut self, entry: HistoryEntry);
}

/// Collects entries in commit order. Handy for tests and embedding.
impl Committer for Vec<HistoryEntry> {
    fn commit(&mut self, entry: HistoryEntry) {
        self.push(entry);
    }
}
