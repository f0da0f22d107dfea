use std::fmt;
use std::time::Duration;

use chrono::Local;
use motion_snap_common::config::{ConfigError, EpisodeConfig};
use motion_snap_common::frame::Frame;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{Committer, HistoryEntry};
use crate::diff::DiffResult;

/// Best frame seen so far in an open episode.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub frame: Frame,
    pub diff: DiffResult,
}

impl Candidate {
    pub fn score(&self) -> u32 {
        self.diff.score
    }
}

#[derive(Debug, Default)]
enum EpisodeState {
    /// Waiting for a score above threshold.
    #[default]
    Idle,
    /// An episode is open; the best candidate wins when `deadline` passes.
    Considering { candidate: Candidate, deadline: Instant },
    /// A frame was just committed; new episodes are suppressed until `deadline`.
    Cooldown { deadline: Instant },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Considering,
    Cooldown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Idle => "IDLE",
            Phase::Considering => "CONSIDERING",
            Phase::Cooldown => "COOLDOWN",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    ConsiderWindowExpired,
    CooldownExpired,
}

/// What the state machine did with a diff result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Idle and the score did not exceed the threshold.
    BelowThreshold,
    /// Idle → Considering with this result as the first candidate.
    Started,
    /// Considering; the result beat the candidate and replaced it.
    Improved,
    /// Considering; the candidate scored at least as high and was kept.
    Kept,
    /// Cooldown; the result was ignored.
    Suppressed,
}

/// Decides when motion episodes start, which frame wins, and when the next
/// episode may begin.
///
/// Time only enters through the `now` arguments and the deadlines returned by
/// [`next_deadline`](Self::next_deadline); the driver is responsible for
/// calling [`fire_due`](Self::fire_due) when a deadline passes.
pub struct EpisodeStateMachine {
    state: EpisodeState,
    consider_time: Duration,
    chill_time: Duration,
    score_threshold: u32,
}

impl EpisodeStateMachine {
    pub fn new(config: &EpisodeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            state: EpisodeState::Idle,
            consider_time: config.consider_time(),
            chill_time: config.chill_time(),
            score_threshold: config.score_threshold,
        })
    }

    pub fn phase(&self) -> Phase {
        match self.state {
            EpisodeState::Idle => Phase::Idle,
            EpisodeState::Considering { .. } => Phase::Considering,
            EpisodeState::Cooldown { .. } => Phase::Cooldown,
        }
    }

    pub fn candidate(&self) -> Option<&Candidate> {
        match &self.state {
            EpisodeState::Considering { candidate, .. } => Some(candidate),
            _ => None,
        }
    }

    /// The pending timer, if any.
    pub fn next_deadline(&self) -> Option<(Instant, TimerEvent)> {
        match self.state {
            EpisodeState::Idle => None,
            EpisodeState::Considering { deadline, .. } => {
                Some((deadline, TimerEvent::ConsiderWindowExpired))
            }
            EpisodeState::Cooldown { deadline } => Some((deadline, TimerEvent::CooldownExpired)),
        }
    }

    /// Feed one diff result, computed from `frame` against its predecessor.
    pub fn observe(&mut self, frame: &Frame, diff: DiffResult, now: Instant) -> Observation {
        match &mut self.state {
            EpisodeState::Idle => {
                if diff.score <= self.score_threshold {
                    return Observation::BelowThreshold;
                }
                info!(
                    score = diff.score,
                    threshold = self.score_threshold,
                    seq = frame.seq,
                    "IDLE→CONSIDERING: motion detected, episode opened"
                );
                self.state = EpisodeState::Considering {
                    candidate: Candidate {
                        frame: frame.clone(),
                        diff,
                    },
                    deadline: now + self.consider_time,
                };
                Observation::Started
            }
            EpisodeState::Considering { candidate, .. } => {
                // Strict comparison: on equal scores the earlier frame stays.
                if diff.score > candidate.score() {
                    debug!(
                        score = diff.score,
                        previous_best = candidate.score(),
                        seq = frame.seq,
                        "CONSIDERING: new best candidate"
                    );
                    *candidate = Candidate {
                        frame: frame.clone(),
                        diff,
                    };
                    Observation::Improved
                } else {
                    Observation::Kept
                }
            }
            EpisodeState::Cooldown { .. } => {
                debug!(score = diff.score, "COOLDOWN: ignoring diff");
                Observation::Suppressed
            }
        }
    }

    /// Fire every timer whose deadline is at or before `now`, in order.
    /// Returns the events that fired.
    pub fn fire_due(&mut self, now: Instant, committer: &mut dyn Committer) -> Vec<TimerEvent> {
        let mut fired = Vec::new();
        while let Some((deadline, event)) = self.next_deadline() {
            if deadline > now {
                break;
            }
            match event {
                TimerEvent::ConsiderWindowExpired => {
                    self.on_consider_window_expired(now, committer)
                }
                TimerEvent::CooldownExpired => self.on_cooldown_expired(),
            }
            fired.push(event);
        }
        fired
    }

    /// Close the open episode: hand the candidate to `committer`, then start
    /// the cooldown. A no-op unless an episode is open.
    pub fn on_consider_window_expired(&mut self, now: Instant, committer: &mut dyn Committer) {
        let EpisodeState::Considering { candidate, .. } = std::mem::take(&mut self.state) else {
            return;
        };

        let entry = HistoryEntry {
            score: candidate.score(),
            frame: candidate.frame,
            committed_at: Local::now(),
        };
        info!(
            score = entry.score,
            seq = entry.frame.seq,
            chill_ms = self.chill_time.as_millis() as u64,
            "CONSIDERING→COOLDOWN: committing best frame"
        );
        committer.commit(entry);

        self.state = EpisodeState::Cooldown {
            deadline: now + self.chill_time,
        };
    }

    /// End the cooldown. A no-op unless cooling down.
    pub fn on_cooldown_expired(&mut self) {
        if let EpisodeState::Cooldown { .. } = self.state {
            info!("COOLDOWN→IDLE: ready for the next episode");
            self.state = EpisodeState::Idle;
        }
    }

    /// Return to Idle, discarding any open candidate without committing it.
    pub fn reset(&mut self) {
        let previous = self.phase();
        self.state = EpisodeState::Idle;
        info!(previous = %previous, "episode state reset to IDLE");
    }
}
