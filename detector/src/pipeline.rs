use std::time::Duration;

use motion_snap_common::config::ConfigError;
use motion_snap_common::frame::Frame;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::diff::{DiffEngine, DiffError};
use crate::episode::{Committer, EpisodeStateMachine, Observation};
use crate::render::MotionRenderer;
use crate::source::{AcquisitionError, FrameFuture, FrameSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Begin or resume capture ticks. Episode state is left as it is.
    Start,
    /// Cancel the outstanding capture and stop ticking. Episode state is
    /// left as it is; timers keep running.
    Stop,
    /// Return the state machine to Idle and forget the previous frame.
    Reset,
    /// Stop everything and return from the driver loop.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    Running,
    /// Stopped on request.
    Stopped,
    /// Stopped because the source or the frames became unusable.
    Failed(CaptureFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureFailure {
    Denied(String),
    Lost(String),
    InvalidFrame(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    InvalidFrame(#[from] DiffError),
}

/// Remote control for a spawned [`Pipeline`].
#[derive(Clone)]
pub struct CaptureHandle {
    commands: mpsc::UnboundedSender<ControlCommand>,
    status: watch::Receiver<CaptureStatus>,
}

impl CaptureHandle {
    pub fn start(&self) {
        self.send(ControlCommand::Start);
    }

    pub fn stop(&self) {
        self.send(ControlCommand::Stop);
    }

    pub fn reset(&self) {
        self.send(ControlCommand::Reset);
    }

    pub fn shutdown(&self) {
        self.send(ControlCommand::Shutdown);
    }

    pub fn status(&self) -> CaptureStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureStatus> {
        self.status.clone()
    }

    fn send(&self, command: ControlCommand) {
        if self.commands.send(command).is_err() {
            debug!(?command, "pipeline already stopped, command ignored");
        }
    }
}

/// Drives frames from a source through the diff engine into the episode
/// state machine.
///
/// All processing happens on one task. At most one acquisition is in flight
/// at a time, so every diff is computed against the most recently completed
/// frame and state transitions never interleave.
pub struct Pipeline {
    source: Box<dyn FrameSource>,
    engine: DiffEngine,
    machine: EpisodeStateMachine,
    renderer: Box<dyn MotionRenderer>,
    committer: Box<dyn Committer>,
    previous: Option<Frame>,
    capture_interval: Duration,
    frames_seen: u64,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        engine: DiffEngine,
        machine: EpisodeStateMachine,
        renderer: Box<dyn MotionRenderer>,
        committer: Box<dyn Committer>,
        capture_interval: Duration,
    ) -> Result<Self, ConfigError> {
        if capture_interval.is_zero() {
            return Err(ConfigError::invalid(
                "capture.interval_ms",
                "must be greater than zero",
            ));
        }
        Ok(Self {
            source,
            engine,
            machine,
            renderer,
            committer,
            previous: None,
            capture_interval,
            frames_seen: 0,
        })
    }

    pub fn machine(&self) -> &EpisodeStateMachine {
        &self.machine
    }

    /// Diff a freshly acquired frame against the previous one and feed the
    /// result to the state machine. The first frame only primes the pipeline.
    ///
    /// On error the previous frame is kept.
    pub fn process_frame(
        &mut self,
        frame: Frame,
        now: Instant,
    ) -> Result<Option<Observation>, DiffError> {
        self.frames_seen += 1;
        let Some(previous) = self.previous.take() else {
            debug!(seq = frame.seq, "first frame, nothing to compare against");
            self.previous = Some(frame);
            return Ok(None);
        };

        let diff = match self.engine.diff(&previous, &frame) {
            Ok(d) => d,
            Err(e) => {
                self.previous = Some(previous);
                return Err(e);
            }
        };

        self.renderer.render(&diff.map);
        let score = diff.score;
        let observation = self.machine.observe(&frame, diff, now);
        debug!(
            seq = frame.seq,
            score,
            phase = %self.machine.phase(),
            ?observation,
            "frame scored"
        );
        if self.frames_seen % 100 == 0 {
            debug!(frames_seen = self.frames_seen, "frames processed");
        }

        self.previous = Some(frame);
        Ok(Some(observation))
    }

    /// Fire any state machine timers due at `now`.
    pub fn fire_due_timers(&mut self, now: Instant) {
        self.machine.fire_due(now, self.committer.as_mut());
    }

    pub fn reset(&mut self) {
        self.machine.reset();
        self.previous = None;
    }

    /// Run the driver on a new task. Capture starts stopped; call
    /// [`CaptureHandle::start`] to begin.
    pub fn spawn(self) -> (CaptureHandle, JoinHandle<Result<(), PipelineError>>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(CaptureStatus::Stopped);
        let task = tokio::spawn(self.run(commands_rx, status_tx));
        (
            CaptureHandle {
                commands: commands_tx,
                status: status_rx,
            },
            task,
        )
    }

    /// The driver loop. Returns on `Shutdown`, when every command sender is
    /// dropped, or with an error on an invalid frame.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ControlCommand>,
        status: watch::Sender<CaptureStatus>,
    ) -> Result<(), PipelineError> {
        let mut ticker = tokio::time::interval(self.capture_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut capturing = false;
        let mut in_flight: Option<FrameFuture> = None;

        info!(
            source = self.source.name(),
            interval_ms = self.capture_interval.as_millis() as u64,
            "pipeline ready"
        );

        loop {
            let deadline = self.machine.next_deadline().map(|(at, _)| at);

            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(ControlCommand::Start) => {
                        if !capturing {
                            info!(phase = %self.machine.phase(), "capture started");
                            capturing = true;
                            ticker.reset_immediately();
                            status.send_replace(CaptureStatus::Running);
                        }
                    }
                    Some(ControlCommand::Stop) => {
                        if in_flight.take().is_some() {
                            debug!("cancelled outstanding capture");
                        }
                        if capturing {
                            info!(phase = %self.machine.phase(), "capture stopped");
                        }
                        capturing = false;
                        status.send_replace(CaptureStatus::Stopped);
                    }
                    Some(ControlCommand::Reset) => self.reset(),
                    Some(ControlCommand::Shutdown) | None => {
                        info!("pipeline shutting down");
                        status.send_replace(CaptureStatus::Stopped);
                        return Ok(());
                    }
                },

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    self.fire_due_timers(Instant::now());
                }

                result = poll_in_flight(&mut in_flight), if in_flight.is_some() => {
                    in_flight = None;
                    match result {
                        Ok(frame) => {
                            if let Err(e) = self.process_frame(frame, Instant::now()) {
                                error!(error = %e, "invalid frame, halting pipeline");
                                status.send_replace(CaptureStatus::Failed(
                                    CaptureFailure::InvalidFrame(e.to_string()),
                                ));
                                return Err(e.into());
                            }
                        }
                        Err(e) if e.is_terminal() => {
                            error!(error = %e, "frame source failed, capture halted");
                            capturing = false;
                            status.send_replace(CaptureStatus::Failed(match e {
                                AcquisitionError::Denied(msg) => CaptureFailure::Denied(msg),
                                AcquisitionError::Lost(msg) | AcquisitionError::Transient(msg) => {
                                    CaptureFailure::Lost(msg)
                                }
                            }));
                        }
                        Err(e) => {
                            warn!(error = %e, "capture tick skipped, keeping previous frame");
                        }
                    }
                }

                _ = ticker.tick(), if capturing && in_flight.is_none() => {
                    in_flight = Some(self.source.produce_frame());
                }
            }
        }
    }
}

async fn poll_in_flight(
    in_flight: &mut Option<FrameFuture>,
) -> Result<Frame, AcquisitionError> {
    match in_flight.as_mut() {
        Some(acquisition) => acquisition.await,
        None => std::future::pending().await,
    }
}
