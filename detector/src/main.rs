use std::path::{Path, PathBuf};
use std::sync::Arc;

use motion_snap_common::config::Config;
use motion_snap_detector::diff::DiffEngine;
use motion_snap_detector::episode::EpisodeStateMachine;
use motion_snap_detector::history::{self, HistoryDb, HistoryWriter};
use motion_snap_detector::pipeline::{CaptureStatus, Pipeline};
use motion_snap_detector::render::{MotionRenderer, NullRenderer, PngFileRenderer};
use motion_snap_detector::source::{
    AcquisitionError, DirectorySource, FrameSource, HttpSnapshotSource,
};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        source = %config.source.kind,
        interval_ms = config.capture.interval_ms,
        capture = format!("{}x{}", config.capture.width, config.capture.height),
        diff = format!("{}x{}", config.diff.width, config.diff.height),
        pixel_diff_threshold = config.diff.pixel_diff_threshold,
        score_threshold = config.episode.score_threshold,
        consider_ms = config.episode.consider_ms,
        chill_ms = config.episode.chill_ms,
        "starting motion-snap detector"
    );

    let source = match build_source(&config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open frame source");
            std::process::exit(1);
        }
    };

    let engine = DiffEngine::new(&config.diff);
    let machine = EpisodeStateMachine::new(&config.episode);
    let (engine, machine) = match (engine, machine) {
        (Ok(engine), Ok(machine)) => (engine, machine),
        (Err(e), _) | (_, Err(e)) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let renderer: Box<dyn MotionRenderer> = match &config.render.motion_png {
        Some(path) => {
            info!(path = %path, "writing motion map to PNG");
            Box::new(PngFileRenderer::new(path))
        }
        None => Box::new(NullRenderer),
    };

    let history_db = match HistoryDb::open(Path::new(&config.history.db_path)) {
        Ok(db) => Some(Arc::new(db)),
        Err(e) => {
            error!(error = %e, "failed to open history DB; entries will only be written to disk");
            None
        }
    };
    let (sink, entries) = history::channel();
    let writer = HistoryWriter::new(&config.history.dir, history_db, config.history.jpeg_quality);
    let writer_task = tokio::spawn(writer.run(entries));

    let pipeline = match Pipeline::new(
        source,
        engine,
        machine,
        renderer,
        Box::new(sink),
        config.capture.interval(),
    ) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let (handle, pipeline_task) = pipeline.spawn();
    let mut status = handle.subscribe();
    handle.start();

    let mut exit_code = 0;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, stopped by user");
        }
        failed = status.wait_for(|s| matches!(s, CaptureStatus::Failed(_))) => {
            match failed {
                Ok(s) => error!(status = ?*s, "capture stopped by failure"),
                Err(_) => warn!("pipeline exited unexpectedly"),
            }
            exit_code = 2;
        }
    }

    handle.shutdown();
    match pipeline_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "pipeline stopped with error"),
        Err(e) => error!(error = %e, "pipeline task panicked"),
    }
    // The sink was dropped with the pipeline, so the writer drains and exits.
    if let Err(e) = writer_task.await {
        error!(error = %e, "history writer task panicked");
    }

    std::process::exit(exit_code);
}

fn build_source(config: &Config) -> Result<Box<dyn FrameSource>, AcquisitionError> {
    let (width, height) = (config.capture.width, config.capture.height);
    match config.source.kind.as_str() {
        "directory" => {
            let dir = config.source.dir.as_deref().unwrap_or_default();
            let source =
                DirectorySource::open(Path::new(dir), config.source.loop_frames, width, height)?;
            Ok(Box::new(source))
        }
        _ => {
            let url = config.source.url.as_deref().unwrap_or_default();
            let source = HttpSnapshotSource::new(url, config.source.timeout(), width, height)?;
            Ok(Box::new(source))
        }
    }
}
