use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub diff: DiffConfig,
    #[serde(default)]
    pub episode: EpisodeConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Time between capture ticks.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_capture_width")]
    pub width: u32,
    #[serde(default = "default_capture_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiffConfig {
    #[serde(default = "default_diff_width")]
    pub width: u32,
    #[serde(default = "default_diff_height")]
    pub height: u32,
    /// Minimum weighted difference for a pixel to count toward the score.
    #[serde(default = "default_pixel_diff_threshold")]
    pub pixel_diff_threshold: f64,
    /// Resampling filter used to shrink frames to diff resolution.
    #[serde(default = "default_resample")]
    pub resample: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EpisodeConfig {
    /// Length of the window in which the best frame is chosen.
    #[serde(default = "default_consider_ms")]
    pub consider_ms: u64,
    /// Cooldown after a commit before a new episode may open.
    #[serde(default = "default_chill_ms")]
    pub chill_ms: u64,
    /// A score must be strictly greater than this to open an episode.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// "http" or "directory".
    #[serde(default = "default_source_kind")]
    pub kind: String,
    /// Snapshot URL returning a single JPEG per request (http).
    pub url: Option<String>,
    /// Directory of image files to replay (directory).
    pub dir: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Start over from the first file once the directory is exhausted.
    #[serde(default)]
    pub loop_frames: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_dir")]
    pub dir: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RenderConfig {
    /// If set, the latest motion map is written here as a PNG.
    pub motion_png: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            width: default_capture_width(),
            height: default_capture_height(),
        }
    }
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            width: default_diff_width(),
            height: default_diff_height(),
            pixel_diff_threshold: default_pixel_diff_threshold(),
            resample: default_resample(),
        }
    }
}

impl Default for EpisodeConfig {
    fn default() -> Self {
        Self {
            consider_ms: default_consider_ms(),
            chill_ms: default_chill_ms(),
            score_threshold: default_score_threshold(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            dir: default_history_dir(),
            db_path: default_db_path(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl CaptureConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("capture.interval_ms", self.interval_ms)?;
        positive("capture.width", self.width.into())?;
        positive("capture.height", self.height.into())
    }
}

impl DiffConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("diff.width", self.width.into())?;
        positive("diff.height", self.height.into())?;
        if !self.pixel_diff_threshold.is_finite() || self.pixel_diff_threshold <= 0.0 {
            return Err(ConfigError::invalid(
                "diff.pixel_diff_threshold",
                format!("must be a positive number, got {}", self.pixel_diff_threshold),
            ));
        }
        match self.resample.as_str() {
            "nearest" | "triangle" => Ok(()),
            other => Err(ConfigError::invalid(
                "diff.resample",
                format!("expected 'nearest' or 'triangle', got '{other}'"),
            )),
        }
    }
}

impl EpisodeConfig {
    pub fn consider_time(&self) -> Duration {
        Duration::from_millis(self.consider_ms)
    }

    pub fn chill_time(&self) -> Duration {
        Duration::from_millis(self.chill_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("episode.consider_ms", self.consider_ms)?;
        positive("episode.chill_ms", self.chill_ms)?;
        positive("episode.score_threshold", self.score_threshold.into())
    }
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("source.timeout_ms", self.timeout_ms)?;
        match self.kind.as_str() {
            "http" if self.url.as_deref().map_or(true, str::is_empty) => Err(
                ConfigError::invalid("source.url", "required when source.kind = \"http\""),
            ),
            "directory" if self.dir.as_deref().map_or(true, str::is_empty) => Err(
                ConfigError::invalid("source.dir", "required when source.kind = \"directory\""),
            ),
            "http" | "directory" => Ok(()),
            other => Err(ConfigError::invalid(
                "source.kind",
                format!("expected 'http' or 'directory', got '{other}'"),
            )),
        }
    }
}

impl HistoryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::invalid(
                "history.jpeg_quality",
                format!("must be within 1..=100, got {}", self.jpeg_quality),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.capture.validate()?;
        self.diff.validate()?;
        self.episode.validate()?;
        self.source.validate()?;
        self.history.validate()
    }
}

fn positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

// Default value functions
fn default_interval_ms() -> u64 {
    100
}
fn default_capture_width() -> u32 {
    640
}
fn default_capture_height() -> u32 {
    480
}
fn default_diff_width() -> u32 {
    64
}
fn default_diff_height() -> u32 {
    48
}
fn default_pixel_diff_threshold() -> f64 {
    16.0
}
fn default_resample() -> String {
    "triangle".into()
}
fn default_consider_ms() -> u64 {
    2000
}
fn default_chill_ms() -> u64 {
    2000
}
fn default_score_threshold() -> u32 {
    4
}
fn default_source_kind() -> String {
    "http".into()
}
fn default_timeout_ms() -> u64 {
    2000
}
fn default_history_dir() -> String {
    "history".into()
}
fn default_db_path() -> String {
    "history.db".into()
}
fn default_jpeg_quality() -> u8 {
    85
}
fn default_api_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [source]
        kind = "directory"
        dir = "frames"
    "#;

    #[test]
    fn defaults_match_reference_tuning() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.capture.interval_ms, 100);
        assert_eq!((config.capture.width, config.capture.height), (640, 480));
        assert_eq!((config.diff.width, config.diff.height), (64, 48));
        assert_eq!(config.diff.pixel_diff_threshold, 16.0);
        assert_eq!(config.episode.consider_time(), Duration::from_secs(2));
        assert_eq!(config.episode.chill_time(), Duration::from_secs(2));
        assert_eq!(config.episode.score_threshold, 4);
        assert_eq!(config.logging.level, "info");
        assert!(config.render.motion_png.is_none());
    }

    #[test]
    fn zero_consider_time_rejected() {
        let toml = format!("{MINIMAL}\n[episode]\nconsider_ms = 0\n");
        let err = Config::from_toml(&toml).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "episode.consider_ms",
                ..
            }
        ));
    }

    #[test]
    fn negative_duration_fails_to_parse() {
        let toml = format!("{MINIMAL}\n[episode]\nchill_ms = -5\n");
        assert!(matches!(
            Config::from_toml(&toml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn non_positive_pixel_threshold_rejected() {
        for bad in ["0.0", "-1.0", "nan"] {
            let toml = format!("{MINIMAL}\n[diff]\npixel_diff_threshold = {bad}\n");
            assert!(
                matches!(Config::from_toml(&toml), Err(ConfigError::Invalid { .. })),
                "pixel_diff_threshold = {bad} should be rejected"
            );
        }
    }

    #[test]
    fn zero_score_threshold_rejected() {
        let toml = format!("{MINIMAL}\n[episode]\nscore_threshold = 0\n");
        assert!(matches!(
            Config::from_toml(&toml),
            Err(ConfigError::Invalid {
                field: "episode.score_threshold",
                ..
            })
        ));
    }

    #[test]
    fn http_source_requires_url() {
        let err = Config::from_toml("[source]\nkind = \"http\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "source.url", .. }));
    }

    #[test]
    fn unknown_resample_filter_rejected() {
        let toml = format!("{MINIMAL}\n[diff]\nresample = \"lanczos\"\n");
        assert!(Config::from_toml(&toml).is_err());
    }
}
