// Configuration for reefwatch services

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Bounds used to derive per-stream tracking thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Floor for the matching distance, in pixels
    pub min_max_distance: f32,
    /// Matching distance as a fraction of frame width
    pub distance_ratio: f32,
    /// Floor for the disappearance ceiling, in frames
    pub min_max_disappeared: u32,
    /// How long an object may stay unseen before it is dropped
    pub occlusion_seconds: f32,
    /// Frame rate assumed when a stream reports none
    pub default_fps: f32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_max_distance: 50.0,
            distance_ratio: 0.05,
            min_max_disappeared: 40,
            occlusion_seconds: 1.5,
            default_fps: 30.0,
        }
    }
}

/// Per-stream pipeline behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Publish a progress snapshot every N frames
    pub snapshot_interval: u64,
    /// Where finished-stream summaries are written, if anywhere
    pub summary_dir: Option<PathBuf>,
    /// Terminal stream statuses kept around for pollers
    pub max_finished_streams: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: 10,
            summary_dir: None,
            max_finished_streams: 256,
        }
    }
}

/// Global stats aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub path: PathBuf,
    /// Name credited when a contributor is blank
    pub default_contributor: String,
    pub leaderboard_size: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data").join("global_stats.json"),
            default_contributor: "EcoCitizen".to_string(),
            leaderboard_size: 5,
        }
    }
}

/// Periodic removal of stale upload/output files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    pub enabled: bool,
    pub folders: Vec<PathBuf>,
    pub interval_seconds: u64,
    pub max_age_seconds: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            folders: vec![PathBuf::from("uploads"), PathBuf::from("outputs")],
            interval_seconds: 300,
            max_age_seconds: 900,
        }
    }
}

/// Complete reefwatch configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReefwatchConfig {
    pub tracking: TrackingConfig,
    pub pipeline: PipelineConfig,
    pub stats: StatsConfig,
    pub cleanup: CleanupConfig,
    pub log_level: String,
}

impl Default for ReefwatchConfig {
    fn default() -> Self {
        Self {
            tracking: TrackingConfig::default(),
            pipeline: PipelineConfig::default(),
            stats: StatsConfig::default(),
            cleanup: CleanupConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ReefwatchConfig {
    /// Load configuration from file. The format follows the extension
    /// (`json`, `toml`, `yaml`/`yml`); anything else is sniffed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string())),
            Some("toml") => toml::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string())),
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string())),
            _ => Self::from_str(&content),
        }
    }

    /// Load configuration from string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        // Try JSON first
        if let Ok(config) = serde_json::from_str::<ReefwatchConfig>(content) {
            return Ok(config);
        }

        // Try TOML
        if let Ok(config) = toml::from_str::<ReefwatchConfig>(content) {
            return Ok(config);
        }

        // Try YAML
        if let Ok(config) = serde_yaml::from_str::<ReefwatchConfig>(content) {
            return Ok(config);
        }

        Err(ConfigError::ParseError("Unknown format".to_string()))
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override fields from `REEFWATCH_*` environment variables
    pub fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("REEFWATCH_STATS_PATH") {
            self.stats.path = PathBuf::from(path);
        }

        if let Ok(name) = std::env::var("REEFWATCH_DEFAULT_CONTRIBUTOR") {
            self.stats.default_contributor = name;
        }

        if let Ok(interval) = std::env::var("REEFWATCH_SNAPSHOT_INTERVAL") {
            if let Ok(n) = interval.parse::<u64>() {
                self.pipeline.snapshot_interval = n;
            }
        }

        if let Ok(dir) = std::env::var("REEFWATCH_SUMMARY_DIR") {
            self.pipeline.summary_dir = Some(PathBuf::from(dir));
        }

        if let Ok(log_level) = std::env::var("REEFWATCH_LOG_LEVEL") {
            self.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tracking = &self.tracking;
        if !tracking.min_max_distance.is_finite() || tracking.min_max_distance <= 0.0 {
            return Err(ConfigError::ValidationError(
                "tracking.min_max_distance must be a positive number".to_string(),
            ));
        }

        if !tracking.distance_ratio.is_finite() || tracking.distance_ratio < 0.0 {
            return Err(ConfigError::ValidationError(
                "tracking.distance_ratio must be >= 0".to_string(),
            ));
        }

        if !tracking.occlusion_seconds.is_finite() || tracking.occlusion_seconds < 0.0 {
            return Err(ConfigError::ValidationError(
                "tracking.occlusion_seconds must be >= 0".to_string(),
            ));
        }

        if !tracking.default_fps.is_finite() || tracking.default_fps <= 0.0 {
            return Err(ConfigError::ValidationError(
                "tracking.default_fps must be > 0".to_string(),
            ));
        }

        if self.pipeline.snapshot_interval == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.snapshot_interval cannot be 0".to_string(),
            ));
        }

        if self.stats.leaderboard_size == 0 {
            return Err(ConfigError::ValidationError(
                "stats.leaderboard_size cannot be 0".to_string(),
            ));
        }

        if self.stats.default_contributor.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "stats.default_contributor cannot be blank".to_string(),
            ));
        }

        if self.cleanup.enabled && self.cleanup.interval_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "cleanup.interval_seconds cannot be 0 when cleanup is enabled".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Parse error: {}", e),
            ConfigError::ValidationError(e) => write!(f, "Validation error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Configuration(err.to_string())
    }
}
