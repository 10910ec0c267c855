pub mod types;
pub mod error;
pub mod config;
pub mod sink;

pub use error::{Error, Result};
pub use types::{BoundingBox, Point, Detection, TrackId, ClassCounts, total_count};
pub use config::{
    ReefwatchConfig, TrackingConfig, PipelineConfig, StatsConfig, CleanupConfig, ConfigError,
};
pub use sink::StatsSink;
