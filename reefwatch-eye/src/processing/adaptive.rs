//! Tracking thresholds derived from stream resolution and frame rate

use crate::source::StreamMetadata;
use reefwatch_core::config::TrackingConfig;
use serde::{Deserialize, Serialize};

/// Thresholds fixed for the lifetime of one stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingParams {
    /// Largest centroid jump, in pixels, still treated as the same object
    pub max_distance: f32,
    /// Consecutive unmatched frames tolerated before a track is dropped
    pub max_disappeared: u32,
}

impl TrackingParams {
    /// `max_distance = max(50, width * 0.05)` and
    /// `max_disappeared = max(40, round(fps * 1.5))` with the default config.
    pub fn derive(metadata: &StreamMetadata, config: &TrackingConfig) -> Self {
        let fps = if metadata.fps.is_finite() && metadata.fps > 0.0 {
            metadata.fps
        } else {
            config.default_fps
        };

        let max_distance = config
            .min_max_distance
            .max(metadata.width as f32 * config.distance_ratio);

        let occlusion_frames = (fps * config.occlusion_seconds).round();
        let occlusion_frames = if occlusion_frames.is_finite() && occlusion_frames > 0.0 {
            occlusion_frames.min(u32::MAX as f32) as u32
        } else {
            0
        };

        Self {
            max_distance,
            max_disappeared: config.min_max_disappeared.max(occlusion_frames),
        }
    }

    /// Derive with the default bounds
    pub fn for_stream(width: u32, fps: f32) -> Self {
        let metadata = StreamMetadata { width, height: 0, fps };
        Self::derive(&metadata, &TrackingConfig::default())
    }
}

impl Default for TrackingParams {
    fn default() -> Self {
        let config = TrackingConfig::default();
        Self {
            max_distance: config.min_max_distance,
            max_disappeared: config.min_max_disappeared,
        }
    }
}
