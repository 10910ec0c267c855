//! Seams to the decoder and the detection model

use crate::error::VisionError;
use async_trait::async_trait;
use bytes::Bytes;
use reefwatch_core::Detection;
use serde::{Deserialize, Serialize};

/// Stream-level properties known once the source is open
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub width: u32,
    pub height: u32,
    /// Reported frame rate; zero when the container does not say
    #[serde(default)]
    pub fps: f32,
}

/// One decoded frame in original pixel dimensions
#[derive(Debug, Clone)]
pub struct Frame {
    /// 1-based position in the stream
    pub index: u64,
    pub width: u32,
    pub height: u32,
    /// Pixel payload, opaque to everything except the detector
    pub data: Bytes,
}

/// Sequential producer of frames for one stream
#[async_trait]
pub trait FrameSource: Send {
    fn metadata(&self) -> StreamMetadata;

    /// `Ok(None)` once the input is exhausted
    async fn next_frame(&mut self) -> Result<Option<Frame>, VisionError>;
}

/// The detection model. Boxes must be in the frame's own coordinate space.
pub trait Detector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, VisionError>;
}
