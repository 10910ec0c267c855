//! Offline replay of recorded detections
//!
//! A recording is JSON lines: a header with the stream metadata, then one
//! line per frame:
//!
//! ```text
//! {"width":1920,"height":1080,"fps":30}
//! {"detections":[{"bbox":{"x1":10,"y1":10,"x2":50,"y2":50},"class_name":"bottle"}]}
//! {"error":"model timed out"}
//! {}
//! ```
//!
//! [`ReplaySource`] yields each frame line as the frame payload and
//! [`RecordedDetector`] decodes it back, so a recording stands in for both
//! the decoder and the model.

use crate::error::VisionError;
use crate::source::{Detector, Frame, FrameSource, StreamMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use reefwatch_core::Detection;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

/// One recorded frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayFrame {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detections: Vec<Detection>,
    /// Inference failure recorded for this frame
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReplayFrame {
    pub fn detected(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            detections: Vec::new(),
            error: Some(message.into()),
        }
    }
}

enum ReplayLines {
    File(Lines<BufReader<File>>),
    Memory(VecDeque<String>),
}

impl ReplayLines {
    async fn next_line(&mut self) -> Result<Option<String>, VisionError> {
        loop {
            let line = match self {
                ReplayLines::File(lines) => lines
                    .next_line()
                    .await
                    .map_err(|e| VisionError::Source(format!("Failed to read recording: {}", e)))?,
                ReplayLines::Memory(lines) => lines.pop_front(),
            };
            match line {
                Some(line) if line.trim().is_empty() => continue,
                other => return Ok(other),
            }
        }
    }
}

/// Frame source backed by a recording
pub struct ReplaySource {
    metadata: StreamMetadata,
    lines: ReplayLines,
    index: u64,
}

impl ReplaySource {
    /// Open a recording file and read its header
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, VisionError> {
        let path = path.as_ref();
        let file = File::open(path)
            .await
            .map_err(|e| VisionError::Source(format!("Failed to open {}: {}", path.display(), e)))?;

        let mut lines = ReplayLines::File(BufReader::new(file).lines());
        let header = lines
            .next_line()
            .await?
            .ok_or_else(|| VisionError::Source(format!("{} is empty", path.display())))?;
        let metadata = parse_header(&header)?;

        Ok(Self {
            metadata,
            lines,
            index: 0,
        })
    }

    /// In-memory recording without a header line
    pub fn from_frames(metadata: StreamMetadata, frames: &[ReplayFrame]) -> Result<Self, VisionError> {
        let lines = frames
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<VecDeque<_>, _>>()?;
        Ok(Self {
            metadata,
            lines: ReplayLines::Memory(lines),
            index: 0,
        })
    }

    /// Parse a whole recording, header included
    pub fn from_recording(recording: &str) -> Result<Self, VisionError> {
        let mut lines = recording.lines().filter(|line| !line.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| VisionError::Source("Recording is empty".to_string()))?;
        let metadata = parse_header(header)?;

        Ok(Self {
            metadata,
            lines: ReplayLines::Memory(lines.map(str::to_string).collect()),
            index: 0,
        })
    }
}

fn parse_header(line: &str) -> Result<StreamMetadata, VisionError> {
    let metadata: StreamMetadata = serde_json::from_str(line)
        .map_err(|e| VisionError::Source(format!("Invalid recording header: {}", e)))?;
    if metadata.width == 0 || metadata.height == 0 {
        return Err(VisionError::Source(format!(
            "Invalid frame size {}x{}",
            metadata.width, metadata.height
        )));
    }
    Ok(metadata)
}

#[async_trait]
impl FrameSource for ReplaySource {
    fn metadata(&self) -> StreamMetadata {
        self.metadata
    }

    async fn next_frame(&mut self) -> Result<Option<Frame>, VisionError> {
        let line = match self.lines.next_line().await? {
            Some(line) => line,
            None => return Ok(None),
        };
        self.index += 1;
        Ok(Some(Frame {
            index: self.index,
            width: self.metadata.width,
            height: self.metadata.height,
            data: Bytes::from(line),
        }))
    }
}

/// Detector that decodes [`ReplayFrame`] payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordedDetector;

impl Detector for RecordedDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, VisionError> {
        let recorded: ReplayFrame = serde_json::from_slice(&frame.data).map_err(|e| {
            VisionError::Inference(format!("Malformed frame {}: {}", frame.index, e))
        })?;
        match recorded.error {
            Some(message) => Err(VisionError::Inference(message)),
            None => Ok(recorded.detections),
        }
    }
}
