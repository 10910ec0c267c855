//! reefwatch-eye: object identity tracking for detection streams
//!
//! Turns per-frame detections into stable object identities, counts unique
//! objects per class for each stream, and reports finished streams and
//! images to a [`reefwatch_core::StatsSink`].

pub mod error;
pub mod image;
pub mod pipeline;
pub mod processing;
pub mod progress;
pub mod replay;
pub mod source;

pub use error::VisionError;
pub use image::{count_detections, process_image, ImageSummary};
pub use pipeline::{run_stream, FrameOutcome, StreamPipeline, StreamRequest};
pub use processing::{CentroidTracker, Track, TrackMap, TrackingParams};
pub use progress::{ProgressBoard, ProgressHandle, ProgressSnapshot, StreamStatus, StreamSummary};
pub use replay::{RecordedDetector, ReplayFrame, ReplaySource};
pub use source::{Detector, Frame, FrameSource, StreamMetadata};
