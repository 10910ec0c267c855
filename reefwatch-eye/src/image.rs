//! Single-image jobs: detections are counted directly, without tracking

use crate::error::VisionError;
use crate::source::{Detector, Frame};
use reefwatch_core::{total_count, ClassCounts, Detection, StatsSink};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub detections: u64,
    pub class_counts: ClassCounts,
    pub inference_failed: bool,
}

/// Per-class detection counts
pub fn count_detections(detections: &[Detection]) -> ClassCounts {
    let mut counts = ClassCounts::new();
    for detection in detections {
        *counts.entry(detection.class_name.clone()).or_insert(0) += 1;
    }
    counts
}

/// Run the detector on one image and record it as one unit of work.
/// An inference failure counts as an image with no detections.
pub async fn process_image(
    contributor: &str,
    frame: Frame,
    detector: Arc<dyn Detector>,
    sink: &dyn StatsSink,
) -> Result<ImageSummary, VisionError> {
    let result = tokio::task::spawn_blocking(move || detector.detect(&frame)).await;

    let (detections, inference_failed) = match result {
        Ok(Ok(detections)) => (detections, false),
        Ok(Err(e)) => {
            warn!("Image inference failed: {}", e);
            (Vec::new(), true)
        }
        Err(e) => {
            warn!("Image inference task failed: {}", e);
            (Vec::new(), true)
        }
    };

    let class_counts = count_detections(&detections);
    let summary = ImageSummary {
        detections: total_count(&class_counts),
        class_counts,
        inference_failed,
    };
    info!(
        "Image: {} detections across {} classes",
        summary.detections,
        summary.class_counts.len()
    );

    sink.record(contributor, summary.detections, &summary.class_counts)
        .await?;
    Ok(summary)
}
