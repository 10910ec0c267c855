//! Seam between stream pipelines and the shared stats aggregate

use crate::error::Result;
use crate::types::ClassCounts;
use async_trait::async_trait;

/// Receives one call per completed unit of work (one image or one finished
/// video stream).
#[async_trait]
pub trait StatsSink: Send + Sync {
    /// Record a finished unit. Implementations must serialize concurrent
    /// calls so no increment is lost.
    async fn record(
        &self,
        contributor: &str,
        total_detections: u64,
        class_counts: &ClassCounts,
    ) -> Result<()>;
}
