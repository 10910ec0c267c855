//! Per-stream orchestration: frames in, unique-object counts out

use crate::error::VisionError;
use crate::processing::{CentroidTracker, TrackMap, TrackingParams};
use crate::progress::{ProgressBoard, ProgressHandle, ProgressSnapshot, StreamSummary};
use crate::source::{Detector, FrameSource};
use chrono::Utc;
use futures_util::stream::{self, Stream};
use reefwatch_core::{total_count, ClassCounts, ReefwatchConfig, StatsSink, TrackId};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Identifies one stream and who gets credit for it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub stream_id: String,
    pub contributor: String,
}

impl StreamRequest {
    pub fn new(stream_id: impl Into<String>, contributor: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            contributor: contributor.into(),
        }
    }
}

/// Result of one committed frame
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub frame_index: u64,
    /// Live tracks after this frame's update
    pub tracks: TrackMap,
    /// Detections fed to the tracker
    pub detections: usize,
    pub inference_failed: bool,
}

/// One stream's frame loop
pub struct StreamPipeline<S> {
    request: StreamRequest,
    source: S,
    detector: Arc<dyn Detector>,
    tracker: CentroidTracker,
    params: TrackingParams,
    unique_objects: BTreeMap<String, BTreeSet<TrackId>>,
    frames: u64,
    inference_failures: u64,
    snapshot_interval: u64,
    read_error: Option<String>,
    exhausted: bool,
    handle: ProgressHandle,
}

impl<S: FrameSource> StreamPipeline<S> {
    pub fn new(
        request: StreamRequest,
        source: S,
        detector: Arc<dyn Detector>,
        handle: ProgressHandle,
        config: &ReefwatchConfig,
    ) -> Self {
        let metadata = source.metadata();
        let params = TrackingParams::derive(&metadata, &config.tracking);
        info!(
            "Stream {}: {}x{} @ {} fps, max_distance={:.1}, max_disappeared={}",
            request.stream_id,
            metadata.width,
            metadata.height,
            metadata.fps,
            params.max_distance,
            params.max_disappeared
        );

        Self {
            request,
            source,
            detector,
            tracker: CentroidTracker::with_params(params),
            params,
            unique_objects: BTreeMap::new(),
            frames: 0,
            inference_failures: 0,
            snapshot_interval: config.pipeline.snapshot_interval,
            read_error: None,
            exhausted: false,
            handle,
        }
    }

    pub fn request(&self) -> &StreamRequest {
        &self.request
    }

    pub fn params(&self) -> TrackingParams {
        self.params
    }

    /// Read, detect, and track one frame. `None` once the source is
    /// exhausted or failed.
    pub async fn next_frame(&mut self) -> Option<FrameOutcome> {
        if self.exhausted {
            return None;
        }

        let frame = match self.source.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.exhausted = true;
                return None;
            }
            Err(e) => {
                warn!(
                    "Stream {}: read failed after {} frames: {}",
                    self.request.stream_id, self.frames, e
                );
                self.read_error = Some(e.to_string());
                self.exhausted = true;
                return None;
            }
        };

        let frame_index = frame.index;
        let detector = Arc::clone(&self.detector);
        let result = tokio::task::spawn_blocking(move || detector.detect(&frame)).await;

        let (detections, inference_failed) = match result {
            Ok(Ok(detections)) => (detections, false),
            Ok(Err(e)) => {
                warn!(
                    "Stream {}: inference failed on frame {}: {}",
                    self.request.stream_id, frame_index, e
                );
                (Vec::new(), true)
            }
            Err(e) => {
                warn!(
                    "Stream {}: inference task failed on frame {}: {}",
                    self.request.stream_id, frame_index, e
                );
                (Vec::new(), true)
            }
        };
        if inference_failed {
            self.inference_failures += 1;
        }

        let tracks = self.tracker.update(&detections);
        for track in tracks.values() {
            self.unique_objects
                .entry(track.class_name.clone())
                .or_default()
                .insert(track.id);
        }
        let tracks = tracks.clone();
        self.frames += 1;

        debug!(
            "Stream {}: frame {} -> {} detections, {} live tracks",
            self.request.stream_id,
            frame_index,
            detections.len(),
            tracks.len()
        );

        if self.snapshot_interval > 0 && self.frames % self.snapshot_interval == 0 {
            self.handle.publish(self.summary());
        }

        Some(FrameOutcome {
            frame_index,
            tracks,
            detections: detections.len(),
            inference_failed,
        })
    }

    /// Pull-based view of the frame loop
    pub fn frames(&mut self) -> impl Stream<Item = FrameOutcome> + '_ {
        stream::unfold(self, |pipeline| async move {
            let outcome = pipeline.next_frame().await?;
            Some((outcome, pipeline))
        })
    }

    /// Counts over all frames committed so far
    pub fn summary(&self) -> ProgressSnapshot {
        let class_counts: ClassCounts = self
            .unique_objects
            .iter()
            .map(|(class_name, ids)| (class_name.clone(), ids.len() as u64))
            .collect();

        ProgressSnapshot {
            total_unique_detections: total_count(&class_counts),
            class_counts,
            frames: self.frames,
        }
    }

    /// Record the final totals and close the progress entry.
    ///
    /// The stream is reported done even when the sink fails to persist; the
    /// sink error is returned afterwards.
    pub async fn finish(
        self,
        sink: &dyn StatsSink,
        summary_dir: Option<&Path>,
    ) -> Result<Arc<StreamSummary>, VisionError> {
        let snapshot = self.summary();
        let summary = StreamSummary {
            stream_id: self.request.stream_id.clone(),
            contributor: self.request.contributor.clone(),
            detections: snapshot.total_unique_detections,
            class_counts: snapshot.class_counts,
            frames: snapshot.frames,
            inference_failures: self.inference_failures,
            read_error: self.read_error,
            finished_at: Utc::now(),
        };

        info!(
            "Stream {}: {} unique objects across {} classes in {} frames",
            summary.stream_id,
            summary.detections,
            summary.class_counts.len(),
            summary.frames
        );

        if let Some(dir) = summary_dir {
            if let Err(e) = write_summary_file(dir, &summary).await {
                warn!("Stream {}: failed to write summary: {}", summary.stream_id, e);
            }
        }

        let recorded = sink
            .record(&summary.contributor, summary.detections, &summary.class_counts)
            .await;
        let summary = self.handle.complete(summary);

        recorded.map_err(|e| {
            error!("Stream {}: failed to record stats: {}", summary.stream_id, e);
            VisionError::Core(e)
        })?;
        Ok(summary)
    }
}

/// Open a source, run it to the end, and record the result.
///
/// A source that cannot be opened fails only this stream: its progress entry
/// turns terminal with the error message.
pub async fn run_stream<S, F>(
    request: StreamRequest,
    open: F,
    detector: Arc<dyn Detector>,
    progress: &Arc<ProgressBoard>,
    sink: &dyn StatsSink,
    config: &ReefwatchConfig,
) -> Result<Arc<StreamSummary>, VisionError>
where
    S: FrameSource,
    F: Future<Output = Result<S, VisionError>>,
{
    let handle = progress.register(request.stream_id.clone());

    let source = match open.await {
        Ok(source) => source,
        Err(e) => {
            error!("Stream {}: failed to open source: {}", request.stream_id, e);
            handle.fail(e.to_string());
            return Err(e);
        }
    };

    let mut pipeline = StreamPipeline::new(request, source, detector, handle, config);
    while pipeline.next_frame().await.is_some() {}
    pipeline
        .finish(sink, config.pipeline.summary_dir.as_deref())
        .await
}

/// `result_<stream_id>.stats.json` with path separators and other
/// non-filename characters replaced
pub fn summary_file_name(stream_id: &str) -> String {
    let safe: String = stream_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("result_{}.stats.json", safe)
}

async fn write_summary_file(dir: &Path, summary: &StreamSummary) -> Result<PathBuf, VisionError> {
    tokio::fs::create_dir_all(dir).await?;

    let path = dir.join(summary_file_name(&summary.stream_id));
    let temp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(summary)?;

    if let Err(e) = tokio::fs::write(&temp_path, &bytes).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&temp_path, &path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e.into());
    }

    debug!("Wrote stream summary {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Frame, StreamMetadata};
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use reefwatch_core::{BoundingBox, Detection};
    use std::collections::VecDeque;

    /// Frames carry their detections directly; `None` is an inference
    /// failure
    struct ScriptedSource {
        metadata: StreamMetadata,
        frames: VecDeque<Result<Option<Vec<Detection>>, VisionError>>,
        index: u64,
        scripted: Arc<Mutex<BTreeMap<u64, Option<Vec<Detection>>>>>,
    }

    struct ScriptedDetector {
        scripted: Arc<Mutex<BTreeMap<u64, Option<Vec<Detection>>>>>,
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        fn metadata(&self) -> StreamMetadata {
            self.metadata
        }

        async fn next_frame(&mut self) -> Result<Option<Frame>, VisionError> {
            match self.frames.pop_front() {
                None => Ok(None),
                Some(Err(e)) => Err(e),
                Some(Ok(detections)) => {
                    self.index += 1;
                    self.scripted.lock().insert(self.index, detections);
                    Ok(Some(Frame {
                        index: self.index,
                        width: self.metadata.width,
                        height: self.metadata.height,
                        data: Bytes::new(),
                    }))
                }
            }
        }
    }

    impl Detector for ScriptedDetector {
        fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, VisionError> {
            match self.scripted.lock().remove(&frame.index).flatten() {
                Some(detections) => Ok(detections),
                None => Err(VisionError::Inference("model crashed".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(String, u64, ClassCounts)>>,
        fail: bool,
    }

    #[async_trait]
    impl StatsSink for RecordingSink {
        async fn record(
            &self,
            contributor: &str,
            total_detections: u64,
            class_counts: &ClassCounts,
        ) -> reefwatch_core::Result<()> {
            self.calls
                .lock()
                .push((contributor.to_string(), total_detections, class_counts.clone()));
            if self.fail {
                return Err(reefwatch_core::Error::Storage("disk full".to_string()));
            }
            Ok(())
        }
    }

    fn scripted(
        frames: Vec<Result<Option<Vec<Detection>>, VisionError>>,
    ) -> (ScriptedSource, Arc<dyn Detector>) {
        let shared = Arc::new(Mutex::new(BTreeMap::new()));
        let source = ScriptedSource {
            metadata: StreamMetadata { width: 640, height: 480, fps: 30.0 },
            frames: frames.into(),
            index: 0,
            scripted: Arc::clone(&shared),
        };
        (source, Arc::new(ScriptedDetector { scripted: shared }))
    }

    fn det(class_name: &str, x: f32) -> Detection {
        Detection::new(BoundingBox::new(x, 0.0, x + 20.0, 20.0), class_name, 0.8)
    }

    #[tokio::test]
    async fn test_counts_unique_objects() {
        let frames = vec![
            Ok(Some(vec![det("bottle", 0.0), det("fish", 300.0)])),
            Ok(Some(vec![det("bottle", 5.0), det("fish", 305.0)])),
            Ok(Some(vec![det("bottle", 10.0)])),
        ];
        let (source, detector) = scripted(frames);
        let board = ProgressBoard::new(8);
        let config = ReefwatchConfig::default();
        let sink = RecordingSink::default();

        let summary = run_stream(
            StreamRequest::new("s1", "diver"),
            async { Ok(source) },
            detector,
            &board,
            &sink,
            &config,
        )
        .await
        .unwrap();

        assert_eq!(summary.detections, 2);
        assert_eq!(summary.frames, 3);
        assert_eq!(summary.class_counts.get("bottle"), Some(&1));
        assert_eq!(summary.class_counts.get("fish"), Some(&1));

        let calls = sink.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "diver");
        assert_eq!(calls[0].1, 2);
        assert!(matches!(board.status("s1"), Some(crate::StreamStatus::Done(_))));
    }

    #[tokio::test]
    async fn test_inference_failure_is_empty_frame() {
        let frames = vec![
            Ok(Some(vec![det("can", 0.0)])),
            Ok(None),
            Ok(Some(vec![det("can", 2.0)])),
        ];
        let (source, detector) = scripted(frames);
        let board = ProgressBoard::new(8);
        let handle = board.register("s1");
        let mut pipeline = StreamPipeline::new(
            StreamRequest::new("s1", "diver"),
            source,
            detector,
            handle,
            &ReefwatchConfig::default(),
        );

        let first = pipeline.next_frame().await.unwrap();
        assert!(!first.inference_failed);
        let second = pipeline.next_frame().await.unwrap();
        assert!(second.inference_failed);
        assert_eq!(second.detections, 0);
        assert_eq!(second.tracks[&TrackId(0)].disappeared, 1);
        let third = pipeline.next_frame().await.unwrap();
        assert_eq!(third.tracks.len(), 1);
        assert!(pipeline.next_frame().await.is_none());

        let sink = RecordingSink::default();
        let summary = pipeline.finish(&sink, None).await.unwrap();
        assert_eq!(summary.inference_failures, 1);
        assert_eq!(summary.detections, 1);
    }

    struct PanickingDetector;

    impl Detector for PanickingDetector {
        fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, VisionError> {
            panic!("detector bug");
        }
    }

    #[tokio::test]
    async fn test_detector_panic_is_empty_frame() {
        let frames = vec![Ok(Some(vec![det("can", 0.0)])), Ok(Some(vec![det("can", 2.0)]))];
        let (source, _) = scripted(frames);
        let board = ProgressBoard::new(8);
        let sink = RecordingSink::default();

        let summary = run_stream(
            StreamRequest::new("s1", "diver"),
            async { Ok(source) },
            Arc::new(PanickingDetector),
            &board,
            &sink,
            &ReefwatchConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(summary.frames, 2);
        assert_eq!(summary.inference_failures, 2);
        assert_eq!(summary.detections, 0);
        assert_eq!(sink.calls.lock().len(), 1);
        assert!(matches!(board.status("s1"), Some(crate::StreamStatus::Done(_))));
    }

    #[tokio::test]
    async fn test_read_error_ends_stream() {
        let frames = vec![
            Ok(Some(vec![det("rov", 0.0)])),
            Err(VisionError::Source("truncated file".to_string())),
            Ok(Some(vec![det("rov", 400.0)])),
        ];
        let (source, detector) = scripted(frames);
        let board = ProgressBoard::new(8);
        let sink = RecordingSink::default();

        let summary = run_stream(
            StreamRequest::new("s1", "diver"),
            async { Ok(source) },
            detector,
            &board,
            &sink,
            &ReefwatchConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(summary.frames, 1);
        assert_eq!(summary.detections, 1);
        assert!(summary.read_error.as_deref().unwrap().contains("truncated"));
        assert_eq!(sink.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_open_failure_marks_stream_failed() {
        let board = ProgressBoard::new(8);
        let sink = RecordingSink::default();
        let (_, detector) = scripted(Vec::new());

        let result = run_stream::<ScriptedSource, _>(
            StreamRequest::new("broken", "diver"),
            async { Err(VisionError::Source("cannot open broken.mp4".to_string())) },
            detector,
            &board,
            &sink,
            &ReefwatchConfig::default(),
        )
        .await;

        assert!(result.is_err());
        match board.status("broken") {
            Some(crate::StreamStatus::Failed(message)) => assert!(message.contains("broken.mp4")),
            other => panic!("Expected failed status, got {:?}", other),
        }
        assert!(sink.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_snapshots_published_on_interval() {
        let frames = (0..12).map(|i| Ok(Some(vec![det("plastic", i as f32)]))).collect();
        let (source, detector) = scripted(frames);
        let board = ProgressBoard::new(8);
        let handle = board.register("s1");
        let mut pipeline = StreamPipeline::new(
            StreamRequest::new("s1", "diver"),
            source,
            detector,
            handle,
            &ReefwatchConfig::default(),
        );

        for _ in 0..9 {
            pipeline.next_frame().await.unwrap();
        }
        match board.status("s1") {
            Some(crate::StreamStatus::Processing(snapshot)) => assert_eq!(snapshot.frames, 0),
            other => panic!("Expected processing status, got {:?}", other),
        }

        pipeline.next_frame().await.unwrap();
        match board.status("s1") {
            Some(crate::StreamStatus::Processing(snapshot)) => {
                assert_eq!(snapshot.frames, 10);
                assert_eq!(snapshot.total_unique_detections, 1);
            }
            other => panic!("Expected processing status, got {:?}", other),
        }

        let sink = RecordingSink::default();
        pipeline.finish(&sink, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_frames_stream() {
        use futures_util::StreamExt;

        let frames = vec![
            Ok(Some(vec![det("coral", 0.0)])),
            Ok(Some(Vec::new())),
            Ok(Some(vec![det("coral", 1.0)])),
        ];
        let (source, detector) = scripted(frames);
        let board = ProgressBoard::new(8);
        let mut pipeline = StreamPipeline::new(
            StreamRequest::new("s1", "diver"),
            source,
            detector,
            board.register("s1"),
            &ReefwatchConfig::default(),
        );

        let indices: Vec<u64> = pipeline.frames().map(|o| o.frame_index).collect().await;
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(pipeline.summary().total_unique_detections, 1);

        let sink = RecordingSink::default();
        pipeline.finish(&sink, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_sink_failure_still_completes() {
        let (source, detector) = scripted(vec![Ok(Some(vec![det("trash", 0.0)]))]);
        let board = ProgressBoard::new(8);
        let sink = RecordingSink { fail: true, ..Default::default() };

        let result = run_stream(
            StreamRequest::new("s1", "diver"),
            async { Ok(source) },
            detector,
            &board,
            &sink,
            &ReefwatchConfig::default(),
        )
        .await;

        assert!(matches!(result, Err(VisionError::Core(_))));
        assert!(matches!(board.status("s1"), Some(crate::StreamStatus::Done(_))));
    }

    #[tokio::test]
    async fn test_summary_file_written() {
        let dir = tempfile::tempdir().unwrap();
        let (source, detector) = scripted(vec![Ok(Some(vec![det("fish", 0.0)]))]);
        let board = ProgressBoard::new(8);
        let sink = RecordingSink::default();
        let mut config = ReefwatchConfig::default();
        config.pipeline.summary_dir = Some(dir.path().to_path_buf());

        run_stream(
            StreamRequest::new("clip-01", "diver"),
            async { Ok(source) },
            detector,
            &board,
            &sink,
            &config,
        )
        .await
        .unwrap();

        let bytes = std::fs::read(dir.path().join("result_clip-01.stats.json")).unwrap();
        let written: StreamSummary = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(written.detections, 1);
        assert_eq!(written.class_counts.get("fish"), Some(&1));
    }

    #[test]
    fn test_summary_file_name_sanitized() {
        assert_eq!(summary_file_name("abc-1_2"), "result_abc-1_2.stats.json");
        assert_eq!(summary_file_name("../etc/passwd"), "result____etc_passwd.stats.json");
    }
}
