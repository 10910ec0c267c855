use reefwatch_core::config::StatsConfig;
use reefwatch_core::{BoundingBox, ClassCounts, Detection, ReefwatchConfig, TrackId};
use reefwatch_eye::processing::{CentroidTracker, TrackingParams};
use reefwatch_eye::{
    process_image, run_stream, Frame, ProgressBoard, RecordedDetector, ReplaySource,
    StreamRequest, StreamStatus,
};
use reefwatch_storage::StatsAggregator;
use std::io::Write;
use std::sync::Arc;

fn square(x: f32, y: f32, size: f32) -> BoundingBox {
    BoundingBox::new(x, y, x + size, y + size)
}

#[test]
fn test_tracker_matching_properties() {
    let params = TrackingParams::for_stream(640, 30.0);
    assert_eq!(params.max_distance, 50.0);

    // 7 px move matches
    let mut tracker = CentroidTracker::with_params(params);
    tracker.update_columns(&[square(100.0, 100.0, 100.0)], &["trash"]);
    tracker.update_columns(&[square(105.0, 105.0, 100.0)], &["trash"]);
    assert_eq!(tracker.total_registered(), 1);
    assert_eq!(tracker.len(), 1);

    // 212 px move does not
    let mut tracker = CentroidTracker::with_params(params);
    tracker.update_columns(&[square(0.0, 0.0, 100.0)], &["trash"]);
    tracker.update_columns(&[square(150.0, 150.0, 100.0)], &["trash"]);
    assert_eq!(tracker.total_registered(), 2);
    assert_eq!(tracker.tracks()[&TrackId(0)].disappeared, 1);

    // Two tracks, one detection close to A and one far from both
    let mut tracker = CentroidTracker::with_params(params);
    tracker.update_columns(&[square(0.0, 0.0, 20.0), square(300.0, 0.0, 20.0)], &["a", "b"]);
    let tracks = tracker.update_columns(&[square(4.0, 0.0, 20.0), square(900.0, 900.0, 20.0)], &["a", "c"]);
    assert_eq!(tracks.len(), 3);
    assert_eq!(tracks.values().filter(|t| t.disappeared == 0).count(), 2);
    assert_eq!(tracks[&TrackId(1)].disappeared, 1);
    assert_eq!(tracker.total_registered(), 3);
}

#[tokio::test]
async fn test_recording_file_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let recording = dir.path().join("dive.jsonl");
    {
        let mut file = std::fs::File::create(&recording).unwrap();
        writeln!(file, r#"{{"width":1920,"height":1080,"fps":24}}"#).unwrap();
        for i in 0..30 {
            let x = 100 + i * 2;
            writeln!(
                file,
                r#"{{"detections":[{{"bbox":{{"x1":{},"y1":100,"x2":{},"y2":160}},"class_name":"Plastic Bag"}},{{"bbox":{{"x1":1200,"y1":500,"x2":1300,"y2":600}},"class_name":"coral"}}]}}"#,
                x,
                x + 60
            )
            .unwrap();
        }
        writeln!(file, r#"{{"error":"frame dropped"}}"#).unwrap();
    }

    let mut config = ReefwatchConfig::default();
    config.stats = StatsConfig {
        path: dir.path().join("data").join("global_stats.json"),
        ..StatsConfig::default()
    };
    config.pipeline.summary_dir = Some(dir.path().join("outputs"));

    let stats = StatsAggregator::open(&config.stats).await;
    let board = ProgressBoard::new(4);
    let summary = run_stream(
        StreamRequest::new("abc123", "  "),
        ReplaySource::open(&recording),
        Arc::new(RecordedDetector),
        &board,
        &stats,
        &config,
    )
    .await
    .unwrap();

    assert_eq!(summary.frames, 31);
    assert_eq!(summary.detections, 2);
    assert_eq!(summary.inference_failures, 1);
    assert!(dir.path().join("outputs").join("result_abc123.stats.json").exists());

    // Blank contributor is credited to the placeholder
    let report = stats.report().await;
    assert_eq!(report.leaderboard[0].contributor, "EcoCitizen");
    assert_eq!(report.category_stats.trash, 1);
    assert_eq!(report.category_stats.bio, 1);

    // A fresh aggregator sees the persisted totals
    let reopened = StatsAggregator::open(&config.stats).await;
    assert_eq!(reopened.report().await, report);

    match board.status("abc123") {
        Some(StreamStatus::Done(done)) => assert_eq!(done.frames, 31),
        other => panic!("Expected done status, got {:?}", other),
    }
}

#[tokio::test]
async fn test_image_and_stream_share_aggregate() {
    let dir = tempfile::tempdir().unwrap();
    let stats = StatsAggregator::open(&StatsConfig {
        path: dir.path().join("global_stats.json"),
        ..StatsConfig::default()
    })
    .await;

    let detections = vec![
        Detection::new(square(0.0, 0.0, 10.0), "rov", 0.9),
        Detection::new(square(0.0, 0.0, 10.0), "bottle", 0.9),
        Detection::new(square(50.0, 0.0, 10.0), "bottle", 0.8),
    ];
    let payload = serde_json::to_vec(&reefwatch_eye::ReplayFrame::detected(detections)).unwrap();
    let frame = Frame {
        index: 1,
        width: 640,
        height: 480,
        data: payload.into(),
    };

    let summary = process_image("A", frame, Arc::new(RecordedDetector), &stats).await.unwrap();
    assert_eq!(summary.detections, 3);

    stats.record("A", 5, &ClassCounts::from([("trash".to_string(), 5)])).await.unwrap();

    let report = stats.report().await;
    assert_eq!(report.total_media, 2);
    assert_eq!(report.total_detections, 8);
    assert_eq!(report.category_stats.rov, 1);
    assert_eq!(report.category_stats.trash, 7);
    assert_eq!(report.leaderboard[0].total, 8);
}
