// Reefwatch Command Line Interface
// Replay recorded detection streams, record image jobs, inspect global stats

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use reefwatch_core::{Detection, ReefwatchConfig};
use reefwatch_eye::{
    process_image, run_stream, Frame, ProgressBoard, RecordedDetector, ReplayFrame, ReplaySource,
    StreamRequest, StreamStatus,
};
use reefwatch_storage::{cleanup_old_files, clear_folders, spawn_cleanup_worker, StatsAggregator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reefwatch")]
#[command(about = "Reefwatch - unique object counts for underwater detection streams", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (JSON, TOML, or YAML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay recorded detection streams concurrently and record the results
    Replay {
        /// JSON-lines recordings, one stream each
        #[arg(required = true)]
        recordings: Vec<PathBuf>,

        /// Name credited on the leaderboard
        #[arg(long, default_value = "")]
        contributor: String,

        /// Write per-stream summaries to this directory
        #[arg(long)]
        summary_dir: Option<PathBuf>,
    },

    /// Record one image job from a detection list
    Image {
        /// JSON file: an array of detections, or {"detections": [...]}
        detections: PathBuf,

        /// Name credited on the leaderboard
        #[arg(long, default_value = "")]
        contributor: String,
    },

    /// Show global stats and the leaderboard
    Stats {
        /// Leaderboard entries to show
        #[arg(long)]
        top: Option<usize>,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove stale files from the configured folders
    Cleanup {
        /// Remove everything regardless of age
        #[arg(long)]
        all: bool,

        /// Override the configured maximum age, in seconds
        #[arg(long)]
        max_age: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Replay { recordings, contributor, summary_dir } => {
            let mut config = config;
            if summary_dir.is_some() {
                config.pipeline.summary_dir = summary_dir;
            }
            replay(recordings, contributor, config).await?;
        }
        Commands::Image { detections, contributor } => {
            image(detections, contributor, &config).await?;
        }
        Commands::Stats { top, json } => {
            show_stats(&config, top, json).await?;
        }
        Commands::Cleanup { all, max_age } => {
            cleanup(&config, all, max_age).await;
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<ReefwatchConfig> {
    let mut config = match &cli.config {
        Some(path) => ReefwatchConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ReefwatchConfig::default(),
    };
    config.apply_env();
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn replay(
    recordings: Vec<PathBuf>,
    contributor: String,
    config: ReefwatchConfig,
) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let stats = Arc::new(StatsAggregator::open(&config.stats).await);
    let progress = ProgressBoard::new(config.pipeline.max_finished_streams);

    let cleanup_worker = if config.cleanup.enabled {
        Some(spawn_cleanup_worker(config.cleanup.clone()))
    } else {
        None
    };

    let mut streams = Vec::with_capacity(recordings.len());
    for recording in recordings {
        let stream_id = uuid::Uuid::new_v4().to_string();
        info!("Stream {}: replaying {}", stream_id, recording.display());

        let request = StreamRequest::new(stream_id.clone(), contributor.clone());
        let stats = Arc::clone(&stats);
        let progress = Arc::clone(&progress);
        let config = Arc::clone(&config);
        let handle = tokio::spawn(async move {
            run_stream(
                request,
                ReplaySource::open(recording),
                Arc::new(RecordedDetector),
                &progress,
                stats.as_ref(),
                &config,
            )
            .await
        });
        streams.push((stream_id, handle));
    }

    let mut failed = 0;
    for (stream_id, handle) in streams {
        match handle.await {
            Ok(Ok(summary)) => {
                println!(
                    "✅ {}: {} unique objects in {} frames {:?}",
                    stream_id, summary.detections, summary.frames, summary.class_counts
                );
            }
            Ok(Err(e)) => {
                failed += 1;
                match progress.status(&stream_id) {
                    Some(StreamStatus::Done(summary)) => println!(
                        "⚠️  {}: {} unique objects, stats not saved: {}",
                        stream_id, summary.detections, e
                    ),
                    _ => println!("❌ {}: {}", stream_id, e),
                }
            }
            Err(e) => {
                failed += 1;
                error!("Stream {} task failed: {}", stream_id, e);
            }
        }
    }

    if let Some(worker) = cleanup_worker {
        worker.abort();
    }

    if failed > 0 {
        anyhow::bail!("{} stream(s) failed", failed);
    }
    Ok(())
}

async fn image(path: PathBuf, contributor: String, config: &ReefwatchConfig) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    // Accept a bare detection list as well as a recorded frame
    let payload = match serde_json::from_slice::<Vec<Detection>>(&bytes) {
        Ok(detections) => serde_json::to_vec(&ReplayFrame::detected(detections))?,
        Err(_) => bytes,
    };
    let frame = Frame {
        index: 1,
        width: 0,
        height: 0,
        data: Bytes::from(payload),
    };

    let stats = StatsAggregator::open(&config.stats).await;
    let summary = process_image(&contributor, frame, Arc::new(RecordedDetector), &stats).await?;
    println!(
        "✅ Image recorded: {} detections {:?}",
        summary.detections, summary.class_counts
    );
    Ok(())
}

async fn show_stats(config: &ReefwatchConfig, top: Option<usize>, json: bool) -> anyhow::Result<()> {
    let stats = StatsAggregator::open(&config.stats).await;
    let mut report = stats.report().await;
    if let Some(top) = top {
        report.leaderboard = stats.top_contributors(top).await;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("📊 Global stats ({})", stats.path().display());
    println!("  Total detections: {}", report.total_detections);
    println!("  Total media:      {}", report.total_media);
    println!(
        "  Categories:       trash {} / bio {} / rov {}",
        report.category_stats.trash, report.category_stats.bio, report.category_stats.rov
    );
    println!("🏆 Leaderboard:");
    for (rank, entry) in report.leaderboard.iter().enumerate() {
        println!("  {}. {} ({})", rank + 1, entry.contributor, entry.total);
    }
    Ok(())
}

async fn cleanup(config: &ReefwatchConfig, all: bool, max_age: Option<u64>) {
    let folders = &config.cleanup.folders;
    let removed = if all {
        clear_folders(folders).await
    } else {
        let max_age = Duration::from_secs(max_age.unwrap_or(config.cleanup.max_age_seconds));
        cleanup_old_files(folders, max_age).await
    };
    println!("🧹 Removed {} entries", removed);
}
