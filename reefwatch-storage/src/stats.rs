//! Cross-stream contribution statistics
//!
//! One aggregate is shared by every finishing stream and image job. All
//! mutation goes through [`StatsAggregator::record`], which holds a single
//! lock across the in-memory update and the durable write.

use async_trait::async_trait;
use reefwatch_core::config::StatsConfig;
use reefwatch_core::{ClassCounts, Error, Result, StatsSink};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const TRASH_KEYWORDS: &[&str] = &["trash", "plastic", "waste", "bottle", "can"];
const BIO_KEYWORDS: &[&str] = &["bio", "fish", "plant", "coral", "biology"];
const ROV_KEYWORDS: &[&str] = &["rov", "robot", "vehicle"];

/// Bucket a detected class is counted under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Trash,
    Bio,
    Rov,
}

impl Category {
    /// Case-insensitive substring match, trash first, then bio, then rov.
    /// Unrecognised labels count as trash.
    pub fn classify(class_name: &str) -> Self {
        let name = class_name.to_lowercase();
        let contains_any = |keywords: &[&str]| keywords.iter().any(|k| name.contains(k));

        if contains_any(TRASH_KEYWORDS) {
            Category::Trash
        } else if contains_any(BIO_KEYWORDS) {
            Category::Bio
        } else if contains_any(ROV_KEYWORDS) {
            Category::Rov
        } else {
            Category::Trash
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Trash => "trash",
            Category::Bio => "bio",
            Category::Rov => "rov",
        }
    }
}

/// Per-category detection totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    #[serde(default)]
    pub trash: u64,
    #[serde(default)]
    pub bio: u64,
    #[serde(default)]
    pub rov: u64,
}

impl CategoryStats {
    pub fn get(&self, category: Category) -> u64 {
        match category {
            Category::Trash => self.trash,
            Category::Bio => self.bio,
            Category::Rov => self.rov,
        }
    }

    pub fn add(&mut self, category: Category, count: u64) {
        let slot = match category {
            Category::Trash => &mut self.trash,
            Category::Bio => &mut self.bio,
            Category::Rov => &mut self.rov,
        };
        *slot = slot.saturating_add(count);
    }
}

/// The persisted aggregate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_detections: u64,
    pub total_media: u64,
    pub category_stats: CategoryStats,
    pub leaderboard: BTreeMap<String, u64>,
}

/// On-disk shape, which may predate category tracking
#[derive(Deserialize)]
struct StoredStats {
    #[serde(default)]
    total_detections: u64,
    #[serde(default)]
    total_media: u64,
    #[serde(default)]
    category_stats: Option<CategoryStats>,
    #[serde(default)]
    leaderboard: BTreeMap<String, u64>,
}

impl From<StoredStats> for GlobalStats {
    fn from(stored: StoredStats) -> Self {
        // Files written before categories existed count everything as trash
        let category_stats = stored.category_stats.unwrap_or_else(|| CategoryStats {
            trash: stored.total_detections,
            ..CategoryStats::default()
        });

        Self {
            total_detections: stored.total_detections,
            total_media: stored.total_media,
            category_stats,
            leaderboard: stored.leaderboard,
        }
    }
}

/// One leaderboard row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub contributor: String,
    pub total: u64,
}

/// Read view returned to status endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsReport {
    pub total_detections: u64,
    pub total_media: u64,
    pub category_stats: CategoryStats,
    pub leaderboard: Vec<LeaderboardEntry>,
}

impl GlobalStats {
    /// Parse a persisted aggregate, upgrading older layouts
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let stored: StoredStats = serde_json::from_slice(bytes)
            .map_err(|e| Error::Deserialization(format!("Invalid stats file: {}", e)))?;
        Ok(stored.into())
    }

    /// Apply one completed unit of work
    pub fn apply(&mut self, contributor: &str, total_detections: u64, class_counts: &ClassCounts) {
        self.total_detections = self.total_detections.saturating_add(total_detections);
        self.total_media = self.total_media.saturating_add(1);

        if class_counts.is_empty() {
            self.category_stats.add(Category::Trash, total_detections);
        } else {
            for (class_name, count) in class_counts {
                self.category_stats.add(Category::classify(class_name), *count);
            }
        }

        let entry = self.leaderboard.entry(contributor.to_string()).or_insert(0);
        *entry = entry.saturating_add(total_detections);
    }

    /// Contributors by total, highest first. Equal totals keep name order.
    pub fn top_contributors(&self, limit: usize) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<LeaderboardEntry> = self
            .leaderboard
            .iter()
            .map(|(contributor, total)| LeaderboardEntry {
                contributor: contributor.clone(),
                total: *total,
            })
            .collect();
        entries.sort_by(|a, b| b.total.cmp(&a.total));
        entries.truncate(limit);
        entries
    }

    pub fn report(&self, leaderboard_size: usize) -> StatsReport {
        StatsReport {
            total_detections: self.total_detections,
            total_media: self.total_media,
            category_stats: self.category_stats.clone(),
            leaderboard: self.top_contributors(leaderboard_size),
        }
    }
}

struct AggregateState {
    stats: GlobalStats,
    /// In-memory state holds increments the file does not
    dirty: bool,
}

/// Durable, lock-serialized owner of [`GlobalStats`]
pub struct StatsAggregator {
    path: PathBuf,
    default_contributor: String,
    leaderboard_size: usize,
    state: Mutex<AggregateState>,
}

impl StatsAggregator {
    /// Load the aggregate from `config.path`, starting empty if the file is
    /// missing or unreadable.
    pub async fn open(config: &StatsConfig) -> Self {
        let stats = load_stats(&config.path).await;
        info!(
            "Stats loaded from {}: {} detections across {} media",
            config.path.display(),
            stats.total_detections,
            stats.total_media
        );

        Self {
            path: config.path.clone(),
            default_contributor: config.default_contributor.clone(),
            leaderboard_size: config.leaderboard_size,
            state: Mutex::new(AggregateState { stats, dirty: false }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blank names are credited to the configured placeholder. Other names
    /// are kept as given.
    pub fn resolve_contributor<'a>(&'a self, contributor: &'a str) -> &'a str {
        if contributor.trim().is_empty() {
            &self.default_contributor
        } else {
            contributor
        }
    }

    /// Apply one unit of work and persist it before returning.
    ///
    /// A failed write still leaves the increment applied in memory; the
    /// error is returned so the caller can retry with [`flush`](Self::flush).
    pub async fn record(
        &self,
        contributor: &str,
        total_detections: u64,
        class_counts: &ClassCounts,
    ) -> Result<()> {
        let contributor = self.resolve_contributor(contributor);
        let mut state = self.state.lock().await;

        state.stats.apply(contributor, total_detections, class_counts);
        state.dirty = true;
        debug!(
            "Recorded {} detections for {} ({} classes)",
            total_detections,
            contributor,
            class_counts.len()
        );

        match persist_stats(&self.path, &state.stats).await {
            Ok(()) => {
                state.dirty = false;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to persist stats to {}: {}", self.path.display(), e);
                Err(e)
            }
        }
    }

    /// Write the aggregate if an earlier write failed
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.dirty {
            return Ok(());
        }
        persist_stats(&self.path, &state.stats).await?;
        state.dirty = false;
        Ok(())
    }

    /// Whether in-memory totals are ahead of the file
    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.dirty
    }

    /// Full copy of the aggregate
    pub async fn snapshot(&self) -> GlobalStats {
        self.state.lock().await.stats.clone()
    }

    /// Totals plus the configured top-N leaderboard slice
    pub async fn report(&self) -> StatsReport {
        self.state.lock().await.stats.report(self.leaderboard_size)
    }

    pub async fn top_contributors(&self, limit: usize) -> Vec<LeaderboardEntry> {
        self.state.lock().await.stats.top_contributors(limit)
    }
}

#[async_trait]
impl StatsSink for StatsAggregator {
    async fn record(
        &self,
        contributor: &str,
        total_detections: u64,
        class_counts: &ClassCounts,
    ) -> Result<()> {
        StatsAggregator::record(self, contributor, total_detections, class_counts).await
    }
}

async fn load_stats(path: &Path) -> GlobalStats {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return GlobalStats::default(),
        Err(e) => {
            warn!("Failed to read stats file {}: {}. Starting empty.", path.display(), e);
            return GlobalStats::default();
        }
    };

    match GlobalStats::from_json(&bytes) {
        Ok(stats) => stats,
        Err(e) => {
            warn!("{} ({}). Starting empty.", e, path.display());
            GlobalStats::default()
        }
    }
}

async fn persist_stats(path: &Path, stats: &GlobalStats) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("Failed to create stats directory: {}", e)))?;
        }
    }

    let bytes = serde_json::to_vec(stats)
        .map_err(|e| Error::Serialization(format!("Failed to serialize stats: {}", e)))?;

    // Write to temp file, sync, then rename over the old aggregate
    let temp_path = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| Error::Storage(format!("Failed to create stats temp file: {}", e)))?;
        file.write_all(&bytes).await.map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            Error::Storage(format!("Failed to write stats: {}", e))
        })?;
        file.sync_all().await.map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            Error::Storage(format!("Failed to sync stats: {}", e))
        })?;
    }

    fs::rename(&temp_path, path).await.map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        Error::Storage(format!("Failed to rename stats file: {}", e))
    })?;

    Ok(())
}
