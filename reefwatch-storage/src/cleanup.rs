//! Removal of stale uploads and rendered outputs
//!
//! Failures here are logged and skipped; cleanup never aborts a caller.

use reefwatch_core::config::CleanupConfig;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Delete one file if it exists. Returns whether something was removed.
pub async fn delete_file(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    match fs::remove_file(path).await {
        Ok(()) => {
            info!("Cleanup: deleted {}", path.display());
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Cleanup error deleting {}: {}", path.display(), e);
            false
        }
    }
}

/// Empty each folder, leaving the folder itself in place.
/// Returns the number of entries removed.
pub async fn clear_folders(folders: &[PathBuf]) -> usize {
    let mut removed = 0;
    for folder in folders {
        let entries = match collect_entries(folder).await {
            Some(entries) => entries,
            None => continue,
        };
        info!("Cleanup: clearing folder {}", folder.display());
        for path in entries {
            if remove_entry(&path).await {
                removed += 1;
            }
        }
    }
    removed
}

/// Delete entries last modified at least `max_age` ago.
/// Returns the number of entries removed.
pub async fn cleanup_old_files(folders: &[PathBuf], max_age: Duration) -> usize {
    let now = SystemTime::now();
    let mut removed = 0;

    for folder in folders {
        let entries = match collect_entries(folder).await {
            Some(entries) => entries,
            None => continue,
        };

        for path in entries {
            let modified = match fs::symlink_metadata(&path).await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    warn!("Cleanup error for {}: {}", path.display(), e);
                    continue;
                }
            };

            let age = now.duration_since(modified).unwrap_or_default();
            if age >= max_age && remove_entry(&path).await {
                info!("Cleanup: removed old entry {}", path.display());
                removed += 1;
            }
        }
    }

    removed
}

/// Run [`cleanup_old_files`] every `interval_seconds` until the handle is
/// aborted. The first pass runs immediately.
pub fn spawn_cleanup_worker(config: CleanupConfig) -> JoinHandle<()> {
    let interval = Duration::from_secs(config.interval_seconds.max(1));
    let max_age = Duration::from_secs(config.max_age_seconds);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            debug!("Cleanup worker: running periodic cleanup");
            let removed = cleanup_old_files(&config.folders, max_age).await;
            if removed > 0 {
                info!("Cleanup worker: removed {} stale entries", removed);
            }
        }
    })
}

async fn collect_entries(folder: &Path) -> Option<Vec<PathBuf>> {
    let mut dir = match fs::read_dir(folder).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Cleanup error reading {}: {}", folder.display(), e);
            return None;
        }
    };

    let mut entries = Vec::new();
    loop {
        match dir.next_entry().await {
            Ok(Some(entry)) => entries.push(entry.path()),
            Ok(None) => break,
            Err(e) => {
                warn!("Cleanup error listing {}: {}", folder.display(), e);
                break;
            }
        }
    }
    Some(entries)
}

async fn remove_entry(path: &Path) -> bool {
    let is_dir = match fs::symlink_metadata(path).await {
        Ok(meta) => meta.is_dir(),
        Err(e) => {
            warn!("Failed to inspect {}: {}", path.display(), e);
            return false;
        }
    };

    let result = if is_dir {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };

    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to delete {}: {}", path.display(), e);
            false
        }
    }
}
