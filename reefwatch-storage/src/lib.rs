//! reefwatch-storage: durable contribution statistics and upload hygiene

pub mod stats;
pub mod cleanup;

pub use stats::{Category, CategoryStats, GlobalStats, LeaderboardEntry, StatsAggregator, StatsReport};
pub use cleanup::{cleanup_old_files, clear_folders, delete_file, spawn_cleanup_worker};
