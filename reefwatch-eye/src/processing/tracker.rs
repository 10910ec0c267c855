//! Centroid tracking with greedy nearest-neighbour assignment
//!
//! Each call to [`CentroidTracker::update`] takes one frame's detections and
//! returns the live tracks. Matching compares track centroids (rows) against
//! detection centroids (columns):
//!
//! 1. every row picks its nearest column;
//! 2. rows are visited in ascending order of that nearest distance;
//! 3. a row whose column is already taken, or whose distance exceeds
//!    `max_distance`, stays unmatched for this frame.
//!
//! Rows are ordered by their own minimum, not by the global minimum of the
//! matrix, so a row can lose its nearest column to a row visited earlier even
//! when a cheaper pairing exists elsewhere. Unique-object counts depend on
//! this order; keep it.

use super::adaptive::TrackingParams;
use reefwatch_core::{BoundingBox, Detection, Point, TrackId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Tracked object with ID
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub centroid: Point,
    /// Label from the most recent matched detection
    pub class_name: String,
    /// Consecutive frames without a match
    pub disappeared: u32,
}

impl Track {
    /// Matched in the most recent frame
    pub fn is_visible(&self) -> bool {
        self.disappeared == 0
    }
}

/// Live tracks keyed by id. Ids are assigned in increasing order, so
/// iteration follows registration order.
pub type TrackMap = BTreeMap<TrackId, Track>;

/// Multi-object tracker for a single stream
#[derive(Debug, Clone)]
pub struct CentroidTracker {
    next_id: u64,
    tracks: TrackMap,
    max_disappeared: u32,
    max_distance: f32,
}

impl CentroidTracker {
    /// Create a new tracker
    pub fn new(max_disappeared: u32, max_distance: f32) -> Self {
        Self {
            next_id: 0,
            tracks: TrackMap::new(),
            max_disappeared,
            max_distance,
        }
    }

    pub fn with_params(params: TrackingParams) -> Self {
        Self::new(params.max_disappeared, params.max_distance)
    }

    pub fn max_disappeared(&self) -> u32 {
        self.max_disappeared
    }

    pub fn max_distance(&self) -> f32 {
        self.max_distance
    }

    /// Number of tracks ever registered by this tracker
    pub fn total_registered(&self) -> u64 {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Live tracks
    pub fn tracks(&self) -> &TrackMap {
        &self.tracks
    }

    /// Copy of all live tracks
    pub fn get_tracks(&self) -> Vec<Track> {
        self.tracks.values().cloned().collect()
    }

    /// Update tracker with one frame's detections
    pub fn update(&mut self, detections: &[Detection]) -> &TrackMap {
        let centroids: Vec<Point> = detections.iter().map(Detection::centroid).collect();
        let labels: Vec<&str> = detections.iter().map(|d| d.class_name.as_str()).collect();
        self.update_centroids(&centroids, &labels);
        &self.tracks
    }

    /// Update from parallel box and label lists.
    ///
    /// # Panics
    ///
    /// Panics if `boxes` and `labels` differ in length.
    pub fn update_columns<S: AsRef<str>>(&mut self, boxes: &[BoundingBox], labels: &[S]) -> &TrackMap {
        assert_eq!(
            boxes.len(),
            labels.len(),
            "every bounding box needs exactly one class label"
        );
        let centroids: Vec<Point> = boxes.iter().map(BoundingBox::centroid).collect();
        let labels: Vec<&str> = labels.iter().map(AsRef::as_ref).collect();
        self.update_centroids(&centroids, &labels);
        &self.tracks
    }

    fn update_centroids(&mut self, centroids: &[Point], labels: &[&str]) {
        if centroids.is_empty() {
            let ids: Vec<TrackId> = self.tracks.keys().copied().collect();
            for id in ids {
                self.mark_missing(id);
            }
            debug!("Tracking {} objects (no detections)", self.tracks.len());
            return;
        }

        if self.tracks.is_empty() {
            for (centroid, label) in centroids.iter().zip(labels) {
                self.register(*centroid, label);
            }
            debug!("Tracking {} objects", self.tracks.len());
            return;
        }

        let track_ids: Vec<TrackId> = self.tracks.keys().copied().collect();
        let track_centroids: Vec<Point> = self.tracks.values().map(|t| t.centroid).collect();
        let rows = track_ids.len();
        let cols = centroids.len();

        // Row-major distance matrix: tracks x detections
        let mut distances = Vec::with_capacity(rows * cols);
        for track_centroid in &track_centroids {
            for centroid in centroids {
                distances.push(track_centroid.distance(centroid));
            }
        }

        // Nearest column per row; the first column wins ties
        let mut best_cols = Vec::with_capacity(rows);
        let mut row_minimums = Vec::with_capacity(rows);
        for row in 0..rows {
            let row_distances = &distances[row * cols..(row + 1) * cols];
            let (col, min) = row_distances
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(col, d)| (col, *d))
                .unwrap_or((0, f32::INFINITY));
            best_cols.push(col);
            row_minimums.push(min);
        }

        // Stable sort keeps registration order among equal minimums
        let mut order: Vec<usize> = (0..rows).collect();
        order.sort_by(|&a, &b| row_minimums[a].total_cmp(&row_minimums[b]));

        let mut used_rows = vec![false; rows];
        let mut used_cols = vec![false; cols];

        for row in order {
            let col = best_cols[row];
            if used_rows[row] || used_cols[col] {
                continue;
            }

            // NaN distances never match
            let distance = distances[row * cols + col];
            if !(distance <= self.max_distance) {
                continue;
            }

            if let Some(track) = self.tracks.get_mut(&track_ids[row]) {
                track.centroid = centroids[col];
                track.class_name = labels[col].to_string();
                track.disappeared = 0;
            }
            used_rows[row] = true;
            used_cols[col] = true;
        }

        for (row, used) in used_rows.iter().enumerate() {
            if !used {
                self.mark_missing(track_ids[row]);
            }
        }

        for (col, used) in used_cols.iter().enumerate() {
            if !used {
                self.register(centroids[col], labels[col]);
            }
        }

        debug!("Tracking {} objects", self.tracks.len());
    }

    fn register(&mut self, centroid: Point, class_name: &str) {
        let id = TrackId(self.next_id);
        self.next_id += 1;
        self.tracks.insert(
            id,
            Track {
                id,
                centroid,
                class_name: class_name.to_string(),
                disappeared: 0,
            },
        );
    }

    /// Count one more missed frame, dropping the track once it passes the
    /// ceiling.
    fn mark_missing(&mut self, id: TrackId) {
        let expired = match self.tracks.get_mut(&id) {
            Some(track) => {
                track.disappeared = track.disappeared.saturating_add(1);
                track.disappeared > self.max_disappeared
            }
            None => false,
        };

        if expired {
            self.tracks.remove(&id);
            debug!("Deregistered track {}", id);
        }
    }
}

impl Default for CentroidTracker {
    fn default() -> Self {
        Self::with_params(TrackingParams::default())
    }
}
