//! Externally readable progress of running and finished streams
//!
//! Each stream owns one [`ProgressHandle`]. The board's map lock is taken
//! only to add or remove entries; a running stream writes its own slot.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use reefwatch_core::ClassCounts;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Counts as of the most recent committed frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total_unique_detections: u64,
    pub class_counts: ClassCounts,
    pub frames: u64,
}

/// Final totals of one stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub stream_id: String,
    pub contributor: String,
    pub detections: u64,
    pub class_counts: ClassCounts,
    pub frames: u64,
    pub inference_failures: u64,
    /// Set when the source failed mid-stream and the totals cover only the
    /// frames read before it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamStatus {
    Processing(Arc<ProgressSnapshot>),
    Done(Arc<StreamSummary>),
    Failed(String),
}

impl StreamStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamStatus::Processing(_))
    }
}

type Slot = Arc<RwLock<Arc<ProgressSnapshot>>>;

#[derive(Default)]
struct FinishedStreams {
    statuses: HashMap<String, StreamStatus>,
    order: VecDeque<String>,
}

/// Shared view over every stream's progress
pub struct ProgressBoard {
    live: RwLock<HashMap<String, Slot>>,
    finished: Mutex<FinishedStreams>,
    max_finished: usize,
}

impl ProgressBoard {
    /// Create a board retaining at most `max_finished` terminal statuses
    pub fn new(max_finished: usize) -> Arc<Self> {
        Arc::new(Self {
            live: RwLock::new(HashMap::new()),
            finished: Mutex::new(FinishedStreams::default()),
            max_finished,
        })
    }

    /// Start tracking a stream. A previous status under the same id is
    /// replaced.
    pub fn register(self: &Arc<Self>, stream_id: impl Into<String>) -> ProgressHandle {
        let stream_id = stream_id.into();
        let slot: Slot = Arc::new(RwLock::new(Arc::new(ProgressSnapshot::default())));

        {
            // Lock order: live, then finished
            let mut live = self.live.write();
            let mut finished = self.finished.lock();
            if live.insert(stream_id.clone(), Arc::clone(&slot)).is_some() {
                warn!("Stream {} registered while already running", stream_id);
            }
            if finished.statuses.remove(&stream_id).is_some() {
                finished.order.retain(|id| id != &stream_id);
            }
        }

        ProgressHandle {
            board: Arc::clone(self),
            stream_id,
            slot,
            closed: false,
        }
    }

    /// Current status, or `None` for unknown (or evicted) ids
    pub fn status(&self, stream_id: &str) -> Option<StreamStatus> {
        let live = self.live.read();
        if let Some(slot) = live.get(stream_id) {
            return Some(StreamStatus::Processing(Arc::clone(&*slot.read())));
        }
        // Held across both lookups so a closing stream is never missing
        let finished = self.finished.lock();
        finished.statuses.get(stream_id).cloned()
    }

    /// Ids of streams still processing
    pub fn active_streams(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.live.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn close(&self, stream_id: &str, slot: &Slot, status: StreamStatus) {
        let mut live = self.live.write();
        let mut finished = self.finished.lock();
        if !live.get(stream_id).map_or(false, |current| Arc::ptr_eq(current, slot)) {
            // Superseded by a newer registration under the same id
            debug!("Stream {} closed after being replaced", stream_id);
            return;
        }
        live.remove(stream_id);

        if finished.statuses.insert(stream_id.to_string(), status).is_none() {
            finished.order.push_back(stream_id.to_string());
        }
        while finished.order.len() > self.max_finished {
            if let Some(oldest) = finished.order.pop_front() {
                finished.statuses.remove(&oldest);
                debug!("Evicted finished stream {}", oldest);
            }
        }
    }
}

/// Write side of one stream's progress entry.
///
/// Dropping a handle that was never completed or failed marks the stream
/// failed, so pollers never see a stream stuck in processing.
pub struct ProgressHandle {
    board: Arc<ProgressBoard>,
    stream_id: String,
    slot: Slot,
    closed: bool,
}

impl ProgressHandle {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Replace the visible snapshot
    pub fn publish(&self, snapshot: ProgressSnapshot) {
        *self.slot.write() = Arc::new(snapshot);
    }

    pub fn complete(mut self, summary: StreamSummary) -> Arc<StreamSummary> {
        let summary = Arc::new(summary);
        self.close(StreamStatus::Done(Arc::clone(&summary)));
        summary
    }

    pub fn fail(mut self, message: impl Into<String>) {
        self.close(StreamStatus::Failed(message.into()));
    }

    fn close(&mut self, status: StreamStatus) {
        self.closed = true;
        self.board.close(&self.stream_id, &self.slot, status);
    }
}

impl Drop for ProgressHandle {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Stream {} ended without a result", self.stream_id);
            self.close(StreamStatus::Failed("stream ended without a result".to_string()));
        }
    }
}
