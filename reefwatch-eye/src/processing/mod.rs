//! Identity tracking for detection streams

pub mod adaptive;
pub mod tracker;

pub use adaptive::TrackingParams;
pub use tracker::{CentroidTracker, Track, TrackMap};
