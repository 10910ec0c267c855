//! Error types for reefwatch-eye

use reefwatch_core::Error as CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    /// The frame source could not be opened or read
    #[error("Source error: {0}")]
    Source(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl From<VisionError> for CoreError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::Core(inner) => inner,
            other => CoreError::Storage(format!("Vision error: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vision_error_display() {
        let err = VisionError::Source("cannot open clip.mp4".to_string());
        assert!(err.to_string().contains("Source error"));
        assert!(err.to_string().contains("clip.mp4"));
    }

    #[test]
    fn test_vision_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let vision_err: VisionError = io_err.into();
        match vision_err {
            VisionError::Io(_) => {}
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_vision_error_to_core_error() {
        let core_err: CoreError = VisionError::Inference("Test".to_string()).into();
        match core_err {
            CoreError::Storage(msg) => {
                assert!(msg.contains("Vision error"));
                assert!(msg.contains("Test"));
            }
            _ => panic!("Expected Storage error"),
        }
    }

    #[test]
    fn test_core_error_round_trips_unwrapped() {
        let vision_err: VisionError = CoreError::Storage("disk".to_string()).into();
        let core_err: CoreError = vision_err.into();
        assert!(matches!(core_err, CoreError::Storage(ref m) if m == "disk"));
    }
}
