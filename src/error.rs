//! Central error types for the frame-generation pipeline.
//!
//! Every fallible sub-operation returns an explicit outcome carrying one of
//! these kinds. The orchestrator recovers from the per-tick kinds (ingest and
//! dispatch failures); everything else propagates up and ends the loop.

use thiserror::Error;

/// Main error type for pipeline operations.
#[derive(Error, Debug)]
pub enum FrameGenError {
    /// Device, queue, swap chain, or heap creation failed. Fatal.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// The desktop duplication session was invalidated (mode change, UAC,
    /// another duplicator). The capture must be recreated.
    #[error("Capture access lost; the duplication must be recreated")]
    CaptureAccessLost,

    /// Screen capture failed for a reason other than timeout or access loss.
    #[error("Capture failed: {0}")]
    Capture(String),

    /// Moving a captured frame onto the compute device failed. Per-tick;
    /// the current tick is dropped.
    #[error("Frame ingest failed: {0}")]
    IngestFailed(String),

    /// Recording or submitting a compute dispatch failed. Per-tick; the
    /// current tick is dropped and descriptor caches are invalidated.
    #[error("Compute dispatch failed: {0}")]
    ComputeDispatchFailed(String),

    /// The swap chain reported a removed device on present. Fatal.
    #[error("Present failed, device lost: {0}")]
    PresentDeviceLost(String),

    /// Settings failed validation at load or save time.
    #[error("Configuration invalid: {0}")]
    ConfigurationInvalid(String),

    /// Config file or log file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Windows API error that does not map to a more specific kind.
    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    Windows(#[from] windows::core::Error),
}

impl From<String> for FrameGenError {
    fn from(msg: String) -> Self {
        FrameGenError::Initialization(msg)
    }
}

/// Type alias for Results using [`FrameGenError`].
pub type FrameGenResult<T> = Result<T, FrameGenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FrameGenError::IngestFailed("map failed".to_string());
        assert_eq!(err.to_string(), "Frame ingest failed: map failed");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no config");
        let err: FrameGenError = io_err.into();
        assert!(matches!(err, FrameGenError::Io(_)));
    }

    #[test]
    fn test_fatal_kinds_format() {
        let lost = FrameGenError::PresentDeviceLost("0x887a0005".to_string());
        assert!(lost.to_string().contains("device lost"));

        let access = FrameGenError::CaptureAccessLost;
        assert!(access.to_string().contains("recreated"));
    }
}
