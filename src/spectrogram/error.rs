//! Error taxonomy for the capture pipeline.
//!
//! Only `DeviceUnavailable` and `DeviceFailed` end a session. `DeviceOverflow` and
//! `InvalidFrame` cost at most one tick and are never forwarded to consumers.

use thiserror::Error;

/// Errors raised by frame sources and the pipeline driver.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// No usable device, or the device is already claimed by another session.
    #[error("Audio input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Capture backlog exceeded its capacity and stale samples were dropped.
    #[error("Audio input overflow: {dropped} samples dropped")]
    DeviceOverflow { dropped: usize },

    /// The device stopped delivering audio or reported a stream error.
    #[error("Audio input device failed: {0}")]
    DeviceFailed(String),

    /// A frame did not have the configured length.
    #[error("Invalid frame: expected {expected} samples, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },
}

impl CaptureError {
    /// Whether the error ends the capture session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CaptureError::DeviceUnavailable(_) | CaptureError::DeviceFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(CaptureError::DeviceUnavailable("none".into()).is_fatal());
        assert!(CaptureError::DeviceFailed("gone".into()).is_fatal());
        assert!(!CaptureError::DeviceOverflow { dropped: 10 }.is_fatal());
        assert!(!CaptureError::InvalidFrame {
            expected: 2048,
            actual: 12
        }
        .is_fatal());
    }
}
