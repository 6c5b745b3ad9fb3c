//! Error types for the meter

use thiserror::Error;

/// Meter error type
#[derive(Debug, Error)]
pub enum MeterError {
    /// Microphone access has not been granted
    #[error("microphone access has not been granted")]
    PermissionDenied,
    /// The input device could not be acquired at the capture configuration
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    /// A read from an open device failed
    #[error("audio read failed: {0}")]
    ReadFailed(String),
    /// A measurement session is already live
    #[error("a measurement session is already running")]
    AlreadyRunning,
    /// Invalid command line configuration
    #[error("configuration error: {0}")]
    Config(String),
    /// General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MeterError {
    /// Whether starting a fresh session may succeed without user action
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MeterError::ReadFailed(_))
    }
}

impl From<cpal::DevicesError> for MeterError {
    fn from(err: cpal::DevicesError) -> Self {
        MeterError::DeviceUnavailable(format!("failed to enumerate devices: {}", err))
    }
}

impl From<cpal::DeviceNameError> for MeterError {
    fn from(err: cpal::DeviceNameError) -> Self {
        MeterError::DeviceUnavailable(format!("failed to get device name: {}", err))
    }
}

impl From<cpal::SupportedStreamConfigsError> for MeterError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        MeterError::DeviceUnavailable(format!("failed to get supported stream configs: {}", err))
    }
}

impl From<cpal::BuildStreamError> for MeterError {
    fn from(err: cpal::BuildStreamError) -> Self {
        MeterError::DeviceUnavailable(format!("failed to build input stream: {}", err))
    }
}

impl From<cpal::PlayStreamError> for MeterError {
    fn from(err: cpal::PlayStreamError) -> Self {
        MeterError::DeviceUnavailable(format!("failed to start input stream: {}", err))
    }
}

/// Result type alias for meter operations
pub type MeterResult<T> = Result<T, MeterError>;
