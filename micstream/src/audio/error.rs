use std::time::Duration;

use thiserror::Error;

/// Failure to open a capture device
///
/// Never fatal: a producer that hits one of these streams silence instead.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// No audio input device found
    #[error("No audio input device found")]
    DeviceNotFound,

    /// Index does not name an input device
    #[error("No input device at index {0}")]
    InvalidIndex(usize),

    /// Device cannot capture at the pipeline's sample rate
    #[error("Device does not support {0} Hz capture")]
    UnsupportedRate(u32),

    /// Device only offers a sample format we cannot convert
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildFailed(String),

    /// Audio stream refused to start
    #[error("Audio stream error: {0}")]
    StreamError(String),

    /// Capture thread never reported back
    #[error("Capture thread did not start within {0:?}")]
    StartTimeout(Duration),

    /// Capture thread could not be spawned
    #[error("Failed to spawn capture thread: {0}")]
    Thread(#[from] std::io::Error),

    /// cpal error
    #[error("cpal error: {0}")]
    CpalError(#[from] cpal::DevicesError),

    /// Supported config error
    #[error("Supported config error: {0}")]
    SupportedConfigError(#[from] cpal::SupportedStreamConfigsError),
}

/// Transient failure of a single read on an open device
///
/// The caller substitutes one silent frame and keeps the device open.
#[derive(Error, Debug)]
pub enum ReadError {
    /// Not enough audio arrived in time
    #[error("Timed out after {0:?} waiting for a full chunk")]
    Timeout(Duration),

    /// The backend reported an asynchronous stream error
    #[error("Audio stream error: {0}")]
    Stream(String),

    /// Chunk had the wrong number of samples
    #[error("Expected {expected} samples, got {actual}")]
    ShortChunk { expected: usize, actual: usize },

    /// Device already closed or its capture thread exited
    #[error("Capture device is closed")]
    Closed,

    /// The offloaded read task panicked or was cancelled
    #[error("Read task failed: {0}")]
    Task(String),
}

/// Result type for device open operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Result type for per-chunk reads
pub type ReadResult<T> = Result<T, ReadError>;
