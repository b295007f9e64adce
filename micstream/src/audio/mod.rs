/// Microphone capture and the capture-device seam
pub mod capture;

/// Fixed-shape PCM chunks, silence, timestamps
pub mod chunk;

/// Audio device enumeration and selection
pub mod device;

/// Audio-related error types
pub mod error;

/// Fixed amplification with saturation
pub mod gain;

/// Per-connection frame production
pub mod producer;

/// Process-wide audio host guard
pub mod subsystem;

// Re-export commonly used types
pub use capture::{AudioSource, CaptureBackend, CaptureDevice, CpalBackend, DEFAULT_READ_TIMEOUT, MAX_READ_TIMEOUT};
pub use chunk::{AudioChunk, AudioFrame, SilenceGenerator, CHUNK_DURATION, CHUNK_SAMPLES, SAMPLE_RATE};
pub use device::{list_input_devices, parse_device_selection, DeviceDescriptor};
pub use error::{CaptureError, CaptureResult, ReadError, ReadResult};
pub use gain::{GainStage, DEFAULT_GAIN};
pub use producer::{FrameProducer, ProducerMode};
pub use subsystem::AudioSubsystem;
