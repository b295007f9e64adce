//! Fixed-shape PCM chunks and their timestamps
//!
//! Everything downstream of the capture device sees audio as [`AudioChunk`]s:
//! exactly [`CHUNK_SAMPLES`] signed 16-bit mono samples at [`SAMPLE_RATE`].

use std::time::Duration;

use crate::audio::error::{ReadError, ReadResult};

/// Capture and transmit sample rate (Hz)
pub const SAMPLE_RATE: u32 = 48_000;

/// Mono
pub const CHANNELS: u16 = 1;

/// Samples per chunk (20 ms @ 48 kHz)
pub const CHUNK_SAMPLES: usize = 960;

/// Wall-clock duration of one chunk
pub const CHUNK_DURATION: Duration = Duration::from_millis(20);

/// One chunk of signed 16-bit mono PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    samples: Box<[i16]>,
}

impl AudioChunk {
    /// Wrap a sample buffer, rejecting anything but exactly one chunk
    pub fn from_samples(samples: Vec<i16>) -> ReadResult<Self> {
        if samples.len() != CHUNK_SAMPLES {
            return Err(ReadError::ShortChunk {
                expected: CHUNK_SAMPLES,
                actual: samples.len(),
            });
        }

        Ok(Self {
            samples: samples.into_boxed_slice(),
        })
    }

    /// All-zero chunk
    pub fn silence() -> Self {
        Self {
            samples: vec![0i16; CHUNK_SAMPLES].into_boxed_slice(),
        }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Always [`CHUNK_SAMPLES`]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_silent(&self) -> bool {
        self.samples.iter().all(|&s| s == 0)
    }

    /// Little-endian s16 bytes, as audio APIs expect them on the wire
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    pub(crate) fn map_samples(self, f: impl Fn(i16) -> i16) -> Self {
        let mut samples = self.samples;
        for sample in samples.iter_mut() {
            *sample = f(*sample);
        }
        Self { samples }
    }
}

/// Zero-filled chunks for ticks with no real audio
pub struct SilenceGenerator;

impl SilenceGenerator {
    pub fn chunk() -> AudioChunk {
        AudioChunk::silence()
    }
}

/// One chunk plus its presentation timestamp
///
/// `pts` counts samples since the producing track started (time base 1/48000).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub chunk: AudioChunk,
    pub pts: u64,
}

impl AudioFrame {
    pub fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    /// Presentation time as a duration from the start of the track
    pub fn presentation_time(&self) -> Duration {
        Duration::from_micros(self.pts * 1_000_000 / SAMPLE_RATE as u64)
    }
}
