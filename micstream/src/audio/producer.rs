//! Per-connection audio track source
//!
//! A [`FrameProducer`] hands the transport one timestamped chunk per tick and
//! never fails. It owns at most one capture device:
//!
//! ```text
//! open() ──ok──▶ DeviceReady ──read ok──▶ boosted chunk
//!    │                 └──────read err──▶ silent chunk (device stays open)
//!    └──err──▶ Silent ──────────────────▶ silent chunk (device never retried)
//! ```
//!
//! Every frame carries the next timestamp in sequence, whichever branch
//! produced it.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::audio::capture::{CaptureBackend, CaptureDevice};
use crate::audio::chunk::{AudioChunk, AudioFrame, SilenceGenerator, CHUNK_SAMPLES};
use crate::audio::error::{ReadError, ReadResult};
use crate::audio::gain::GainStage;

/// Which branch a producer is serving frames from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerMode {
    /// Device open; frames are boosted microphone audio
    DeviceReady,
    /// Device never opened, or released; frames are silence
    Silent,
}

type SharedDevice = Arc<Mutex<Box<dyn CaptureDevice>>>;

/// Media track source for one peer connection
pub struct FrameProducer {
    device: Option<SharedDevice>,
    gain: GainStage,
    next_pts: u64,
    frames_produced: u64,
    read_errors: u64,
    /// Last read failed; repeats are logged quietly
    failing: bool,
}

impl FrameProducer {
    /// Open the capture device and build a producer around it
    ///
    /// The open runs on the blocking pool. Failure is logged and yields a
    /// producer in silent mode; it is never surfaced to the caller.
    pub async fn open(
        backend: Arc<dyn CaptureBackend>,
        device_index: Option<usize>,
        gain: GainStage,
    ) -> Self {
        let opened = tokio::task::spawn_blocking(move || backend.open(device_index)).await;

        let device = match opened {
            Ok(Ok(device)) => Some(device),
            Ok(Err(e)) => {
                error!("Failed to open microphone: {}", e);
                None
            }
            Err(e) => {
                error!("Microphone open task failed: {}", e);
                None
            }
        };

        Self::from_device(device, gain)
    }

    /// Build a producer around an already-opened device (or none)
    pub fn from_device(device: Option<Box<dyn CaptureDevice>>, gain: GainStage) -> Self {
        if device.is_none() {
            warn!("No microphone available, track will stream silence");
        }

        Self {
            device: device.map(|d| Arc::new(Mutex::new(d))),
            gain,
            next_pts: 0,
            frames_produced: 0,
            read_errors: 0,
            failing: false,
        }
    }

    /// A producer that only ever streams silence
    pub fn silent() -> Self {
        Self::from_device(None, GainStage::default())
    }

    /// Produce the next frame
    ///
    /// Blocking device reads are offloaded so the async runtime keeps
    /// serving other connections meanwhile.
    pub async fn next_frame(&mut self) -> AudioFrame {
        let chunk = match self.device.as_ref() {
            Some(device) => {
                let device = Arc::clone(device);
                let read = tokio::task::spawn_blocking(move || device.lock().read_chunk())
                    .await
                    .unwrap_or_else(|e| Err(ReadError::Task(e.to_string())));
                self.boost_or_silence(read)
            }
            None => SilenceGenerator::chunk(),
        };

        self.stamp(chunk)
    }

    fn boost_or_silence(&mut self, read: ReadResult<AudioChunk>) -> AudioChunk {
        match read {
            Ok(chunk) => {
                if self.failing {
                    info!(read_errors = self.read_errors, "Audio stream recovered");
                    self.failing = false;
                }
                self.gain.apply(chunk)
            }
            Err(e) => {
                self.read_errors += 1;
                if self.failing {
                    debug!("Error reading audio stream: {}", e);
                } else {
                    error!("Error reading audio stream: {}", e);
                    self.failing = true;
                }
                SilenceGenerator::chunk()
            }
        }
    }

    fn stamp(&mut self, chunk: AudioChunk) -> AudioFrame {
        let frame = AudioFrame {
            chunk,
            pts: self.next_pts,
        };
        self.next_pts += CHUNK_SAMPLES as u64;
        self.frames_produced += 1;
        frame
    }

    pub fn mode(&self) -> ProducerMode {
        if self.device.is_some() {
            ProducerMode::DeviceReady
        } else {
            ProducerMode::Silent
        }
    }

    /// Timestamp the next frame will carry
    pub fn next_pts(&self) -> u64 {
        self.next_pts
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames_produced
    }

    pub fn read_errors(&self) -> u64 {
        self.read_errors
    }

    /// Release the capture device
    ///
    /// Waits for any in-flight read to finish first. Later frames are silent.
    pub async fn close(&mut self) {
        if let Some(device) = self.device.take() {
            let closed = tokio::task::spawn_blocking(move || device.lock().close()).await;
            if let Err(e) = closed {
                warn!("Microphone close task failed: {}", e);
            }
            info!(
                frames = self.frames_produced,
                read_errors = self.read_errors,
                "Audio track stopped"
            );
        }
    }
}

impl Drop for FrameProducer {
    /// Closing joins the capture thread, so inside a runtime it goes to the
    /// blocking pool
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            debug!("Releasing microphone on drop");
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(move || device.lock().close());
                }
                Err(_) => device.lock().close(),
            }
        }
    }
}
