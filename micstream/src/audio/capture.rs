use crate::audio::chunk::{AudioChunk, CHANNELS, CHUNK_SAMPLES, SAMPLE_RATE};
use crate::audio::device::{find_input_device, list_input_devices, DeviceDescriptor};
use crate::audio::error::{CaptureError, CaptureResult, ReadError, ReadResult};
use crate::audio::subsystem::AudioSubsystem;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{
    BufferSize, Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream,
    StreamConfig, SupportedBufferSize, SupportedStreamConfig,
};
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Ring capacity between the audio callback and `read_chunk` (500 ms)
const RING_CAPACITY: usize = CHUNK_SAMPLES * 25;

/// Buffered audio beyond this is stale and gets dropped (100 ms)
const MAX_BACKLOG: usize = CHUNK_SAMPLES * 5;

/// How long `open` waits for the capture thread to report
const START_TIMEOUT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Default upper bound on one blocking read (two chunk periods)
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(40);

/// Largest accepted read timeout (five chunk periods)
pub const MAX_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// An open capture device producing fixed-size chunks
///
/// `read_chunk` blocks; callers on an async runtime must offload it.
pub trait CaptureDevice: Send {
    /// Block until one full chunk is available
    fn read_chunk(&mut self) -> ReadResult<AudioChunk>;

    /// Stop and release the device. Safe to call repeatedly.
    fn close(&mut self);
}

/// Something that can open capture devices
pub trait CaptureBackend: Send + Sync {
    fn open(&self, device_index: Option<usize>) -> CaptureResult<Box<dyn CaptureDevice>>;

    fn list_input_devices(&self) -> CaptureResult<Vec<DeviceDescriptor>>;
}

/// Capture backend over the platform audio host
pub struct CpalBackend {
    subsystem: Arc<AudioSubsystem>,
    read_timeout: Duration,
}

impl CpalBackend {
    pub fn new(subsystem: Arc<AudioSubsystem>, read_timeout: Duration) -> Self {
        Self {
            subsystem,
            read_timeout,
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new(AudioSubsystem::shared(), DEFAULT_READ_TIMEOUT)
    }
}

impl CaptureBackend for CpalBackend {
    fn open(&self, device_index: Option<usize>) -> CaptureResult<Box<dyn CaptureDevice>> {
        let source = AudioSource::open(Arc::clone(&self.subsystem), device_index, self.read_timeout)?;
        Ok(Box::new(source))
    }

    fn list_input_devices(&self) -> CaptureResult<Vec<DeviceDescriptor>> {
        list_input_devices(&self.subsystem)
    }
}

/// Microphone capture at 48 kHz mono s16
///
/// cpal streams cannot move between threads, so each source owns a
/// dedicated capture thread that builds the stream, keeps it alive and drops
/// it again. Samples reach `read_chunk` through a lock-free ring.
pub struct AudioSource {
    reader: ChunkReader,
    /// Last error reported by the stream callback, surfaced once
    stream_error: Arc<Mutex<Option<String>>>,
    /// Dropping or signalling this ends the capture thread
    stop_tx: Option<mpsc::Sender<()>>,
    /// Capture thread (None once closed)
    worker: Option<JoinHandle<()>>,
    device_name: String,
}

impl AudioSource {
    /// Open an input device and start capturing
    ///
    /// # Arguments
    /// * `subsystem` - Guard serialising host access
    /// * `device_index` - Index from `list_input_devices`, or None for the default device
    /// * `read_timeout` - Upper bound for one `read_chunk`
    ///
    /// # Errors
    /// Returns a `CaptureError` when the device is missing, busy, or cannot
    /// capture at 48 kHz in a convertible sample format.
    ///
    /// # Example
    /// ```no_run
    /// use micstream_lib::audio::{AudioSource, AudioSubsystem, CaptureDevice, DEFAULT_READ_TIMEOUT};
    ///
    /// let mut source = AudioSource::open(AudioSubsystem::shared(), None, DEFAULT_READ_TIMEOUT).unwrap();
    /// let chunk = source.read_chunk().unwrap();
    /// assert_eq!(chunk.len(), 960);
    /// source.close();
    /// ```
    pub fn open(
        subsystem: Arc<AudioSubsystem>,
        device_index: Option<usize>,
        read_timeout: Duration,
    ) -> CaptureResult<Self> {
        let stream_error = Arc::new(Mutex::new(None));
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel();

        let errors = Arc::clone(&stream_error);
        let worker = thread::Builder::new()
            .name(format!("mic-capture-{}", describe(device_index)))
            .spawn(move || capture_thread(subsystem, device_index, errors, ready_tx, stop_rx))?;

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok((device_name, consumer))) => {
                info!(
                    "Opened microphone device index: {} ({})",
                    describe(device_index),
                    device_name
                );
                Ok(Self {
                    reader: ChunkReader::new(consumer, read_timeout),
                    stream_error,
                    stop_tx: Some(stop_tx),
                    worker: Some(worker),
                    device_name,
                })
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                // The thread notices the closed stop channel and cleans up on its own
                drop(stop_tx);
                Err(CaptureError::StartTimeout(START_TIMEOUT))
            }
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn is_open(&self) -> bool {
        self.worker.is_some()
    }

    /// The device stopped delivering; reads fail at once until it resumes
    pub fn is_stalled(&self) -> bool {
        self.reader.is_stalled()
    }
}

impl CaptureDevice for AudioSource {
    fn read_chunk(&mut self) -> ReadResult<AudioChunk> {
        let Some(worker) = self.worker.as_ref() else {
            return Err(ReadError::Closed);
        };

        if let Some(message) = self.stream_error.lock().take() {
            self.reader.stall();
            return Err(ReadError::Stream(message));
        }

        self.reader.read(|| !worker.is_finished())
    }

    fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Capture thread for {} panicked", self.device_name);
            }
            info!("Closed microphone {}", self.device_name);
        }
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read side of the callback ring, cut into chunks
///
/// A read that times out (or follows a stream error) marks the reader
/// stalled. While stalled, reads return at once unless a full chunk is
/// already buffered, so the caller keeps its frame clock with silence until
/// the device delivers again.
struct ChunkReader {
    consumer: HeapCons<i16>,
    read_timeout: Duration,
    stalled: bool,
}

impl ChunkReader {
    fn new(consumer: HeapCons<i16>, read_timeout: Duration) -> Self {
        Self {
            consumer,
            read_timeout,
            stalled: false,
        }
    }

    fn stall(&mut self) {
        if !self.stalled {
            warn!("Microphone stalled, streaming silence until audio resumes");
        }
        self.stalled = true;
    }

    fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// One chunk, waiting at most the read timeout (not at all when stalled)
    fn read(&mut self, is_alive: impl Fn() -> bool) -> ReadResult<AudioChunk> {
        let backlog = self.consumer.occupied_len();
        if backlog > MAX_BACKLOG {
            let dropped = self.consumer.skip(backlog - CHUNK_SAMPLES);
            debug!(dropped, "Discarded stale capture backlog");
        }

        let wait = if self.stalled { Duration::ZERO } else { self.read_timeout };
        let deadline = Instant::now() + wait;
        while self.consumer.occupied_len() < CHUNK_SAMPLES {
            if !is_alive() {
                return Err(ReadError::Closed);
            }
            if Instant::now() >= deadline {
                self.stall();
                return Err(ReadError::Timeout(wait));
            }
            thread::sleep(POLL_INTERVAL);
        }

        if self.stalled {
            info!("Microphone audio resumed");
            self.stalled = false;
        }

        let mut samples = vec![0i16; CHUNK_SAMPLES];
        let read = self.consumer.pop_slice(&mut samples);
        samples.truncate(read);
        AudioChunk::from_samples(samples)
    }
}

type ReadySender = mpsc::Sender<CaptureResult<(String, HeapCons<i16>)>>;

fn capture_thread(
    subsystem: Arc<AudioSubsystem>,
    device_index: Option<usize>,
    errors: Arc<Mutex<Option<String>>>,
    ready_tx: ReadySender,
    stop_rx: mpsc::Receiver<()>,
) {
    let opened = subsystem.with_host(|host| {
        let device = find_input_device(host, device_index)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let (stream, consumer) = build_capture_stream(&device, &errors)?;
        stream
            .play()
            .map_err(|e| CaptureError::StreamError(e.to_string()))?;
        Ok::<_, CaptureError>((stream, name, consumer))
    });

    let stream = match opened {
        Ok((stream, name, consumer)) => {
            if ready_tx.send(Ok((name, consumer))).is_err() {
                subsystem.release(stream);
                return;
            }
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    // Park until the owner closes or drops the source
    let _ = stop_rx.recv();
    subsystem.release(stream);
    debug!("Capture thread exiting");
}

/// Build a 48 kHz input stream feeding a fresh ring
///
/// Tries a buffer of exactly one chunk first, then the device default.
fn build_capture_stream(
    device: &Device,
    errors: &Arc<Mutex<Option<String>>>,
) -> CaptureResult<(Stream, HeapCons<i16>)> {
    let supported = choose_config(device)?;

    let mut buffer_sizes = Vec::with_capacity(2);
    if let SupportedBufferSize::Range { min, max } = supported.buffer_size() {
        if (*min..=*max).contains(&(CHUNK_SAMPLES as u32)) {
            buffer_sizes.push(BufferSize::Fixed(CHUNK_SAMPLES as u32));
        }
    }
    buffer_sizes.push(BufferSize::Default);

    let mut last_error = None;
    for buffer_size in buffer_sizes {
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: SampleRate(SAMPLE_RATE),
            buffer_size: buffer_size.clone(),
        };

        let (producer, consumer) = HeapRb::<i16>::new(RING_CAPACITY).split();
        let errors = Arc::clone(errors);

        let built = match supported.sample_format() {
            SampleFormat::I16 => build_stream::<i16>(device, &config, producer, errors),
            SampleFormat::F32 => build_stream::<f32>(device, &config, producer, errors),
            SampleFormat::I32 => build_stream::<i32>(device, &config, producer, errors),
            SampleFormat::U16 => build_stream::<u16>(device, &config, producer, errors),
            SampleFormat::I8 => build_stream::<i8>(device, &config, producer, errors),
            SampleFormat::U8 => build_stream::<u8>(device, &config, producer, errors),
            SampleFormat::F64 => build_stream::<f64>(device, &config, producer, errors),
            other => return Err(CaptureError::UnsupportedFormat(format!("{:?}", other))),
        };

        match built {
            Ok(stream) => {
                debug!(
                    "Capture stream: {} Hz, {} channels, {:?}, buffer {:?}",
                    SAMPLE_RATE,
                    config.channels,
                    supported.sample_format(),
                    buffer_size
                );
                return Ok((stream, consumer));
            }
            Err(e) => {
                warn!("Failed to build stream with buffer {:?}: {}", buffer_size, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| CaptureError::StreamBuildFailed("no buffer size".to_string())))
}

/// Pick the 48 kHz configuration closest to mono s16
fn choose_config(device: &Device) -> CaptureResult<SupportedStreamConfig> {
    let rate = SampleRate(SAMPLE_RATE);

    let mut candidates: Vec<_> = device
        .supported_input_configs()?
        .filter(|c| c.min_sample_rate() <= rate && rate <= c.max_sample_rate())
        .collect();

    candidates.sort_by_key(|c| {
        (
            c.channels() != CHANNELS,
            format_rank(c.sample_format()),
            c.channels(),
        )
    });

    candidates
        .into_iter()
        .next()
        .map(|c| c.with_sample_rate(rate))
        .ok_or(CaptureError::UnsupportedRate(SAMPLE_RATE))
}

fn format_rank(format: SampleFormat) -> u8 {
    match format {
        SampleFormat::I16 => 0,
        SampleFormat::F32 => 1,
        SampleFormat::I32 => 2,
        _ => 3,
    }
}

/// Input stream that down-mixes to mono s16 and pushes into the ring
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut producer: HeapProd<i16>,
    errors: Arc<Mutex<Option<String>>>,
) -> CaptureResult<Stream>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    let sum: i32 = frame.iter().map(|&s| s.to_sample::<i16>() as i32).sum();
                    // A full ring means the reader fell behind; newest samples are dropped
                    let _ = producer.try_push((sum / frame.len() as i32) as i16);
                }
            },
            move |err| {
                error!("Audio stream error: {}", err);
                *errors.lock() = Some(err.to_string());
            },
            None,
        )
        .map_err(|e| CaptureError::StreamBuildFailed(e.to_string()))
}

fn describe(device_index: Option<usize>) -> String {
    device_index.map_or_else(|| "Default".to_string(), |i| i.to_string())
}
