//! Mock transport and capture backend shared by the integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use micstream_lib::audio::{
    AudioChunk, CaptureBackend, CaptureDevice, CaptureError, CaptureResult, DeviceDescriptor, FrameProducer,
    ReadError, ReadResult, CHUNK_SAMPLES, DEFAULT_READ_TIMEOUT,
};
use micstream_lib::rtc::{
    ConnectionId, IceConnectionState, IceStateObserver, NegotiationError, NegotiationResult, PeerConnection,
    PeerTransport, SdpKind, SessionDescription,
};

/// Smallest SDP the parser accepts
pub const MINIMAL_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

pub const MOCK_ANSWER_SDP: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=mock\r\nt=0 0\r\n";

pub fn offer_body() -> String {
    serde_json::json!({"sdp": MINIMAL_SDP, "type": "offer"}).to_string()
}

/// Negotiation step a mock connection fails at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    AddTrack,
    RemoteDescription,
    CreateAnswer,
}

pub struct MockConnection {
    id: ConnectionId,
    fail_at: Option<FailAt>,
    closes: AtomicUsize,
    observer: Mutex<Option<IceStateObserver>>,
    producer: Mutex<Option<FrameProducer>>,
    remote: Mutex<Option<SessionDescription>>,
    local: Mutex<Option<SessionDescription>>,
}

impl MockConnection {
    fn new(fail_at: Option<FailAt>) -> Self {
        Self {
            id: ConnectionId::new(),
            fail_at,
            closes: AtomicUsize::new(0),
            observer: Mutex::new(None),
            producer: Mutex::new(None),
            remote: Mutex::new(None),
            local: Mutex::new(None),
        }
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn has_track(&self) -> bool {
        self.producer.lock().is_some()
    }

    pub fn remote_kind(&self) -> Option<SdpKind> {
        self.remote.lock().as_ref().map(|d| d.kind)
    }

    /// Simulate an ICE state transition reported by the transport
    pub fn trigger_ice(&self, state: IceConnectionState) {
        if let Some(observer) = self.observer.lock().as_ref() {
            observer(state);
        }
    }

    fn fail(&self, step: FailAt) -> bool {
        self.fail_at == Some(step)
    }
}

#[async_trait]
impl PeerConnection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn add_audio_track(&self, producer: FrameProducer) -> NegotiationResult<()> {
        if self.fail(FailAt::AddTrack) {
            return Err(NegotiationError::AddTrack("mock refused track".to_string()));
        }
        *self.producer.lock() = Some(producer);
        Ok(())
    }

    fn on_ice_state_change(&self, observer: IceStateObserver) {
        *self.observer.lock() = Some(observer);
    }

    async fn set_remote_description(&self, description: SessionDescription) -> NegotiationResult<()> {
        if self.fail(FailAt::RemoteDescription) {
            return Err(NegotiationError::RemoteDescription("mock rejected offer".to_string()));
        }
        *self.remote.lock() = Some(description);
        Ok(())
    }

    async fn create_answer(&self) -> NegotiationResult<SessionDescription> {
        if self.fail(FailAt::CreateAnswer) {
            return Err(NegotiationError::CreateAnswer("mock has no answer".to_string()));
        }
        Ok(SessionDescription::answer(MOCK_ANSWER_SDP))
    }

    async fn set_local_description(&self, description: SessionDescription) -> NegotiationResult<()> {
        *self.local.lock() = Some(description);
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn close(&self) -> NegotiationResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        let producer = self.producer.lock().take();
        if let Some(mut producer) = producer {
            producer.close().await;
        }
        Ok(())
    }
}

/// Transport handing out [`MockConnection`]s and remembering them
#[derive(Default)]
pub struct MockTransport {
    fail_at: Option<FailAt>,
    fail_create: bool,
    created: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_at(step: FailAt) -> Arc<Self> {
        Arc::new(Self {
            fail_at: Some(step),
            ..Default::default()
        })
    }

    pub fn failing_create() -> Arc<Self> {
        Arc::new(Self {
            fail_create: true,
            ..Default::default()
        })
    }

    pub fn created(&self) -> Vec<Arc<MockConnection>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<MockConnection>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn create_connection(&self) -> NegotiationResult<Arc<dyn PeerConnection>> {
        if self.fail_create {
            return Err(NegotiationError::CreateConnection("mock transport down".to_string()));
        }
        let connection = Arc::new(MockConnection::new(self.fail_at));
        self.created.lock().push(Arc::clone(&connection));
        Ok(connection)
    }
}

/// Device reading a constant sample value, failing every `fail_every`th read
pub struct ConstantDevice {
    value: i16,
    fail_every: Option<usize>,
    reads: usize,
    closes: Arc<AtomicUsize>,
}

impl CaptureDevice for ConstantDevice {
    fn read_chunk(&mut self) -> ReadResult<AudioChunk> {
        self.reads += 1;
        if self.fail_every.is_some_and(|n| self.reads % n == 0) {
            return Err(ReadError::Timeout(DEFAULT_READ_TIMEOUT));
        }
        AudioChunk::from_samples(vec![self.value; CHUNK_SAMPLES])
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Backend that opens [`ConstantDevice`]s, or fails every open
pub struct MockBackend {
    value: i16,
    fail_open: bool,
    fail_every: Option<usize>,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn constant(value: i16) -> Arc<Self> {
        Arc::new(Self::build(value, false, None))
    }

    pub fn flaky(value: i16, fail_every: usize) -> Arc<Self> {
        Arc::new(Self::build(value, false, Some(fail_every)))
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self::build(0, true, None))
    }

    fn build(value: i16, fail_open: bool, fail_every: Option<usize>) -> Self {
        Self {
            value,
            fail_open,
            fail_every,
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl CaptureBackend for MockBackend {
    fn open(&self, _device_index: Option<usize>) -> CaptureResult<Box<dyn CaptureDevice>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(CaptureError::DeviceNotFound);
        }
        Ok(Box::new(ConstantDevice {
            value: self.value,
            fail_every: self.fail_every,
            reads: 0,
            closes: Arc::clone(&self.closes),
        }))
    }

    fn list_input_devices(&self) -> CaptureResult<Vec<DeviceDescriptor>> {
        Ok(vec![DeviceDescriptor {
            index: 0,
            name: "Mock Microphone".to_string(),
        }])
    }
}

/// Poll `condition` for up to two seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
