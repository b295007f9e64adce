//! Peer connections on webrtc-rs
//!
//! Each attached [`FrameProducer`] is driven by a frame pump: a task that
//! ticks every 20 ms, pulls the next frame, Opus-encodes it and writes it to
//! the connection's audio track. Closing the connection stops the pump, which
//! releases the producer's microphone.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::audio::{AudioChunk, FrameProducer, CHUNK_DURATION, SAMPLE_RATE};
use crate::rtc::description::{SdpKind, SessionDescription};
use crate::rtc::error::{NegotiationError, NegotiationResult};
use crate::rtc::transport::{
    ConnectionId, IceConnectionState, IceStateObserver, PeerConnection, PeerTransport,
};

/// Largest Opus packet we ever expect for one 20 ms frame
const MAX_PACKET_SIZE: usize = 4000;

/// How long an answer waits for ICE gathering before going out with the
/// candidates found so far
pub const DEFAULT_GATHERING_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport backed by webrtc-rs
pub struct WebRtcTransport {
    api: API,
    ice_servers: Vec<String>,
    gathering_timeout: Duration,
}

impl WebRtcTransport {
    /// Build the WebRTC API with default codecs and interceptors
    ///
    /// # Arguments
    /// * `ice_servers` - STUN/TURN URLs; empty means host candidates only
    pub fn new(ice_servers: Vec<String>) -> NegotiationResult<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| NegotiationError::Setup(format!("Failed to register codecs: {}", e)))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| NegotiationError::Setup(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers,
            gathering_timeout: DEFAULT_GATHERING_TIMEOUT,
        })
    }

    /// Bound the ICE gathering wait of every answer
    pub fn with_gathering_timeout(mut self, gathering_timeout: Duration) -> Self {
        self.gathering_timeout = gathering_timeout;
        self
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_connection(&self) -> NegotiationResult<Arc<dyn PeerConnection>> {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = self
            .api
            .new_peer_connection(config)
            .await
            .map_err(|e| NegotiationError::CreateConnection(e.to_string()))?;

        Ok(Arc::new(WebRtcPeer::new(
            Arc::new(peer_connection),
            self.gathering_timeout,
        )))
    }
}

struct FramePump {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// One webrtc-rs peer connection with at most one outgoing audio track
pub struct WebRtcPeer {
    id: ConnectionId,
    peer_connection: Arc<RTCPeerConnection>,
    pump: Mutex<Option<FramePump>>,
    gathering_timeout: Duration,
}

impl WebRtcPeer {
    fn new(peer_connection: Arc<RTCPeerConnection>, gathering_timeout: Duration) -> Self {
        Self {
            id: ConnectionId::new(),
            peer_connection,
            pump: Mutex::new(None),
            gathering_timeout,
        }
    }

    async fn stop_pump(&self) {
        let pump = self.pump.lock().take();
        if let Some(FramePump { stop_tx, handle }) = pump {
            let _ = stop_tx.send(());
            if let Err(e) = handle.await {
                warn!(connection = %self.id, "Frame pump ended abnormally: {}", e);
            }
        }
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    fn id(&self) -> ConnectionId {
        self.id
    }

    async fn add_audio_track(&self, producer: FrameProducer) -> NegotiationResult<()> {
        if self.pump.lock().is_some() {
            return Err(NegotiationError::AddTrack(
                "audio track already attached".to_string(),
            ));
        }

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: SAMPLE_RATE,
                channels: 2,
                ..Default::default()
            },
            "audio".to_owned(),
            format!("micstream-{}", self.id),
        ));

        let rtp_sender = self
            .peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| NegotiationError::AddTrack(e.to_string()))?;

        // RTCP must be read for the interceptors (NACK, reports) to run
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtp_sender.read(&mut buf).await.is_ok() {}
        });

        let encoder = OpusEncoder::new()?;
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(pump_frames(self.id, producer, track, encoder, stop_rx));

        *self.pump.lock() = Some(FramePump { stop_tx, handle });
        Ok(())
    }

    fn on_ice_state_change(&self, observer: IceStateObserver) {
        self.peer_connection
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                observer(ice_state(state));
                Box::pin(async {})
            }));
    }

    async fn set_remote_description(&self, description: SessionDescription) -> NegotiationResult<()> {
        let remote = to_rtc(description).map_err(NegotiationError::RemoteDescription)?;
        self.peer_connection
            .set_remote_description(remote)
            .await
            .map_err(|e| NegotiationError::RemoteDescription(e.to_string()))
    }

    async fn create_answer(&self) -> NegotiationResult<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| NegotiationError::CreateAnswer(e.to_string()))?;

        Ok(from_rtc(answer))
    }

    async fn set_local_description(&self, description: SessionDescription) -> NegotiationResult<()> {
        let local = to_rtc(description).map_err(NegotiationError::LocalDescription)?;

        // The answer goes back in a single HTTP response, so candidates
        // must be in it: wait for gathering to finish, within bounds.
        let mut gathering_complete = self.peer_connection.gathering_complete_promise().await;

        self.peer_connection
            .set_local_description(local)
            .await
            .map_err(|e| NegotiationError::LocalDescription(e.to_string()))?;

        if wait_for_gathering(&mut gathering_complete, self.gathering_timeout).await {
            debug!(connection = %self.id, "ICE gathering complete");
        } else {
            warn!(
                connection = %self.id,
                "ICE gathering still running after {:?}, answering with partial candidates",
                self.gathering_timeout
            );
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.peer_connection.local_description().await.map(from_rtc)
    }

    async fn close(&self) -> NegotiationResult<()> {
        self.stop_pump().await;
        self.peer_connection
            .close()
            .await
            .map_err(|e| NegotiationError::Close(e.to_string()))
    }
}

/// False when `limit` elapsed first
async fn wait_for_gathering(gathering_complete: &mut mpsc::Receiver<()>, limit: Duration) -> bool {
    tokio::time::timeout(limit, gathering_complete.recv()).await.is_ok()
}

async fn pump_frames(
    id: ConnectionId,
    mut producer: FrameProducer,
    track: Arc<TrackLocalStaticSample>,
    mut encoder: OpusEncoder,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(CHUNK_DURATION);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(connection = %id, mode = ?producer.mode(), "Audio track started");

    loop {
        tokio::select! {
            // Fires on close, or when the peer is dropped without closing
            _ = &mut stop_rx => break,
            _ = ticker.tick() => {
                let frame = producer.next_frame().await;
                match encoder.encode(&frame.chunk) {
                    Ok(packet) => {
                        let sample = Sample {
                            data: Bytes::from(packet),
                            duration: CHUNK_DURATION,
                            ..Default::default()
                        };
                        if let Err(e) = track.write_sample(&sample).await {
                            warn!(connection = %id, "Failed to write audio sample: {}", e);
                        }
                    }
                    Err(e) => warn!(connection = %id, pts = frame.pts, "Opus encoding failed: {}", e),
                }
            }
        }
    }

    producer.close().await;
}

/// 48 kHz mono VoIP Opus encoder
struct OpusEncoder {
    encoder: opus::Encoder,
    buffer: Vec<u8>,
}

// SAFETY: the encoder state is only touched through `&mut self`, and each
// instance is owned by exactly one pump task.
unsafe impl Send for OpusEncoder {}

impl OpusEncoder {
    fn new() -> NegotiationResult<Self> {
        let encoder = opus::Encoder::new(SAMPLE_RATE, opus::Channels::Mono, opus::Application::Voip)
            .map_err(|e| NegotiationError::AddTrack(format!("Failed to create Opus encoder: {:?}", e)))?;

        Ok(Self {
            encoder,
            buffer: vec![0u8; MAX_PACKET_SIZE],
        })
    }

    fn encode(&mut self, chunk: &AudioChunk) -> Result<Vec<u8>, opus::Error> {
        let len = self.encoder.encode(chunk.samples(), &mut self.buffer)?;
        Ok(self.buffer[..len].to_vec())
    }
}

fn ice_state(state: RTCIceConnectionState) -> IceConnectionState {
    match state {
        RTCIceConnectionState::Checking => IceConnectionState::Checking,
        RTCIceConnectionState::Connected => IceConnectionState::Connected,
        RTCIceConnectionState::Completed => IceConnectionState::Completed,
        RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
        RTCIceConnectionState::Failed => IceConnectionState::Failed,
        RTCIceConnectionState::Closed => IceConnectionState::Closed,
        _ => IceConnectionState::New,
    }
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription, String> {
    let converted = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpKind::Rollback => return Err("rollback is not supported".to_string()),
    };

    converted.map_err(|e| e.to_string())
}

fn from_rtc(description: RTCSessionDescription) -> SessionDescription {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        _ => SdpKind::Answer,
    };

    SessionDescription {
        sdp: description.sdp,
        kind,
    }
}
