//! The peer-connection capability the signaling layer consumes
//!
//! ICE, DTLS, SRTP and SDP negotiation live behind these traits. The
//! production implementation is [`crate::rtc::webrtc::WebRtcTransport`];
//! tests substitute their own.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::audio::FrameProducer;
use crate::rtc::description::SessionDescription;
use crate::rtc::error::NegotiationResult;

/// Identity of one peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// ICE connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for IceConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IceConnectionState::New => "new",
            IceConnectionState::Checking => "checking",
            IceConnectionState::Connected => "connected",
            IceConnectionState::Completed => "completed",
            IceConnectionState::Disconnected => "disconnected",
            IceConnectionState::Failed => "failed",
            IceConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Callback invoked on every ICE state transition
///
/// Runs on the transport's own tasks; keep it short and non-blocking.
pub type IceStateObserver = Box<dyn Fn(IceConnectionState) + Send + Sync>;

/// One negotiated (or negotiating) session with a remote peer
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn id(&self) -> ConnectionId;

    /// Attach `producer` as the outgoing audio track
    ///
    /// The connection owns the producer from here on and releases it on close.
    async fn add_audio_track(&self, producer: FrameProducer) -> NegotiationResult<()>;

    /// Replace the ICE state observer
    fn on_ice_state_change(&self, observer: IceStateObserver);

    async fn set_remote_description(&self, description: SessionDescription) -> NegotiationResult<()>;

    async fn create_answer(&self) -> NegotiationResult<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> NegotiationResult<()>;

    async fn local_description(&self) -> Option<SessionDescription>;

    /// Tear the session down. Closing twice is not an error.
    async fn close(&self) -> NegotiationResult<()>;
}

/// Factory for peer connections
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_connection(&self) -> NegotiationResult<Arc<dyn PeerConnection>>;
}
