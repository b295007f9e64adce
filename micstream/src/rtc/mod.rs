/// Offer/answer wire format
pub mod description;

/// Transport error types
pub mod error;

/// Peer-connection seam consumed by signaling
pub mod transport;

/// webrtc-rs implementation of the seam
pub mod webrtc;

pub use description::{SdpKind, SessionDescription};
pub use error::{DescriptionError, NegotiationError, NegotiationResult};
pub use transport::{ConnectionId, IceConnectionState, IceStateObserver, PeerConnection, PeerTransport};
pub use self::webrtc::{WebRtcPeer, WebRtcTransport, DEFAULT_GATHERING_TIMEOUT};
