/// Error types for the peer-connection transport
use thiserror::Error;

/// Failure inside an existing or about-to-exist peer connection
#[derive(Error, Debug)]
pub enum NegotiationError {
    /// Transport could not be configured
    #[error("Failed to set up WebRTC API: {0}")]
    Setup(String),

    /// Peer connection could not be created
    #[error("Failed to create peer connection: {0}")]
    CreateConnection(String),

    /// Outgoing audio track could not be attached
    #[error("Failed to add audio track: {0}")]
    AddTrack(String),

    /// Remote offer was rejected by the transport
    #[error("Failed to set remote description: {0}")]
    RemoteDescription(String),

    /// Answer generation failed
    #[error("Failed to create answer: {0}")]
    CreateAnswer(String),

    /// Local answer could not be applied
    #[error("Failed to set local description: {0}")]
    LocalDescription(String),

    /// Negotiation finished without a local description
    #[error("No local description after setting answer")]
    MissingLocalDescription,

    /// Closing the connection failed
    #[error("Failed to close peer connection: {0}")]
    Close(String),
}

/// A session description that cannot be used as an offer
#[derive(Error, Debug)]
pub enum DescriptionError {
    /// Body is not a `{"sdp", "type"}` JSON object
    #[error("Invalid session description: {0}")]
    Json(#[from] serde_json::Error),

    /// Description is well-formed but not an offer
    #[error("Expected an offer, got {0}")]
    NotAnOffer(String),

    /// SDP text does not parse
    #[error("Malformed SDP: {0}")]
    Sdp(String),
}

/// Result type for transport operations
pub type NegotiationResult<T> = Result<T, NegotiationError>;
