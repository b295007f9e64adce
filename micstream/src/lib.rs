/// Microphone capture and frame production
pub mod audio;

/// Peer-connection transport
pub mod rtc;

/// Offer/answer signaling over HTTP
pub mod signaling;

/// Server instance lifecycle
pub mod server;

/// Utility modules
pub mod utils;
