/// Signaling error types
pub mod error;

/// Live connection set and ICE-failure reaper
pub mod registry;

/// HTTP routes
pub mod routes;

/// Offer handling
pub mod service;

pub use error::{SignalingError, SignalingResult};
pub use registry::{spawn_failure_reaper, ConnectionRegistry, DEFAULT_CLOSE_TIMEOUT};
pub use routes::{build_router, SignalingState};
pub use service::SignalingService;
