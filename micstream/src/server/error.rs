/// Error types for server startup
use std::net::SocketAddr;

use thiserror::Error;

use crate::rtc::error::NegotiationError;
use crate::server::config::ConfigError;

/// Fatal to one server instance
#[derive(Error, Debug)]
pub enum StartupError {
    /// Listening socket could not be bound (usually: port in use)
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// `start` called on a running instance
    #[error("Server is already running on {0}")]
    AlreadyRunning(SocketAddr),

    /// Configuration rejected by `validate`
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Production transport could not be built
    #[error("Transport setup failed: {0}")]
    Transport(#[from] NegotiationError),
}

pub type StartupResult<T> = Result<T, StartupError>;
