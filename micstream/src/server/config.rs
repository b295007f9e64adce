//! Server instance configuration
//!
//! Loaded from an optional JSON file; every field has a default, so a
//! partial file (or none at all) is valid.
//!
//! ```json
//! {"port": 8880, "device_index": 2, "gain": 4.0}
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::{DEFAULT_GAIN, DEFAULT_READ_TIMEOUT, MAX_READ_TIMEOUT};

/// Client page directory, relative to the working directory
pub const STATIC_DIR: &str = "static";

/// Where the client page ships inside this package
const BUNDLED_STATIC_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/static");

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A field holds a value the server cannot run with
    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration of one server instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Signaling port; 0 picks a free one
    pub port: u16,
    /// Input device index; `None` is the platform default
    pub device_index: Option<usize>,
    pub bind_address: IpAddr,
    /// Microphone amplification
    pub gain: f32,
    /// STUN/TURN URLs handed to the transport
    pub ice_servers: Vec<String>,
    /// Directory holding the client `index.html`
    pub static_dir: Option<PathBuf>,
    /// Upper bound of one blocking device read (ms)
    pub read_timeout_ms: u64,
    /// Upper bound of one peer close during shutdown (ms)
    pub close_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            device_index: None,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            gain: DEFAULT_GAIN,
            ice_servers: Vec::new(),
            static_dir: None,
            read_timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
            close_timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    /// Read a config file
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !self.gain.is_finite() || self.gain <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "gain must be a positive number, got {}",
                self.gain
            )));
        }
        if self.read_timeout_ms == 0 || self.read_timeout() > MAX_READ_TIMEOUT {
            return Err(ConfigError::Invalid(format!(
                "read_timeout_ms must be between 1 and {}, got {}",
                MAX_READ_TIMEOUT.as_millis(),
                self.read_timeout_ms
            )));
        }
        if self.close_timeout_ms == 0 {
            return Err(ConfigError::Invalid("close_timeout_ms must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Fill in the client page directory when none was configured
    ///
    /// Prefers `./static`, then the page bundled with this package.
    pub fn with_default_static_dir(mut self) -> Self {
        if self.static_dir.is_none() {
            self.static_dir = default_static_dir();
        }
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }
}

/// First client page directory that holds an `index.html`
pub fn default_static_dir() -> Option<PathBuf> {
    [STATIC_DIR, BUNDLED_STATIC_DIR]
        .into_iter()
        .map(PathBuf::from)
        .find(|dir| dir.join("index.html").is_file())
}
