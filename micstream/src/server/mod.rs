/// Server configuration
pub mod config;

/// Startup error types
pub mod error;

/// Start/stop orchestration
pub mod lifecycle;

pub use config::{default_static_dir, ConfigError, ConfigResult, ServerConfig, STATIC_DIR};
pub use error::{StartupError, StartupResult};
pub use lifecycle::ServerLifecycle;
