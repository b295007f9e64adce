/// Logging utilities
pub mod logging;

/// Global error handling
pub mod error;

/// Network helpers
pub mod net;

// Re-export commonly used types
pub use error::{AppError, AppResult, ErrorCode};
