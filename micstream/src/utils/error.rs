//! Global error handling
//!
//! `AppError` aggregates the module errors that can reach the operator, with
//! a stable [`ErrorCode`] per failure class and a recovery hint where one
//! exists.
//!
//! # Example
//!
//! ```
//! use micstream_lib::utils::error::{AppError, ErrorCode};
//! use micstream_lib::audio::CaptureError;
//!
//! let err: AppError = CaptureError::DeviceNotFound.into();
//! assert_eq!(err.code(), ErrorCode::AudioDeviceNotFound);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::error::CaptureError;
use crate::server::config::ConfigError;
use crate::server::error::StartupError;
use crate::signaling::error::SignalingError;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Audio error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Startup error: {0}")]
    Startup(#[from] StartupError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable identifier of a failure class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AudioDeviceNotFound,
    AudioInvalidDevice,
    AudioStreamError,

    SignalingBadOffer,
    SignalingNegotiationFailed,

    StartupPortInUse,
    StartupBindFailed,
    StartupAlreadyRunning,
    StartupTransportFailed,

    ConfigLoadFailed,
    ConfigInvalid,

    InternalError,
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Capture(CaptureError::DeviceNotFound) => ErrorCode::AudioDeviceNotFound,
            AppError::Capture(CaptureError::InvalidIndex(_)) => ErrorCode::AudioInvalidDevice,
            AppError::Capture(_) => ErrorCode::AudioStreamError,

            AppError::Signaling(SignalingError::BadOffer(_)) => ErrorCode::SignalingBadOffer,
            AppError::Signaling(SignalingError::Negotiation(_)) => ErrorCode::SignalingNegotiationFailed,

            AppError::Startup(StartupError::Bind { source, .. })
                if source.kind() == std::io::ErrorKind::AddrInUse =>
            {
                ErrorCode::StartupPortInUse
            }
            AppError::Startup(StartupError::Bind { .. }) => ErrorCode::StartupBindFailed,
            AppError::Startup(StartupError::AlreadyRunning(_)) => ErrorCode::StartupAlreadyRunning,
            AppError::Startup(StartupError::Transport(_)) => ErrorCode::StartupTransportFailed,
            AppError::Startup(StartupError::Config(e)) | AppError::Config(e) => config_code(e),

            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// What the operator can do about it, if anything
    pub fn recovery_hint(&self) -> Option<String> {
        match self.code() {
            ErrorCode::AudioDeviceNotFound => {
                Some("Connect a microphone or pick another device with `micstream devices`".to_string())
            }
            ErrorCode::AudioInvalidDevice => Some("Run `micstream devices` to list valid indices".to_string()),
            ErrorCode::StartupPortInUse => Some("Choose a different port or stop the other server".to_string()),
            ErrorCode::ConfigInvalid => Some("Fix the reported field in the config file".to_string()),
            _ => None,
        }
    }

    /// Whether the same instance may succeed on retry
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            AppError::Config(_) | AppError::Internal(_) | AppError::Startup(StartupError::Config(_))
        )
    }
}

fn config_code(error: &ConfigError) -> ErrorCode {
    match error {
        ConfigError::Io(_) => ErrorCode::ConfigLoadFailed,
        ConfigError::Json(_) | ConfigError::Invalid(_) => ErrorCode::ConfigInvalid,
    }
}

/// Application result type
pub type AppResult<T> = Result<T, AppError>;

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Internal(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtc::error::DescriptionError;
    use std::io;
    use std::net::SocketAddr;

    fn bind_error(kind: io::ErrorKind) -> AppError {
        let addr: SocketAddr = "0.0.0.0:8880".parse().unwrap();
        StartupError::Bind {
            addr,
            source: io::Error::from(kind),
        }
        .into()
    }

    #[test]
    fn test_error_code() {
        let err = AppError::Capture(CaptureError::DeviceNotFound);
        assert_eq!(err.code(), ErrorCode::AudioDeviceNotFound);

        let err = AppError::Capture(CaptureError::InvalidIndex(9));
        assert_eq!(err.code(), ErrorCode::AudioInvalidDevice);

        let err: AppError = SignalingError::BadOffer(DescriptionError::NotAnOffer("answer".into())).into();
        assert_eq!(err.code(), ErrorCode::SignalingBadOffer);

        assert_eq!(bind_error(io::ErrorKind::AddrInUse).code(), ErrorCode::StartupPortInUse);
        assert_eq!(bind_error(io::ErrorKind::PermissionDenied).code(), ErrorCode::StartupBindFailed);
    }

    #[test]
    fn test_config_errors_through_startup() {
        let err: AppError = StartupError::Config(ConfigError::Invalid("gain".into())).into();
        assert_eq!(err.code(), ErrorCode::ConfigInvalid);
        assert!(!err.is_recoverable());
        assert!(err.recovery_hint().is_some());
    }

    #[test]
    fn test_recoverable() {
        assert!(bind_error(io::ErrorKind::AddrInUse).is_recoverable());
        assert!(!AppError::Internal("fatal".to_string()).is_recoverable());
    }

    #[test]
    fn test_from_string() {
        let err: AppError = "test error".into();
        match err {
            AppError::Internal(msg) => assert_eq!(msg, "test error"),
            _ => panic!("Expected Internal error"),
        }
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::StartupPortInUse).unwrap();
        assert_eq!(json, "\"STARTUP_PORT_IN_USE\"");

        let deserialized: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, ErrorCode::StartupPortInUse);
    }
}
