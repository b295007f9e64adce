/// Error types for offer handling
use thiserror::Error;

use crate::rtc::error::{DescriptionError, NegotiationError};

/// Failure of one `handle_offer` call
#[derive(Error, Debug)]
pub enum SignalingError {
    /// Offer could not be decoded; nothing was registered
    #[error("Bad offer: {0}")]
    BadOffer(#[from] DescriptionError),

    /// Transport failed while negotiating a registered connection
    #[error("Negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),
}

/// Result type for signaling operations
pub type SignalingResult<T> = Result<T, SignalingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text_carries_cause() {
        let err: SignalingError = DescriptionError::NotAnOffer("answer".to_string()).into();
        assert_eq!(err.to_string(), "Bad offer: Expected an offer, got answer");

        let err: SignalingError = NegotiationError::CreateAnswer("no transceivers".to_string()).into();
        assert!(err.to_string().contains("no transceivers"));
    }
}
