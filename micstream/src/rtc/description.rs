//! Session descriptions as exchanged over HTTP
//!
//! Wire form is the browser's `RTCSessionDescriptionInit`:
//!
//! ```json
//! {"sdp": "v=0\r\n...", "type": "offer"}
//! ```

use std::fmt;
use std::io::Cursor;

use serde::{Deserialize, Serialize};
use webrtc::sdp::description::session::SessionDescription as ParsedSdp;

use crate::rtc::error::DescriptionError;

/// Role of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

impl fmt::Display for SdpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SdpKind::Offer => "offer",
            SdpKind::Pranswer => "pranswer",
            SdpKind::Answer => "answer",
            SdpKind::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// An offer or answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: SdpKind,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpKind::Offer,
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp: sdp.into(),
            kind: SdpKind::Answer,
        }
    }

    /// Decode and validate an offer from a request body
    ///
    /// # Errors
    /// - `DescriptionError::Json` if the body is not a description object
    /// - `DescriptionError::NotAnOffer` for answers, rollbacks and the like
    /// - `DescriptionError::Sdp` if the SDP text does not parse
    pub fn parse_offer(body: &[u8]) -> Result<Self, DescriptionError> {
        let description: Self = serde_json::from_slice(body)?;
        description.validate_offer()?;
        Ok(description)
    }

    /// Check an already-decoded description is a well-formed offer
    pub fn validate_offer(&self) -> Result<(), DescriptionError> {
        if self.kind != SdpKind::Offer {
            return Err(DescriptionError::NotAnOffer(self.kind.to_string()));
        }

        let mut reader = Cursor::new(self.sdp.as_bytes());
        ParsedSdp::unmarshal(&mut reader).map_err(|e| DescriptionError::Sdp(e.to_string()))?;

        Ok(())
    }
}
