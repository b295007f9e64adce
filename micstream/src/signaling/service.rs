//! Offer handling
//!
//! `handle_offer` turns one remote offer into a registered peer connection
//! streaming the microphone, and returns the local answer. A connection is
//! registered as soon as it exists so shutdown can reach it; if negotiation
//! then fails it is closed and deregistered before the error is returned.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::{CaptureBackend, FrameProducer, GainStage};
use crate::rtc::description::SessionDescription;
use crate::rtc::error::NegotiationError;
use crate::rtc::transport::{ConnectionId, IceConnectionState, PeerConnection, PeerTransport};
use crate::signaling::error::SignalingResult;
use crate::signaling::registry::ConnectionRegistry;

/// Signaling endpoint of one server instance
pub struct SignalingService {
    transport: Arc<dyn PeerTransport>,
    registry: Arc<ConnectionRegistry>,
    capture: Arc<dyn CaptureBackend>,
    device_index: Option<usize>,
    gain: GainStage,
    failure_tx: mpsc::UnboundedSender<ConnectionId>,
}

impl SignalingService {
    /// # Arguments
    /// * `failure_tx` - where ICE observers report failed connections,
    ///   usually the sender returned by `spawn_failure_reaper`
    pub fn new(
        transport: Arc<dyn PeerTransport>,
        registry: Arc<ConnectionRegistry>,
        capture: Arc<dyn CaptureBackend>,
        device_index: Option<usize>,
        gain: GainStage,
        failure_tx: mpsc::UnboundedSender<ConnectionId>,
    ) -> Self {
        Self {
            transport,
            registry,
            capture,
            device_index,
            gain,
            failure_tx,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Decode a request body and handle it as an offer
    pub async fn handle_offer_body(&self, body: &[u8]) -> SignalingResult<SessionDescription> {
        let offer = SessionDescription::parse_offer(body)?;
        self.handle_offer(offer).await
    }

    /// Negotiate a new connection for `offer` and return the local answer
    ///
    /// # Errors
    /// - `SignalingError::BadOffer` if `offer` is not a well-formed offer;
    ///   nothing is registered
    /// - `SignalingError::Negotiation` if the transport fails; the
    ///   connection, if one was created, is closed and no longer registered
    pub async fn handle_offer(&self, offer: SessionDescription) -> SignalingResult<SessionDescription> {
        offer.validate_offer()?;
        info!("Received offer of type {}", offer.kind);

        let connection = self.transport.create_connection().await?;
        let id = connection.id();
        self.registry.add(Arc::clone(&connection));
        info!(connection = %id, "Created peer connection");

        match self.negotiate(connection.as_ref(), offer).await {
            Ok(answer) => {
                info!(connection = %id, "Negotiation complete, returning answer");
                Ok(answer)
            }
            Err(e) => {
                warn!(connection = %id, "Negotiation failed: {}", e);
                self.registry.close_and_remove(id).await;
                Err(e.into())
            }
        }
    }

    async fn negotiate(
        &self,
        connection: &dyn PeerConnection,
        offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        let id = connection.id();

        let producer = FrameProducer::open(Arc::clone(&self.capture), self.device_index, self.gain).await;
        connection.add_audio_track(producer).await?;
        info!(
            connection = %id,
            device = %device_label(self.device_index),
            "Added microphone track"
        );

        let failure_tx = self.failure_tx.clone();
        connection.on_ice_state_change(Box::new(move |state| {
            info!(connection = %id, "ICE connection state is {}", state);
            if state == IceConnectionState::Failed && failure_tx.send(id).is_err() {
                debug!(connection = %id, "Failure reaper gone, connection left for shutdown");
            }
        }));

        connection.set_remote_description(offer).await?;
        debug!(connection = %id, "Remote description set");

        let answer = connection.create_answer().await?;
        debug!(connection = %id, "Answer created");

        connection.set_local_description(answer).await?;
        debug!(connection = %id, "Local description set");

        connection
            .local_description()
            .await
            .ok_or(NegotiationError::MissingLocalDescription)
    }
}

fn device_label(device_index: Option<usize>) -> String {
    device_index.map_or_else(|| "Default".to_string(), |i| i.to_string())
}
