//! HTTP surface of the signaling service
//!
//! - `POST /offer`: `{"sdp", "type"}` in, answer out; any failure is a 500
//!   with the error text as a plain-text body
//! - `GET /`: the client page from the configured static directory

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{error, warn};

use crate::signaling::error::SignalingError;
use crate::signaling::service::SignalingService;

const INDEX_FILE: &str = "index.html";

/// Shared state of the signaling routes
#[derive(Clone)]
pub struct SignalingState {
    pub service: Arc<SignalingService>,
    pub static_dir: Option<PathBuf>,
}

/// Build the signaling router
pub fn build_router(state: SignalingState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/offer", post(offer_handler))
        .with_state(state)
}

impl IntoResponse for SignalingError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

/// The body is taken as raw bytes so that malformed JSON gets the same
/// 500 + error text as every other failure.
async fn offer_handler(
    State(state): State<SignalingState>,
    body: Bytes,
) -> Result<impl IntoResponse, SignalingError> {
    let answer = state.service.handle_offer_body(&body).await.map_err(|e| {
        error!("Offer rejected: {}", e);
        e
    })?;

    Ok(Json(answer))
}

async fn index_handler(State(state): State<SignalingState>) -> Response {
    let Some(dir) = state.static_dir.as_ref() else {
        return (StatusCode::NOT_FOUND, "No client page configured").into_response();
    };

    let path = dir.join(INDEX_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(page) => Html(page).into_response(),
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            (StatusCode::NOT_FOUND, "Client page not found").into_response()
        }
    }
}
