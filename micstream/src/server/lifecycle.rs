//! Start/stop orchestration for one server instance
//!
//! `start` binds the listener and spawns two tasks tied to one broadcast
//! shutdown signal: the axum serve loop and the ICE-failure reaper. `stop`
//! fires the signal, closes every registered connection and joins both
//! tasks, so once it returns the port is free and no peer is left open.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::audio::{AudioSubsystem, CaptureBackend, CpalBackend, GainStage};
use crate::rtc::transport::PeerTransport;
use crate::rtc::webrtc::WebRtcTransport;
use crate::server::config::ServerConfig;
use crate::server::error::{StartupError, StartupResult};
use crate::signaling::{build_router, spawn_failure_reaper, ConnectionRegistry, SignalingService, SignalingState};
use crate::utils::net::local_ip;

struct Running {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    serve: JoinHandle<std::io::Result<()>>,
    reaper: JoinHandle<()>,
}

/// One signaling server and the connections it created
pub struct ServerLifecycle {
    config: ServerConfig,
    transport: Arc<dyn PeerTransport>,
    capture: Arc<dyn CaptureBackend>,
    registry: Arc<ConnectionRegistry>,
    running: Mutex<Option<Running>>,
    local_addr: SyncMutex<Option<SocketAddr>>,
}

impl ServerLifecycle {
    pub fn new(config: ServerConfig, transport: Arc<dyn PeerTransport>, capture: Arc<dyn CaptureBackend>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.close_timeout()));
        Self {
            config,
            transport,
            capture,
            registry,
            running: Mutex::new(None),
            local_addr: SyncMutex::new(None),
        }
    }

    /// Build a server on webrtc-rs and the platform audio host
    pub fn from_config(config: ServerConfig) -> StartupResult<Self> {
        config.validate()?;
        let transport = Arc::new(WebRtcTransport::new(config.ice_servers.clone())?);
        let capture = Arc::new(CpalBackend::new(AudioSubsystem::shared(), config.read_timeout()));
        Ok(Self::new(config, transport, capture))
    }

    /// Bind the signaling endpoint and start serving
    ///
    /// Returns the bound address (useful when the configured port is 0).
    ///
    /// # Errors
    /// - `StartupError::AlreadyRunning` if this instance is serving
    /// - `StartupError::Bind` if the address is taken or unavailable
    pub async fn start(&self) -> StartupResult<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            return Err(StartupError::AlreadyRunning(current.addr));
        }

        let requested = self.config.socket_addr();
        let listener = TcpListener::bind(requested)
            .await
            .map_err(|source| StartupError::Bind { addr: requested, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| StartupError::Bind { addr: requested, source })?;

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let (failure_tx, reaper) = spawn_failure_reaper(Arc::clone(&self.registry), shutdown_tx.subscribe());

        let service = SignalingService::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.registry),
            Arc::clone(&self.capture),
            self.config.device_index,
            GainStage::new(self.config.gain),
            failure_tx,
        );
        let router = build_router(SignalingState {
            service: Arc::new(service),
            static_dir: self.config.static_dir.clone(),
        });

        let mut shutdown_rx = shutdown_tx.subscribe();
        let serve = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await
        });

        *running = Some(Running {
            addr,
            shutdown_tx,
            serve,
            reaper,
        });
        *self.local_addr.lock() = Some(addr);

        info!("Server started at http://{}:{}", local_ip(), addr.port());
        Ok(addr)
    }

    /// Stop serving and close every connection
    ///
    /// A no-op if the server is not running. Offers already in flight are
    /// allowed to finish; whatever they register is closed before return.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        info!("Stopping server on {}", running.addr);
        let _ = running.shutdown_tx.send(());

        self.registry.close_all().await;

        match running.serve.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Server on {} failed: {}", running.addr, e),
            Err(e) => error!("Server task on {} ended abnormally: {}", running.addr, e),
        }
        if let Err(e) = running.reaper.await {
            warn!("Failure reaper ended abnormally: {}", e);
        }

        // Offers that were mid-negotiation when the signal fired
        self.registry.close_all().await;

        *self.local_addr.lock() = None;
        info!("Server on {} stopped", running.addr);
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn is_running(&self) -> bool {
        self.local_addr.lock().is_some()
    }
}
