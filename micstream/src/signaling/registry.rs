//! Set of live peer connections
//!
//! A handle is a member while it is open. Every removal path takes the handle
//! out of the set before closing it, so however removal, ICE failure and
//! shutdown interleave, each connection is closed at most once by the
//! registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::rtc::transport::{ConnectionId, PeerConnection};

/// Default upper bound for one close during `close_all`
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Live peer connections of one server instance
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<dyn PeerConnection>>>,
    close_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(close_timeout: Duration) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            close_timeout,
        }
    }

    /// Track a connection. Adding the same handle twice keeps one entry.
    pub fn add(&self, connection: Arc<dyn PeerConnection>) {
        let id = connection.id();
        let count = {
            let mut connections = self.connections.lock();
            connections.insert(id, connection);
            connections.len()
        };
        debug!(connection = %id, count, "Connection registered");
    }

    /// Stop tracking a connection without closing it
    ///
    /// Returns the handle if it was a member; removing twice is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<dyn PeerConnection>> {
        let removed = self.connections.lock().remove(&id);
        if removed.is_some() {
            debug!(connection = %id, "Connection deregistered");
        }
        removed
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.lock().keys().copied().collect()
    }

    /// Deregister and close one connection
    ///
    /// Returns `false` if it was not a member (already removed or closing).
    pub async fn close_and_remove(&self, id: ConnectionId) -> bool {
        match self.remove(id) {
            Some(connection) => {
                self.close_one(connection).await;
                true
            }
            None => false,
        }
    }

    /// Close every tracked connection and empty the set
    ///
    /// Closes run concurrently, each bounded by the close timeout. Returns
    /// once all of them finished, failed or timed out.
    pub async fn close_all(&self) {
        let drained: Vec<_> = self.connections.lock().drain().map(|(_, c)| c).collect();
        if drained.is_empty() {
            return;
        }

        info!(count = drained.len(), "Closing all peer connections");
        join_all(drained.into_iter().map(|c| self.close_one(c))).await;
    }

    async fn close_one(&self, connection: Arc<dyn PeerConnection>) {
        let id = connection.id();
        match tokio::time::timeout(self.close_timeout, connection.close()).await {
            Ok(Ok(())) => debug!(connection = %id, "Connection closed"),
            Ok(Err(e)) => warn!(connection = %id, "Error closing connection: {}", e),
            Err(_) => warn!(
                connection = %id,
                timeout_ms = self.close_timeout.as_millis() as u64,
                "Timed out closing connection"
            ),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_CLOSE_TIMEOUT)
    }
}

/// Spawn the task that closes connections whose ICE transport failed
///
/// ICE observers post the failed connection's id to the returned sender.
/// The task ends on the shutdown signal or when every sender is dropped.
pub fn spawn_failure_reaper(
    registry: Arc<ConnectionRegistry>,
    mut shutdown: broadcast::Receiver<()>,
) -> (mpsc::UnboundedSender<ConnectionId>, JoinHandle<()>) {
    let (failure_tx, mut failure_rx) = mpsc::unbounded_channel::<ConnectionId>();

    let handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("Failure reaper stopping");
                    break;
                }
                failed = failure_rx.recv() => {
                    let Some(id) = failed else { break };
                    if registry.close_and_remove(id).await {
                        info!(connection = %id, "Closed connection after ICE failure");
                    }
                }
            }
        }
    });

    (failure_tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::FrameProducer;
    use crate::rtc::description::SessionDescription;
    use crate::rtc::error::{NegotiationError, NegotiationResult};
    use crate::rtc::transport::IceStateObserver;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingConnection {
        id: ConnectionId,
        closes: AtomicUsize,
        fail_close: bool,
        hang_close: bool,
    }

    impl CountingConnection {
        fn new() -> Arc<Self> {
            Self::with(false, false)
        }

        fn with(fail_close: bool, hang_close: bool) -> Arc<Self> {
            Arc::new(Self {
                id: ConnectionId::new(),
                closes: AtomicUsize::new(0),
                fail_close,
                hang_close,
            })
        }

        fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PeerConnection for CountingConnection {
        fn id(&self) -> ConnectionId {
            self.id
        }

        async fn add_audio_track(&self, _: FrameProducer) -> NegotiationResult<()> {
            Ok(())
        }

        fn on_ice_state_change(&self, _: IceStateObserver) {}

        async fn set_remote_description(&self, _: SessionDescription) -> NegotiationResult<()> {
            Ok(())
        }

        async fn create_answer(&self) -> NegotiationResult<SessionDescription> {
            Ok(SessionDescription::answer("v=0"))
        }

        async fn set_local_description(&self, _: SessionDescription) -> NegotiationResult<()> {
            Ok(())
        }

        async fn local_description(&self) -> Option<SessionDescription> {
            None
        }

        async fn close(&self) -> NegotiationResult<()> {
            tokio::task::yield_now().await;
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.hang_close {
                std::future::pending::<()>().await;
            }
            if self.fail_close {
                return Err(NegotiationError::Close("transport gone".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_add_remove_close_all() {
        let registry = ConnectionRegistry::default();
        let c1 = CountingConnection::new();
        let c2 = CountingConnection::new();

        registry.add(c1.clone());
        registry.add(c2.clone());
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(c1.id).is_some());
        assert!(registry.remove(c1.id).is_none());

        registry.close_all().await;

        assert!(registry.is_empty());
        assert_eq!(c1.closes(), 0);
        assert_eq!(c2.closes(), 1);
    }

    #[tokio::test]
    async fn test_add_is_unique_per_handle() {
        let registry = ConnectionRegistry::default();
        let c = CountingConnection::new();

        registry.add(c.clone());
        registry.add(c.clone());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ids(), vec![c.id]);
    }

    #[tokio::test]
    async fn test_close_and_remove_closes_once() {
        let registry = ConnectionRegistry::default();
        let c = CountingConnection::new();
        registry.add(c.clone());

        assert!(registry.close_and_remove(c.id).await);
        assert!(!registry.close_and_remove(c.id).await);
        registry.close_all().await;

        assert_eq!(c.closes(), 1);
        assert!(!registry.contains(c.id));
    }

    #[tokio::test]
    async fn test_interleaved_closes_on_one_task() {
        let registry = ConnectionRegistry::default();
        let c = CountingConnection::new();
        registry.add(c.clone());

        let (by_id, (), again) = tokio::join!(
            registry.close_and_remove(c.id),
            registry.close_all(),
            registry.close_and_remove(c.id)
        );

        assert!(!(by_id && again));
        assert_eq!(c.closes(), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_closes_close_each_connection_once() {
        let registry = Arc::new(ConnectionRegistry::default());

        for _ in 0..100 {
            let c = CountingConnection::new();
            let bystander = CountingConnection::new();
            registry.add(c.clone());
            registry.add(bystander.clone());

            let close_by_id = |registry: Arc<ConnectionRegistry>, id: ConnectionId| {
                tokio::spawn(async move { registry.close_and_remove(id).await })
            };
            let first = close_by_id(Arc::clone(&registry), c.id);
            let second = close_by_id(Arc::clone(&registry), c.id);
            let all = tokio::spawn({
                let registry = Arc::clone(&registry);
                async move { registry.close_all().await }
            });

            let (first, second, all) = tokio::join!(first, second, all);
            all.unwrap();
            let (first, second) = (first.unwrap(), second.unwrap());
            assert!(!(first && second), "one handle removed twice");

            assert_eq!(c.closes(), 1);
            assert_eq!(bystander.closes(), 1);
            assert!(registry.is_empty());
        }
    }

    #[tokio::test]
    async fn test_failed_and_slow_closes_do_not_block_others() {
        let registry = ConnectionRegistry::new(Duration::from_millis(50));
        let failing = CountingConnection::with(true, false);
        let hanging = CountingConnection::with(false, true);
        let healthy = CountingConnection::new();

        registry.add(failing.clone());
        registry.add(hanging.clone());
        registry.add(healthy.clone());

        tokio::time::timeout(Duration::from_secs(2), registry.close_all())
            .await
            .expect("close_all should be bounded by the close timeout");

        assert!(registry.is_empty());
        assert_eq!(failing.closes(), 1);
        assert_eq!(hanging.closes(), 1);
        assert_eq!(healthy.closes(), 1);
    }

    #[tokio::test]
    async fn test_failure_reaper_closes_reported_connection() {
        let registry = Arc::new(ConnectionRegistry::default());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (failure_tx, handle) = spawn_failure_reaper(Arc::clone(&registry), shutdown_rx);

        let c = CountingConnection::new();
        registry.add(c.clone());
        failure_tx.send(c.id).unwrap();
        // Unknown ids are ignored
        failure_tx.send(ConnectionId::new()).unwrap();

        for _ in 0..100 {
            if !registry.contains(c.id) && c.closes() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!registry.contains(c.id));
        assert_eq!(c.closes(), 1);

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
