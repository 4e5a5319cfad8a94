//! Composition root.
//!
//! The application builds one `SyncRuntime` and hands clones (all fields are
//! shared handles) to whatever needs the queue or the realtime channel.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::connectivity::ConnectivityMonitor;
use crate::error::Result;
use crate::mutation::{HttpMutationEndpoint, MutationEndpoint};
use crate::queue::MutationQueue;
use crate::realtime::{Connector, RealtimeManager, WebSocketConnector};
use crate::shutdown::GracefulShutdown;
use crate::store::{create_store, KeyValueStore};
use crate::tasks::DrainTask;

#[derive(Clone)]
pub struct SyncRuntime {
    pub settings: Arc<Settings>,
    pub store: Arc<dyn KeyValueStore>,
    pub connectivity: ConnectivityMonitor,
    pub queue: Arc<MutationQueue>,
    pub realtime: Arc<RealtimeManager>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SyncRuntime {
    /// Production wiring: configured store, HTTP endpoint, WebSocket transport.
    pub async fn build(settings: Settings, connectivity: ConnectivityMonitor) -> Result<Self> {
        let store = create_store(&settings.store).await;
        let endpoint: Arc<dyn MutationEndpoint> = Arc::new(HttpMutationEndpoint::new(&settings.endpoint)?);
        let connector: Arc<dyn Connector> = Arc::new(WebSocketConnector::new());

        Ok(Self::with_components(settings, store, endpoint, connector, connectivity).await)
    }

    /// Wire the runtime from explicit collaborators.
    pub async fn with_components(
        settings: Settings,
        store: Arc<dyn KeyValueStore>,
        endpoint: Arc<dyn MutationEndpoint>,
        connector: Arc<dyn Connector>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        let queue = MutationQueue::load(
            settings.queue.clone(),
            store.clone(),
            endpoint,
            connectivity.clone(),
        )
        .await;
        let realtime = Arc::new(RealtimeManager::new(settings.realtime.clone(), connector));
        let (shutdown_tx, _) = broadcast::channel(1);

        tracing::info!(
            store_backend = store.backend_name(),
            reachable = connectivity.is_reachable(),
            "Sync runtime initialized"
        );

        Self {
            settings: Arc::new(settings),
            store,
            connectivity,
            queue,
            realtime,
            shutdown_tx,
        }
    }

    /// Open the realtime session named in the settings.
    ///
    /// Returns `false` when no session is configured. A failed first
    /// handshake is returned while reconnects continue in the background.
    pub async fn connect_configured_session(&self) -> Result<bool> {
        let Some(session_id) = self.settings.realtime.session_id.as_deref() else {
            return Ok(false);
        };

        self.realtime.connect(session_id).await?;
        Ok(true)
    }

    /// Start the periodic/connectivity drain driver
    pub fn spawn_drain_task(&self) -> JoinHandle<()> {
        let task = DrainTask::new(self.queue.clone(), self.shutdown_tx.subscribe());
        tokio::spawn(task.run())
    }

    /// Sender that stops every background task started by this runtime
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn graceful_shutdown(&self) -> GracefulShutdown {
        GracefulShutdown::new(
            self.queue.clone(),
            self.realtime.clone(),
            self.shutdown_tx.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityStatus;
    use crate::mutation::{Mutation, SettingsUpdate};
    use serde_json::json;

    #[tokio::test]
    async fn test_build_with_memory_store() {
        let runtime = SyncRuntime::build(Settings::default(), ConnectivityMonitor::default())
            .await
            .unwrap();

        assert_eq!(runtime.store.backend_name(), "memory");
        assert!(!runtime.connectivity.is_reachable());
        assert!(runtime.queue.is_empty().await);
        assert_eq!(runtime.settings.queue.max_retries, 3);
    }

    #[tokio::test]
    async fn test_no_configured_session_skips_connect() {
        let runtime = SyncRuntime::build(Settings::default(), ConnectivityMonitor::default())
            .await
            .unwrap();

        assert!(!runtime.connect_configured_session().await.unwrap());
        assert!(runtime.realtime.session_id().is_none());
    }

    #[tokio::test]
    async fn test_refused_session_surfaces_realtime_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut settings = Settings::default();
        settings.realtime.url_base = format!("ws://{}", addr);
        settings.realtime.session_id = Some("s1".to_string());
        let runtime = SyncRuntime::build(settings, ConnectivityMonitor::default())
            .await
            .unwrap();

        let err = runtime.connect_configured_session().await.unwrap_err();
        assert_eq!(err.code(), "REALTIME_ERROR");
        assert!(err.to_string().contains("s1"));

        runtime.realtime.disconnect().await;
    }

    #[tokio::test]
    async fn test_clones_share_the_queue() {
        let runtime = SyncRuntime::build(
            Settings::default(),
            ConnectivityMonitor::new(ConnectivityStatus::offline()),
        )
        .await
        .unwrap();
        let handle = runtime.clone();

        runtime
            .queue
            .enqueue(Mutation::SettingsUpdate(SettingsUpdate {
                user_id: "u1".to_string(),
                values: json!({"locale": "en"}),
            }))
            .await;

        assert_eq!(handle.queue.len().await, 1);
    }
}
