//! Graceful shutdown for the sync runtime.
//!
//! Order:
//! 1. Signal background tasks (drain driver) to stop
//! 2. Run one final drain if connectivity is reachable; it takes no new
//!    action after the deadline but lets an in-flight apply settle
//! 3. Persist the queue so pending work survives the restart
//! 4. Disconnect the realtime session (presence-offline, cancel reconnects)

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};

use crate::queue::{DrainReport, MutationQueue};
use crate::realtime::RealtimeManager;

#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// No new action starts after this much of the final drain (default: 10 seconds)
    pub final_drain_timeout: Duration,
    /// Upper bound on the realtime disconnect (default: 5 seconds)
    pub disconnect_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            final_drain_timeout: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(5),
        }
    }
}

pub struct GracefulShutdown {
    queue: Arc<MutationQueue>,
    realtime: Arc<RealtimeManager>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(
        queue: Arc<MutationQueue>,
        realtime: Arc<RealtimeManager>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self::with_config(queue, realtime, shutdown_tx, ShutdownConfig::default())
    }

    pub fn with_config(
        queue: Arc<MutationQueue>,
        realtime: Arc<RealtimeManager>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            queue,
            realtime,
            shutdown_tx,
            config,
        }
    }

    #[tracing::instrument(name = "graceful_shutdown", skip(self))]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Stopping background tasks");
        result.tasks_signalled = self.shutdown_tx.send(()).unwrap_or(0);

        tracing::info!("Phase 2: Final drain");
        result.final_drain = self.final_drain().await;

        tracing::info!("Phase 3: Persisting queue");
        self.queue.persist().await;
        result.pending_after = self.queue.len().await;

        tracing::info!("Phase 4: Disconnecting realtime session");
        result.realtime_disconnected = timeout(self.config.disconnect_timeout, self.realtime.disconnect())
            .await
            .is_ok();
        if !result.realtime_disconnected {
            tracing::warn!("Realtime disconnect timed out");
        }

        result.duration = start.elapsed();
        result.success = result.realtime_disconnected;

        tracing::info!(
            tasks_signalled = result.tasks_signalled,
            pending_after = result.pending_after,
            realtime_disconnected = result.realtime_disconnected,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }

    async fn final_drain(&self) -> Option<DrainReport> {
        if self.queue.is_empty().await {
            return None;
        }

        if !self.queue.connectivity().is_reachable() {
            tracing::info!(
                pending = self.queue.len().await,
                "Connectivity unreachable, leaving pending mutations for next start"
            );
            return None;
        }

        let report = self
            .queue
            .drain_until(Instant::now() + self.config.final_drain_timeout)
            .await;
        if report.deadline_reached {
            tracing::warn!(
                timeout_secs = self.config.final_drain_timeout.as_secs(),
                pending = report.remaining,
                "Final drain ran out of time, pending mutations stay queued"
            );
        }
        Some(report)
    }
}

#[derive(Debug, Default)]
pub struct ShutdownResult {
    pub success: bool,
    /// Background tasks that received the stop signal
    pub tasks_signalled: usize,
    /// Report of the final drain, if one ran
    pub final_drain: Option<DrainReport>,
    /// Actions still queued (and persisted) after shutdown
    pub pending_after: usize,
    pub realtime_disconnected: bool,
    pub duration: Duration,
}
