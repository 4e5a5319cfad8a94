use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_stream::StreamExt;

use crate::queue::{DrainReport, MutationQueue};

/// Background driver for the mutation queue.
///
/// Triggers a drain on every interval tick and whenever connectivity becomes
/// reachable (including at startup when already reachable). Overlapping
/// triggers are absorbed by the queue's own drain guard.
pub struct DrainTask {
    queue: Arc<MutationQueue>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl DrainTask {
    pub fn new(queue: Arc<MutationQueue>, shutdown: broadcast::Receiver<()>) -> Self {
        let interval = queue.config().drain_interval();
        Self::with_interval(queue, interval, shutdown)
    }

    pub fn with_interval(
        queue: Arc<MutationQueue>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            queue,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        let mut reachability = self.queue.connectivity().reachability_changes();

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            drain_interval_secs = self.interval.as_secs(),
            "Drain task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Drain task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    Self::log_pass("interval", self.queue.drain().await);
                }
                Some(reachable) = reachability.next() => {
                    if reachable {
                        Self::log_pass("connectivity", self.queue.drain().await);
                    } else {
                        tracing::debug!("Connectivity unreachable, waiting");
                    }
                }
            }
        }

        tracing::info!("Drain task stopped");
    }

    fn log_pass(trigger: &'static str, report: DrainReport) {
        match report.skipped {
            Some(reason) => tracing::debug!(trigger = trigger, reason = ?reason, "Drain skipped"),
            None => tracing::debug!(
                trigger = trigger,
                applied = report.applied,
                retried = report.retried,
                abandoned = report.abandoned,
                remaining = report.remaining,
                "Drain pass finished"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::connectivity::{ConnectivityMonitor, ConnectivityStatus};
    use crate::mutation::{
        ApplyError, AvatarUpdate, Mutation, MutationEndpoint, ProfileUpdate, SettingsUpdate,
    };
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts calls; fails the first `failures` of them
    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        failures: usize,
    }

    impl Counting {
        fn hit(&self) -> Result<(), ApplyError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ApplyError::Transient("HTTP 503".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MutationEndpoint for Counting {
        async fn apply_profile_update(&self, _: &ProfileUpdate) -> Result<(), ApplyError> {
            self.hit()
        }

        async fn apply_settings_update(&self, _: &SettingsUpdate) -> Result<(), ApplyError> {
            self.hit()
        }

        async fn apply_avatar_update(&self, _: &AvatarUpdate) -> Result<(), ApplyError> {
            self.hit()
        }
    }

    fn profile() -> Mutation {
        Mutation::ProfileUpdate(ProfileUpdate {
            user_id: "p1".to_string(),
            display_name: Some("Pat".to_string()),
            bio: None,
            location: None,
            website: None,
        })
    }

    async fn setup() -> (Arc<MutationQueue>, Arc<Counting>, ConnectivityMonitor) {
        setup_with_failures(0).await
    }

    async fn setup_with_failures(
        failures: usize,
    ) -> (Arc<MutationQueue>, Arc<Counting>, ConnectivityMonitor) {
        let endpoint = Arc::new(Counting {
            failures,
            ..Default::default()
        });
        let connectivity = ConnectivityMonitor::new(ConnectivityStatus::offline());
        let queue = MutationQueue::load(
            QueueConfig::default(),
            Arc::new(MemoryStore::new()),
            endpoint.clone(),
            connectivity.clone(),
        )
        .await;
        (queue, endpoint, connectivity)
    }

    #[tokio::test]
    async fn test_drain_task_shutdown() {
        let (queue, _, _) = setup().await;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(DrainTask::new(queue, shutdown_rx).run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }

    #[tokio::test]
    async fn test_reachable_transition_triggers_drain() {
        let (queue, endpoint, connectivity) = setup().await;
        queue.enqueue(profile()).await;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(
            DrainTask::with_interval(queue.clone(), Duration::from_secs(3600), shutdown_rx).run(),
        );

        connectivity.report(ConnectivityStatus::online());

        tokio::time::timeout(Duration::from_secs(2), async {
            while !queue.is_empty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue should drain after connectivity returns");

        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);

        shutdown_tx.send(()).unwrap();
        let _ = handle.await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_retries_pending_work() {
        let (queue, endpoint, connectivity) = setup_with_failures(1).await;
        queue.enqueue(profile()).await;

        // Already reachable: the startup drain fails once, the next tick retries
        connectivity.report(ConnectivityStatus::online());
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(
            DrainTask::with_interval(queue.clone(), Duration::from_secs(60), shutdown_rx).run(),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(queue.is_empty().await);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);

        shutdown_tx.send(()).unwrap();
        let _ = handle.await;
    }
}
