//! Durable mutation queue engine.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{timeout, Instant};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::metrics::{QueueMetrics, StoreMetrics};
use crate::mutation::{ApplyError, Mutation, MutationEndpoint, QueuedAction};
use crate::store::KeyValueStore;

use super::models::{AbandonReason, ActionOutcome, DrainReport, DrainSkip, QueueStats};

/// Capacity of the outcome broadcast channel
const OUTCOME_CHANNEL_CAPACITY: usize = 64;

/// Ordered queue of pending mutations, persisted as a whole on every change.
///
/// # Design
///
/// - The persisted JSON array is the source of truth; `load()` rebuilds the
///   in-memory queue from it
/// - Every write is read-modify-write of the whole list under one lock, so
///   store writes are ordered and always reflect the latest state
/// - `drain()` is guarded by a single flag; a trigger arriving while a pass
///   runs returns immediately with `DrainSkip::Busy`
/// - There is no per-action backoff: a failed action waits for the next
///   timer or connectivity-triggered pass
///
/// # Example
///
/// ```rust,ignore
/// let queue = MutationQueue::load(config, store, endpoint, connectivity).await;
/// let id = queue.enqueue(Mutation::SettingsUpdate(update)).await;
/// let report = queue.drain().await;
/// ```
pub struct MutationQueue {
    actions: Mutex<VecDeque<QueuedAction>>,
    store: Arc<dyn KeyValueStore>,
    endpoint: Arc<dyn MutationEndpoint>,
    connectivity: ConnectivityMonitor,
    config: QueueConfig,
    draining: AtomicBool,
    outcomes: broadcast::Sender<ActionOutcome>,
}

/// Clears the drain flag when a pass ends, including on panic
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl MutationQueue {
    /// Build the queue from whatever is persisted under `config.storage_key`.
    ///
    /// Unreadable or corrupt state is logged and replaced by an empty queue.
    pub async fn load(
        config: QueueConfig,
        store: Arc<dyn KeyValueStore>,
        endpoint: Arc<dyn MutationEndpoint>,
        connectivity: ConnectivityMonitor,
    ) -> Arc<Self> {
        let raw = match store.get(&config.storage_key).await {
            Ok(raw) => raw,
            Err(e) => {
                StoreMetrics::record_read_failure();
                tracing::error!(
                    error = %e,
                    key = %config.storage_key,
                    backend = store.backend_name(),
                    "Failed to read persisted queue, starting empty"
                );
                None
            }
        };

        let actions = match Self::restore(raw.as_deref()) {
            Some(actions) => actions,
            None => {
                if let Err(e) = store.remove(&config.storage_key).await {
                    tracing::warn!(error = %e, key = %config.storage_key, "Failed to discard corrupt queue");
                }
                VecDeque::new()
            }
        };
        QueueMetrics::set_pending(actions.len());

        tracing::info!(
            pending = actions.len(),
            backend = store.backend_name(),
            "Mutation queue loaded"
        );

        let (outcomes, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);

        Arc::new(Self {
            actions: Mutex::new(actions),
            store,
            endpoint,
            connectivity,
            config,
            draining: AtomicBool::new(false),
            outcomes,
        })
    }

    /// Decode the persisted list; `None` when it is corrupt
    fn restore(raw: Option<&str>) -> Option<VecDeque<QueuedAction>> {
        let Some(raw) = raw else {
            return Some(VecDeque::new());
        };

        let decoded: Vec<QueuedAction> = match serde_json::from_str(raw) {
            Ok(actions) => actions,
            Err(e) => {
                StoreMetrics::record_decode_failure();
                tracing::error!(error = %e, "Persisted queue is corrupt, discarding it");
                return None;
            }
        };

        let mut seen = HashSet::with_capacity(decoded.len());
        let actions = decoded
            .into_iter()
            .filter(|action| {
                let fresh = seen.insert(action.id);
                if !fresh {
                    tracing::warn!(action_id = %action.id, "Dropping duplicate persisted action");
                }
                fresh
            })
            .collect();
        Some(actions)
    }

    /// Append a mutation and persist the queue.
    ///
    /// Never waits on the network: if connectivity is reachable a drain is
    /// spawned in the background. The returned id matches the one carried by
    /// the action's eventual [`ActionOutcome`].
    pub async fn enqueue(self: &Arc<Self>, mutation: Mutation) -> Uuid {
        let (id, kind, pending) = {
            let mut actions = self.actions.lock().await;

            // Keep enqueued_at non-decreasing even if the wall clock steps back
            let now = Utc::now();
            let enqueued_at = actions
                .back()
                .map(|last| last.enqueued_at.max(now))
                .unwrap_or(now);

            let action = QueuedAction::with_timestamp(mutation, enqueued_at);
            let id = action.id;
            let kind = action.kind();
            actions.push_back(action);

            self.persist_locked(&actions).await;
            (id, kind, actions.len())
        };

        QueueMetrics::record_enqueued(pending);

        tracing::debug!(
            action_id = %id,
            kind = kind,
            pending = pending,
            "Mutation enqueued"
        );

        if self.connectivity.is_reachable() {
            let queue = Arc::clone(self);
            tokio::spawn(async move {
                queue.drain().await;
            });
        }

        id
    }

    /// Run one pass over the queue in FIFO order.
    ///
    /// Stops early when connectivity is lost; the untouched tail keeps its
    /// order. Each action is attempted at most once per pass, including
    /// actions enqueued while the pass is running.
    pub async fn drain(&self) -> DrainReport {
        self.run_pass(None).await
    }

    /// Like [`drain`](Self::drain), but takes no new action once `deadline`
    /// has passed. An apply already in flight is always allowed to settle.
    pub async fn drain_until(&self, deadline: Instant) -> DrainReport {
        self.run_pass(Some(deadline)).await
    }

    #[tracing::instrument(name = "queue.drain", skip(self))]
    async fn run_pass(&self, deadline: Option<Instant>) -> DrainReport {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            QueueMetrics::record_drain_skipped_busy();
            tracing::debug!("Drain already in progress, trigger ignored");
            return DrainReport::skipped(DrainSkip::Busy, self.len().await);
        }
        let _guard = DrainGuard(&self.draining);

        let start = Instant::now();
        let mut report = DrainReport::default();
        let mut attempted: HashSet<Uuid> = HashSet::new();

        loop {
            let next = {
                let actions = self.actions.lock().await;
                actions.iter().find(|a| !attempted.contains(&a.id)).cloned()
            };
            let Some(action) = next else {
                break;
            };

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                report.deadline_reached = true;
                tracing::debug!(
                    attempted = attempted.len(),
                    "Drain deadline reached, leaving the rest queued"
                );
                break;
            }

            if !self.connectivity.is_reachable() {
                if attempted.is_empty() {
                    QueueMetrics::record_drain_skipped_offline();
                    report.skipped = Some(DrainSkip::Offline);
                }
                tracing::debug!(
                    attempted = attempted.len(),
                    "Connectivity unreachable, stopping drain"
                );
                break;
            }

            attempted.insert(action.id);
            let result = self.apply(&action).await;
            self.settle(&action, result, &mut report).await;
        }

        // One write per pass even when nothing changed
        let actions = self.actions.lock().await;
        report.remaining = actions.len();
        self.persist_locked(&actions).await;
        drop(actions);

        QueueMetrics::record_drain(start.elapsed().as_secs_f64(), report.remaining);

        if report.applied + report.retried + report.abandoned > 0 {
            tracing::info!(
                applied = report.applied,
                retried = report.retried,
                abandoned = report.abandoned,
                remaining = report.remaining,
                duration_ms = start.elapsed().as_millis() as u64,
                "Drain pass completed"
            );
        }

        report
    }

    async fn apply(&self, action: &QueuedAction) -> Result<(), ApplyError> {
        let limit = self.config.apply_timeout();
        match timeout(limit, self.endpoint.apply(&action.mutation)).await {
            Ok(result) => result,
            Err(_) => Err(ApplyError::Transient(format!(
                "apply timed out after {}s",
                limit.as_secs()
            ))),
        }
    }

    /// Fold one apply result back into the queue
    async fn settle(
        &self,
        action: &QueuedAction,
        result: Result<(), ApplyError>,
        report: &mut DrainReport,
    ) {
        let mut actions = self.actions.lock().await;
        let Some(pos) = actions.iter().position(|a| a.id == action.id) else {
            return;
        };

        match result {
            Ok(()) => {
                let Some(applied) = actions.remove(pos) else {
                    return;
                };
                report.applied += 1;
                QueueMetrics::record_applied();
                self.persist_locked(&actions).await;

                tracing::info!(
                    action_id = %applied.id,
                    kind = applied.kind(),
                    attempts = applied.attempts + 1,
                    "Mutation applied"
                );

                let _ = self.outcomes.send(ActionOutcome::Applied {
                    id: applied.id,
                    kind: applied.kind(),
                    attempts: applied.attempts + 1,
                });
            }
            Err(error) => {
                let entry = &mut actions[pos];
                entry.record_failure(error.to_string());

                let max_retries = self.config.max_retries.max(1);
                let reason = if error.is_permanent() && self.config.abandon_permanent_failures {
                    Some(AbandonReason::Permanent)
                } else if entry.attempts >= max_retries {
                    Some(AbandonReason::Exhausted)
                } else {
                    None
                };

                match reason {
                    Some(reason) => {
                        let Some(abandoned) = actions.remove(pos) else {
                            return;
                        };
                        report.abandoned += 1;
                        match reason {
                            AbandonReason::Permanent => QueueMetrics::record_abandoned_permanent(),
                            AbandonReason::Exhausted => QueueMetrics::record_abandoned_exhausted(),
                        }

                        tracing::warn!(
                            action_id = %abandoned.id,
                            kind = abandoned.kind(),
                            attempts = abandoned.attempts,
                            reason = ?reason,
                            error = %error,
                            "Mutation abandoned"
                        );

                        let _ = self.outcomes.send(ActionOutcome::Abandoned {
                            id: abandoned.id,
                            kind: abandoned.kind(),
                            attempts: abandoned.attempts,
                            reason,
                            last_error: error.to_string(),
                        });
                    }
                    None => {
                        report.retried += 1;
                        QueueMetrics::record_retried();
                        tracing::info!(
                            action_id = %entry.id,
                            kind = entry.kind(),
                            attempts = entry.attempts,
                            max_retries = max_retries,
                            error = %error,
                            "Mutation apply failed, will retry on next drain"
                        );
                    }
                }
            }
        }
    }

    /// Serialize and write the full queue; failures are logged, and the
    /// in-memory queue stays authoritative for this process.
    async fn persist_locked(&self, actions: &VecDeque<QueuedAction>) {
        let serialized = match serde_json::to_string(actions) {
            Ok(s) => s,
            Err(e) => {
                StoreMetrics::record_write_failure();
                tracing::error!(error = %e, "Failed to serialize mutation queue");
                return;
            }
        };

        if let Err(e) = self.store.set(&self.config.storage_key, &serialized).await {
            StoreMetrics::record_write_failure();
            tracing::error!(
                error = %e,
                key = %self.config.storage_key,
                pending = actions.len(),
                "Failed to persist mutation queue; pending work will not survive a restart"
            );
        }
    }

    /// Write the current queue to the store
    pub async fn persist(&self) {
        let actions = self.actions.lock().await;
        self.persist_locked(&actions).await;
    }

    /// Snapshot of pending actions in queue order
    pub async fn pending(&self) -> Vec<QueuedAction> {
        self.actions.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.actions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.actions.lock().await.is_empty()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Receive an [`ActionOutcome`] for every action applied or abandoned
    /// from now on.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<ActionOutcome> {
        self.outcomes.subscribe()
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub async fn stats(&self) -> QueueStats {
        let actions = self.actions.lock().await;
        QueueStats {
            pending: actions.len(),
            draining: self.is_draining(),
            oldest_attempts: actions.front().map(|a| a.attempts),
            max_retries: self.config.max_retries,
            storage_key: self.config.storage_key.clone(),
            store_backend: self.store.backend_name(),
        }
    }
}
