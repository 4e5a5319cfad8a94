//! Network reachability tracking.
//!
//! The native network-status bridge calls [`ConnectivityMonitor::report`] on
//! every platform callback; the queue engine and its drain task read the
//! latest status or watch for transitions.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::{Stream, StreamExt};

/// Snapshot delivered by the platform network-status API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityStatus {
    pub is_connected: bool,
    pub is_internet_reachable: bool,
}

impl ConnectivityStatus {
    pub fn online() -> Self {
        Self {
            is_connected: true,
            is_internet_reachable: true,
        }
    }

    pub fn offline() -> Self {
        Self::default()
    }

    /// Link is up and internet access is confirmed
    pub fn is_reachable(&self) -> bool {
        self.is_connected && self.is_internet_reachable
    }
}

/// Shared handle to the latest connectivity status; cheap to clone.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    tx: watch::Sender<ConnectivityStatus>,
}

impl ConnectivityMonitor {
    pub fn new(initial: ConnectivityStatus) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Record a status report from the platform. Subscribers are only woken
    /// when the status actually changed.
    pub fn report(&self, status: ConnectivityStatus) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });

        if changed {
            tracing::info!(
                is_connected = status.is_connected,
                is_internet_reachable = status.is_internet_reachable,
                reachable = status.is_reachable(),
                "Connectivity changed"
            );
        }
    }

    pub fn current(&self) -> ConnectivityStatus {
        *self.tx.borrow()
    }

    pub fn is_reachable(&self) -> bool {
        self.current().is_reachable()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectivityStatus> {
        self.tx.subscribe()
    }

    /// Stream of reachability values, starting with the current one and
    /// yielding only when reachability flips.
    pub fn reachability_changes(&self) -> impl Stream<Item = bool> + Send + Unpin + 'static {
        let mut last: Option<bool> = None;
        WatchStream::new(self.subscribe())
            .map(|status| status.is_reachable())
            .filter(move |reachable| {
                if last == Some(*reachable) {
                    false
                } else {
                    last = Some(*reachable);
                    true
                }
            })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(ConnectivityStatus::offline())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_reachable_requires_both_flags() {
        assert!(ConnectivityStatus::online().is_reachable());
        assert!(!ConnectivityStatus::offline().is_reachable());
        assert!(!ConnectivityStatus {
            is_connected: true,
            is_internet_reachable: false,
        }
        .is_reachable());
    }

    #[test]
    fn test_status_deserializes_from_platform_shape() {
        let status: ConnectivityStatus =
            serde_json::from_str(r#"{"isConnected":true,"isInternetReachable":false}"#).unwrap();
        assert!(status.is_connected);
        assert!(!status.is_internet_reachable);
    }

    #[tokio::test]
    async fn test_report_updates_current() {
        let monitor = ConnectivityMonitor::default();
        assert!(!monitor.is_reachable());

        monitor.report(ConnectivityStatus::online());
        assert!(monitor.is_reachable());
    }

    #[tokio::test]
    async fn test_reachability_changes_skips_duplicates() {
        let monitor = ConnectivityMonitor::default();
        let mut changes = monitor.reachability_changes();

        assert_eq!(changes.next().await, Some(false));

        // Link up without internet is still unreachable
        monitor.report(ConnectivityStatus {
            is_connected: true,
            is_internet_reachable: false,
        });
        monitor.report(ConnectivityStatus::online());
        assert_eq!(changes.next().await, Some(true));

        monitor.report(ConnectivityStatus::offline());
        assert_eq!(changes.next().await, Some(false));

        let pending = tokio::time::timeout(Duration::from_millis(50), changes.next()).await;
        assert!(pending.is_err());
    }
}
