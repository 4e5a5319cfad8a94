use anyhow::Result;
use tokio::signal;

use sync_resilience::config::Settings;
use sync_resilience::connectivity::{ConnectivityMonitor, ConnectivityStatus};
use sync_resilience::realtime::{EventKind, RealtimeEvent};
use sync_resilience::runtime::SyncRuntime;
use sync_resilience::tasks::OutcomeLogger;
use sync_resilience::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing; the guard flushes spans on exit
    let _telemetry = init_telemetry(&settings.otel)?;
    tracing::info!("Configuration loaded");

    // A headless agent has no platform network bridge; assume reachable
    let connectivity = ConnectivityMonitor::new(ConnectivityStatus::online());

    let runtime = SyncRuntime::build(settings, connectivity).await?;
    tracing::info!(pending = runtime.queue.len().await, "Sync runtime ready");

    let outcome_logger = tokio::spawn(OutcomeLogger::new(runtime.queue.subscribe_outcomes()).run());

    runtime.realtime.on(EventKind::ReconnectFailed, |event| {
        if let RealtimeEvent::ReconnectFailed { session_id, attempts } = event {
            tracing::error!(session_id = %session_id, attempts = attempts, "Realtime session gave up reconnecting");
        }
    });

    let drain_handle = runtime.spawn_drain_task();

    if let Err(e) = runtime.connect_configured_session().await {
        tracing::warn!(error = %e, code = e.code(), "Initial realtime connect failed, retrying in background");
    }

    shutdown_signal_handler().await;

    let result = runtime.graceful_shutdown().execute("signal").await;
    if !result.success {
        tracing::warn!(pending = result.pending_after, "Shutdown finished with warnings");
    }

    // Wait for background tasks to finish
    let _ = drain_handle.await;
    outcome_logger.abort();

    tracing::info!("Sync agent shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
