//! Realtime connection manager.
//!
//! One logical connection per session. A supervisor task owns the transport:
//! it performs the handshake, pumps inbound and outbound frames, and on an
//! unexpected close walks the reconnect schedule until it either reconnects
//! or gives up with a terminal `ReconnectFailed` event.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant, Interval};
use tokio_util::sync::CancellationToken;

use crate::backoff::{BackoffConfig, ExponentialBackoff};
use crate::config::RealtimeConfig;
use crate::metrics::RealtimeMetrics;

use super::message::{ClientMessage, EventKind, InboundError, PresenceStatus, RealtimeEvent, ServerEvent};
use super::registry::{HandlerId, HandlerRegistry};
use super::transport::{Connector, FrameSink, FrameStream, TransportError, WebSocketConnector};

/// Capacity of the channel between `send()` and the supervisor task
const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Bound on the presence-offline and close exchange during `disconnect()`
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum RealtimeError {
    #[error("connect to session {session_id} failed: {source}")]
    Connect {
        session_id: String,
        #[source]
        source: TransportError,
    },

    #[error("connect to session {0} was cancelled")]
    Cancelled(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    fn gauge_value(self) -> i64 {
        match self {
            ConnectionState::Disconnected => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Connected => 2,
        }
    }
}

/// What happened to a message passed to `send()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Handed to the live transport
    Sent,
    /// Held until the next successful connect
    Buffered,
    Dropped,
}

#[derive(Clone)]
struct Link {
    state: ConnectionState,
    session_id: Option<String>,
    outbound: Option<mpsc::Sender<String>>,
}

/// State shared between the manager handle and its supervisor task
struct Shared {
    link: watch::Sender<Link>,
    attempts: AtomicU32,
    buffer: Mutex<VecDeque<String>>,
    buffer_capacity: usize,
    registry: HandlerRegistry,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.link.send_modify(|link| {
            link.state = state;
            if state != ConnectionState::Connected {
                link.outbound = None;
            }
        });
        RealtimeMetrics::set_state(state.gauge_value());
    }

    fn attach(&self, outbound: mpsc::Sender<String>) {
        self.link.send_modify(|link| {
            link.state = ConnectionState::Connected;
            link.outbound = Some(outbound);
        });
        RealtimeMetrics::set_state(ConnectionState::Connected.gauge_value());
    }

    fn state(&self) -> ConnectionState {
        self.link.borrow().state
    }

    /// Keep a frame for the next connect, dropping the oldest when full
    fn buffer_or_drop(&self, frame: String) -> SendStatus {
        if self.buffer_capacity == 0 {
            RealtimeMetrics::record_outbound_dropped();
            return SendStatus::Dropped;
        }

        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if buffer.len() >= self.buffer_capacity {
            buffer.pop_front();
            RealtimeMetrics::record_outbound_dropped();
        }
        buffer.push_back(frame);
        SendStatus::Buffered
    }

    fn take_buffered(&self) -> VecDeque<String> {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn emit(&self, event: RealtimeEvent) {
        self.registry.dispatch(&event);
    }
}

struct Supervisor {
    session_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Maintains the live event-stream connection for one session at a time.
///
/// # Example
///
/// ```rust,ignore
/// let realtime = RealtimeManager::websocket(settings.realtime.clone());
/// realtime.on(EventKind::Message, |event| println!("{:?}", event));
/// realtime.connect("session-1").await?;
/// realtime.send(ClientMessage::Ping);
/// realtime.disconnect().await;
/// ```
pub struct RealtimeManager {
    config: RealtimeConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    supervisor: tokio::sync::Mutex<Option<Supervisor>>,
}

impl RealtimeManager {
    pub fn new(config: RealtimeConfig, connector: Arc<dyn Connector>) -> Self {
        let (link, _) = watch::channel(Link {
            state: ConnectionState::Disconnected,
            session_id: None,
            outbound: None,
        });

        let shared = Arc::new(Shared {
            link,
            attempts: AtomicU32::new(0),
            buffer: Mutex::new(VecDeque::new()),
            buffer_capacity: config.outbound_buffer,
            registry: HandlerRegistry::new(),
        });

        Self {
            config,
            connector,
            shared,
            supervisor: tokio::sync::Mutex::new(None),
        }
    }

    /// Manager using the WebSocket transport
    pub fn websocket(config: RealtimeConfig) -> Self {
        Self::new(config, Arc::new(WebSocketConnector::new()))
    }

    /// Open the connection for `session_id`.
    ///
    /// A no-op while already connecting or connected to the same session.
    /// Connecting to another session, or while a reconnect is pending, tears
    /// the old supervisor down first and starts with a fresh attempt count.
    ///
    /// If the first handshake fails the error is returned and the reconnect
    /// schedule still runs in the background.
    #[tracing::instrument(name = "realtime.connect", skip(self))]
    pub async fn connect(&self, session_id: &str) -> Result<(), RealtimeError> {
        let ready = {
            let mut supervisor = self.supervisor.lock().await;

            if let Some(current) = supervisor.as_ref() {
                let active = matches!(
                    self.shared.state(),
                    ConnectionState::Connecting | ConnectionState::Connected
                );
                if current.session_id == session_id && active && !current.handle.is_finished() {
                    tracing::debug!("Already connected or connecting, ignoring connect");
                    return Ok(());
                }
            }

            if let Some(previous) = supervisor.take() {
                Self::stop(previous).await;
            }

            self.shared.attempts.store(0, Ordering::Release);
            self.shared.link.send_modify(|link| {
                link.session_id = Some(session_id.to_string());
            });
            self.shared.set_state(ConnectionState::Connecting);

            let (ready_tx, ready_rx) = oneshot::channel();
            let cancel = CancellationToken::new();
            let worker = Worker {
                session_id: session_id.to_string(),
                url: self.config.session_url(session_id),
                handshake_timeout: self.config.handshake_timeout(),
                heartbeat: self.config.heartbeat_interval(),
                max_attempts: self.config.max_reconnect_attempts,
                backoff: ExponentialBackoff::with_config(BackoffConfig::from(&self.config)),
                connector: Arc::clone(&self.connector),
                shared: Arc::clone(&self.shared),
                cancel: cancel.clone(),
                ready: Some(ready_tx),
            };

            *supervisor = Some(Supervisor {
                session_id: session_id.to_string(),
                cancel,
                handle: tokio::spawn(worker.run()),
            });

            ready_rx
        };

        match ready.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(RealtimeError::Connect {
                session_id: session_id.to_string(),
                source,
            }),
            Err(_) => Err(RealtimeError::Cancelled(session_id.to_string())),
        }
    }

    /// Send presence-offline if connected, close the transport and cancel
    /// any pending reconnect.
    pub async fn disconnect(&self) {
        let previous = self.supervisor.lock().await.take();
        if let Some(previous) = previous {
            tracing::info!(session_id = %previous.session_id, "Disconnecting realtime session");
            Self::stop(previous).await;
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    async fn stop(supervisor: Supervisor) {
        supervisor.cancel.cancel();
        if let Err(e) = supervisor.handle.await {
            tracing::error!(error = %e, session_id = %supervisor.session_id, "Realtime supervisor task failed");
        }
    }

    /// Best-effort send.
    ///
    /// While not connected the message is dropped, or buffered when an
    /// outbound buffer is configured.
    pub fn send(&self, message: ClientMessage) -> SendStatus {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize outbound message");
                RealtimeMetrics::record_outbound_dropped();
                return SendStatus::Dropped;
            }
        };

        let outbound = {
            let link = self.shared.link.borrow();
            match (link.state, &link.outbound) {
                (ConnectionState::Connected, Some(tx)) => Some(tx.clone()),
                _ => None,
            }
        };

        let Some(tx) = outbound else {
            tracing::debug!("Not connected, outbound message not sent");
            return self.shared.buffer_or_drop(frame);
        };

        match tx.try_send(frame) {
            Ok(()) => SendStatus::Sent,
            Err(mpsc::error::TrySendError::Full(frame)) | Err(mpsc::error::TrySendError::Closed(frame)) => {
                tracing::warn!("Outbound channel unavailable");
                self.shared.buffer_or_drop(frame)
            }
        }
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        self.shared.registry.on(kind, handler)
    }

    pub fn remove_listener(&self, kind: EventKind, id: HandlerId) -> bool {
        self.shared.registry.remove(kind, id)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn session_id(&self) -> Option<String> {
        self.shared.link.borrow().session_id.clone()
    }

    /// Reconnect attempts since the last successful connect
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::Acquire)
    }

    /// Wait until the connection reaches `state`
    pub async fn wait_for_state(&self, state: ConnectionState) {
        let mut rx = self.shared.link.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = rx.wait_for(|link| link.state == state).await;
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }
}

impl Drop for RealtimeManager {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.get_mut().take() {
            supervisor.cancel.cancel();
        }
    }
}

/// How a live session ended
enum SessionEnd {
    Requested,
    Lost,
}

/// Supervisor task body for one session
struct Worker {
    session_id: String,
    url: String,
    handshake_timeout: Duration,
    heartbeat: Option<Duration>,
    max_attempts: u32,
    backoff: ExponentialBackoff,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    ready: Option<oneshot::Sender<Result<(), TransportError>>>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            self.shared.set_state(ConnectionState::Connecting);

            let handshake = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = timeout(self.handshake_timeout, self.connector.connect(&self.url)) => result,
            };

            let connected = match handshake {
                Ok(result) => result,
                Err(_) => Err(TransportError::HandshakeTimeout(self.handshake_timeout)),
            };

            match connected {
                Ok((sink, stream)) => {
                    if let SessionEnd::Requested = self.session(sink, stream).await {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %self.session_id,
                        attempt = self.shared.attempts.load(Ordering::Acquire),
                        error = %e,
                        "Realtime connect failed"
                    );
                    self.shared.set_state(ConnectionState::Disconnected);
                    self.notify_ready(Err(e));
                }
            }

            if !self.schedule_reconnect().await {
                return;
            }
        }
    }

    fn notify_ready(&mut self, result: Result<(), TransportError>) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(result);
        }
    }

    /// Wait out the next backoff delay. Returns false when the schedule is
    /// exhausted or the wait was cancelled.
    async fn schedule_reconnect(&self) -> bool {
        let attempts = self.shared.attempts.load(Ordering::Acquire);

        if attempts >= self.max_attempts {
            RealtimeMetrics::record_reconnect_failed();
            tracing::error!(
                session_id = %self.session_id,
                attempts = attempts,
                "Realtime reconnect attempts exhausted, giving up"
            );
            self.shared.emit(RealtimeEvent::ReconnectFailed {
                session_id: self.session_id.clone(),
                attempts,
            });
            return false;
        }

        let delay = self.backoff.delay_for_attempt(attempts);
        let attempt = attempts + 1;
        self.shared.attempts.store(attempt, Ordering::Release);
        RealtimeMetrics::record_reconnect_attempt();

        tracing::info!(
            session_id = %self.session_id,
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            "Realtime reconnect scheduled"
        );

        self.shared.emit(RealtimeEvent::ReconnectScheduled {
            session_id: self.session_id.clone(),
            attempt,
            delay_ms: delay.as_millis() as u64,
        });

        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn session(&mut self, mut sink: Box<dyn FrameSink>, mut stream: Box<dyn FrameStream>) -> SessionEnd {
        let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_CHANNEL_CAPACITY);

        self.shared.attempts.store(0, Ordering::Release);
        self.shared.attach(tx);
        RealtimeMetrics::record_connected();
        tracing::info!(session_id = %self.session_id, "Realtime connected");

        self.shared.emit(RealtimeEvent::Connected {
            session_id: self.session_id.clone(),
        });
        self.notify_ready(Ok(()));

        let mut lost = self.send_presence(sink.as_mut(), PresenceStatus::Online).await.is_err();

        if !lost {
            for frame in self.shared.take_buffered() {
                if let Err(e) = sink.send(frame).await {
                    tracing::warn!(error = %e, "Failed to flush buffered message");
                    lost = true;
                    break;
                }
                RealtimeMetrics::record_outbound_sent();
            }
        }

        let mut heartbeat = self.heartbeat.map(|period| interval_at(Instant::now() + period, period));

        while !lost {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.close_requested(sink, &mut rx).await;
                    return SessionEnd::Requested;
                }
                frame = stream.next_frame() => match frame {
                    Some(Ok(text)) => self.handle_frame(&text),
                    Some(Err(e)) => {
                        tracing::warn!(session_id = %self.session_id, error = %e, "Realtime receive failed");
                        lost = true;
                    }
                    None => {
                        tracing::warn!(session_id = %self.session_id, "Realtime connection closed by peer");
                        lost = true;
                    }
                },
                Some(frame) = rx.recv() => {
                    match sink.send(frame).await {
                        Ok(()) => RealtimeMetrics::record_outbound_sent(),
                        Err(e) => {
                            tracing::warn!(session_id = %self.session_id, error = %e, "Realtime send failed");
                            lost = true;
                        }
                    }
                }
                _ = next_tick(&mut heartbeat) => {
                    if let Ok(frame) = ClientMessage::Ping.to_frame() {
                        if let Err(e) = sink.send(frame).await {
                            tracing::warn!(session_id = %self.session_id, error = %e, "Heartbeat send failed");
                            lost = true;
                        }
                    }
                }
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
        self.recover_unsent(&mut rx);
        self.shared.emit(RealtimeEvent::Disconnected {
            session_id: self.session_id.clone(),
            requested: false,
        });
        SessionEnd::Lost
    }

    async fn close_requested(&self, mut sink: Box<dyn FrameSink>, rx: &mut mpsc::Receiver<String>) {
        let farewell = async {
            if let Err(e) = self.send_presence(sink.as_mut(), PresenceStatus::Offline).await {
                tracing::debug!(error = %e, "Presence offline not delivered");
            }
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "Transport close failed");
            }
        };
        if timeout(CLOSE_TIMEOUT, farewell).await.is_err() {
            tracing::debug!(session_id = %self.session_id, "Transport close timed out");
        }

        self.shared.set_state(ConnectionState::Disconnected);
        self.recover_unsent(rx);
        tracing::info!(session_id = %self.session_id, "Realtime disconnected");
        self.shared.emit(RealtimeEvent::Disconnected {
            session_id: self.session_id.clone(),
            requested: true,
        });
    }

    async fn send_presence(&self, sink: &mut dyn FrameSink, status: PresenceStatus) -> Result<(), TransportError> {
        let frame = ClientMessage::presence(status)
            .to_frame()
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        sink.send(frame).await?;
        RealtimeMetrics::record_outbound_sent();
        Ok(())
    }

    /// Frames accepted by `send()` but never written go back to the buffer
    fn recover_unsent(&self, rx: &mut mpsc::Receiver<String>) {
        rx.close();
        while let Ok(frame) = rx.try_recv() {
            self.shared.buffer_or_drop(frame);
        }
    }

    fn handle_frame(&self, text: &str) {
        match ServerEvent::parse(text) {
            Ok(event) => {
                let kind = event.kind();
                RealtimeMetrics::record_event(kind.as_str());
                let handlers = self.shared.registry.dispatch(&RealtimeEvent::Server(event));
                tracing::trace!(event_type = kind.as_str(), handlers = handlers, "Realtime event dispatched");
            }
            Err(InboundError::UnknownType(event_type)) => {
                RealtimeMetrics::record_unknown_event();
                tracing::debug!(event_type = %event_type, "Ignoring unknown realtime event type");
            }
            Err(e) => {
                RealtimeMetrics::record_unknown_event();
                tracing::warn!(error = %e, "Dropping unreadable realtime frame");
            }
        }
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct Unreachable;

    #[async_trait]
    impl Connector for Unreachable {
        async fn connect(&self, _url: &str) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError> {
            Err(TransportError::ConnectionFailed("refused".to_string()))
        }
    }

    fn manager(outbound_buffer: usize) -> RealtimeManager {
        let config = RealtimeConfig {
            outbound_buffer,
            ..Default::default()
        };
        RealtimeManager::new(config, Arc::new(Unreachable))
    }

    #[test]
    fn test_initial_state() {
        let realtime = manager(0);
        assert_eq!(realtime.state(), ConnectionState::Disconnected);
        assert_eq!(realtime.session_id(), None);
        assert_eq!(realtime.reconnect_attempts(), 0);
    }

    #[test]
    fn test_send_while_disconnected_drops_by_default() {
        let realtime = manager(0);
        assert_eq!(realtime.send(ClientMessage::Ping), SendStatus::Dropped);
    }

    #[test]
    fn test_send_buffer_keeps_newest() {
        let realtime = manager(2);
        for i in 0..3 {
            let status = realtime.send(ClientMessage::Custom(json!({"type": "n", "i": i})));
            assert_eq!(status, SendStatus::Buffered);
        }

        let buffered: Vec<String> = realtime.shared.take_buffered().into_iter().collect();
        assert_eq!(buffered.len(), 2);
        assert!(buffered[0].contains("\"i\":1"));
        assert!(buffered[1].contains("\"i\":2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_connect_returns_error_and_schedules_retry() {
        let realtime = manager(0);
        let result = realtime.connect("s1").await;

        assert!(matches!(result, Err(RealtimeError::Connect { .. })));
        assert_eq!(realtime.session_id().as_deref(), Some("s1"));

        realtime.disconnect().await;
        assert_eq!(realtime.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_gauge_values() {
        assert_eq!(ConnectionState::Disconnected.gauge_value(), 0);
        assert_eq!(ConnectionState::Connected.gauge_value(), 2);
    }
}
