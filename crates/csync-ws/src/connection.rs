//! WebSocket connection manager.
//!
//! Owns the single live transport of the chart. `open` is debounced and
//! replaces the current session; abnormal closes get exactly one delayed
//! reconnect attempt each, and only while the closed session is still the
//! one the caller wants.

use crate::error::{WsError, WsResult};
use crate::message::{ConfigRequest, SessionEvent, WsMessage};
use csync_core::{Debouncer, Generation, GenerationCounter, SessionParams};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Close code used when the stream ends without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Trailing debounce window for `open`.
    pub open_debounce_ms: u64,
    /// Fixed delay before the reconnect attempt that follows an abnormal close.
    pub reconnect_delay_ms: u64,
    /// Consecutive failed attempts before giving up (0 = never give up).
    pub max_reconnect_attempts: u32,
    /// Close codes treated as intentional (no reconnect).
    pub normal_close_codes: Vec<u16>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            open_debounce_ms: 300,
            reconnect_delay_ms: 2000,
            max_reconnect_attempts: 0, // Infinite
            normal_close_codes: vec![1000],
        }
    }
}

impl ConnectionConfig {
    /// Whether a close with `code` was intentional.
    pub fn is_normal_close(&self, code: u16) -> bool {
        self.normal_close_codes.contains(&code)
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// How one transport run ended.
enum TransportEnd {
    /// Our own cancellation (session replaced, `close`, shutdown).
    Cancelled,
    /// Peer closed or the stream ended.
    Closed { code: u16, reason: String },
}

struct ActiveSession {
    params: SessionParams,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    config: ConnectionConfig,
    state: RwLock<ConnectionState>,
    generations: GenerationCounter,
    /// Session the caller currently wants; `None` after `close`.
    desired: RwLock<Option<SessionParams>>,
    active: Mutex<Option<ActiveSession>>,
    open_debouncer: Debouncer,
    event_tx: mpsc::Sender<SessionEvent>,
    shutdown_token: CancellationToken,
}

/// WebSocket connection manager.
///
/// Cloning shares the manager.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    ///
    /// `generations` is shared with the consumer of `event_tx`, which uses it
    /// to discard events from retired sessions.
    pub fn new(
        config: ConnectionConfig,
        generations: GenerationCounter,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let debounce = Duration::from_millis(config.open_debounce_ms);
        Self {
            inner: Arc::new(Inner {
                config,
                state: RwLock::new(ConnectionState::Idle),
                generations,
                desired: RwLock::new(None),
                active: Mutex::new(None),
                open_debouncer: Debouncer::new("ws_open", debounce),
                event_tx,
                shutdown_token: CancellationToken::new(),
            }),
        }
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Current session generation.
    pub fn generation(&self) -> Generation {
        self.inner.generations.current()
    }

    /// Parameters of the session the caller currently wants.
    pub fn desired(&self) -> Option<SessionParams> {
        self.inner.desired.read().clone()
    }

    /// Request a session. Calls within the debounce window collapse into
    /// one connection attempt using the last parameters.
    pub fn open(&self, params: SessionParams) {
        if self.inner.shutdown_token.is_cancelled() {
            warn!(symbol = %params.symbol, "open() after shutdown ignored");
            return;
        }

        debug!(session = %params.key(), "Session open requested");
        *self.inner.desired.write() = Some(params.clone());

        let inner = Arc::clone(&self.inner);
        self.inner
            .open_debouncer
            .schedule(async move { inner.establish(params) });
    }

    /// Tear down the current session and stop reconnecting.
    pub fn close(&self, reason: &str) {
        info!(%reason, "Closing session");
        *self.inner.desired.write() = None;
        self.inner.open_debouncer.cancel();
        self.inner.teardown_active();
        *self.inner.state.write() = ConnectionState::Closed;
    }

    /// Signal graceful shutdown of all sessions.
    pub fn shutdown(&self) {
        info!("ConnectionManager shutdown requested");
        self.inner.shutdown_token.cancel();
        self.close("shutdown");
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown_token.is_cancelled()
    }
}

impl Inner {
    fn is_desired(&self, params: &SessionParams) -> bool {
        self.desired.read().as_ref() == Some(params)
    }

    /// Replace the active session with one for `params`.
    fn establish(self: Arc<Self>, params: SessionParams) {
        if self.shutdown_token.is_cancelled() {
            return;
        }
        if !self.is_desired(&params) {
            debug!(session = %params.key(), "Superseded open request skipped");
            return;
        }

        let mut active = self.active.lock();
        if let Some(current) = active.as_ref() {
            if current.params == params && !current.handle.is_finished() {
                debug!(session = %params.key(), "Session already active");
                return;
            }
        }
        if let Some(previous) = active.take() {
            info!(session = %previous.params.key(), "Tearing down previous session");
            previous.cancel.cancel();
        }

        let generation = self.generations.advance();
        let cancel = self.shutdown_token.child_token();
        info!(session = %params.key(), %generation, "Establishing session");

        let handle = tokio::spawn(Arc::clone(&self).run_session(
            params.clone(),
            generation,
            cancel.clone(),
        ));
        *active = Some(ActiveSession {
            params,
            cancel,
            handle,
        });
    }

    fn teardown_active(&self) {
        if let Some(previous) = self.active.lock().take() {
            previous.cancel.cancel();
        }
    }

    /// Publish `state` for the session run at `generation`.
    ///
    /// A run that was cancelled or superseded no longer owns the state.
    fn set_state(&self, generation: Generation, cancel: &CancellationToken, state: ConnectionState) {
        let mut current = self.state.write();
        if cancel.is_cancelled() || !self.generations.is_current(generation) {
            debug!(%generation, ?state, "Superseded session state update ignored");
            return;
        }
        *current = state;
    }

    /// Connect, pump, and reconnect until cancelled or no longer desired.
    async fn run_session(
        self: Arc<Self>,
        params: SessionParams,
        mut generation: Generation,
        cancel: CancellationToken,
    ) {
        let mut failures = 0u32;

        loop {
            if cancel.is_cancelled() {
                return;
            }

            self.set_state(generation, &cancel, ConnectionState::Connecting);
            let mut connected = false;
            let (code, reason) = match self
                .run_transport(&params, generation, &cancel, &mut connected)
                .await
            {
                Ok(TransportEnd::Cancelled) => {
                    debug!(%generation, "Transport cancelled");
                    return;
                }
                Ok(TransportEnd::Closed { code, reason }) => (code, reason),
                Err(e) => {
                    error!(?e, %generation, "WebSocket connection error");
                    (ABNORMAL_CLOSURE, e.to_string())
                }
            };

            let abnormal = !self.config.is_normal_close(code);
            if abnormal {
                if connected {
                    failures = 0;
                }
                failures += 1;
            }
            let exhausted = self.config.max_reconnect_attempts > 0
                && failures >= self.config.max_reconnect_attempts;
            self.emit(SessionEvent::Closed {
                generation,
                code,
                reason: reason.clone(),
                abnormal,
                reconnect: abnormal && !exhausted,
            })
            .await;

            if !abnormal {
                info!(code, %reason, %generation, "Session closed normally");
                self.set_state(generation, &cancel, ConnectionState::Closed);
                return;
            }
            if exhausted {
                error!(failures, session = %params.key(), "Max reconnection attempts reached");
                self.set_state(generation, &cancel, ConnectionState::Closed);
                return;
            }

            self.set_state(generation, &cancel, ConnectionState::Reconnecting);
            let delay = Duration::from_millis(self.config.reconnect_delay_ms);
            warn!(code, %reason, failures, delay_ms = delay.as_millis(), "Abnormal close, reconnect scheduled");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    debug!("Session cancelled during reconnect delay");
                    return;
                }
            }

            if !self.is_desired(&params) {
                info!(session = %params.key(), "Session no longer desired, reconnect suppressed");
                return;
            }

            generation = self.generations.advance();
            info!(session = %params.key(), %generation, "Reconnecting");
        }
    }

    async fn run_transport(
        &self,
        params: &SessionParams,
        generation: Generation,
        cancel: &CancellationToken,
        connected: &mut bool,
    ) -> WsResult<TransportEnd> {
        info!(url = %self.config.url, session = %params.key(), %generation, "Connecting to WebSocket");

        let connect = connect_async_tls_with_config(&self.config.url, None, true, None);
        let (ws_stream, _response) = tokio::select! {
            result = connect => result
                .map_err(|e| WsError::ConnectionFailed(format!("{}: {e}", self.config.url)))?,
            () = cancel.cancelled() => return Ok(TransportEnd::Cancelled),
        };
        let (mut write, mut read) = ws_stream.split();

        *connected = true;
        self.set_state(generation, cancel, ConnectionState::Connected);
        info!(%generation, "WebSocket connected");

        let config = serde_json::to_string(&ConfigRequest::from(params))?;
        write
            .send(Message::Text(config))
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))?;
        self.emit(SessionEvent::Opened {
            generation,
            params: params.clone(),
        })
        .await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(?e, "Failed to send Close frame during teardown");
                    }
                    return Ok(TransportEnd::Cancelled);
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.forward_text(generation, &text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            debug!("Received ping, sending pong");
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason): (u16, String) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((ABNORMAL_CLOSURE, "Close without frame".to_string()));
                            warn!(code, %reason, "WebSocket closed by server");
                            return Ok(TransportEnd::Closed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(?e, "WebSocket read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            return Ok(TransportEnd::Closed {
                                code: ABNORMAL_CLOSURE,
                                reason: "Stream ended".to_string(),
                            });
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    async fn forward_text(&self, generation: Generation, text: &str) {
        match serde_json::from_str::<WsMessage>(text) {
            Ok(message) => {
                self.emit(SessionEvent::Message {
                    generation,
                    message,
                })
                .await;
            }
            Err(e) => {
                warn!(error = %e, raw_len = text.len(), "Malformed message dropped");
            }
        }
    }

    async fn emit(&self, event: SessionEvent) {
        if self.event_tx.send(event).await.is_err() {
            warn!("Session event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csync_core::Resolution;

    fn params(symbol: &str) -> SessionParams {
        SessionParams::new(symbol, Resolution::H1, vec![], "1000", "5000").unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_reconnect_attempts, 0); // Infinite
        assert_eq!(config.reconnect_delay_ms, 2000);
        assert!(config.is_normal_close(1000));
        assert!(!config.is_normal_close(1006));
        assert!(!config.is_normal_close(1011));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_before_debounce_fires_never_connects() {
        let (tx, _rx) = mpsc::channel(8);
        let generations = GenerationCounter::new();
        let manager = ConnectionManager::new(
            ConnectionConfig {
                url: "ws://127.0.0.1:9".to_string(),
                ..Default::default()
            },
            generations.clone(),
            tx,
        );

        manager.open(params("BTCUSDT"));
        manager.close("user navigated away");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(generations.current(), Generation(0));
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(manager.desired().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_burst_advances_generation_once() {
        let (tx, _rx) = mpsc::channel(8);
        let generations = GenerationCounter::new();
        let manager = ConnectionManager::new(
            ConnectionConfig {
                url: "ws://127.0.0.1:9".to_string(),
                ..Default::default()
            },
            generations.clone(),
            tx,
        );

        for _ in 0..5 {
            manager.open(params("BTCUSDT"));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        manager.open(params("ETHUSDT"));
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(generations.current(), Generation(1));
        assert_eq!(manager.desired().unwrap().symbol, "ETHUSDT");
        manager.shutdown();
    }

    #[test]
    fn test_superseded_run_cannot_overwrite_state() {
        let (tx, _rx) = mpsc::channel(8);
        let generations = GenerationCounter::new();
        let manager = ConnectionManager::new(ConnectionConfig::default(), generations.clone(), tx);
        let inner = &manager.inner;

        let old = generations.advance();
        let old_cancel = CancellationToken::new();
        inner.set_state(old, &old_cancel, ConnectionState::Connected);
        assert_eq!(manager.state(), ConnectionState::Connected);

        let new = generations.advance();
        let new_cancel = CancellationToken::new();
        inner.set_state(new, &new_cancel, ConnectionState::Connecting);
        inner.set_state(old, &old_cancel, ConnectionState::Reconnecting);
        assert_eq!(manager.state(), ConnectionState::Connecting);

        new_cancel.cancel();
        inner.set_state(new, &new_cancel, ConnectionState::Closed);
        assert_eq!(manager.state(), ConnectionState::Connecting);
    }

    async fn next_closed(rx: &mut mpsc::Receiver<SessionEvent>) -> (Generation, String, bool, bool) {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open");
        match event {
            SessionEvent::Closed {
                generation,
                reason,
                abnormal,
                reconnect,
                ..
            } => (generation, reason, abnormal, reconnect),
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_last_attempt_close_announces_no_reconnect() {
        let (tx, mut rx) = mpsc::channel(8);
        let generations = GenerationCounter::new();
        let manager = ConnectionManager::new(
            ConnectionConfig {
                url: "ws://127.0.0.1:9".to_string(),
                open_debounce_ms: 10,
                reconnect_delay_ms: 20,
                max_reconnect_attempts: 2,
                ..Default::default()
            },
            generations.clone(),
            tx,
        );

        manager.open(params("BTCUSDT"));

        let (generation, reason, abnormal, reconnect) = next_closed(&mut rx).await;
        assert_eq!(generation, Generation(1));
        assert!(reason.starts_with("Connection failed"), "reason: {reason}");
        assert!(abnormal);
        assert!(reconnect);

        let (generation, _, abnormal, reconnect) = next_closed(&mut rx).await;
        assert_eq!(generation, Generation(2));
        assert!(abnormal);
        assert!(!reconnect);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(generations.current(), Generation(2));
        assert_eq!(manager.state(), ConnectionState::Closed);
        manager.shutdown();
    }
}
