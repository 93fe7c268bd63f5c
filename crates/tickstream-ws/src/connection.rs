//! Streaming connection manager.
//!
//! Handles connection lifecycle, heartbeat liveness, automatic reconnection
//! with exponential backoff, subscription replay after reconnection, and
//! dispatch of parsed market data to listeners.
//!
//! All mutable state sits behind one mutex. Each `connect()` spawns a run
//! task owning the transport session; the task re-checks its cancellation
//! token under that mutex before every transition, and `disconnect()`
//! cancels the token under the same mutex, so nothing from a cancelled run
//! can land after `disconnect()` returns.

use crate::backoff::{backoff_delay, should_reconnect, BackoffConfig};
use crate::error::{WsError, WsResult};
use crate::events::{EventBus, EventKind, ListenerId, StreamEvent};
use crate::heartbeat::HeartbeatManager;
use crate::message::{ControlRequest, InboundMessage};
use crate::quality::{
    calculate_connection_quality, update_latency_metrics, ConnectionMetrics, ConnectionQuality,
    QualityConfig, DEFAULT_MAX_SAMPLES,
};
use crate::subscription::{SubscriptionDiff, SubscriptionRegistry};
use crate::transport::{Frame, FrameSink, FrameStream, Transport, WebSocketTransport};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tickstream_core::{now_ms, ConnectionStatus, MarketDataMessage};
use tickstream_feed::{MessageParser, ParseResult, ParserStats};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Outbound frame queue depth per session.
const OUTBOUND_CAPACITY: usize = 256;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Stream endpoint.
    pub url: String,
    /// Symbols subscribed on first connect.
    pub symbols: Vec<String>,
    /// Reconnection attempts allowed per outage.
    pub max_reconnect_attempts: u32,
    pub backoff: BackoffConfig,
    /// Idle time before a heartbeat ping is sent.
    pub heartbeat_interval_ms: u64,
    /// Time allowed for a pong (or any traffic) after a ping.
    pub heartbeat_timeout_ms: u64,
    /// Time allowed for the transport to open.
    pub connect_timeout_ms: u64,
    /// Rolling latency window size.
    pub latency_window: usize,
    pub quality: QualityConfig,
    /// Buffer of each broadcast event receiver.
    pub event_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            symbols: Vec::new(),
            max_reconnect_attempts: 10,
            backoff: BackoffConfig::default(),
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            latency_window: DEFAULT_MAX_SAMPLES,
            quality: QualityConfig::default(),
            event_capacity: 1024,
        }
    }
}

struct State {
    status: ConnectionStatus,
    metrics: ConnectionMetrics,
    registry: SubscriptionRegistry,
    /// Cancellation token of the current run, if any.
    run: Option<CancellationToken>,
    /// Outbound queue of the live session.
    outbound: Option<mpsc::Sender<Frame>>,
    /// Consecutive reconnection attempts in the current outage.
    reconnect_attempts: u32,
}

struct Shared {
    config: ConnectionConfig,
    transport: Arc<dyn Transport>,
    parser: MessageParser,
    events: EventBus,
    state: Mutex<State>,
}

impl Shared {
    /// Transition status, announcing it only when it changes.
    fn set_status(&self, state: &mut State, status: ConnectionStatus) {
        if state.status == status {
            return;
        }
        debug!(from = %state.status, to = %status, "Connection status change");
        state.status = status;
        state.metrics.connected = status == ConnectionStatus::Connected;
        self.events.emit(StreamEvent::StatusChange(status));
    }
}

/// Market data stream connection manager.
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Manager over the WebSocket transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_transport(config, Arc::new(WebSocketTransport::new()))
    }

    pub fn with_transport(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Self {
        let registry = SubscriptionRegistry::with_symbols(&config.symbols);
        let events = EventBus::new(config.event_capacity);
        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                parser: MessageParser::new(),
                events,
                state: Mutex::new(State {
                    status: ConnectionStatus::Disconnected,
                    metrics: ConnectionMetrics::default(),
                    registry,
                    run: None,
                    outbound: None,
                    reconnect_attempts: 0,
                }),
            }),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.state.lock().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Snapshot of connection metrics.
    pub fn metrics(&self) -> ConnectionMetrics {
        self.shared.state.lock().metrics.clone()
    }

    /// Currently registered symbols.
    pub fn subscriptions(&self) -> BTreeSet<String> {
        self.shared.state.lock().registry.symbols().clone()
    }

    /// Consecutive reconnection attempts in the current outage.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.state.lock().reconnect_attempts
    }

    pub fn quality(&self) -> ConnectionQuality {
        let metrics = self.metrics();
        calculate_connection_quality(&metrics, &self.shared.config.quality)
    }

    pub fn parser_stats(&self) -> ParserStats {
        self.shared.parser.stats()
    }

    pub fn reset_parser_stats(&self) {
        self.shared.parser.reset_stats();
    }

    /// Register a handler for one event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.shared.events.on(kind, handler)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.shared.events.off(id)
    }

    /// Receiver for every event emitted after this call.
    pub fn subscribe_events(&self) -> broadcast::Receiver<StreamEvent> {
        self.shared.events.subscribe()
    }

    /// Open the stream.
    ///
    /// Resolves once the first attempt opens or fails. On failure the error
    /// is returned while reconnection continues in the background (unless
    /// the error is fatal). Returns `WsError::Cancelled` if `disconnect()`
    /// is called first.
    pub async fn connect(&self) -> WsResult<()> {
        let (token, first_rx) = {
            let mut state = self.shared.state.lock();
            if !state.status.can_connect() {
                return Err(WsError::InvalidState {
                    operation: "connect",
                    status: state.status,
                });
            }

            let token = CancellationToken::new();
            state.run = Some(token.clone());
            state.reconnect_attempts = 0;
            self.shared.set_status(&mut state, ConnectionStatus::Connecting);

            let (first_tx, first_rx) = oneshot::channel();
            tokio::spawn(self.clone().run_loop(token.clone(), first_tx));
            (token, first_rx)
        };

        tokio::select! {
            biased;
            result = first_rx => result.unwrap_or(Err(WsError::Cancelled)),
            () = token.cancelled() => Err(WsError::Cancelled),
        }
    }

    /// Close the stream and cancel any pending attempt or backoff.
    ///
    /// Idempotent; valid from any status.
    pub fn disconnect(&self) {
        let mut state = self.shared.state.lock();
        if let Some(token) = state.run.take() {
            token.cancel();
        }
        state.outbound = None;

        if state.status != ConnectionStatus::Disconnected {
            info!(status = %state.status, "Disconnecting");
            self.shared.events.emit(StreamEvent::Disconnected);
            self.shared
                .set_status(&mut state, ConnectionStatus::Disconnected);
        }
    }

    /// Add symbols. Returns what was actually added.
    pub fn subscribe<I, S>(&self, symbols: I) -> WsResult<SubscriptionDiff>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.change_subscriptions(|registry| registry.additions(symbols))
    }

    /// Remove symbols. Returns what was actually removed.
    pub fn unsubscribe<I, S>(&self, symbols: I) -> WsResult<SubscriptionDiff>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.change_subscriptions(|registry| registry.removals(symbols))
    }

    /// Replace the subscription set. An empty set unsubscribes everything.
    pub fn set_subscriptions<I, S>(&self, symbols: I) -> WsResult<SubscriptionDiff>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.change_subscriptions(|registry| registry.diff(symbols))
    }

    fn change_subscriptions<F>(&self, make_diff: F) -> WsResult<SubscriptionDiff>
    where
        F: FnOnce(&SubscriptionRegistry) -> SubscriptionDiff,
    {
        let mut state = self.shared.state.lock();
        let diff = make_diff(&state.registry);
        if diff.is_empty() {
            return Ok(diff);
        }

        let requests = ControlRequest::for_diff(&diff)
            .iter()
            .map(ControlRequest::to_json)
            .collect::<WsResult<Vec<_>>>()?;
        state.registry.apply(&diff);

        info!(
            added = ?diff.to_add,
            removed = ?diff.to_remove,
            "Subscription change"
        );

        if state.status == ConnectionStatus::Connected {
            if let Some(outbound) = &state.outbound {
                for request in requests {
                    if let Err(e) = outbound.try_send(Frame::Text(request)) {
                        // The full set is replayed on the next session.
                        warn!(error = %e, "Failed to queue subscription change");
                        break;
                    }
                }
            }
        }

        Ok(diff)
    }

    async fn run_loop(self, token: CancellationToken, first_tx: oneshot::Sender<WsResult<()>>) {
        let mut first = Some(first_tx);

        loop {
            let opened = self.open_transport(&token).await;
            if token.is_cancelled() {
                notify(&mut first, Err(WsError::Cancelled));
                return;
            }

            let cause = match opened {
                Ok((sink, stream)) => {
                    let Some((outbound_rx, symbols)) = self.on_open(&token) else {
                        notify(&mut first, Err(WsError::Cancelled));
                        return;
                    };
                    notify(&mut first, Ok(()));

                    let cause = self
                        .run_session(&token, sink, stream, outbound_rx, symbols)
                        .await;

                    {
                        let mut state = self.shared.state.lock();
                        if token.is_cancelled() {
                            return;
                        }
                        state.outbound = None;
                        warn!(error = %cause, "Connection lost");
                        self.shared.events.emit(StreamEvent::Disconnected);
                    }
                    cause
                }
                Err(e) => {
                    warn!(error = %e, "Connection attempt failed");
                    e
                }
            };

            // Settle the next status before the first caller sees the error.
            let delay = self.begin_reconnect(&cause, &token);
            notify(&mut first, Err(cause));
            let Some(delay) = delay else {
                return;
            };

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = token.cancelled() => return,
            }

            {
                let mut state = self.shared.state.lock();
                if token.is_cancelled() {
                    return;
                }
                self.shared
                    .set_status(&mut state, ConnectionStatus::Connecting);
            }
        }
    }

    async fn open_transport(
        &self,
        token: &CancellationToken,
    ) -> WsResult<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        let config = &self.shared.config;
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        info!(url = %config.url, "Connecting");

        tokio::select! {
            biased;
            () = token.cancelled() => Err(WsError::Cancelled),
            opened = tokio::time::timeout(timeout, self.shared.transport.connect(&config.url)) => {
                opened.unwrap_or(Err(WsError::ConnectTimeout(config.connect_timeout_ms)))
            }
        }
    }

    /// Transition to `Connected`. Returns the session's outbound queue and
    /// the symbols to replay, or `None` if the run was cancelled.
    fn on_open(
        &self,
        token: &CancellationToken,
    ) -> Option<(mpsc::Receiver<Frame>, BTreeSet<String>)> {
        let mut state = self.shared.state.lock();
        if token.is_cancelled() {
            return None;
        }

        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        state.outbound = Some(tx);
        state.reconnect_attempts = 0;
        state.metrics.connection_time = Some(Utc::now());

        self.shared.events.emit(StreamEvent::Connected);
        self.shared.set_status(&mut state, ConnectionStatus::Connected);
        info!(
            reconnects = state.metrics.reconnect_count,
            symbols = state.registry.len(),
            "Connected"
        );

        Some((rx, state.registry.symbols().clone()))
    }

    /// Decide what follows a failed attempt or lost session. Returns the
    /// backoff delay when a retry is scheduled.
    fn begin_reconnect(&self, cause: &WsError, token: &CancellationToken) -> Option<Duration> {
        let config = &self.shared.config;
        let mut state = self.shared.state.lock();
        if token.is_cancelled() {
            return None;
        }

        let attempt = state.reconnect_attempts;
        if cause.is_fatal() {
            error!(error = %cause, "Fatal connection error, not reconnecting");
            self.shared.set_status(&mut state, ConnectionStatus::Error);
            self.shared.events.emit(StreamEvent::Error(cause.clone()));
            return None;
        }

        if !should_reconnect(cause, attempt, config.max_reconnect_attempts) {
            error!(attempt, "Max reconnection attempts reached");
            self.shared.set_status(&mut state, ConnectionStatus::Error);
            self.shared
                .events
                .emit(StreamEvent::Error(WsError::ReconnectExhausted(attempt)));
            return None;
        }

        self.shared
            .set_status(&mut state, ConnectionStatus::Reconnecting);
        let delay = backoff_delay(attempt, &config.backoff);
        state.reconnect_attempts += 1;
        state.metrics.reconnect_count += 1;
        warn!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            reason = cause.reason(),
            "Reconnecting"
        );
        Some(delay)
    }

    /// Drive one session until it ends. Returns why it ended.
    async fn run_session(
        &self,
        token: &CancellationToken,
        mut sink: Box<dyn FrameSink>,
        mut stream: Box<dyn FrameStream>,
        mut outbound_rx: mpsc::Receiver<Frame>,
        symbols: BTreeSet<String>,
    ) -> WsError {
        let config = &self.shared.config;
        let heartbeat = HeartbeatManager::new(config.heartbeat_interval_ms, config.heartbeat_timeout_ms);
        let mut check = tokio::time::interval(heartbeat.check_period());
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if !symbols.is_empty() {
            let count = symbols.len();
            let request = match ControlRequest::subscribe(symbols).to_json() {
                Ok(request) => request,
                Err(e) => return e,
            };
            if let Err(e) = sink.send(Frame::Text(request)).await {
                return e;
            }
            info!(count, "Restored subscriptions");
        }

        loop {
            tokio::select! {
                biased;

                () = token.cancelled() => {
                    if let Err(e) = sink.send(Frame::normal_close()).await {
                        debug!(error = %e, "Failed to send close frame");
                    }
                    return WsError::Cancelled;
                }

                frame = stream.next_frame() => match frame {
                    Some(Ok(Frame::Text(text))) => {
                        heartbeat.record_message();
                        self.handle_text(&text, &heartbeat, token);
                    }
                    Some(Ok(Frame::Ping(data))) => {
                        heartbeat.record_message();
                        if let Err(e) = sink.send(Frame::Pong(data)).await {
                            return e;
                        }
                    }
                    Some(Ok(Frame::Pong(_))) => heartbeat.record_pong(),
                    Some(Ok(Frame::Close { code, reason })) => {
                        warn!(code, %reason, "Closed by server");
                        return WsError::ConnectionClosed { code, reason };
                    }
                    Some(Err(e)) => return e,
                    None => {
                        return WsError::ConnectionClosed {
                            code: 1006,
                            reason: "stream ended".to_string(),
                        };
                    }
                },

                Some(frame) = outbound_rx.recv() => {
                    if let Err(e) = sink.send(frame).await {
                        return e;
                    }
                }

                _ = check.tick() => {
                    if heartbeat.is_timed_out() {
                        error!(stats = ?heartbeat.stats(), "Heartbeat timeout");
                        return WsError::HeartbeatTimeout;
                    }
                    if heartbeat.should_send_heartbeat() {
                        let ping = match ControlRequest::ping().to_json() {
                            Ok(ping) => ping,
                            Err(e) => return e,
                        };
                        if let Err(e) = sink.send(Frame::Text(ping)).await {
                            return e;
                        }
                        heartbeat.record_ping();
                    }
                }
            }
        }
    }

    fn handle_text(&self, text: &str, heartbeat: &HeartbeatManager, token: &CancellationToken) {
        let value = match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => value,
            Err(_) => {
                let result = self.shared.parser.parse_str(text);
                self.record_parse(result, token);
                return;
            }
        };

        match InboundMessage::classify(value) {
            InboundMessage::Pong => heartbeat.record_pong(),
            InboundMessage::SubscriptionAck {
                subscribed,
                symbols,
            } => {
                debug!(subscribed, ?symbols, "Subscription acknowledged");
            }
            InboundMessage::ServerError(message) => {
                warn!(%message, "Server reported error");
            }
            InboundMessage::Data(value) => {
                let result = self.shared.parser.parse(&value);
                self.record_parse(result, token);
            }
        }
    }

    fn record_parse(&self, result: ParseResult, token: &CancellationToken) {
        let mut state = self.shared.state.lock();
        if token.is_cancelled() {
            return;
        }

        let ParseResult {
            success,
            data,
            errors,
            ..
        } = result;

        match data {
            Some(data) if success => {
                let message = MarketDataMessage::from_parsed(data, now_ms());
                state.metrics.latency = update_latency_metrics(
                    &state.metrics.latency,
                    message.latency_ms,
                    self.shared.config.latency_window,
                );
                state.metrics.total_messages += 1;
                self.shared.events.emit(StreamEvent::Message(message));
            }
            _ => {
                state.metrics.parse_failures += 1;
                debug!(
                    errors = errors.len(),
                    first = ?errors.first().map(ToString::to_string),
                    "Dropping invalid market data"
                );
            }
        }
    }
}

fn notify(first: &mut Option<oneshot::Sender<WsResult<()>>>, result: WsResult<()>) {
    if let Some(tx) = first.take() {
        // Caller may have stopped waiting
        let _ = tx.send(result);
    }
}
