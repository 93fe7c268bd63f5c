//! HTTP polling fallback.
//!
//! While the stream is not `Connected`, snapshots are fetched from a REST
//! endpoint on a fixed interval and fed through the same parser as stream
//! traffic. Polling stops the moment the stream reports `Connected`, and
//! results of a poll still in flight at that point are discarded. The symbol
//! list is read again on every tick, so subscription changes made during an
//! outage are picked up by the next poll.

use crate::config::FallbackConfig;
use crate::error::{AppError, AppResult};
use parking_lot::Mutex;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tickstream_core::{now_ms, ConnectionStatus, MarketDataMessage};
use tickstream_feed::MessageParser;
use tickstream_telemetry::Metrics;
use tickstream_ws::{ConnectionManager, EventKind, ListenerId, StreamEvent};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fetches market data snapshots over HTTP.
pub struct FallbackPoller {
    client: Client,
    url: String,
    parser: MessageParser,
}

impl FallbackPoller {
    /// Create a poller for the configured endpoint.
    pub fn new(config: &FallbackConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| AppError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.url.clone(),
            parser: MessageParser::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch one snapshot for `symbols`.
    ///
    /// The body may be a single record or an array of records. Records the
    /// parser rejects are skipped.
    pub async fn poll(&self, symbols: &[String]) -> AppResult<Vec<MarketDataMessage>> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("symbols", symbols.join(","))])
            .send()
            .await
            .map_err(|e| AppError::Http(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Http(format!("HTTP {status}: {body}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::Http(format!("Failed to parse response: {e}")))?;

        Ok(self.parse_snapshot(body))
    }

    fn parse_snapshot(&self, body: Value) -> Vec<MarketDataMessage> {
        let records = match body {
            Value::Array(records) => records,
            record => vec![record],
        };

        let received_at = now_ms();
        records
            .iter()
            .filter_map(|record| {
                let result = self.parser.parse(record);
                if result.data.is_none() {
                    debug!(fields = ?result.failed_fields(), "Skipping invalid snapshot record");
                }
                result.data
            })
            .map(|data| MarketDataMessage::from_parsed(data, received_at))
            .collect()
    }
}

/// Current symbols to poll for.
pub type SymbolSource = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

#[derive(Default)]
struct ControllerState {
    /// Token of the running poll task.
    task: Option<CancellationToken>,
    shut_down: bool,
}

/// Starts and stops the poller from connection status changes.
pub struct FallbackController {
    poller: Arc<FallbackPoller>,
    interval: Duration,
    symbols: SymbolSource,
    tx: mpsc::UnboundedSender<MarketDataMessage>,
    state: Mutex<ControllerState>,
}

impl FallbackController {
    /// Create a controller. Polled messages arrive on the returned receiver.
    pub fn new(
        poller: FallbackPoller,
        interval: Duration,
        symbols: SymbolSource,
    ) -> (Self, mpsc::UnboundedReceiver<MarketDataMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = Self {
            poller: Arc::new(poller),
            interval,
            symbols,
            tx,
            state: Mutex::new(ControllerState::default()),
        };
        (controller, rx)
    }

    /// React to a stream status change.
    ///
    /// `Connected` stops polling; `Reconnecting`, `Disconnected` and `Error`
    /// start it. `Connecting` leaves it as is.
    pub fn on_status(&self, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Connected => self.stop(),
            ConnectionStatus::Reconnecting
            | ConnectionStatus::Disconnected
            | ConnectionStatus::Error => self.start(),
            ConnectionStatus::Connecting => {}
        }
    }

    /// Follow `manager`'s status changes from an event handler.
    ///
    /// Handlers see every status change in order, unlike a broadcast
    /// receiver that can lag. Remove the handler with `manager.off(id)`.
    pub fn attach(self: &Arc<Self>, manager: &ConnectionManager) -> ListenerId {
        let controller = Arc::clone(self);
        manager.on(EventKind::StatusChange, move |event| {
            if let StreamEvent::StatusChange(status) = event {
                controller.on_status(*status);
            }
        })
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().task.is_some()
    }

    /// Start polling unless already running or shut down.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut state = self.state.lock();
        if state.shut_down || state.task.is_some() {
            return;
        }

        info!(
            url = %self.poller.url(),
            interval_ms = self.interval.as_millis() as u64,
            "Starting HTTP fallback polling"
        );
        let token = CancellationToken::new();
        state.task = Some(token.clone());
        tokio::spawn(poll_loop(
            self.poller.clone(),
            self.symbols.clone(),
            self.interval,
            self.tx.clone(),
            token,
        ));
    }

    pub fn stop(&self) {
        if let Some(token) = self.state.lock().task.take() {
            info!("Stopping HTTP fallback polling");
            token.cancel();
        }
    }

    /// Stop polling and refuse later starts.
    pub fn shutdown(&self) {
        self.state.lock().shut_down = true;
        self.stop();
    }
}

async fn poll_loop(
    poller: Arc<FallbackPoller>,
    symbols: SymbolSource,
    interval: Duration,
    tx: mpsc::UnboundedSender<MarketDataMessage>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let current = symbols();
        if current.is_empty() {
            debug!("No subscriptions, skipping fallback poll");
            continue;
        }

        let result = tokio::select! {
            biased;
            () = token.cancelled() => return,
            result = poller.poll(&current) => result,
        };

        match result {
            Ok(messages) => {
                Metrics::fallback_poll(true);
                debug!(count = messages.len(), "Fallback poll succeeded");
                for message in messages {
                    if token.is_cancelled() || tx.send(message).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                Metrics::fallback_poll(false);
                warn!(error = %e, "Fallback poll failed");
            }
        }
    }
}
