//! Main application orchestration.
//!
//! Coordinates all components:
//! - Stream connection and subscription replay
//! - Prometheus metrics from stream events
//! - HTTP fallback polling while the stream is down
//! - Periodic connection quality reports

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::fallback::{FallbackController, FallbackPoller, SymbolSource};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tickstream_core::{ConnectionStatus, MarketDataMessage};
use tickstream_feed::MarketDataPrinter;
use tickstream_telemetry::Metrics;
use tickstream_ws::{ConnectionManager, ConnectionQuality, EventKind, StreamEvent, Transport};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Totals reported when the application stops.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Messages delivered by the stream.
    pub stream_messages: u64,
    /// Messages delivered by fallback polling.
    pub fallback_messages: u64,
    pub reconnects: u32,
    pub parse_failures: u64,
    pub quality: ConnectionQuality,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    manager: ConnectionManager,
    printer: MarketDataPrinter,
    fallback: Option<Arc<FallbackController>>,
    fallback_rx: Option<mpsc::UnboundedReceiver<MarketDataMessage>>,
}

impl Application {
    /// Create the application over the WebSocket transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        let manager = ConnectionManager::new(config.connection_config());
        Self::build(config, manager)
    }

    /// Create the application over a custom transport.
    pub fn with_transport(config: AppConfig, transport: Arc<dyn Transport>) -> AppResult<Self> {
        config.validate()?;
        let manager = ConnectionManager::with_transport(config.connection_config(), transport);
        Self::build(config, manager)
    }

    fn build(config: AppConfig, manager: ConnectionManager) -> AppResult<Self> {
        let (fallback, fallback_rx) = if config.fallback.enabled {
            let poller = FallbackPoller::new(&config.fallback)?;
            let subscriptions = manager.clone();
            let symbols: SymbolSource =
                Arc::new(move || subscriptions.subscriptions().into_iter().collect());
            let (controller, rx) = FallbackController::new(
                poller,
                Duration::from_millis(config.fallback.interval_ms),
                symbols,
            );
            (Some(Arc::new(controller)), Some(rx))
        } else {
            (None, None)
        };

        Ok(Self {
            printer: MarketDataPrinter::with_precision(config.printer.price_precision),
            config,
            manager,
            fallback,
            fallback_rx,
        })
    }

    /// Handle to the connection manager.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Run until Ctrl-C.
    pub async fn run(self) -> AppResult<RunSummary> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await
    }

    /// Run until `shutdown` resolves, then disconnect.
    pub async fn run_until<F>(mut self, shutdown: F) -> AppResult<RunSummary>
    where
        F: Future<Output = ()>,
    {
        info!(
            url = %self.config.ws_url,
            symbols = ?self.config.symbols,
            fallback = self.fallback.is_some(),
            "Starting application"
        );

        self.register_metric_listeners();
        let fallback_listener = self
            .fallback
            .as_ref()
            .map(|controller| controller.attach(&self.manager));
        let mut events = self.manager.subscribe_events();
        let mut fallback_rx = self.fallback_rx.take();

        let manager = self.manager.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.connect().await {
                error!(error = %e, "Initial connection failed");
            }
        });

        let mut stream_messages = 0u64;
        let mut fallback_messages = 0u64;
        let mut reported_failures = 0u64;
        let report_every = Duration::from_millis(self.config.telemetry.quality_report_interval_ms);
        let mut report =
            tokio::time::interval_at(tokio::time::Instant::now() + report_every, report_every);

        tokio::pin!(shutdown);

        info!("Entering main event loop");
        loop {
            tokio::select! {
                () = &mut shutdown => break,

                event = events.recv() => match event {
                    Ok(StreamEvent::Message(message)) => {
                        stream_messages += 1;
                        self.log_message("stream", &message);
                    }
                    Ok(StreamEvent::StatusChange(ConnectionStatus::Error)) => {
                        error!("Stream stopped reconnecting");
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event receiver lagged");
                        if let Some(controller) = &self.fallback {
                            controller.on_status(self.manager.status());
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Event stream closed");
                        break;
                    }
                },

                Some(message) = recv_fallback(&mut fallback_rx) => {
                    fallback_messages += 1;
                    self.log_message("fallback", &message);
                }

                _ = report.tick() => {
                    self.report_quality(&mut reported_failures);
                }
            }
        }

        info!("Shutting down");
        if let Some(id) = fallback_listener {
            self.manager.off(id);
        }
        if let Some(controller) = &self.fallback {
            controller.shutdown();
        }
        self.manager.disconnect();
        let quality = self.report_quality(&mut reported_failures);

        let metrics = self.manager.metrics();
        let summary = RunSummary {
            stream_messages,
            fallback_messages,
            reconnects: metrics.reconnect_count,
            parse_failures: metrics.parse_failures,
            quality,
        };
        info!(?summary, "Application stopped");
        Ok(summary)
    }

    /// Feed connection events into Prometheus.
    fn register_metric_listeners(&self) {
        Metrics::ws_state_set(self.manager.status());

        let previous = Mutex::new(self.manager.status());
        self.manager.on(EventKind::StatusChange, move |event| {
            let StreamEvent::StatusChange(status) = event else {
                return;
            };
            let mut previous = previous.lock();
            if *status == ConnectionStatus::Reconnecting {
                let reason = if *previous == ConnectionStatus::Connected {
                    "connection_lost"
                } else {
                    "connect_failed"
                };
                Metrics::ws_reconnect(reason);
            }
            *previous = *status;
            Metrics::ws_state_set(*status);
        });

        self.manager.on(EventKind::Message, |event| {
            if let StreamEvent::Message(message) = event {
                Metrics::message_received(message.symbol(), message.latency_ms);
            }
        });

        self.manager.on(EventKind::Error, |event| {
            if let StreamEvent::Error(e) = event {
                error!(error = %e, reason = e.reason(), "Stream error");
            }
        });
    }

    fn log_message(&self, source: &'static str, message: &MarketDataMessage) {
        let printed = self.printer.print(&message.data);
        debug!(
            source,
            symbol = %message.symbol(),
            price = message.price(),
            latency_ms = message.latency_ms,
            wire = printed.output.as_deref().unwrap_or("<unprintable>"),
            "Market data"
        );
    }

    /// Publish quality and parse failure metrics. Returns the quality band.
    fn report_quality(&self, reported_failures: &mut u64) -> ConnectionQuality {
        let metrics = self.manager.metrics();
        let quality = self.manager.quality();

        Metrics::connection_quality(quality.as_str());
        Metrics::parse_failures(metrics.parse_failures.saturating_sub(*reported_failures));
        *reported_failures = metrics.parse_failures;

        info!(
            %quality,
            status = %self.manager.status(),
            uptime_secs = metrics.uptime().as_secs(),
            avg_latency_ms = metrics.latency.average,
            max_latency_ms = metrics.latency.max,
            reconnects = metrics.reconnect_count,
            messages = metrics.total_messages,
            parse_failures = metrics.parse_failures,
            parse_success_rate = self.manager.parser_stats().success_rate(),
            "Connection quality report"
        );
        quality
    }
}

async fn recv_fallback(
    rx: &mut Option<mpsc::UnboundedReceiver<MarketDataMessage>>,
) -> Option<MarketDataMessage> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
