//! Streaming transport for tickstream market data.
//!
//! Provides a resilient market data connection with:
//! - Automatic reconnection with exponential backoff and jitter
//! - Heartbeat monitoring (idle ping, pong timeout detection)
//! - Subscription diffing and replay after reconnect
//! - Latency tracking and connection quality scoring
//! - Ordered event fan-out to handlers and broadcast receivers

pub mod backoff;
pub mod connection;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod message;
pub mod quality;
pub mod subscription;
pub mod transport;

pub use backoff::{backoff_delay, should_reconnect, BackoffConfig};
pub use connection::{ConnectionConfig, ConnectionManager};
pub use error::{WsError, WsResult};
pub use events::{EventBus, EventHandler, EventKind, ListenerId, StreamEvent};
pub use heartbeat::{HeartbeatManager, HeartbeatStats};
pub use message::{ControlAction, ControlRequest, InboundMessage};
pub use quality::{
    calculate_connection_quality, connection_score, update_latency_metrics, validate_latency,
    ConnectionMetrics, ConnectionQuality, LatencyMetrics, QualityConfig,
};
pub use subscription::{SubscriptionDiff, SubscriptionRegistry};
pub use transport::{Frame, FrameSink, FrameStream, Transport, WebSocketTransport};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the rustls crypto provider.
/// Called automatically before the first WebSocket connection.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
