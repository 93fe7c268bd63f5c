//! WebSocket error types.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Transport and lifecycle errors.
///
/// Cloneable so that errors can be fanned out to every event listener;
/// foreign errors are flattened to their messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WsError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timed out after {0}ms")]
    ConnectTimeout(u64),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Reconnection attempts exhausted after {0} attempts")]
    ReconnectExhausted(u32),

    #[error("Invalid state: cannot {operation} while {status}")]
    InvalidState {
        operation: &'static str,
        status: tickstream_core::ConnectionStatus,
    },

    #[error("Connection attempt cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(String),
}

impl WsError {
    /// Whether the error must never be retried (authorization/permission).
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Unauthorized(_) => true,
            // 1008 = policy violation, used by servers to reject credentials
            Self::ConnectionClosed { code, .. } => *code == 1008,
            _ => false,
        }
    }

    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ConnectionFailed(_) => "connection_failed",
            Self::ConnectTimeout(_) => "connect_timeout",
            Self::ConnectionClosed { .. } => "connection_closed",
            Self::Unauthorized(_) => "unauthorized",
            Self::SendFailed(_) => "send_failed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::ReconnectExhausted(_) => "reconnect_exhausted",
            Self::InvalidState { .. } => "invalid_state",
            Self::Cancelled => "cancelled",
            Self::Json(_) => "json",
        }
    }
}

impl From<tungstenite::Error> for WsError {
    fn from(e: tungstenite::Error) -> Self {
        match e {
            tungstenite::Error::Http(response) => {
                let status = response.status();
                if status.as_u16() == 401 || status.as_u16() == 403 {
                    Self::Unauthorized(format!("handshake rejected with HTTP {status}"))
                } else {
                    Self::ConnectionFailed(format!("handshake rejected with HTTP {status}"))
                }
            }
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::ConnectionClosed {
                    code: 1006,
                    reason: e.to_string(),
                }
            }
            other => Self::ConnectionFailed(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for WsError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

pub type WsResult<T> = Result<T, WsError>;
