//! Wire-level control messages.
//!
//! Outbound: `{"action": "subscribe"|"unsubscribe"|"ping", "symbols": [..]}`.
//! Inbound frames are either control frames (pong, subscription acks,
//! server errors) consumed by the connection manager, or data frames handed
//! to the parser.

use crate::error::WsResult;
use crate::subscription::SubscriptionDiff;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound control action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Subscribe,
    Unsubscribe,
    Ping,
}

/// Outgoing control request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub action: ControlAction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<String>,
}

impl ControlRequest {
    pub fn subscribe<I: IntoIterator<Item = String>>(symbols: I) -> Self {
        Self {
            action: ControlAction::Subscribe,
            symbols: symbols.into_iter().collect(),
        }
    }

    pub fn unsubscribe<I: IntoIterator<Item = String>>(symbols: I) -> Self {
        Self {
            action: ControlAction::Unsubscribe,
            symbols: symbols.into_iter().collect(),
        }
    }

    /// Application-level heartbeat ping.
    pub fn ping() -> Self {
        Self {
            action: ControlAction::Ping,
            symbols: Vec::new(),
        }
    }

    pub fn to_json(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Requests needed to apply `diff`: unsubscribe first, then subscribe.
    /// Empty halves are skipped.
    pub fn for_diff(diff: &SubscriptionDiff) -> Vec<Self> {
        let mut requests = Vec::with_capacity(2);
        if !diff.to_remove.is_empty() {
            requests.push(Self::unsubscribe(diff.to_remove.iter().cloned()));
        }
        if !diff.to_add.is_empty() {
            requests.push(Self::subscribe(diff.to_add.iter().cloned()));
        }
        requests
    }
}

/// Classified inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Heartbeat response (`{"type":"pong"}`).
    Pong,
    /// Subscription acknowledgement (`{"type":"subscribed"|"unsubscribed"}`).
    SubscriptionAck {
        subscribed: bool,
        symbols: Vec<String>,
    },
    /// Server-reported error (`{"type":"error","message":..}`).
    ServerError(String),
    /// Anything else: a market data payload for the parser.
    Data(Value),
}

impl InboundMessage {
    pub fn classify(value: Value) -> Self {
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return Self::Data(value);
        };

        match kind {
            "pong" => Self::Pong,
            "subscribed" | "unsubscribed" => Self::SubscriptionAck {
                subscribed: kind == "subscribed",
                symbols: string_list(value.get("symbols")),
            },
            "error" => Self::ServerError(
                value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unspecified")
                    .to_string(),
            ),
            _ => Self::Data(value),
        }
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeSet;

    #[test]
    fn test_control_request_serialization() {
        let req = ControlRequest::subscribe(vec!["AAPL".to_string(), "MSFT".to_string()]);
        let json: Value = serde_json::from_str(&req.to_json().unwrap()).unwrap();
        assert_eq!(json, json!({"action": "subscribe", "symbols": ["AAPL", "MSFT"]}));

        let ping = ControlRequest::ping().to_json().unwrap();
        assert_eq!(ping, r#"{"action":"ping"}"#);
    }

    #[test]
    fn test_for_diff_orders_unsubscribe_first() {
        let diff = SubscriptionDiff {
            to_add: BTreeSet::from(["GOOGL".to_string()]),
            to_remove: BTreeSet::from(["AAPL".to_string()]),
        };
        let requests = ControlRequest::for_diff(&diff);

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].action, ControlAction::Unsubscribe);
        assert_eq!(requests[0].symbols, vec!["AAPL"]);
        assert_eq!(requests[1].action, ControlAction::Subscribe);
        assert_eq!(requests[1].symbols, vec!["GOOGL"]);

        assert!(ControlRequest::for_diff(&SubscriptionDiff::default()).is_empty());
    }

    #[test]
    fn test_classify_control_frames() {
        assert_eq!(InboundMessage::classify(json!({"type": "pong"})), InboundMessage::Pong);
        assert_eq!(
            InboundMessage::classify(json!({"type": "subscribed", "symbols": ["AAPL"]})),
            InboundMessage::SubscriptionAck {
                subscribed: true,
                symbols: vec!["AAPL".to_string()]
            }
        );
        assert_eq!(
            InboundMessage::classify(json!({"type": "unsubscribed"})),
            InboundMessage::SubscriptionAck {
                subscribed: false,
                symbols: vec![]
            }
        );
        assert_eq!(
            InboundMessage::classify(json!({"type": "error", "message": "bad symbol"})),
            InboundMessage::ServerError("bad symbol".to_string())
        );
    }

    #[test]
    fn test_classify_data_frames() {
        let tick = json!({"type": "tick", "symbol": "AAPL", "price": 1.0, "timestamp": 1});
        assert_eq!(InboundMessage::classify(tick.clone()), InboundMessage::Data(tick));

        let untyped = json!({"symbol": "AAPL"});
        assert_eq!(InboundMessage::classify(untyped.clone()), InboundMessage::Data(untyped));

        assert!(matches!(
            InboundMessage::classify(json!([1, 2])),
            InboundMessage::Data(_)
        ));
    }
}
