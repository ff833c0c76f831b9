//! Wire messages for the subscription protocol.
//!
//! Outbound control messages carry a `method` ("subscribe", "unsubscribe",
//! "ping") and, for subscription methods, a `subscription` object whose
//! `type` field is the channel key with the caller's payload fields merged
//! alongside it. Inbound data messages are `{"channel": ..., "data": ...}`;
//! a bare `{"channel": "pong"}` is the heartbeat reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outgoing request to the feed endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsRequest {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Value>,
}

impl WsRequest {
    /// Create a ping request.
    pub fn ping() -> Self {
        Self {
            method: "ping".to_string(),
            subscription: None,
        }
    }

    /// Create a subscribe request for a channel key.
    pub fn subscribe(channel: &str, payload: &Value) -> Self {
        Self {
            method: "subscribe".to_string(),
            subscription: Some(subscription_body(channel, payload)),
        }
    }

    /// Create an unsubscribe request for a channel key.
    pub fn unsubscribe(channel: &str, payload: &Value) -> Self {
        Self {
            method: "unsubscribe".to_string(),
            subscription: Some(subscription_body(channel, payload)),
        }
    }
}

/// Build the `subscription` object: the caller's payload fields plus the
/// channel key under `type`. The channel key is authoritative; a `type`
/// field inside the payload is overwritten.
fn subscription_body(channel: &str, payload: &Value) -> Value {
    let mut body = serde_json::Map::new();
    if let Value::Object(fields) = payload {
        for (key, value) in fields {
            body.insert(key.clone(), value.clone());
        }
    }
    body.insert("type".to_string(), Value::String(channel.to_string()));
    Value::Object(body)
}

/// Incoming message wrapper.
///
/// All messages from the feed endpoint use channel-based format. A message
/// consisting of only `{"channel": "pong"}` is the heartbeat reply;
/// everything else carries a `data` field and is routed by channel key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WsMessage {
    /// Pong reply (no data field, just channel: "pong").
    Pong(PongMessage),
    /// Channel-based data message.
    Channel(ChannelMessage),
}

impl WsMessage {
    /// Check if this is a pong message.
    pub fn is_pong(&self) -> bool {
        matches!(self, Self::Pong(p) if p.is_pong())
    }

    /// Get the channel name.
    pub fn channel(&self) -> &str {
        match self {
            Self::Pong(p) => &p.channel,
            Self::Channel(c) => &c.channel,
        }
    }
}

/// Channel-based data message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Channel key (e.g., "trades:BTC", "bbo").
    pub channel: String,
    /// Opaque payload, forwarded to consumers as-is.
    pub data: Value,
}

/// Pong reply message.
/// Uses deny_unknown_fields to distinguish from ChannelMessage in the
/// untagged enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PongMessage {
    pub channel: String,
}

impl PongMessage {
    pub fn is_pong(&self) -> bool {
        self.channel == "pong"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscribe_request_merges_payload() {
        let req = WsRequest::subscribe("trades:BTC", &json!({"symbol": "BTC"}));
        let value = serde_json::to_value(&req).unwrap();

        assert_eq!(value["method"], "subscribe");
        assert_eq!(value["subscription"]["type"], "trades:BTC");
        assert_eq!(value["subscription"]["symbol"], "BTC");
    }

    #[test]
    fn test_subscribe_request_without_payload_fields() {
        let req = WsRequest::subscribe("allMids", &Value::Null);
        let value = serde_json::to_value(&req).unwrap();

        assert_eq!(value["subscription"], json!({"type": "allMids"}));
    }

    #[test]
    fn test_channel_key_wins_over_payload_type() {
        let req = WsRequest::subscribe("bbo", &json!({"type": "spoofed", "coin": "ETH"}));
        let value = serde_json::to_value(&req).unwrap();

        assert_eq!(value["subscription"]["type"], "bbo");
        assert_eq!(value["subscription"]["coin"], "ETH");
    }

    #[test]
    fn test_unsubscribe_request() {
        let req = WsRequest::unsubscribe("trades:BTC", &json!({"symbol": "BTC"}));
        let value = serde_json::to_value(&req).unwrap();

        assert_eq!(value["method"], "unsubscribe");
        assert_eq!(value["subscription"]["type"], "trades:BTC");
    }

    #[test]
    fn test_ping_request_has_no_subscription() {
        let req = WsRequest::ping();
        let value = serde_json::to_value(&req).unwrap();

        assert_eq!(value, json!({"method": "ping"}));
    }

    #[test]
    fn test_inbound_pong() {
        let msg: WsMessage = serde_json::from_str(r#"{"channel": "pong"}"#).unwrap();
        assert!(msg.is_pong());
        assert_eq!(msg.channel(), "pong");
    }

    #[test]
    fn test_inbound_channel_message() {
        let msg: WsMessage =
            serde_json::from_str(r#"{"channel": "trades:BTC", "data": {"price": 100}}"#).unwrap();

        assert!(!msg.is_pong());
        match msg {
            WsMessage::Channel(c) => {
                assert_eq!(c.channel, "trades:BTC");
                assert_eq!(c.data, json!({"price": 100}));
            }
            WsMessage::Pong(_) => panic!("expected Channel message"),
        }
    }

    #[test]
    fn test_inbound_missing_channel_is_rejected() {
        let result = serde_json::from_str::<WsMessage>(r#"{"data": {"price": 100}}"#);
        assert!(result.is_err());
    }
}
