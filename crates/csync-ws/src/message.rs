//! WebSocket message types.

use csync_core::{Generation, SessionParams};
use serde::{Deserialize, Serialize};

// ============================================================================
// Inbound
// ============================================================================

/// Inbound envelope as sent by the chart server.
///
/// Only the envelope is decoded here; the kind-specific `data` is decoded
/// by `csync-feed` so the transport stays agnostic of payload shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsMessage {
    /// Message kind (`historical`, `live`, `live_price`, ...).
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Symbol the message belongs to. Required by the parser, optional here
    /// so that the parser can report it as a malformed message.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Kind-specific payload.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Server-side send time, when provided.
    #[serde(default, alias = "serverTimestamp")]
    pub server_timestamp: Option<i64>,
}

impl WsMessage {
    pub fn new(msg_type: impl Into<String>, symbol: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            symbol: Some(symbol.into()),
            data,
            server_timestamp: None,
        }
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// Session configuration sent once per session establishment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigRequest {
    /// Always "config".
    #[serde(rename = "type")]
    pub request_type: String,
    pub symbol: String,
    pub indicators: Vec<String>,
    pub resolution: String,
    pub from_ts: String,
    pub to_ts: String,
}

impl From<&SessionParams> for ConfigRequest {
    fn from(params: &SessionParams) -> Self {
        Self {
            request_type: "config".to_string(),
            symbol: params.symbol.clone(),
            indicators: params.indicators.clone(),
            resolution: params.resolution.to_string(),
            from_ts: params.from_ts.clone(),
            to_ts: params.to_ts.clone(),
        }
    }
}

// ============================================================================
// Events delivered downstream
// ============================================================================

/// Transport event, tagged with the generation it was produced under.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Transport established and config sent.
    Opened {
        generation: Generation,
        params: SessionParams,
    },
    /// Data message received.
    Message {
        generation: Generation,
        message: WsMessage,
    },
    /// Transport closed. `reconnect` is set when a reconnect attempt is
    /// scheduled: the close was abnormal and the attempt limit not reached.
    /// The attempt is still skipped if the session stops being desired
    /// during the delay.
    Closed {
        generation: Generation,
        code: u16,
        reason: String,
        abnormal: bool,
        reconnect: bool,
    },
}

impl SessionEvent {
    pub fn generation(&self) -> Generation {
        match self {
            Self::Opened { generation, .. }
            | Self::Message { generation, .. }
            | Self::Closed { generation, .. } => *generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use csync_core::Resolution;
    use serde_json::json;

    #[test]
    fn test_envelope_decodes_minimal_message() {
        let raw = r#"{"type":"live","symbol":"BTCUSDT","data":{"time":1000,"price":50000}}"#;
        let msg: WsMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.msg_type, "live");
        assert_eq!(msg.symbol.as_deref(), Some("BTCUSDT"));
        assert_eq!(msg.data["price"], json!(50000));
        assert_eq!(msg.server_timestamp, None);
    }

    #[test]
    fn test_envelope_accepts_camel_case_timestamp() {
        let raw = r#"{"type":"drawings","symbol":"X","data":[],"serverTimestamp":42}"#;
        let msg: WsMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.server_timestamp, Some(42));
    }

    #[test]
    fn test_envelope_without_type_is_rejected() {
        let raw = r#"{"symbol":"BTCUSDT","data":{}}"#;
        assert!(serde_json::from_str::<WsMessage>(raw).is_err());
    }

    #[test]
    fn test_config_request_wire_format() {
        let params = SessionParams::new(
            "BTCUSDT",
            Resolution::H1,
            vec!["rsi".to_string()],
            "1000",
            "5000",
        )
        .unwrap();

        let value = serde_json::to_value(ConfigRequest::from(&params)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "config",
                "symbol": "BTCUSDT",
                "indicators": ["rsi"],
                "resolution": "1h",
                "from_ts": "1000",
                "to_ts": "5000"
            })
        );
    }
}
