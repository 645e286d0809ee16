//! Message parsing for chart data.
//!
//! Turns the transport envelope (`WsMessage`) into a typed
//! [`InboundMessage`]. Every shape check happens here so that the rest of
//! the pipeline only ever sees well-formed variants.
//!
//! Backfill payloads come in two framings:
//! 1. Bare array: `"data": [{"time": ..., "open": ...}, ...]`
//! 2. Wrapped: `"data": {"points": [...]}`

use crate::error::{FeedError, FeedResult};
use csync_core::{
    parse_timestamp, AuxiliaryKind, AuxiliaryPayload, HistoricalBatch, Indicators,
    InboundMessage, LiveTick, MessageKind, Ohlc, Payload, Price, Size, TimeSeriesPoint,
};
use csync_ws::WsMessage;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Timestamp as sent by the server: epoch seconds or RFC 3339 text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTime {
    Secs(i64),
    Text(String),
}

impl RawTime {
    fn to_secs(&self) -> FeedResult<i64> {
        match self {
            Self::Secs(secs) => Ok(*secs),
            Self::Text(text) => Ok(parse_timestamp(text)?),
        }
    }
}

/// One bar of a backfill page.
#[derive(Debug, Deserialize)]
struct RawBar {
    time: RawTime,
    open: Price,
    high: Price,
    low: Price,
    close: Price,
    #[serde(default)]
    volume: Option<Size>,
    #[serde(default)]
    indicators: Option<Indicators>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBatch {
    Bare(Vec<RawBar>),
    Wrapped { points: Vec<RawBar> },
}

impl RawBatch {
    fn into_bars(self) -> Vec<RawBar> {
        match self {
            Self::Bare(bars) | Self::Wrapped { points: bars } => bars,
        }
    }
}

/// Live trade: `{"time": ..., "price": ..., "volume": ...}`.
#[derive(Debug, Deserialize)]
struct RawTick {
    time: RawTime,
    price: Price,
    #[serde(default)]
    volume: Option<Size>,
}

/// Per-kind parse counters.
#[derive(Debug, Default)]
pub struct ParseStats {
    pub parsed: AtomicU64,
    pub rejected: AtomicU64,
}

impl ParseStats {
    pub fn parsed(&self) -> u64 {
        self.parsed.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Message parser.
#[derive(Debug, Default)]
pub struct MessageParser {
    stats: ParseStats,
}

impl MessageParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    /// Decode an envelope. Any error means the message is malformed and
    /// must be dropped.
    pub fn parse(&self, msg: &WsMessage) -> FeedResult<InboundMessage> {
        let result = self.parse_inner(msg);
        match &result {
            Ok(_) => self.stats.parsed.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.stats.rejected.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    fn parse_inner(&self, msg: &WsMessage) -> FeedResult<InboundMessage> {
        let kind = MessageKind::from_wire(&msg.msg_type)
            .ok_or_else(|| FeedError::UnknownKind(msg.msg_type.clone()))?;

        let symbol = msg
            .symbol
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FeedError::MissingSymbol(msg.msg_type.clone()))?
            .to_ascii_uppercase();

        let payload = match kind {
            MessageKind::Historical => Payload::Historical(self.parse_batch(&msg.data)?),
            MessageKind::HistoryUpdate => Payload::HistoryUpdate(self.parse_batch(&msg.data)?),
            MessageKind::Live => Payload::Live(self.parse_tick(&msg.data)?),
            MessageKind::Drawings => self.auxiliary(AuxiliaryKind::Drawings, &msg.data),
            MessageKind::BuySignals => self.auxiliary(AuxiliaryKind::BuySignals, &msg.data),
            MessageKind::PositionsUpdate => {
                self.auxiliary(AuxiliaryKind::PositionsUpdate, &msg.data)
            }
        };

        debug!(%kind, %symbol, "Message parsed");
        Ok(InboundMessage {
            symbol,
            server_timestamp: msg.server_timestamp,
            payload,
        })
    }

    fn parse_batch(&self, data: &serde_json::Value) -> FeedResult<HistoricalBatch> {
        let raw = RawBatch::deserialize(data)
            .map_err(|e| FeedError::ParseError(format!("Invalid backfill page: {e}")))?;

        let points = raw
            .into_bars()
            .into_iter()
            .map(|bar| {
                let ohlc = Ohlc::new(
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume.unwrap_or_default(),
                );
                Ok(TimeSeriesPoint {
                    time: bar.time.to_secs()?,
                    ohlc,
                    indicators: bar.indicators.unwrap_or_default(),
                })
            })
            .collect::<FeedResult<Vec<_>>>()?;

        Ok(HistoricalBatch::new(points))
    }

    fn parse_tick(&self, data: &serde_json::Value) -> FeedResult<LiveTick> {
        let raw = RawTick::deserialize(data)
            .map_err(|e| FeedError::ParseError(format!("Invalid live tick: {e}")))?;

        if !raw.price.is_positive() {
            return Err(FeedError::InvalidData(format!(
                "Non-positive live price: {}",
                raw.price
            )));
        }

        Ok(LiveTick {
            time: raw.time.to_secs()?,
            price: raw.price,
            volume: raw.volume,
        })
    }

    fn auxiliary(&self, kind: AuxiliaryKind, data: &serde_json::Value) -> Payload {
        Payload::Auxiliary(AuxiliaryPayload {
            kind,
            data: data.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn envelope(msg_type: &str, data: serde_json::Value) -> WsMessage {
        WsMessage::new(msg_type, "btcusdt", data)
    }

    #[test]
    fn test_parse_historical_bare_array() {
        let parser = MessageParser::new();
        let msg = envelope(
            "historical",
            json!([
                {"time": 1000, "open": 100, "high": 110, "low": 90, "close": 105, "volume": 3,
                 "indicators": {"rsi": {"value": null}}},
                {"time": 2000, "open": "105", "high": "115", "low": "100", "close": "112"}
            ]),
        );

        let inbound = parser.parse(&msg).unwrap();
        assert_eq!(inbound.symbol, "BTCUSDT");
        assert_eq!(inbound.kind(), MessageKind::Historical);

        let Payload::Historical(batch) = inbound.payload else {
            panic!("expected historical payload");
        };
        assert_eq!(batch.points.len(), 2);
        assert_eq!(batch.points[0].ohlc.close.inner(), dec!(105));
        assert_eq!(batch.points[0].ohlc.volume.inner(), dec!(3));
        assert!(batch.points[0].indicators.contains_key("rsi"));
        assert!(!batch.points[0].has_indicator_data());
        assert!(batch.points[1].ohlc.volume.is_zero());
        assert_eq!(parser.stats().parsed(), 1);
    }

    #[test]
    fn test_parse_history_update_wrapped_points() {
        let parser = MessageParser::new();
        let msg = envelope(
            "history_update",
            json!({"points": [
                {"time": "1970-01-01T00:16:40Z", "open": 1, "high": 1, "low": 1, "close": 1}
            ]}),
        );

        let inbound = parser.parse(&msg).unwrap();
        let Payload::HistoryUpdate(batch) = inbound.payload else {
            panic!("expected history_update payload");
        };
        assert_eq!(batch.points[0].time, 1000);
    }

    #[test]
    fn test_parse_live_price_alias() {
        let parser = MessageParser::new();
        let msg = envelope("live_price", json!({"time": 5000, "price": 101.5}));

        let inbound = parser.parse(&msg).unwrap();
        assert_eq!(
            inbound.payload,
            Payload::Live(LiveTick {
                time: 5000,
                price: Price::new(dec!(101.5)),
                volume: None,
            })
        );
    }

    #[test]
    fn test_parse_auxiliary_keeps_raw_payload() {
        let parser = MessageParser::new();
        let data = json!([{"id": "line-1", "points": [[1, 2], [3, 4]]}]);
        let inbound = parser.parse(&envelope("drawings", data.clone())).unwrap();

        assert_eq!(inbound.kind(), MessageKind::Drawings);
        assert_eq!(
            inbound.payload,
            Payload::Auxiliary(AuxiliaryPayload {
                kind: AuxiliaryKind::Drawings,
                data,
            })
        );
    }

    #[test]
    fn test_malformed_messages_rejected() {
        let parser = MessageParser::new();

        let unknown = envelope("candles", json!([]));
        assert!(matches!(parser.parse(&unknown), Err(FeedError::UnknownKind(_))));

        let mut no_symbol = envelope("live", json!({"time": 1, "price": 1}));
        no_symbol.symbol = None;
        assert!(matches!(parser.parse(&no_symbol), Err(FeedError::MissingSymbol(_))));

        let bad_tick = envelope("live", json!({"time": 1}));
        assert!(matches!(parser.parse(&bad_tick), Err(FeedError::ParseError(_))));

        let zero_price = envelope("live", json!({"time": 1, "price": 0}));
        assert!(matches!(parser.parse(&zero_price), Err(FeedError::InvalidData(_))));

        let bad_page = envelope("historical", json!({"rows": []}));
        assert!(parser.parse(&bad_page).is_err());

        let bad_time = envelope(
            "historical",
            json!([{"time": "soon", "open": 1, "high": 1, "low": 1, "close": 1}]),
        );
        assert!(matches!(parser.parse(&bad_time), Err(FeedError::Core(_))));

        assert_eq!(parser.stats().rejected(), 6);
        assert_eq!(parser.stats().parsed(), 0);
    }
}
