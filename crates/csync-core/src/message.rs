//! Typed inbound messages.
//!
//! The transport delivers loosely-shaped JSON envelopes; `csync-feed`
//! decodes them into the closed set of variants below so that dispatch
//! can match exhaustively instead of sniffing object shapes.

use crate::types::TimeSeriesPoint;
use crate::{Price, Size};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    Historical,
    Live,
    HistoryUpdate,
    Drawings,
    BuySignals,
    PositionsUpdate,
}

impl MessageKind {
    /// Map a wire `type` to a kind. `live_price` is an alias of `live`.
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "historical" => Some(Self::Historical),
            "live" | "live_price" => Some(Self::Live),
            "history_update" => Some(Self::HistoryUpdate),
            "drawings" => Some(Self::Drawings),
            "buy_signals" => Some(Self::BuySignals),
            "positions_update" => Some(Self::PositionsUpdate),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Historical => "historical",
            Self::Live => "live",
            Self::HistoryUpdate => "history_update",
            Self::Drawings => "drawings",
            Self::BuySignals => "buy_signals",
            Self::PositionsUpdate => "positions_update",
        }
    }

    /// Backfill kinds go through the completeness validator.
    pub fn is_backfill(&self) -> bool {
        matches!(self, Self::Historical | Self::HistoryUpdate)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Auxiliary kinds that never touch the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuxiliaryKind {
    Drawings,
    BuySignals,
    PositionsUpdate,
}

impl AuxiliaryKind {
    pub fn message_kind(&self) -> MessageKind {
        match self {
            Self::Drawings => MessageKind::Drawings,
            Self::BuySignals => MessageKind::BuySignals,
            Self::PositionsUpdate => MessageKind::PositionsUpdate,
        }
    }
}

/// A backfill page: zero or more bars.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricalBatch {
    pub points: Vec<TimeSeriesPoint>,
}

impl HistoricalBatch {
    pub fn new(points: Vec<TimeSeriesPoint>) -> Self {
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// `[first, last]` over bars with a valid close, regardless of input order.
    pub fn valid_span(&self) -> Option<(i64, i64)> {
        let mut times = self
            .points
            .iter()
            .filter(|p| p.ohlc.is_valid())
            .map(|p| p.time);
        let first = times.next()?;
        Some(times.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t))))
    }
}

/// Single-trade update of the current bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveTick {
    pub time: i64,
    pub price: Price,
    #[serde(default)]
    pub volume: Option<Size>,
}

/// Opaque payload of an auxiliary kind.
#[derive(Debug, Clone, PartialEq)]
pub struct AuxiliaryPayload {
    pub kind: AuxiliaryKind,
    pub data: serde_json::Value,
}

/// Kind-specific payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Historical(HistoricalBatch),
    Live(LiveTick),
    HistoryUpdate(HistoricalBatch),
    Auxiliary(AuxiliaryPayload),
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub symbol: String,
    pub server_timestamp: Option<i64>,
    pub payload: Payload,
}

impl InboundMessage {
    pub fn new(symbol: impl Into<String>, payload: Payload) -> Self {
        Self {
            symbol: symbol.into(),
            server_timestamp: None,
            payload,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match &self.payload {
            Payload::Historical(_) => MessageKind::Historical,
            Payload::Live(_) => MessageKind::Live,
            Payload::HistoryUpdate(_) => MessageKind::HistoryUpdate,
            Payload::Auxiliary(aux) => aux.kind.message_kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Ohlc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_wire_aliases() {
        assert_eq!(MessageKind::from_wire("live_price"), Some(MessageKind::Live));
        assert_eq!(MessageKind::from_wire("live"), Some(MessageKind::Live));
        assert_eq!(MessageKind::from_wire("candles"), None);
        assert!(MessageKind::HistoryUpdate.is_backfill());
        assert!(!MessageKind::Live.is_backfill());
    }

    #[test]
    fn test_valid_span_skips_empty_bars() {
        let good = |t| TimeSeriesPoint::new(t, Ohlc::flat(Price::new(dec!(10)), Size::ZERO));
        let empty = |t| TimeSeriesPoint::new(t, Ohlc::flat(Price::ZERO, Size::ZERO));

        let batch = HistoricalBatch::new(vec![empty(100), good(300), good(200), empty(900)]);
        assert_eq!(batch.valid_span(), Some((200, 300)));

        let batch = HistoricalBatch::new(vec![empty(1)]);
        assert_eq!(batch.valid_span(), None);
    }
}
