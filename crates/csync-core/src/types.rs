//! Time series data model.
//!
//! A [`Dataset`] is an ordered run of [`TimeSeriesPoint`]s with at most one
//! point per `time`. Datasets are immutable values: the merge engine in
//! `csync-feed` builds a new one from an old one plus a batch.

use crate::error::{CoreError, Result};
use crate::{Price, Size};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field values of one indicator at one bar (`None` = not computed).
pub type IndicatorFields = BTreeMap<String, Option<f64>>;

/// All indicators at one bar, keyed by indicator id (e.g. `rsi`, `sma_50`).
pub type Indicators = BTreeMap<String, IndicatorFields>;

/// Open/high/low/close/volume of one bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    #[serde(default)]
    pub volume: Size,
}

impl Ohlc {
    pub fn new(open: Price, high: Price, low: Price, close: Price, volume: Size) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Bar opened by a single trade at `price`.
    pub fn flat(price: Price, volume: Size) -> Self {
        Self::new(price, price, price, price, volume)
    }

    /// Fold a trade into the bar: close moves, high/low extend.
    pub fn apply_trade(&mut self, price: Price, volume: Option<Size>) {
        self.close = price;
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        if let Some(volume) = volume {
            self.volume = self.volume + volume;
        }
    }

    /// A bar is valid when it carries a positive close.
    pub fn is_valid(&self) -> bool {
        self.close.is_positive()
    }
}

/// One bar of the chart, keyed by `time` (unix seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub time: i64,
    pub ohlc: Ohlc,
    #[serde(default)]
    pub indicators: Indicators,
}

impl TimeSeriesPoint {
    pub fn new(time: i64, ohlc: Ohlc) -> Self {
        Self {
            time,
            ohlc,
            indicators: Indicators::new(),
        }
    }

    pub fn with_indicator(mut self, id: &str, field: &str, value: Option<f64>) -> Self {
        self.indicators
            .entry(id.to_string())
            .or_default()
            .insert(field.to_string(), value);
        self
    }

    /// True when at least one indicator field carries a value.
    pub fn has_indicator_data(&self) -> bool {
        self.indicators
            .values()
            .any(|fields| fields.values().any(Option::is_some))
    }

    /// Value of `indicator.field`, flattening "absent" and "null".
    pub fn indicator_value(&self, indicator: &str, field: &str) -> Option<f64> {
        self.indicators
            .get(indicator)
            .and_then(|fields| fields.get(field))
            .copied()
            .flatten()
    }
}

/// Time-ordered series with one point per `time`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    points: Vec<TimeSeriesPoint>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[TimeSeriesPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first(&self) -> Option<&TimeSeriesPoint> {
        self.points.first()
    }

    pub fn last(&self) -> Option<&TimeSeriesPoint> {
        self.points.last()
    }

    /// Point at exactly `time` (binary search).
    pub fn get(&self, time: i64) -> Option<&TimeSeriesPoint> {
        self.points
            .binary_search_by_key(&time, |p| p.time)
            .ok()
            .map(|idx| &self.points[idx])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TimeSeriesPoint> {
        self.points.iter()
    }

    /// Covered `[first, last]` time span, if any.
    pub fn span(&self) -> Option<(i64, i64)> {
        Some((self.first()?.time, self.last()?.time))
    }
}

/// Collects points into a dataset, sorting by time.
///
/// When the iterator yields the same `time` twice the later point wins.
/// Callers that need merge semantics go through the merge engine instead.
impl FromIterator<TimeSeriesPoint> for Dataset {
    fn from_iter<I: IntoIterator<Item = TimeSeriesPoint>>(iter: I) -> Self {
        let by_time: BTreeMap<i64, TimeSeriesPoint> =
            iter.into_iter().map(|p| (p.time, p)).collect();
        Self {
            points: by_time.into_values().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a TimeSeriesPoint;
    type IntoIter = std::slice::Iter<'a, TimeSeriesPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// Inclusive `[from, to]` window in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: i64,
    pub to: i64,
}

impl TimeRange {
    pub fn new(from: i64, to: i64) -> Result<Self> {
        if from > to {
            return Err(CoreError::InvalidRange(format!("from {from} > to {to}")));
        }
        Ok(Self { from, to })
    }

    /// Parse both bounds; each may be unix seconds or RFC 3339.
    pub fn parse(from: &str, to: &str) -> Result<Self> {
        Self::new(parse_timestamp(from)?, parse_timestamp(to)?)
    }

    #[inline]
    pub fn contains(&self, time: i64) -> bool {
        self.from <= time && time <= self.to
    }
}

/// Parse a timestamp given as unix seconds or as an RFC 3339 string.
pub fn parse_timestamp(raw: &str) -> Result<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidTimestamp("empty".to_string()));
    }
    if let Ok(secs) = trimmed.parse::<i64>() {
        return Ok(secs);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.timestamp())
        .map_err(|e| CoreError::InvalidTimestamp(format!("{trimmed}: {e}")))
}
