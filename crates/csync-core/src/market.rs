//! Session identification types.
//!
//! A chart session is identified by `(symbol, resolution, indicator set)`.
//! The requested time window is part of the session parameters but not of
//! its identity: zooming re-opens the transport without discarding data.

use crate::error::{CoreError, Result};
use crate::types::TimeRange;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Resolution {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
    W1,
}

impl Resolution {
    /// Bar length in seconds.
    pub fn duration_secs(&self) -> i64 {
        match self {
            Self::M1 => 60,
            Self::M5 => 300,
            Self::M15 => 900,
            Self::M30 => 1_800,
            Self::H1 => 3_600,
            Self::H4 => 14_400,
            Self::D1 => 86_400,
            Self::W1 => 604_800,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
            Self::W1 => "1w",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1m" => Ok(Self::M1),
            "5m" => Ok(Self::M5),
            "15m" => Ok(Self::M15),
            "30m" => Ok(Self::M30),
            "1h" | "60m" => Ok(Self::H1),
            "4h" => Ok(Self::H4),
            "1d" | "d" => Ok(Self::D1),
            "1w" | "w" => Ok(Self::W1),
            other => Err(CoreError::InvalidResolution(other.to_string())),
        }
    }
}

impl TryFrom<String> for Resolution {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.as_str().to_string()
    }
}

/// Logical identity of a chart session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub symbol: String,
    pub resolution: Resolution,
    /// Sorted, deduplicated indicator ids.
    pub indicators: Vec<String>,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.symbol, self.resolution)?;
        if !self.indicators.is_empty() {
            write!(f, "[{}]", self.indicators.join(","))?;
        }
        Ok(())
    }
}

/// Everything needed to open a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    pub symbol: String,
    pub resolution: Resolution,
    #[serde(default)]
    pub indicators: Vec<String>,
    /// Requested window start, unix seconds or RFC 3339.
    pub from_ts: String,
    /// Requested window end, unix seconds or RFC 3339.
    pub to_ts: String,
}

impl SessionParams {
    pub fn new(
        symbol: impl Into<String>,
        resolution: Resolution,
        indicators: Vec<String>,
        from_ts: impl Into<String>,
        to_ts: impl Into<String>,
    ) -> Result<Self> {
        let symbol = symbol.into().trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(CoreError::InvalidSymbol("empty symbol".to_string()));
        }
        let mut indicators: Vec<String> = indicators
            .into_iter()
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .collect();
        indicators.sort();
        indicators.dedup();

        Ok(Self {
            symbol,
            resolution,
            indicators,
            from_ts: from_ts.into(),
            to_ts: to_ts.into(),
        })
    }

    pub fn key(&self) -> SessionKey {
        SessionKey {
            symbol: self.symbol.clone(),
            resolution: self.resolution,
            indicators: self.indicators.clone(),
        }
    }

    /// The analyst-requested window; fails when either bound is unparseable.
    pub fn requested_range(&self) -> Result<TimeRange> {
        TimeRange::parse(&self.from_ts, &self.to_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_round_trip_text() {
        for res in [Resolution::M1, Resolution::H1, Resolution::W1] {
            assert_eq!(res.as_str().parse::<Resolution>().unwrap(), res);
        }
        assert!("7m".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_resolution_serde_as_string() {
        let json = serde_json::to_string(&Resolution::H4).unwrap();
        assert_eq!(json, "\"4h\"");
        let back: Resolution = serde_json::from_str("\"1d\"").unwrap();
        assert_eq!(back, Resolution::D1);
    }

    #[test]
    fn test_session_params_normalize() {
        let params = SessionParams::new(
            " btcusdt ",
            Resolution::H1,
            vec!["sma".into(), "rsi".into(), "sma".into(), " ".into()],
            "1000",
            "5000",
        )
        .unwrap();

        assert_eq!(params.symbol, "BTCUSDT");
        assert_eq!(params.indicators, vec!["rsi".to_string(), "sma".to_string()]);
        assert_eq!(params.key().to_string(), "BTCUSDT/1h[rsi,sma]");
        assert_eq!(params.requested_range().unwrap(), TimeRange::new(1000, 5000).unwrap());
    }

    #[test]
    fn test_session_key_ignores_window() {
        let a = SessionParams::new("ETHUSDT", Resolution::M5, vec![], "0", "100").unwrap();
        let b = SessionParams::new("ETHUSDT", Resolution::M5, vec![], "50", "900").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_session_params_rejects_empty_symbol() {
        assert!(SessionParams::new("  ", Resolution::M1, vec![], "0", "1").is_err());
    }
}
