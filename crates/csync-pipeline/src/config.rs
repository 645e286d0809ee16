//! Application configuration.

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::PipelineConfig;
use chrono::{DateTime, Utc};
use csync_core::{Resolution, SessionParams};
use csync_feed::DedupConfig;
use csync_view::RenderConfig;
use csync_ws::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CSYNC_CONFIG";

/// Chart session to open at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_resolution")]
    pub resolution: Resolution,
    #[serde(default)]
    pub indicators: Vec<String>,
    /// Window start (unix seconds or RFC 3339). Empty means
    /// `lookback_bars` bars before `to_ts`.
    #[serde(default)]
    pub from_ts: String,
    /// Window end. Empty means now.
    #[serde(default)]
    pub to_ts: String,
    #[serde(default = "default_lookback_bars")]
    pub lookback_bars: u32,
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_resolution() -> Resolution {
    Resolution::H1
}

fn default_lookback_bars() -> u32 {
    500
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            resolution: default_resolution(),
            indicators: Vec::new(),
            from_ts: String::new(),
            to_ts: String::new(),
            lookback_bars: default_lookback_bars(),
        }
    }
}

impl SessionConfig {
    /// Resolve the window against `now` and build session parameters.
    pub fn params_at(&self, now: DateTime<Utc>) -> PipelineResult<SessionParams> {
        let to_ts = if self.to_ts.trim().is_empty() {
            now.timestamp()
        } else {
            csync_core::parse_timestamp(&self.to_ts)?
        };
        let from_ts = if self.from_ts.trim().is_empty() {
            to_ts - i64::from(self.lookback_bars) * self.resolution.duration_secs()
        } else {
            csync_core::parse_timestamp(&self.from_ts)?
        };

        let params = SessionParams::new(
            &self.symbol,
            self.resolution,
            self.indicators.clone(),
            from_ts.to_string(),
            to_ts.to_string(),
        )?;
        params.requested_range()?;
        Ok(params)
    }

    pub fn params(&self) -> PipelineResult<SessionParams> {
        self.params_at(Utc::now())
    }
}

/// WebSocket configuration subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    #[serde(default = "default_open_debounce_ms")]
    pub open_debounce_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Maximum consecutive reconnect attempts (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_normal_close_codes")]
    pub normal_close_codes: Vec<u16>,
}

fn default_open_debounce_ms() -> u64 {
    300
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_normal_close_codes() -> Vec<u16> {
    vec![1000]
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            open_debounce_ms: default_open_debounce_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: 0,
            normal_close_codes: default_normal_close_codes(),
        }
    }
}

impl From<WsConfig> for ConnectionConfig {
    fn from(cfg: WsConfig) -> Self {
        Self {
            url: String::new(), // Set separately
            open_debounce_ms: cfg.open_debounce_ms,
            reconnect_delay_ms: cfg.reconnect_delay_ms,
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            normal_close_codes: cfg.normal_close_codes,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is unset.
    #[serde(default)]
    pub log_level: Option<String>,
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// WebSocket endpoint URL.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub websocket: WsConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:8000/ws/chart".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            session: SessionConfig::default(),
            websocket: WsConfig::default(),
            dedup: DedupConfig::default(),
            render: RenderConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file.
    pub fn from_file(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("Failed to read config: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| PipelineError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load from `path`, else `CSYNC_CONFIG`, else the default path.
    /// A missing file yields the defaults.
    pub fn load(path: Option<String>) -> PipelineResult<Self> {
        let config_path = path
            .or_else(|| std::env::var(CONFIG_ENV).ok())
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let mut connection = ConnectionConfig::from(self.websocket.clone());
        connection.url = self.ws_url.clone();
        PipelineConfig {
            connection,
            dedup: self.dedup.clone(),
            render: self.render.clone(),
            ..PipelineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.session.symbol, "BTCUSDT");
        assert_eq!(config.session.resolution, Resolution::H1);
        assert_eq!(config.websocket.normal_close_codes, vec![1000]);
        assert_eq!(config.render.debounce_ms, 100);
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("ws_url"));
        assert!(toml_str.contains("range_tolerance_secs"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
ws_url = "ws://example.test/ws"

[session]
symbol = "ethusdt"
resolution = "15m"
indicators = ["rsi", "macd"]

[websocket]
reconnect_delay_ms = 500
"#
        )
        .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.ws_url, "ws://example.test/ws");
        assert_eq!(config.session.resolution, Resolution::M15);
        assert_eq!(config.websocket.reconnect_delay_ms, 500);
        assert_eq!(config.websocket.open_debounce_ms, 300);
        assert_eq!(config.dedup.capacity, 10_000);

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.connection.url, "ws://example.test/ws");
        assert_eq!(pipeline.connection.reconnect_delay_ms, 500);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[session]\nresolution = \"7x\"").unwrap();

        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = AppConfig::load(Some(path.display().to_string())).unwrap();
        assert_eq!(config.ws_url, default_ws_url());
    }

    #[test]
    fn test_session_window_defaults_to_lookback() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let session = SessionConfig {
            symbol: "btcusdt".to_string(),
            lookback_bars: 10,
            ..SessionConfig::default()
        };

        let params = session.params_at(now).unwrap();
        assert_eq!(params.symbol, "BTCUSDT");
        assert_eq!(params.to_ts, "1700000000");
        assert_eq!(params.from_ts, (1_700_000_000 - 10 * 3_600).to_string());
    }

    #[test]
    fn test_session_window_explicit_bounds() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let session = SessionConfig {
            from_ts: "2023-11-14T00:00:00Z".to_string(),
            to_ts: "1699950000".to_string(),
            ..SessionConfig::default()
        };
        let params = session.params_at(now).unwrap();
        assert_eq!(params.from_ts, "1699920000");
        assert_eq!(params.to_ts, "1699950000");

        let inverted = SessionConfig {
            from_ts: "1699950000".to_string(),
            to_ts: "1699920000".to_string(),
            ..SessionConfig::default()
        };
        assert!(inverted.params_at(now).is_err());
    }
}
