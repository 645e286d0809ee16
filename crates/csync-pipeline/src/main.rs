//! Chart sync - entry point.
//!
//! Opens one chart session against the configured endpoint and keeps the
//! dataset in sync until Ctrl-C. Renders are logged.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use csync_core::{Dataset, Resolution};
use csync_view::{RenderResult, Renderer};
use std::sync::Arc;
use tracing::info;

/// Real-time chart data synchronization client
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via CSYNC_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Symbol to chart, overrides [session].symbol
    #[arg(short, long)]
    symbol: Option<String>,

    /// Bar resolution (1m, 5m, 15m, 30m, 1h, 4h, 1d, 1w)
    #[arg(short, long)]
    resolution: Option<Resolution>,

    /// Comma-separated indicator ids
    #[arg(short, long, value_delimiter = ',')]
    indicators: Option<Vec<String>>,

    /// Window start, unix seconds or RFC 3339
    #[arg(long)]
    from: Option<String>,

    /// Window end, unix seconds or RFC 3339
    #[arg(long)]
    to: Option<String>,
}

/// Renderer that reports each redraw in the log.
struct LoggingRenderer;

#[async_trait]
impl Renderer for LoggingRenderer {
    async fn render(&self, dataset: Arc<Dataset>) -> RenderResult<()> {
        match dataset.last() {
            Some(last) => info!(
                points = dataset.len(),
                last_time = last.time,
                close = %last.ohlc.close,
                "Chart rendered"
            ),
            None => info!("Chart cleared"),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    csync_ws::init_crypto();

    let args = Args::parse();

    let mut config = csync_pipeline::AppConfig::load(args.config)?;
    csync_telemetry::init_logging(config.telemetry.log_level.as_deref())?;

    info!("Starting chart sync v{}", env!("CARGO_PKG_VERSION"));

    if let Some(symbol) = args.symbol {
        config.session.symbol = symbol;
    }
    if let Some(resolution) = args.resolution {
        config.session.resolution = resolution;
    }
    if let Some(indicators) = args.indicators {
        config.session.indicators = indicators;
    }
    if let Some(from) = args.from {
        config.session.from_ts = from;
    }
    if let Some(to) = args.to {
        config.session.to_ts = to;
    }

    let params = config.session.params()?;
    info!(ws_url = %config.ws_url, session = %params.key(), from = %params.from_ts, to = %params.to_ts, "Configuration loaded");

    let pipeline =
        csync_pipeline::SyncPipeline::start(config.pipeline_config(), Arc::new(LoggingRenderer));
    pipeline.open(params);

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received");

    pipeline.close("shutdown");
    pipeline.shutdown().await;

    if let Ok(text) = csync_telemetry::Metrics::gather_text() {
        tracing::debug!(metrics = %text, "Final metrics");
    }
    Ok(())
}
