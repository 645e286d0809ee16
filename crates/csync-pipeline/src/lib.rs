//! Real-time chart data synchronization pipeline.
//!
//! Wires the pieces together:
//! - `ConnectionManager` (csync-ws): one debounced, generation-tagged session
//! - `MessageParser` and `Deduplicator` (csync-feed): decode and drop repeats
//! - `DispatchQueue`: a single worker applies merges in arrival order
//! - `RenderCoordinator` (csync-view): serialized, coalesced redraws

pub mod config;
pub mod dispatch;
pub mod error;
pub mod pipeline;

pub use config::{AppConfig, SessionConfig, TelemetryConfig, WsConfig};
pub use dispatch::{Describe, DispatchHandler, DispatchQueue, DispatchState};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{PipelineConfig, PipelineItem, SyncPipeline};
