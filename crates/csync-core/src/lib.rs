//! Core types for the chart data synchronization pipeline.
//!
//! This crate provides the building blocks shared by every other crate:
//! - `TimeSeriesPoint`, `Dataset`: the canonical per-timestamp series
//! - `Price`, `Size`: precision-safe numeric types
//! - `InboundMessage`: the closed set of decoded message kinds
//! - `SessionParams`, `Resolution`: session identification
//! - `GenerationCounter`, `Debouncer`: session staleness and timer coalescing

pub mod debounce;
pub mod decimal;
pub mod error;
pub mod generation;
pub mod market;
pub mod message;
pub mod types;

pub use debounce::Debouncer;
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use generation::{Generation, GenerationCounter};
pub use market::{Resolution, SessionKey, SessionParams};
pub use message::{
    AuxiliaryKind, AuxiliaryPayload, HistoricalBatch, InboundMessage, LiveTick, MessageKind,
    Payload,
};
pub use types::{
    parse_timestamp, Dataset, IndicatorFields, Indicators, Ohlc, TimeRange, TimeSeriesPoint,
};
