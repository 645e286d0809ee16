//! Inbound message processing for the chart data synchronization pipeline.
//!
//! - `parser`: transport envelope -> typed `InboundMessage`
//! - `dedup`: message identity, bounded seen-set, historical range fingerprint
//! - `merge`: the dataset merge engine and live tick folding
//! - `validator`: indicator completeness policy for backfill batches

pub mod dedup;
pub mod error;
pub mod merge;
pub mod parser;
pub mod validator;

pub use dedup::{
    identify, Claim, DedupConfig, Deduplicator, MessageIdentity, SeenIdentitySet,
};
pub use error::{FeedError, FeedResult, ValidationError};
pub use merge::{fold_live_tick, merge, TickFold};
pub use parser::{MessageParser, ParseStats};
pub use validator::{validate, validate_range};
