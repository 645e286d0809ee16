//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Unknown message type: {0}")]
    UnknownKind(String),

    #[error("Missing symbol for {0} message")]
    MissingSymbol(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    Core(#[from] csync_core::CoreError),
}

pub type FeedResult<T> = Result<T, FeedError>;

/// Reason a backfill batch was rejected by the completeness validator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Requested range unusable: {0}")]
    InvalidRange(String),

    #[error("Indicator gap at {time}: {indicator}.{field} is null after warm-up")]
    NullAfterWarmup {
        time: i64,
        indicator: String,
        field: String,
    },

    #[error("Indicator gap at {time}: {indicator} missing after warm-up")]
    MissingIndicator { time: i64, indicator: String },
}
