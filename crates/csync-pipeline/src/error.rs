//! Pipeline error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] csync_core::CoreError),

    #[error("No active session for {0} message")]
    NoSession(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
