//! Render error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Render failed: {0}")]
    Failed(String),

    #[error("Renderer panicked: {0}")]
    Panicked(String),
}

pub type RenderResult<T> = Result<T, RenderError>;
