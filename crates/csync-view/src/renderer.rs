//! The rendering side effect.

use crate::error::RenderResult;
use async_trait::async_trait;
use csync_core::Dataset;
use std::sync::Arc;

/// Publishes a dataset snapshot to the view.
///
/// Implementations may be slow and may fail; the coordinator guarantees
/// that at most one `render` runs at a time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, dataset: Arc<Dataset>) -> RenderResult<()>;
}
