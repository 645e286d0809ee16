//! Render coordination for chart-sync.
//!
//! The pipeline hands immutable `Arc<Dataset>` snapshots to a
//! [`RenderCoordinator`], which wraps a caller-supplied [`Renderer`]:
//!
//! - at most one render runs at a time (`MutexWithPendingSlot`)
//! - a snapshot arriving mid-render is parked; newer parks replace older ones
//! - `publish` is trailing-debounced, `flush` renders immediately
//! - the lock is released on every exit path, including renderer panics

mod config;
mod coordinator;
mod error;
mod lock;
mod renderer;

pub use config::RenderConfig;
pub use coordinator::{RenderCoordinator, RenderOutcome};
pub use error::{RenderError, RenderResult};
pub use lock::{MutexWithPendingSlot, SlotGuard};
pub use renderer::Renderer;
