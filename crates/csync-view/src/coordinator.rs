//! Render coordinator.
//!
//! Serializes calls into the [`Renderer`]: one render at a time, a burst of
//! publishes collapses into its last snapshot, and a snapshot that arrives
//! while a render is running is rendered right after it by the same holder.
//!
//! Snapshots are numbered on submission. A snapshot older than the last one
//! rendered is skipped, so a debounced publish that loses a race against a
//! `flush` can never put an older dataset back on screen.

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::lock::MutexWithPendingSlot;
use crate::renderer::Renderer;
use csync_core::{Dataset, Debouncer};
use csync_telemetry::Metrics;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// Outcome of a single render call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Rendered,
    Failed,
    Panicked,
}

/// Snapshot tagged with its submission order.
struct Submission {
    seq: u64,
    dataset: Arc<Dataset>,
}

struct Inner {
    renderer: Arc<dyn Renderer>,
    gate: MutexWithPendingSlot<Submission>,
    next_seq: AtomicU64,
    /// Only written by the lock holder.
    last_rendered: AtomicU64,
}

/// Render coordinator. Cloning shares the coordinator.
#[derive(Clone)]
pub struct RenderCoordinator {
    inner: Arc<Inner>,
    debouncer: Arc<Debouncer>,
}

impl RenderCoordinator {
    pub fn new(renderer: Arc<dyn Renderer>, config: &RenderConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                renderer,
                gate: MutexWithPendingSlot::new(),
                next_seq: AtomicU64::new(1),
                last_rendered: AtomicU64::new(0),
            }),
            debouncer: Arc::new(Debouncer::new(
                "render",
                Duration::from_millis(config.debounce_ms),
            )),
        }
    }

    /// Debounced publish: only the last snapshot of a burst is rendered,
    /// once the burst pauses. Must be called from within a Tokio runtime.
    pub fn publish(&self, snapshot: Arc<Dataset>) {
        trace!(points = snapshot.len(), "Render publish scheduled");
        let submission = self.inner.submit(snapshot);
        let inner = Arc::clone(&self.inner);
        self.debouncer.schedule(async move {
            inner.render_now(submission).await;
        });
    }

    /// Render immediately, bypassing and disarming the debounce.
    ///
    /// Returns once this snapshot was rendered or parked for the current
    /// holder to pick up.
    pub async fn flush(&self, snapshot: Arc<Dataset>) {
        self.debouncer.cancel();
        let submission = self.inner.submit(snapshot);
        self.inner.render_now(submission).await;
    }

    /// Drop any armed debounced publish.
    pub fn cancel_pending(&self) {
        self.debouncer.cancel();
    }

    pub fn is_rendering(&self) -> bool {
        self.inner.gate.is_locked()
    }
}

impl Inner {
    fn submit(&self, dataset: Arc<Dataset>) -> Submission {
        Submission {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            dataset,
        }
    }

    async fn render_now(&self, submission: Submission) {
        let Some((mut guard, mut current)) = self.gate.try_acquire_or_park(submission) else {
            debug!("Render in progress, snapshot parked");
            Metrics::render("parked");
            return;
        };

        loop {
            if current.seq > self.last_rendered.load(Ordering::Acquire) {
                self.render_once(current.dataset).await;
                self.last_rendered.store(current.seq, Ordering::Release);
            } else {
                trace!(seq = current.seq, "Superseded snapshot skipped");
            }
            match guard.handoff() {
                Some((next_guard, next)) => {
                    debug!(points = next.dataset.len(), "Rendering parked snapshot");
                    guard = next_guard;
                    current = next;
                }
                None => break,
            }
        }
    }

    async fn render_once(&self, snapshot: Arc<Dataset>) -> RenderOutcome {
        let points = snapshot.len();
        let start = Instant::now();
        let result = AssertUnwindSafe(async { self.renderer.render(snapshot).await })
            .catch_unwind()
            .await;
        Metrics::render_duration(start.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(Ok(())) => {
                trace!(points, "Rendered");
                Metrics::render("ok");
                RenderOutcome::Rendered
            }
            Ok(Err(e)) => {
                error!(error = %e, points, "Render failed");
                Metrics::render("error");
                RenderOutcome::Failed
            }
            Err(panic) => {
                let e = RenderError::Panicked(panic_message(panic.as_ref()));
                error!(error = %e, points, "Render panicked");
                Metrics::render("panic");
                RenderOutcome::Panicked
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
