//! Trailing-edge debouncer.
//!
//! `schedule` arms a timer; a later `schedule` before the timer fires
//! replaces the armed task. Only the last task of a burst runs, `delay`
//! after the burst goes quiet. Once a task has started it is never
//! cancelled by a newer schedule.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Trailing-edge debouncer. Must be used from within a Tokio runtime.
pub struct Debouncer {
    name: &'static str,
    delay: Duration,
    armed: Mutex<Option<CancellationToken>>,
}

impl Debouncer {
    pub fn new(name: &'static str, delay: Duration) -> Self {
        Self {
            name,
            delay,
            armed: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Arm `task` to run after the delay, superseding any armed task.
    pub fn schedule<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        if let Some(previous) = self.armed.lock().replace(token.clone()) {
            previous.cancel();
        }

        let name = self.name;
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {
                    trace!(debouncer = name, "Debounced task superseded");
                }
                () = tokio::time::sleep(delay) => {
                    task.await;
                }
            }
        });
    }

    /// Disarm the pending task, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.armed.lock().take() {
            token.cancel();
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
