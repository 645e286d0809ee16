//! Sequential dispatch queue.
//!
//! Any number of producers call [`DispatchQueue::enqueue`]; a single worker
//! task applies items one at a time in enqueue order. A failing or
//! panicking handler is logged and the worker moves on to the next item.

use async_trait::async_trait;
use csync_telemetry::Metrics;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::PipelineResult;

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Draining,
}

/// Short description of an item for log context.
pub trait Describe {
    fn describe(&self) -> String;
}

/// Applies dequeued items. Owned by the worker task, so it may hold state
/// that nothing else touches.
#[async_trait]
pub trait DispatchHandler<T: Send + 'static>: Send + 'static {
    async fn handle(&mut self, item: T) -> PipelineResult<()>;
}

/// Single-consumer FIFO with a dedicated worker.
pub struct DispatchQueue<T> {
    tx: mpsc::UnboundedSender<T>,
    state: watch::Receiver<DispatchState>,
    depth: Arc<AtomicUsize>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T> DispatchQueue<T>
where
    T: Describe + Send + 'static,
{
    /// Spawn the worker. Must be called from within a Tokio runtime.
    pub fn spawn<H>(handler: H) -> Self
    where
        H: DispatchHandler<T>,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(DispatchState::Idle);
        let depth = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let worker = tokio::spawn(run_worker(
            handler,
            rx,
            state_tx,
            Arc::clone(&depth),
            cancel.clone(),
        ));

        Self {
            tx,
            state: state_rx,
            depth,
            cancel,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Append `item`. Never blocks and never runs the handler inline.
    /// Returns false once the queue has been shut down.
    pub fn enqueue(&self, item: T) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        if self.tx.send(item).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        Metrics::queue_depth(depth);
        true
    }

    /// Items enqueued but not yet fully handled.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn state(&self) -> DispatchState {
        *self.state.borrow()
    }

    /// Wait until every item enqueued so far has been handled.
    pub async fn wait_idle(&self) {
        let mut state = self.state.clone();
        loop {
            if self.depth() == 0 && *state.borrow_and_update() == DispatchState::Idle {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }

    /// Stop the worker. Items still queued are discarded.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Dispatch worker terminated abnormally");
            }
        }
    }
}

impl<T> fmt::Debug for DispatchQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("depth", &self.depth.load(Ordering::Relaxed))
            .field("state", &*self.state.borrow())
            .finish()
    }
}

async fn run_worker<T, H>(
    mut handler: H,
    mut rx: mpsc::UnboundedReceiver<T>,
    state: watch::Sender<DispatchState>,
    depth: Arc<AtomicUsize>,
    cancel: CancellationToken,
) where
    T: Describe + Send + 'static,
    H: DispatchHandler<T>,
{
    debug!("Dispatch worker started");

    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };

        state.send_replace(DispatchState::Draining);

        let context = item.describe();
        let result = AssertUnwindSafe(handler.handle(item)).catch_unwind().await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(error = %e, item = %context, "Dispatch handler failed");
            }
            Err(_) => {
                error!(item = %context, "Dispatch handler panicked");
            }
        }

        let remaining = depth.fetch_sub(1, Ordering::AcqRel) - 1;
        Metrics::queue_depth(remaining);
        if remaining == 0 {
            state.send_replace(DispatchState::Idle);
        }

        // Next item runs as a fresh poll so a burst cannot hog the runtime.
        tokio::task::yield_now().await;
    }

    state.send_replace(DispatchState::Idle);
    info!("Dispatch worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::time::Duration;

    #[derive(Debug)]
    struct Job {
        producer: usize,
        seq: usize,
    }

    impl Describe for Job {
        fn describe(&self) -> String {
            format!("job {}/{}", self.producer, self.seq)
        }
    }

    struct Recorder {
        applied: Arc<Mutex<Vec<(usize, usize)>>>,
        in_flight: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DispatchHandler<Job> for Recorder {
        async fn handle(&mut self, job: Job) -> PipelineResult<()> {
            assert_eq!(self.in_flight.fetch_add(1, Ordering::SeqCst), 0);
            // Suspend mid-handler so an interleaving bug would show up.
            tokio::task::yield_now().await;
            self.applied.lock().push((job.producer, job.seq));
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match job.seq {
                3 => Err(PipelineError::NoSession("test".to_string())),
                5 => panic!("handler bug"),
                _ => Ok(()),
            }
        }
    }

    fn recorder() -> (Recorder, Arc<Mutex<Vec<(usize, usize)>>>) {
        let applied = Arc::new(Mutex::new(Vec::new()));
        (
            Recorder {
                applied: Arc::clone(&applied),
                in_flight: Arc::new(AtomicUsize::new(0)),
            },
            applied,
        )
    }

    #[tokio::test]
    async fn test_fifo_order_and_failures_do_not_halt() {
        let (handler, applied) = recorder();
        let queue = DispatchQueue::spawn(handler);

        for seq in 0..10 {
            assert!(queue.enqueue(Job { producer: 0, seq }));
        }
        queue.wait_idle().await;

        let seqs: Vec<usize> = applied.lock().iter().map(|(_, s)| *s).collect();
        assert_eq!(seqs, (0..10).collect::<Vec<_>>());
        assert_eq!(queue.depth(), 0);
        assert_eq!(queue.state(), DispatchState::Idle);
        queue.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_keep_per_producer_order() {
        let (handler, applied) = recorder();
        let queue = Arc::new(DispatchQueue::spawn(handler));

        let producers: Vec<_> = (1..=4)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                tokio::spawn(async move {
                    for seq in 10..60 {
                        queue.enqueue(Job { producer, seq });
                        if seq % 7 == 0 {
                            tokio::task::yield_now().await;
                        }
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }
        tokio::time::timeout(Duration::from_secs(5), queue.wait_idle())
            .await
            .unwrap();

        let applied = applied.lock();
        assert_eq!(applied.len(), 200);
        for producer in 1..=4 {
            let seqs: Vec<usize> = applied
                .iter()
                .filter(|(p, _)| *p == producer)
                .map(|(_, s)| *s)
                .collect();
            assert_eq!(seqs, (10..60).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_rejected() {
        let (handler, _applied) = recorder();
        let queue = DispatchQueue::spawn(handler);
        queue.shutdown().await;

        assert!(!queue.enqueue(Job { producer: 0, seq: 0 }));
        assert_eq!(queue.depth(), 0);
    }
}
