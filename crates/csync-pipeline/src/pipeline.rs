//! The synchronization pipeline.
//!
//! ```text
//! ConnectionManager ──SessionEvent──▶ event pump (parse, stale check, dedup)
//!                                          │ enqueue
//!                                          ▼
//!                                  DispatchQueue worker ──▶ merge / validate
//!                                          │ Arc<Dataset>
//!                                          ▼
//!                              watch channel + RenderCoordinator
//! ```
//!
//! Socket and timer callbacks never touch the dataset. Everything that
//! changes it goes through the dispatch queue, whose worker is the only
//! owner of the current `Dataset`.

use crate::dispatch::{Describe, DispatchHandler, DispatchQueue};
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use csync_core::{
    AuxiliaryKind, AuxiliaryPayload, Dataset, Generation, GenerationCounter, HistoricalBatch,
    InboundMessage, LiveTick, MessageKind, Payload, SessionKey, SessionParams,
};
use csync_feed::{
    fold_live_tick, merge, validate, Claim, DedupConfig, Deduplicator, MessageParser, TickFold,
};
use csync_telemetry::Metrics;
use csync_view::{RenderConfig, RenderCoordinator, Renderer};
use csync_ws::{ConnectionConfig, ConnectionManager, ConnectionState, SessionEvent};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Everything needed to start a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub connection: ConnectionConfig,
    pub dedup: DedupConfig,
    pub render: RenderConfig,
    /// Capacity of the transport event channel.
    pub event_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            dedup: DedupConfig::default(),
            render: RenderConfig::default(),
            event_buffer: 1024,
        }
    }
}

/// Unit of work for the dispatch worker.
#[derive(Debug)]
pub enum PipelineItem {
    /// A session (re)established under `generation`.
    SessionOpened {
        generation: Generation,
        params: SessionParams,
    },
    /// A decoded, deduplicated message.
    Message {
        generation: Generation,
        claim: Claim,
        message: InboundMessage,
    },
}

impl Describe for PipelineItem {
    fn describe(&self) -> String {
        match self {
            Self::SessionOpened { generation, params } => {
                format!("session_opened {} {generation}", params.key())
            }
            Self::Message {
                generation,
                claim,
                message,
            } => format!(
                "{} {} {generation} identity={}",
                message.kind(),
                message.symbol,
                claim.identity
            ),
        }
    }
}

// ============================================================================
// Ingress: everything between the transport and the queue
// ============================================================================

struct Ingress {
    generations: GenerationCounter,
    dedup: Arc<Deduplicator>,
    queue: DispatchQueue<PipelineItem>,
    parser: MessageParser,
    /// Session identity the dedup state currently belongs to.
    session_key: Mutex<Option<SessionKey>>,
}

impl Ingress {
    fn on_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Opened { generation, params } => {
                if self.generations.is_current(generation) {
                    Metrics::ws_connected();
                }
                self.begin_session(generation, params);
            }
            SessionEvent::Message {
                generation,
                message,
            } => match self.parser.parse(&message) {
                Ok(inbound) => {
                    self.admit(generation, inbound);
                }
                Err(e) => {
                    let kind = MessageKind::from_wire(&message.msg_type)
                        .map(|k| k.as_str())
                        .unwrap_or("unknown");
                    warn!(error = %e, msg_type = %message.msg_type, %generation, "Malformed message dropped");
                    Metrics::message(kind, "malformed");
                }
            },
            SessionEvent::Closed {
                generation,
                code,
                reason,
                abnormal,
                reconnect,
            } => {
                if !self.generations.is_current(generation) {
                    trace!(%generation, code, "Stale transport close ignored");
                    return;
                }
                Metrics::ws_disconnected();
                if reconnect {
                    Metrics::ws_reconnect("abnormal_close");
                }
                info!(%generation, code, %reason, abnormal, reconnect, "Transport closed");
            }
        }
    }

    fn begin_session(&self, generation: Generation, params: SessionParams) {
        if !self.generations.is_current(generation) {
            trace!(%generation, "Stale session open ignored");
            return;
        }
        Metrics::session_generation(generation.value());

        let key = params.key();
        {
            let mut current = self.session_key.lock();
            if current.as_ref() != Some(&key) {
                debug!(session = %key, "New session identity, dedup state reset");
                self.dedup.reset();
                *current = Some(key);
            }
        }
        self.queue
            .enqueue(PipelineItem::SessionOpened { generation, params });
    }

    fn admit(&self, generation: Generation, message: InboundMessage) -> bool {
        let kind = message.kind();
        if !self.generations.is_current(generation) {
            trace!(%kind, %generation, "Stale message dropped");
            Metrics::message(kind.as_str(), "stale");
            return false;
        }

        let identity = self.dedup.identify(&message);
        let Some(claim) = self.dedup.claim(identity) else {
            Metrics::message(kind.as_str(), "duplicate");
            return false;
        };

        let item = PipelineItem::Message {
            generation,
            claim: claim.clone(),
            message,
        };
        if !self.queue.enqueue(item) {
            self.dedup.forget(&claim);
            return false;
        }
        true
    }
}

// ============================================================================
// Worker: the only owner of the dataset
// ============================================================================

struct DatasetHandler {
    generations: GenerationCounter,
    dedup: Arc<Deduplicator>,
    session: Option<SessionParams>,
    dataset: Arc<Dataset>,
    snapshots: watch::Sender<Arc<Dataset>>,
    auxiliary: Arc<DashMap<AuxiliaryKind, AuxiliaryPayload>>,
    render: RenderCoordinator,
}

#[async_trait]
impl DispatchHandler<PipelineItem> for DatasetHandler {
    async fn handle(&mut self, item: PipelineItem) -> PipelineResult<()> {
        match item {
            PipelineItem::SessionOpened { generation, params } => {
                self.open_session(generation, params);
                Ok(())
            }
            PipelineItem::Message {
                generation,
                claim,
                message,
            } => self.apply_message(generation, claim, message).await,
        }
    }
}

impl DatasetHandler {
    fn open_session(&mut self, generation: Generation, params: SessionParams) {
        if !self.generations.is_current(generation) {
            trace!(%generation, "Stale session open ignored");
            return;
        }

        let key = params.key();
        let same_identity = self.session.as_ref().map(SessionParams::key) == Some(key.clone());
        if !same_identity {
            info!(session = %key, %generation, "Session identity changed, dataset reset");
            self.dataset = Arc::new(Dataset::new());
            self.auxiliary.clear();
            self.render.cancel_pending();
            self.snapshots.send_replace(Arc::clone(&self.dataset));
            Metrics::dataset_points(0);
        } else {
            debug!(session = %key, %generation, "Session re-established, dataset kept");
        }
        self.session = Some(params);
    }

    async fn apply_message(
        &mut self,
        generation: Generation,
        claim: Claim,
        message: InboundMessage,
    ) -> PipelineResult<()> {
        let kind = message.kind();
        if !self.generations.is_current(generation) {
            trace!(%kind, %generation, "Stale message dropped at dequeue");
            self.dedup.forget(&claim);
            Metrics::message(kind.as_str(), "stale");
            return Ok(());
        }
        self.dedup.release(&claim);

        let Some(session) = self.session.clone() else {
            self.dedup.forget(&claim);
            Metrics::message(kind.as_str(), "failed");
            return Err(PipelineError::NoSession(kind.to_string()));
        };
        if message.symbol != session.symbol {
            warn!(%kind, symbol = %message.symbol, session = %session.key(), "Message for another symbol dropped");
            self.dedup.forget(&claim);
            Metrics::message(kind.as_str(), "foreign");
            return Ok(());
        }

        match message.payload {
            Payload::Historical(batch) => {
                self.apply_backfill(kind, &claim, &session, batch, true)
                    .await
            }
            Payload::HistoryUpdate(batch) => {
                self.apply_backfill(kind, &claim, &session, batch, false)
                    .await
            }
            Payload::Live(tick) => self.apply_live(&session, tick),
            Payload::Auxiliary(aux) => {
                debug!(kind = %aux.kind.message_kind(), "Auxiliary payload stored");
                self.auxiliary.insert(aux.kind, aux);
                Metrics::message(kind.as_str(), "applied");
                Ok(())
            }
        }
    }

    async fn apply_backfill(
        &mut self,
        kind: MessageKind,
        claim: &Claim,
        session: &SessionParams,
        batch: HistoricalBatch,
        fingerprint: bool,
    ) -> PipelineResult<()> {
        let span = batch.valid_span();
        if fingerprint {
            if let Some(span) = span {
                if self.dedup.matches_applied_range(span, session.resolution) {
                    debug!(%kind, first = span.0, last = span.1, "Duplicate historical range skipped");
                    Metrics::message(kind.as_str(), "duplicate");
                    return Ok(());
                }
            }
        }

        if let Err(e) = validate(&batch, &session.from_ts, &session.to_ts) {
            warn!(%kind, error = %e, points = batch.points.len(), "Backfill rejected");
            self.dedup.forget(claim);
            Metrics::message(kind.as_str(), "rejected");
            return Ok(());
        }

        let merged = merge(&self.dataset, &batch.points);
        info!(%kind, incoming = batch.points.len(), total = merged.len(), "Backfill applied");
        if fingerprint {
            if let Some(span) = span {
                self.dedup.record_applied_range(claim, span);
            }
        }
        Metrics::message(kind.as_str(), "applied");

        let snapshot = self.commit(merged);
        self.render.flush(snapshot).await;
        Ok(())
    }

    fn apply_live(&mut self, session: &SessionParams, tick: LiveTick) -> PipelineResult<()> {
        let point = match fold_live_tick(&self.dataset, &tick, session.resolution) {
            TickFold::Stale => {
                // Stays seen: the same tick would be just as stale next time.
                debug!(time = tick.time, price = %tick.price, "Stale live tick ignored");
                Metrics::message(MessageKind::Live.as_str(), "stale_tick");
                return Ok(());
            }
            fold => match fold.into_point() {
                Some(point) => point,
                None => return Ok(()),
            },
        };

        let merged = merge(&self.dataset, std::slice::from_ref(&point));
        trace!(time = point.time, close = %point.ohlc.close, "Live tick applied");
        Metrics::message(MessageKind::Live.as_str(), "applied");

        let snapshot = self.commit(merged);
        self.render.publish(snapshot);
        Ok(())
    }

    fn commit(&mut self, merged: Dataset) -> Arc<Dataset> {
        self.dataset = Arc::new(merged);
        Metrics::dataset_points(self.dataset.len());
        self.snapshots.send_replace(Arc::clone(&self.dataset));
        Arc::clone(&self.dataset)
    }
}

// ============================================================================
// SyncPipeline
// ============================================================================

/// Owns the session, the queue, the dataset snapshots and the renderer.
///
/// `start` is the only constructor and `shutdown` the teardown; nothing
/// about a pipeline lives in global state.
pub struct SyncPipeline {
    connection: ConnectionManager,
    generations: GenerationCounter,
    ingress: Arc<Ingress>,
    snapshots: watch::Receiver<Arc<Dataset>>,
    auxiliary: Arc<DashMap<AuxiliaryKind, AuxiliaryPayload>>,
    render: RenderCoordinator,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SyncPipeline {
    /// Build and start all tasks. Must be called from within a Tokio runtime.
    pub fn start(config: PipelineConfig, renderer: Arc<dyn Renderer>) -> Self {
        let generations = GenerationCounter::new();
        let dedup = Arc::new(Deduplicator::new(config.dedup.clone()));
        let render = RenderCoordinator::new(renderer, &config.render);
        let auxiliary = Arc::new(DashMap::new());
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(Dataset::new()));

        let handler = DatasetHandler {
            generations: generations.clone(),
            dedup: Arc::clone(&dedup),
            session: None,
            dataset: Arc::new(Dataset::new()),
            snapshots: snapshot_tx,
            auxiliary: Arc::clone(&auxiliary),
            render: render.clone(),
        };
        let ingress = Arc::new(Ingress {
            generations: generations.clone(),
            dedup,
            queue: DispatchQueue::spawn(handler),
            parser: MessageParser::new(),
            session_key: Mutex::new(None),
        });

        let (event_tx, mut event_rx) = mpsc::channel(config.event_buffer.max(1));
        let connection = ConnectionManager::new(config.connection, generations.clone(), event_tx);

        let pump_ingress = Arc::clone(&ingress);
        let pump = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                pump_ingress.on_event(event);
            }
            debug!("Session event pump stopped");
        });

        info!("Sync pipeline started");
        Self {
            connection,
            generations,
            ingress,
            snapshots: snapshot_rx,
            auxiliary,
            render,
            pump: Mutex::new(Some(pump)),
        }
    }

    /// Request a WebSocket session (debounced).
    pub fn open(&self, params: SessionParams) {
        self.connection.open(params);
    }

    /// Close the WebSocket session and stop reconnecting.
    pub fn close(&self, reason: &str) {
        self.connection.close(reason);
    }

    /// Start a session fed by a source other than the WebSocket, such as a
    /// replay. Retires the current generation like any session setup.
    pub fn attach_session(&self, params: SessionParams) -> Generation {
        let generation = self.generations.advance();
        info!(session = %params.key(), %generation, "Session attached");
        self.ingress.begin_session(generation, params);
        generation
    }

    /// Enqueue a decoded message under the current generation.
    /// Returns false when it was dropped as a duplicate.
    pub fn enqueue(&self, message: InboundMessage) -> bool {
        self.ingress.admit(self.generations.current(), message)
    }

    /// Enqueue a message captured under `generation`; dropped when stale.
    pub fn enqueue_at(&self, generation: Generation, message: InboundMessage) -> bool {
        self.ingress.admit(generation, message)
    }

    pub fn generation(&self) -> Generation {
        self.generations.current()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Receiver that always holds the latest applied dataset.
    pub fn subscribe(&self) -> watch::Receiver<Arc<Dataset>> {
        self.snapshots.clone()
    }

    /// Latest applied dataset.
    pub fn dataset(&self) -> Arc<Dataset> {
        Arc::clone(&self.snapshots.borrow())
    }

    /// Latest payload of an auxiliary kind.
    pub fn auxiliary(&self, kind: AuxiliaryKind) -> Option<AuxiliaryPayload> {
        self.auxiliary.get(&kind).map(|entry| entry.value().clone())
    }

    /// Messages waiting for the worker.
    pub fn queue_depth(&self) -> usize {
        self.ingress.queue.depth()
    }

    /// Wait until everything enqueued so far has been applied.
    pub async fn wait_idle(&self) {
        self.ingress.queue.wait_idle().await;
    }

    /// Tear down the session, the worker and pending renders.
    pub async fn shutdown(&self) {
        info!("Sync pipeline shutting down");
        self.connection.shutdown();
        self.render.cancel_pending();
        let pump = self.pump.lock().take();
        if let Some(pump) = pump {
            pump.abort();
        }
        self.ingress.queue.shutdown().await;
        info!("Sync pipeline stopped");
    }
}
