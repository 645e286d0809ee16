//! Message identity and deduplication.
//!
//! Identities are claimed when a message is enqueued and pinned until the
//! dispatch worker dequeues it, so eviction can never forget a message that
//! is still in flight. Messages that end up not being applied (stale
//! generation, failed validation) are forgotten so that a resend can land.

use csync_core::{InboundMessage, Payload, Resolution};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use tracing::{debug, trace};

/// Deduplication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Maximum number of remembered identities before eviction.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Tolerance of the historical range fingerprint.
    #[serde(default = "default_range_tolerance_secs")]
    pub range_tolerance_secs: i64,
    /// Cap the tolerance at half a bar so that adjacent pages on fine
    /// resolutions are never mistaken for each other.
    #[serde(default = "default_scale_tolerance")]
    pub scale_tolerance_with_resolution: bool,
}

fn default_capacity() -> usize {
    10_000
}

fn default_range_tolerance_secs() -> i64 {
    60
}

fn default_scale_tolerance() -> bool {
    true
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            range_tolerance_secs: default_range_tolerance_secs(),
            scale_tolerance_with_resolution: default_scale_tolerance(),
        }
    }
}

impl DedupConfig {
    /// Fingerprint tolerance in seconds for `resolution`.
    pub fn tolerance_for(&self, resolution: Resolution) -> i64 {
        if self.scale_tolerance_with_resolution {
            self.range_tolerance_secs
                .min(resolution.duration_secs() / 2)
        } else {
            self.range_tolerance_secs
        }
    }
}

/// Stable identity of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageIdentity(String);

impl MessageIdentity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the identity of `msg`.
///
/// - live: `live:SYM:price:time`
/// - historical: `historical:SYM:first:last` over bars with a valid close
/// - history update: `history_update:SYM:<payload hash>`, since an update
///   may resend a range with corrected values
/// - auxiliary: `drawings:SYM:<16 hex digits of the payload hash>`
pub fn identify(msg: &InboundMessage) -> MessageIdentity {
    let kind = msg.kind();
    let id = match &msg.payload {
        Payload::Live(tick) => {
            format!("{kind}:{}:{}:{}", msg.symbol, tick.price.normalized(), tick.time)
        }
        Payload::Historical(batch) => match batch.valid_span() {
            Some((first, last)) => format!("{kind}:{}:{first}:{last}", msg.symbol),
            None => format!("{kind}:{}:empty", msg.symbol),
        },
        Payload::HistoryUpdate(batch) => {
            let points = serde_json::to_value(&batch.points).unwrap_or_default();
            format!("{kind}:{}:{}", msg.symbol, structural_hash(&points))
        }
        Payload::Auxiliary(aux) => {
            format!("{kind}:{}:{}", msg.symbol, structural_hash(&aux.data))
        }
    };
    MessageIdentity(id)
}

/// First 16 hex digits of a 64-bit hash over the canonical JSON text.
fn structural_hash(value: &serde_json::Value) -> String {
    let mut hasher = DefaultHasher::new();
    value.to_string().hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Bounded FIFO set of identities with pinning.
#[derive(Debug)]
pub struct SeenIdentitySet {
    capacity: usize,
    order: VecDeque<MessageIdentity>,
    members: HashSet<MessageIdentity>,
    /// In-flight identities and their outstanding reference count.
    pinned: HashMap<MessageIdentity, usize>,
}

impl SeenIdentitySet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            members: HashSet::new(),
            pinned: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: &MessageIdentity) -> bool {
        self.members.contains(id)
    }

    /// Insert `id`; returns false when it was already present.
    pub fn insert(&mut self, id: MessageIdentity) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        if self.members.len() > self.capacity {
            self.evict_oldest_half();
        }
        true
    }

    pub fn pin(&mut self, id: &MessageIdentity) {
        *self.pinned.entry(id.clone()).or_insert(0) += 1;
    }

    pub fn unpin(&mut self, id: &MessageIdentity) {
        if let Some(count) = self.pinned.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                self.pinned.remove(id);
            }
        }
    }

    pub fn is_pinned(&self, id: &MessageIdentity) -> bool {
        self.pinned.contains_key(id)
    }

    /// Drop `id` from the set regardless of its age.
    pub fn remove(&mut self, id: &MessageIdentity) -> bool {
        if !self.members.remove(id) {
            return false;
        }
        self.order.retain(|other| other != id);
        true
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
        self.pinned.clear();
    }

    /// One pass over the oldest half; pinned identities go back to the tail.
    fn evict_oldest_half(&mut self) {
        let batch = self.order.len() / 2;
        let mut evicted = 0usize;
        for _ in 0..batch {
            let Some(id) = self.order.pop_front() else {
                break;
            };
            if self.pinned.contains_key(&id) {
                self.order.push_back(id);
            } else {
                self.members.remove(&id);
                evicted += 1;
            }
        }
        trace!(evicted, retained = self.members.len(), "Identity set evicted");
    }
}

/// Last applied historical range, for the coarse fingerprint check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AppliedRange {
    first: i64,
    last: i64,
}

/// A claimed identity, valid for the dedup epoch it was claimed in.
///
/// `reset` starts a new epoch; releasing or forgetting a claim from an
/// earlier epoch is a no-op, so a late message of a retired session cannot
/// disturb the identities of the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub identity: MessageIdentity,
    epoch: u64,
}

#[derive(Debug)]
struct DedupState {
    seen: SeenIdentitySet,
    epoch: u64,
    applied_range: Option<AppliedRange>,
}

/// Thread-safe deduplicator shared by the enqueue path and the worker.
#[derive(Debug)]
pub struct Deduplicator {
    config: DedupConfig,
    state: Mutex<DedupState>,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        let seen = SeenIdentitySet::new(config.capacity);
        Self {
            config,
            state: Mutex::new(DedupState {
                seen,
                epoch: 0,
                applied_range: None,
            }),
        }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn identify(&self, msg: &InboundMessage) -> MessageIdentity {
        identify(msg)
    }

    pub fn is_duplicate(&self, id: &MessageIdentity) -> bool {
        self.state.lock().seen.contains(id)
    }

    pub fn mark_seen(&self, id: MessageIdentity) {
        self.state.lock().seen.insert(id);
    }

    /// Atomically check, mark and pin. Returns `None` for a duplicate.
    pub fn claim(&self, id: MessageIdentity) -> Option<Claim> {
        let mut state = self.state.lock();
        if !state.seen.insert(id.clone()) {
            debug!(identity = %id, "Duplicate skipped");
            return None;
        }
        state.seen.pin(&id);
        Some(Claim {
            identity: id,
            epoch: state.epoch,
        })
    }

    /// Unpin after dequeue; the identity stays seen.
    pub fn release(&self, claim: &Claim) {
        let mut state = self.state.lock();
        if state.epoch == claim.epoch {
            state.seen.unpin(&claim.identity);
        }
    }

    /// Forget a claimed identity whose message was not applied, so that a
    /// resend can be.
    pub fn forget(&self, claim: &Claim) {
        let mut state = self.state.lock();
        if state.epoch == claim.epoch {
            state.seen.unpin(&claim.identity);
            state.seen.remove(&claim.identity);
        }
    }

    /// True when `[first, last]` is within tolerance of the last applied
    /// historical range.
    pub fn matches_applied_range(&self, span: (i64, i64), resolution: Resolution) -> bool {
        let tolerance = self.config.tolerance_for(resolution);
        match self.state.lock().applied_range {
            Some(applied) => {
                (span.0 - applied.first).abs() <= tolerance
                    && (span.1 - applied.last).abs() <= tolerance
            }
            None => false,
        }
    }

    /// Remember the range of an applied historical batch.
    pub fn record_applied_range(&self, claim: &Claim, span: (i64, i64)) {
        let mut state = self.state.lock();
        if state.epoch == claim.epoch {
            state.applied_range = Some(AppliedRange {
                first: span.0,
                last: span.1,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().seen.is_empty()
    }

    /// Forget everything and start a new epoch (new session identity).
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.seen.clear();
        state.applied_range = None;
        state.epoch += 1;
        trace!(epoch = state.epoch, "Deduplicator reset");
    }
}
