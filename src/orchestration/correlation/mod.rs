//! In-flight aggregation state, keyed by correlation id.
//!
//! Each broadcast registers one aggregation expecting a reply from every
//! node. Replies are accumulated as they arrive; the batch delivered to the
//! waiting dispatcher is always ordered by node id.
//!
//! An aggregation ends exactly once: completed (every expected node replied),
//! timed out (deadline elapsed), or abandoned (cancelled by its owner). The
//! decision is made under the registry lock, so a handle never observes more
//! than one of these.
//!
//! Expiry happens three ways: the waiting handle expires its own entry when
//! its deadline fires, `record_reply` expires an overdue entry it touches,
//! and `spawn_sweeper` periodically evicts anything left behind.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::ledger::NodeId;

/// Result type for aggregation.
pub type Result<T> = std::result::Result<T, AggregationError>;

/// Errors that end an aggregation without a complete batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregationError {
    /// Fewer than the expected number of replies arrived before the deadline.
    #[error("Aggregation {correlation_id} timed out with {received}/{expected} replies")]
    Timeout {
        correlation_id: String,
        received: usize,
        expected: usize,
    },

    /// The owner cancelled the aggregation.
    #[error("Aggregation {correlation_id} abandoned")]
    Abandoned { correlation_id: String },

    #[error("Correlation id {0} is already registered")]
    DuplicateCorrelation(String),
}

/// One node's reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReply {
    pub node_id: NodeId,
    pub payload: Vec<u8>,
}

/// Effect of recording a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Reply accepted; more are expected.
    Pending { received: usize, expected: usize },
    /// Reply accepted and the batch is complete, ordered by node id.
    Completed(Vec<NodeReply>),
    /// No live aggregation accepted the reply (unknown, expired, unexpected
    /// node, or duplicate). The ledger still holds it.
    Ignored,
}

/// What an aggregation waits for.
#[derive(Debug, Clone)]
pub struct AggregationSpec {
    correlation_id: String,
    expected: BTreeSet<NodeId>,
    deadline: Duration,
    seeded: BTreeMap<NodeId, Vec<u8>>,
    joins: Vec<(NodeId, String)>,
}

impl AggregationSpec {
    pub fn new(
        correlation_id: impl Into<String>,
        expected: impl IntoIterator<Item = NodeId>,
        deadline: Duration,
    ) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            expected: expected.into_iter().collect(),
            deadline,
            seeded: BTreeMap::new(),
            joins: Vec::new(),
        }
    }

    /// Pre-seed a reply that is already known (reused from the ledger).
    pub fn with_reply(mut self, node_id: NodeId, payload: Vec<u8>) -> Self {
        self.seeded.insert(node_id, payload);
        self
    }

    /// Accept replies for `node_id` recorded under an earlier, still pending
    /// broadcast's correlation id.
    pub fn with_join(mut self, node_id: NodeId, correlation_id: impl Into<String>) -> Self {
        self.joins.push((node_id, correlation_id.into()));
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Whether the seeded replies already cover every expected node.
    pub fn is_satisfied(&self) -> bool {
        self.expected.iter().all(|n| self.seeded.contains_key(n))
    }
}

struct PendingAggregation {
    expected: BTreeSet<NodeId>,
    replies: BTreeMap<NodeId, Vec<u8>>,
    deadline: Instant,
    joined: Vec<(String, NodeId)>,
    sender: oneshot::Sender<Result<Vec<NodeReply>>>,
}

impl PendingAggregation {
    fn is_complete(&self) -> bool {
        self.replies.len() == self.expected.len()
    }
}

fn ordered(replies: BTreeMap<NodeId, Vec<u8>>) -> Vec<NodeReply> {
    replies
        .into_iter()
        .map(|(node_id, payload)| NodeReply { node_id, payload })
        .collect()
}

#[derive(Default)]
struct RegistryState {
    pending: HashMap<String, PendingAggregation>,
    /// (earlier correlation id, node) -> aggregations that joined it.
    joins: HashMap<(String, NodeId), Vec<String>>,
}

impl RegistryState {
    /// Remove an aggregation together with its join registrations.
    fn take(&mut self, correlation_id: &str) -> Option<PendingAggregation> {
        let entry = self.pending.remove(correlation_id)?;
        for source in &entry.joined {
            if let Some(targets) = self.joins.get_mut(source) {
                targets.retain(|t| t != correlation_id);
                if targets.is_empty() {
                    self.joins.remove(source);
                }
            }
        }
        Some(entry)
    }

    fn expire(&mut self, correlation_id: &str) -> bool {
        let Some(entry) = self.take(correlation_id) else {
            return false;
        };
        let received = entry.replies.len();
        let expected = entry.expected.len();
        warn!(
            correlation_id = %correlation_id,
            received,
            expected,
            "Aggregation timed out"
        );
        let _ = entry.sender.send(Err(AggregationError::Timeout {
            correlation_id: correlation_id.to_string(),
            received,
            expected,
        }));
        true
    }

    fn apply(&mut self, correlation_id: &str, node_id: NodeId, payload: &[u8], now: Instant) -> RecordOutcome {
        let Some(entry) = self.pending.get_mut(correlation_id) else {
            debug!(correlation_id = %correlation_id, node_id, "Reply for unknown aggregation");
            return RecordOutcome::Ignored;
        };

        if entry.deadline <= now {
            self.expire(correlation_id);
            return RecordOutcome::Ignored;
        }

        if !entry.expected.contains(&node_id) {
            warn!(correlation_id = %correlation_id, node_id, "Reply from unexpected node");
            return RecordOutcome::Ignored;
        }

        if entry.replies.contains_key(&node_id) {
            debug!(correlation_id = %correlation_id, node_id, "Duplicate reply ignored");
            return RecordOutcome::Ignored;
        }

        entry.replies.insert(node_id, payload.to_vec());
        if !entry.is_complete() {
            return RecordOutcome::Pending {
                received: entry.replies.len(),
                expected: entry.expected.len(),
            };
        }

        // Complete: remove under the same lock that decides expiry.
        let Some(entry) = self.take(correlation_id) else {
            return RecordOutcome::Ignored;
        };
        let replies = ordered(entry.replies);
        info!(
            correlation_id = %correlation_id,
            replies = replies.len(),
            "Aggregation completed"
        );
        let _ = entry.sender.send(Ok(replies.clone()));
        RecordOutcome::Completed(replies)
    }
}

/// Concurrent map of in-flight aggregations.
///
/// Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct CorrelationRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an aggregation and return the handle its owner awaits.
    ///
    /// Fails with `DuplicateCorrelation` while `spec`'s correlation id is
    /// pending. Otherwise completes immediately when the seeded replies
    /// already cover every expected node.
    pub async fn register(&self, spec: AggregationSpec) -> Result<AggregationHandle> {
        let (sender, receiver) = oneshot::channel();
        let deadline = Instant::now() + spec.deadline;
        let correlation_id = spec.correlation_id.clone();

        let handle = AggregationHandle {
            correlation_id: correlation_id.clone(),
            deadline,
            receiver,
            registry: self.clone(),
        };

        let mut state = self.state.lock().await;
        if state.pending.contains_key(&correlation_id) {
            return Err(AggregationError::DuplicateCorrelation(correlation_id));
        }

        if spec.is_satisfied() {
            let replies: BTreeMap<NodeId, Vec<u8>> = spec
                .seeded
                .into_iter()
                .filter(|(node_id, _)| spec.expected.contains(node_id))
                .collect();
            debug!(correlation_id = %correlation_id, "Aggregation satisfied at registration");
            let _ = sender.send(Ok(ordered(replies)));
            return Ok(handle);
        }

        let joined: Vec<(String, NodeId)> = spec
            .joins
            .into_iter()
            .filter(|(node_id, _)| spec.expected.contains(node_id))
            .map(|(node_id, source)| (source, node_id))
            .collect();
        for source in &joined {
            state
                .joins
                .entry(source.clone())
                .or_default()
                .push(correlation_id.clone());
        }

        let replies: BTreeMap<NodeId, Vec<u8>> = spec
            .seeded
            .into_iter()
            .filter(|(node_id, _)| spec.expected.contains(node_id))
            .collect();

        debug!(
            correlation_id = %correlation_id,
            expected = spec.expected.len(),
            seeded = replies.len(),
            joined = joined.len(),
            "Aggregation registered"
        );

        state.pending.insert(
            correlation_id,
            PendingAggregation {
                expected: spec.expected,
                replies,
                deadline,
                joined,
                sender,
            },
        );

        Ok(handle)
    }

    /// Record one node's reply to a broadcast.
    ///
    /// Aggregations that joined this broadcast for that node receive the
    /// reply too. The returned outcome is the effect on `correlation_id`'s
    /// own aggregation.
    pub async fn record_reply(
        &self,
        correlation_id: &str,
        node_id: NodeId,
        payload: &[u8],
    ) -> RecordOutcome {
        let now = Instant::now();
        let mut state = self.state.lock().await;

        let joined = state
            .joins
            .get(&(correlation_id.to_string(), node_id))
            .cloned()
            .unwrap_or_default();
        for target in joined {
            let outcome = state.apply(&target, node_id, payload, now);
            debug!(
                correlation_id = %correlation_id,
                joined_correlation_id = %target,
                node_id,
                ?outcome,
                "Forwarded reply to joined aggregation"
            );
        }

        state.apply(correlation_id, node_id, payload, now)
    }

    /// Resolve an aggregation as timed out. Returns whether it was pending.
    pub async fn expire(&self, correlation_id: &str) -> bool {
        self.state.lock().await.expire(correlation_id)
    }

    /// Drop an aggregation, resolving its handle as abandoned.
    pub async fn cancel(&self, correlation_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.take(correlation_id) else {
            return false;
        };
        info!(correlation_id = %correlation_id, "Aggregation abandoned");
        let _ = entry.sender.send(Err(AggregationError::Abandoned {
            correlation_id: correlation_id.to_string(),
        }));
        true
    }

    /// Expire every aggregation whose deadline has elapsed.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let overdue: Vec<String> = state
            .pending
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        overdue.iter().filter(|id| state.expire(id)).count()
    }

    /// Periodically evict expired aggregations until the task is aborted.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            info!(interval = ?every, "Starting aggregation sweeper");
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = registry.evict_expired().await;
                if evicted > 0 {
                    debug!(evicted, "Evicted expired aggregations");
                }
            }
        })
    }

    /// Number of pending aggregations.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_pending(&self, correlation_id: &str) -> bool {
        self.state.lock().await.pending.contains_key(correlation_id)
    }
}

/// The waiting side of one aggregation.
pub struct AggregationHandle {
    correlation_id: String,
    deadline: Instant,
    receiver: oneshot::Receiver<Result<Vec<NodeReply>>>,
    registry: CorrelationRegistry,
}

impl AggregationHandle {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Wait for the ordered batch, or the aggregation's end.
    ///
    /// When the deadline fires first the entry is expired; a completion that
    /// won the race under the registry lock is still delivered.
    pub async fn wait(self) -> Result<Vec<NodeReply>> {
        let Self {
            correlation_id,
            deadline,
            mut receiver,
            registry,
        } = self;

        match timeout_at(deadline, &mut receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AggregationError::Abandoned { correlation_id }),
            Err(_) => {
                registry.expire(&correlation_id).await;
                match receiver.try_recv() {
                    Ok(result) => result,
                    Err(_) => Err(AggregationError::Abandoned { correlation_id }),
                }
            }
        }
    }
}
