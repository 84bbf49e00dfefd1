//! Storage network - admission, stepwise chunk progress and completion

use super::clock::VirtualClock;
use super::stats::NetworkStats;
use super::NetworkError;
use crate::storage::{
    ChunkError, QuotaCheckResult, QuotaRegistry, StorageNode, Transfer, TransferStatus, User,
};
use crate::SimConfig;

use std::collections::{BTreeMap, HashMap};

/// Orchestration key: (source node id, file id)
pub type TransferKey = (String, String);

/// Bookkeeping for a transfer that is still moving chunks.
/// The transfer itself is owned by the target node.
#[derive(Debug, Clone)]
struct ActiveTransfer {
    target_node: String,
    user_id: String,
    total_size: u64,
    consecutive_failures: u32,
}

/// Result of one [`StorageNetwork::step`] call
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Chunks that landed during this step
    pub chunks_advanced: usize,

    /// The transfer finished in this step
    pub completed: bool,

    /// The transfer reached the failed state in this step
    pub failed: bool,

    /// Virtual seconds spent on this step's chunks
    pub elapsed_secs: f64,

    /// First chunk failure, which ended the step early
    pub error: Option<ChunkError>,
}

impl StepOutcome {
    fn rejected(error: ChunkError) -> Self {
        Self {
            chunks_advanced: 0,
            completed: false,
            failed: false,
            elapsed_secs: 0.0,
            error: Some(error),
        }
    }

    /// `(chunks_advanced, completed)`
    pub fn as_tuple(&self) -> (usize, bool) {
        (self.chunks_advanced, self.completed)
    }
}

/// The simulated storage network
pub struct StorageNetwork {
    nodes: BTreeMap<String, StorageNode>,
    quotas: QuotaRegistry,
    transfers: HashMap<TransferKey, ActiveTransfer>,
    clock: VirtualClock,
    max_consecutive_failures: Option<u32>,
    completed_transfers: u64,
    failed_transfers: u64,
}

impl Default for StorageNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageNetwork {
    /// Empty network. Stuck transfers are retried forever.
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            quotas: QuotaRegistry::new(),
            transfers: HashMap::new(),
            clock: VirtualClock::new(),
            max_consecutive_failures: None,
            completed_transfers: 0,
            failed_transfers: 0,
        }
    }

    /// Mark a transfer failed after `threshold` consecutive failed steps
    pub fn with_failure_threshold(mut self, threshold: Option<u32>) -> Self {
        self.max_consecutive_failures = threshold;
        self
    }

    /// Build nodes, links and users from configuration
    pub fn from_config(config: &SimConfig) -> Result<Self, NetworkError> {
        let mut network = Self::new().with_failure_threshold(config.max_consecutive_failures);

        for node in &config.nodes {
            network.register_node(node.build())?;
        }

        for link in &config.links {
            if !network.connect(&link.a, &link.b, link.bandwidth_mbps) {
                let missing = if network.nodes.contains_key(&link.a) {
                    &link.b
                } else {
                    &link.a
                };
                return Err(NetworkError::UnknownNode(missing.clone()));
            }
        }

        for user in &config.users {
            network.register_user(user.build(config.default_quota_bytes))?;
        }

        Ok(network)
    }

    pub fn register_node(&mut self, node: StorageNode) -> Result<(), NetworkError> {
        if self.nodes.contains_key(node.id()) {
            return Err(NetworkError::DuplicateNode(node.id().to_string()));
        }

        tracing::info!(
            node = node.id(),
            storage_bytes = node.total_storage(),
            bandwidth_bps = node.bandwidth_bps(),
            "Node registered"
        );
        self.nodes.insert(node.id().to_string(), node);
        Ok(())
    }

    pub fn register_user(&mut self, user: User) -> Result<(), NetworkError> {
        let user_id = user.user_id.clone();
        let quota = user.total_quota;
        self.quotas.register(user)?;

        tracing::info!(user = %user_id, quota_bytes = quota, "User registered");
        Ok(())
    }

    /// Link two nodes symmetrically. Returns false if either is unknown.
    pub fn connect(&mut self, node_a: &str, node_b: &str, bandwidth_mbps: u64) -> bool {
        if !self.nodes.contains_key(node_a) || !self.nodes.contains_key(node_b) {
            return false;
        }

        if let Some(a) = self.nodes.get_mut(node_a) {
            a.add_connection(node_b, bandwidth_mbps);
        }
        if let Some(b) = self.nodes.get_mut(node_b) {
            b.add_connection(node_a, bandwidth_mbps);
        }
        true
    }

    /// Sever the link between two nodes. Returns false if there was none.
    pub fn disconnect(&mut self, node_a: &str, node_b: &str) -> bool {
        let mut removed = false;
        if let Some(a) = self.nodes.get_mut(node_a) {
            removed |= a.remove_connection(node_b);
        }
        if let Some(b) = self.nodes.get_mut(node_b) {
            removed |= b.remove_connection(node_a);
        }
        removed
    }

    pub fn node(&self, node_id: &str) -> Option<&StorageNode> {
        self.nodes.get(node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &StorageNode> {
        self.nodes.values()
    }

    pub fn get_user(&self, user_id: &str) -> Option<&User> {
        self.quotas.get(user_id)
    }

    pub fn quotas(&self) -> &QuotaRegistry {
        &self.quotas
    }

    /// Raise a user's quota. Returns the new total.
    pub fn increase_quota(&mut self, user_id: &str, extra_bytes: u64) -> Result<u64, NetworkError> {
        Ok(self.quotas.increase_quota(user_id, extra_bytes)?)
    }

    pub fn clock(&self) -> VirtualClock {
        self.clock
    }

    /// A transfer held by `target_node`, active or stored
    pub fn transfer(&self, target_node: &str, file_id: &str) -> Option<&Transfer> {
        self.nodes.get(target_node)?.transfer(file_id)
    }

    pub fn active_transfer_count(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_active(&self, source_node: &str, file_id: &str) -> bool {
        self.transfers
            .contains_key(&(source_node.to_string(), file_id.to_string()))
    }

    /// Admit a transfer of `file_size` bytes from `source_node` to `target_node`.
    ///
    /// The size is reserved against the user's quota and the target's
    /// capacity; both are settled when the last chunk lands. Returns a
    /// snapshot of the planned transfer.
    pub fn initiate(
        &mut self,
        source_node: &str,
        target_node: &str,
        file_name: &str,
        file_size: u64,
        user_id: &str,
    ) -> Result<Transfer, NetworkError> {
        for node_id in [source_node, target_node] {
            if !self.nodes.contains_key(node_id) {
                tracing::warn!(node = node_id, "Admission rejected: unknown node");
                return Err(NetworkError::UnknownNode(node_id.to_string()));
            }
        }

        if let QuotaCheckResult::InsufficientQuota {
            used,
            reserved,
            total,
            requested,
        } = self.quotas.check(user_id, file_size)?
        {
            tracing::warn!(
                user = user_id,
                used,
                reserved,
                total,
                requested,
                "Admission rejected: quota exceeded"
            );
            return Err(NetworkError::QuotaExceeded {
                user_id: user_id.to_string(),
                requested,
                available: total.saturating_sub(used.saturating_add(reserved)),
            });
        }

        let file_id = generate_file_id(file_name);

        let target = self
            .nodes
            .get_mut(target_node)
            .ok_or_else(|| NetworkError::UnknownNode(target_node.to_string()))?;
        let mut transfer = target.begin_receiving(&file_id, file_name, file_size, user_id)?;

        if transfer.status == TransferStatus::Completed {
            // Nothing to move: settles right away
            let now = self.clock.as_secs();
            if let Some(stored) = target.stored_transfer_mut(&file_id) {
                stored.completed_virtual_secs = Some(now);
            }
            transfer.completed_virtual_secs = Some(now);
            self.completed_transfers += 1;

            tracing::info!(file_id = %file_id, file_name, user = user_id, "Empty file stored");
            return Ok(transfer);
        }

        self.quotas.reserve(user_id, file_size)?;
        if let Some(source) = self.nodes.get_mut(source_node) {
            source.track_outgoing(&file_id);
        }
        self.transfers.insert(
            (source_node.to_string(), file_id.clone()),
            ActiveTransfer {
                target_node: target_node.to_string(),
                user_id: user_id.to_string(),
                total_size: file_size,
                consecutive_failures: 0,
            },
        );

        tracing::info!(
            file_id = %file_id,
            file_name,
            source = source_node,
            target = target_node,
            user = user_id,
            size = file_size,
            chunks = transfer.chunks.len(),
            "Transfer initiated"
        );
        Ok(transfer)
    }

    /// Advance up to `max_chunks` pending chunks of a transfer, in order.
    ///
    /// The first chunk failure ends the step; chunks that already landed
    /// in this step keep their progress and their time. When the last
    /// chunk lands the user's reservation is charged and the transfer
    /// leaves the active table.
    pub fn step(
        &mut self,
        source_node: &str,
        target_node: &str,
        file_id: &str,
        max_chunks: usize,
    ) -> StepOutcome {
        let key = (source_node.to_string(), file_id.to_string());

        let known = self
            .transfers
            .get(&key)
            .is_some_and(|entry| entry.target_node == target_node);
        if !known {
            tracing::warn!(file_id, source = source_node, target = target_node, "Step on unknown transfer");
            return StepOutcome::rejected(ChunkError::UnknownTransfer(file_id.to_string()));
        }

        let Some(target) = self.nodes.get_mut(target_node) else {
            return StepOutcome::rejected(ChunkError::UnknownTransfer(file_id.to_string()));
        };

        let mut outcome = StepOutcome {
            chunks_advanced: 0,
            completed: false,
            failed: false,
            elapsed_secs: 0.0,
            error: None,
        };

        for index in target.next_pending_chunks(file_id, max_chunks) {
            match target.advance_chunk(file_id, index, source_node) {
                Ok(advance) => {
                    outcome.chunks_advanced += 1;
                    outcome.elapsed_secs += advance.elapsed_secs;
                }
                Err(e) => {
                    outcome.error = Some(e);
                    break;
                }
            }
        }

        let finished = !target.is_receiving(file_id) && target.is_stored(file_id);
        self.clock.advance(outcome.elapsed_secs);

        tracing::debug!(
            file_id,
            chunks = outcome.chunks_advanced,
            elapsed_secs = outcome.elapsed_secs,
            clock_secs = self.clock.as_secs(),
            "Step processed"
        );

        if finished {
            self.finish(&key);
            outcome.completed = true;
            return outcome;
        }

        if outcome.error.is_some() && outcome.chunks_advanced == 0 {
            let threshold = self.max_consecutive_failures;
            let exhausted = match self.transfers.get_mut(&key) {
                Some(entry) => {
                    entry.consecutive_failures += 1;
                    threshold.is_some_and(|limit| entry.consecutive_failures >= limit)
                }
                None => false,
            };
            if exhausted {
                self.fail(&key);
                outcome.failed = true;
            }
        } else if outcome.chunks_advanced > 0 {
            if let Some(entry) = self.transfers.get_mut(&key) {
                entry.consecutive_failures = 0;
            }
        }

        outcome
    }

    /// Stop a transfer for good, releasing its reservations and any bytes
    /// that already arrived. Returns the failed transfer.
    pub fn abort(&mut self, source_node: &str, file_id: &str) -> Result<Transfer, NetworkError> {
        let key = (source_node.to_string(), file_id.to_string());
        self.fail(&key).ok_or_else(|| NetworkError::UnknownTransfer {
            source_node: source_node.to_string(),
            file_id: file_id.to_string(),
        })
    }

    /// Point-in-time aggregate over all nodes and active transfers
    pub fn statistics(&self) -> NetworkStats {
        NetworkStats::collect(
            self.nodes.values(),
            self.quotas.user_count(),
            self.transfers.len(),
            self.completed_transfers,
            self.failed_transfers,
            self.clock,
        )
    }

    fn finish(&mut self, key: &TransferKey) {
        let Some(entry) = self.transfers.remove(key) else {
            return;
        };
        let (source_node, file_id) = key;

        if let Some(source) = self.nodes.get_mut(source_node) {
            source.untrack_outgoing(file_id);
        }
        if let Err(e) = self.quotas.commit(&entry.user_id, entry.total_size) {
            tracing::warn!(file_id = %file_id, error = %e, "Quota commit failed");
        }

        let now = self.clock.as_secs();
        if let Some(transfer) = self
            .nodes
            .get_mut(&entry.target_node)
            .and_then(|target| target.stored_transfer_mut(file_id))
        {
            transfer.completed_virtual_secs = Some(now);
        }
        self.completed_transfers += 1;

        tracing::info!(
            file_id = %file_id,
            user = %entry.user_id,
            size = entry.total_size,
            clock_secs = now,
            "Transfer completed"
        );
    }

    fn fail(&mut self, key: &TransferKey) -> Option<Transfer> {
        let entry = self.transfers.remove(key)?;
        let (source_node, file_id) = key;

        if let Some(source) = self.nodes.get_mut(source_node) {
            source.untrack_outgoing(file_id);
        }
        if let Err(e) = self.quotas.release(&entry.user_id, entry.total_size) {
            tracing::warn!(file_id = %file_id, error = %e, "Quota release failed");
        }
        let transfer = self
            .nodes
            .get_mut(&entry.target_node)
            .and_then(|target| target.abandon(file_id));
        self.failed_transfers += 1;

        tracing::info!(
            file_id = %file_id,
            user = %entry.user_id,
            failed_steps = entry.consecutive_failures,
            "Transfer failed"
        );
        transfer
    }
}

/// File id from the name and a time-ordered UUID, 32 hex chars
fn generate_file_id(file_name: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(file_name.as_bytes());
    hasher.update(uuid::Uuid::now_v7().as_bytes());
    hex::encode(&hasher.finalize().as_bytes()[..16])
}
