//! Storage node - capacity accounting and per-chunk transfer timing

use super::chunking::{ChunkStatus, GIB};
use super::transfer::{Transfer, TransferStatus};
use super::{ChunkError, StorageError};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

const BITS_PER_MEGABIT: u64 = 1_000_000;

/// Convert megabits/second to bits/second
pub fn mbps_to_bps(mbps: u64) -> u64 {
    mbps.saturating_mul(BITS_PER_MEGABIT)
}

/// Static capacity of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCapacity {
    /// vCPUs (informational)
    pub cpu_cores: u32,

    /// Memory in GB (informational)
    pub memory_gb: u32,

    /// Total storage in bytes
    pub storage_bytes: u64,

    /// Maximum bandwidth in Mbps
    pub bandwidth_mbps: u64,
}

impl NodeCapacity {
    /// Capacity with storage expressed in GB
    pub fn new(cpu_cores: u32, memory_gb: u32, storage_gb: u64, bandwidth_mbps: u64) -> Self {
        Self {
            cpu_cores,
            memory_gb,
            storage_bytes: storage_gb.saturating_mul(GIB),
            bandwidth_mbps,
        }
    }

    pub fn with_storage_bytes(mut self, bytes: u64) -> Self {
        self.storage_bytes = bytes;
        self
    }
}

/// Result of a successfully advanced chunk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkAdvance {
    pub index: usize,
    pub size: u64,

    /// Simulated seconds the chunk spent on the link
    pub elapsed_secs: f64,

    /// This chunk was the last pending one of its transfer
    pub transfer_completed: bool,
}

/// Storage utilization of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStorageStats {
    pub used_bytes: u64,
    pub reserved_bytes: u64,
    pub total_bytes: u64,
    pub utilization_percent: f64,
    pub files_stored: usize,
    pub receiving_transfers: usize,
    pub sending_transfers: usize,
}

/// Bandwidth utilization of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeBandwidthStats {
    pub current_bps: u64,
    pub max_bps: u64,
    pub utilization_percent: f64,
    pub connections: Vec<String>,
}

/// Cumulative counters of one node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodePerformance {
    /// Every advance attempt, successful or not
    pub chunk_requests: u64,
    pub chunks_processed: u64,
    pub bytes_transferred: u64,
    pub failed_chunks: u64,
}

/// A virtual storage node
pub struct StorageNode {
    node_id: String,
    capacity: NodeCapacity,

    /// Bytes that have arrived
    used_storage: u64,

    /// Bytes admitted but not yet arrived
    reserved_storage: u64,

    /// Bits/second of the node's own interface
    bandwidth_bps: u64,

    /// Load during a chunk event; always back at zero between events
    current_bandwidth_bps: u64,

    /// Peer node id -> link bandwidth (bits/second)
    connections: BTreeMap<String, u64>,

    /// Transfers this node is receiving chunks for
    receiving: HashMap<String, Transfer>,

    /// Fully stored transfers
    stored: HashMap<String, Transfer>,

    /// Transfers this node is the source of
    sending: HashSet<String>,

    performance: NodePerformance,
}

impl StorageNode {
    pub fn new(node_id: impl Into<String>, capacity: NodeCapacity) -> Self {
        Self {
            node_id: node_id.into(),
            capacity,
            used_storage: 0,
            reserved_storage: 0,
            bandwidth_bps: mbps_to_bps(capacity.bandwidth_mbps),
            current_bandwidth_bps: 0,
            connections: BTreeMap::new(),
            receiving: HashMap::new(),
            stored: HashMap::new(),
            sending: HashSet::new(),
            performance: NodePerformance::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.node_id
    }

    pub fn capacity(&self) -> &NodeCapacity {
        &self.capacity
    }

    pub fn total_storage(&self) -> u64 {
        self.capacity.storage_bytes
    }

    pub fn used_storage(&self) -> u64 {
        self.used_storage
    }

    pub fn reserved_storage(&self) -> u64 {
        self.reserved_storage
    }

    /// Bytes that can still be admitted
    pub fn available_storage(&self) -> u64 {
        self.total_storage()
            .saturating_sub(self.used_storage.saturating_add(self.reserved_storage))
    }

    pub fn bandwidth_bps(&self) -> u64 {
        self.bandwidth_bps
    }

    pub fn current_bandwidth_bps(&self) -> u64 {
        self.current_bandwidth_bps
    }

    /// Set the link bandwidth to `peer_id`. Repeated calls overwrite.
    pub fn add_connection(&mut self, peer_id: &str, bandwidth_mbps: u64) {
        self.connections
            .insert(peer_id.to_string(), mbps_to_bps(bandwidth_mbps));
    }

    pub fn remove_connection(&mut self, peer_id: &str) -> bool {
        self.connections.remove(peer_id).is_some()
    }

    /// Link bandwidth to `peer_id` in bits/second
    pub fn link_bandwidth(&self, peer_id: &str) -> Option<u64> {
        self.connections.get(peer_id).copied()
    }

    /// Admit a transfer addressed to this node.
    ///
    /// The full file size is reserved against capacity here; chunks move
    /// their bytes from reserved to used as they arrive. A zero-byte file
    /// is stored immediately.
    pub fn begin_receiving(
        &mut self,
        file_id: &str,
        file_name: &str,
        file_size: u64,
        user_id: &str,
    ) -> Result<Transfer, StorageError> {
        if self.receiving.contains_key(file_id) || self.stored.contains_key(file_id) {
            return Err(StorageError::DuplicateTransfer(file_id.to_string()));
        }

        let available = self.available_storage();
        if file_size > available {
            tracing::warn!(
                node = %self.node_id,
                file_id,
                requested = file_size,
                available,
                "Node storage full"
            );
            return Err(StorageError::CapacityExceeded {
                node_id: self.node_id.clone(),
                requested: file_size,
                available,
            });
        }

        let mut transfer = Transfer::new(
            file_id.to_string(),
            file_name.to_string(),
            file_size,
            user_id.to_string(),
        );

        if transfer.chunks.is_empty() {
            transfer.mark_completed();
            self.stored.insert(file_id.to_string(), transfer.clone());
        } else {
            self.reserved_storage += file_size;
            self.receiving.insert(file_id.to_string(), transfer.clone());
        }

        Ok(transfer)
    }

    /// Simulate the arrival of one chunk from `source_node_id`.
    ///
    /// Failures bump the failure counter and leave everything else as it was.
    pub fn advance_chunk(
        &mut self,
        file_id: &str,
        chunk_index: usize,
        source_node_id: &str,
    ) -> Result<ChunkAdvance, ChunkError> {
        self.performance.chunk_requests += 1;

        let result = self.try_advance_chunk(file_id, chunk_index, source_node_id);
        if let Err(e) = &result {
            self.performance.failed_chunks += 1;
            tracing::warn!(node = %self.node_id, file_id, chunk_index, error = %e, "Chunk failed");
        }
        result
    }

    fn try_advance_chunk(
        &mut self,
        file_id: &str,
        chunk_index: usize,
        source_node_id: &str,
    ) -> Result<ChunkAdvance, ChunkError> {
        let transfer = self
            .receiving
            .get_mut(file_id)
            .ok_or_else(|| ChunkError::UnknownTransfer(file_id.to_string()))?;

        let chunk = transfer
            .chunks
            .get_mut(chunk_index)
            .ok_or_else(|| ChunkError::UnknownChunk {
                file_id: file_id.to_string(),
                index: chunk_index,
            })?;

        if chunk.is_completed() {
            return Err(ChunkError::AlreadyCompleted {
                file_id: file_id.to_string(),
                index: chunk_index,
            });
        }

        let bandwidth = self
            .connections
            .get(source_node_id)
            .copied()
            .ok_or_else(|| ChunkError::NoBandwidthRoute(source_node_id.to_string()))?;

        if bandwidth == 0 {
            return Err(ChunkError::ZeroBandwidth(source_node_id.to_string()));
        }

        let elapsed_secs = (chunk.size * 8) as f64 / bandwidth as f64;
        self.current_bandwidth_bps = bandwidth;

        chunk.status = ChunkStatus::Completed;
        chunk.stored_node = Some(self.node_id.clone());
        let size = chunk.size;

        if transfer.status == TransferStatus::Pending {
            transfer.status = TransferStatus::InProgress;
        }

        self.reserved_storage = self.reserved_storage.saturating_sub(size);
        self.used_storage += size;
        self.performance.bytes_transferred += size;
        self.performance.chunks_processed += 1;

        let transfer_completed = transfer.all_chunks_completed();
        if transfer_completed {
            transfer.mark_completed();
            if let Some(done) = self.receiving.remove(file_id) {
                self.stored.insert(file_id.to_string(), done);
            }
        }

        self.current_bandwidth_bps = 0;

        Ok(ChunkAdvance {
            index: chunk_index,
            size,
            elapsed_secs,
            transfer_completed,
        })
    }

    /// Drop an unfinished transfer and give back everything it held:
    /// the outstanding reservation and the bytes that already arrived.
    pub fn abandon(&mut self, file_id: &str) -> Option<Transfer> {
        let mut transfer = self.receiving.remove(file_id)?;

        self.reserved_storage = self.reserved_storage.saturating_sub(transfer.bytes_pending());
        self.used_storage = self.used_storage.saturating_sub(transfer.bytes_completed());
        transfer.status = TransferStatus::Failed;

        tracing::info!(
            node = %self.node_id,
            file_id,
            released_bytes = transfer.total_size,
            "Transfer abandoned"
        );
        Some(transfer)
    }

    /// Look up a transfer, whether still receiving or already stored
    pub fn transfer(&self, file_id: &str) -> Option<&Transfer> {
        self.receiving
            .get(file_id)
            .or_else(|| self.stored.get(file_id))
    }

    pub(crate) fn stored_transfer_mut(&mut self, file_id: &str) -> Option<&mut Transfer> {
        self.stored.get_mut(file_id)
    }

    /// Pending chunk indices of a receiving transfer, in planned order
    pub fn next_pending_chunks(&self, file_id: &str, limit: usize) -> Vec<usize> {
        self.receiving
            .get(file_id)
            .map(|t| t.next_pending(limit))
            .unwrap_or_default()
    }

    pub fn is_receiving(&self, file_id: &str) -> bool {
        self.receiving.contains_key(file_id)
    }

    pub fn is_stored(&self, file_id: &str) -> bool {
        self.stored.contains_key(file_id)
    }

    pub(crate) fn track_outgoing(&mut self, file_id: &str) {
        self.sending.insert(file_id.to_string());
    }

    pub(crate) fn untrack_outgoing(&mut self, file_id: &str) -> bool {
        self.sending.remove(file_id)
    }

    pub fn is_sending(&self, file_id: &str) -> bool {
        self.sending.contains(file_id)
    }

    /// Bytes stored on this node for one user
    pub fn user_storage(&self, user_id: &str) -> u64 {
        self.stored
            .values()
            .filter(|t| t.user_id == user_id)
            .map(|t| t.total_size)
            .sum()
    }

    pub fn storage_stats(&self) -> NodeStorageStats {
        let total = self.total_storage();
        NodeStorageStats {
            used_bytes: self.used_storage,
            reserved_bytes: self.reserved_storage,
            total_bytes: total,
            utilization_percent: percent(self.used_storage, total),
            files_stored: self.stored.len(),
            receiving_transfers: self.receiving.len(),
            sending_transfers: self.sending.len(),
        }
    }

    pub fn bandwidth_stats(&self) -> NodeBandwidthStats {
        NodeBandwidthStats {
            current_bps: self.current_bandwidth_bps,
            max_bps: self.bandwidth_bps,
            utilization_percent: percent(self.current_bandwidth_bps, self.bandwidth_bps),
            connections: self.connections.keys().cloned().collect(),
        }
    }

    pub fn performance(&self) -> NodePerformance {
        self.performance
    }
}

/// `part / whole` as a percentage, 0 when `whole` is 0
pub(crate) fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}
