//! Storage Module - Simulated storage nodes, chunk planning and user quotas
//!
//! Nothing here touches real disks or sockets. Nodes account for capacity
//! numerically and derive chunk transfer times from link bandwidth.

pub mod chunking;
mod node;
mod quota;
mod transfer;

pub use chunking::{chunk_size_for, plan_chunks, Chunk, ChunkFingerprint, ChunkStatus};
pub(crate) use node::percent;
pub use node::{
    mbps_to_bps, ChunkAdvance, NodeBandwidthStats, NodeCapacity, NodePerformance,
    NodeStorageStats, StorageNode,
};
pub use quota::{QuotaCheckResult, QuotaRegistry, QuotaSummary, User};
pub use transfer::{Transfer, TransferStatus};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Node {node_id} storage full: requested {requested} bytes, {available} available")]
    CapacityExceeded {
        node_id: String,
        requested: u64,
        available: u64,
    },

    #[error("Transfer already registered: {0}")]
    DuplicateTransfer(String),
}

/// Reasons a single chunk could not be advanced.
///
/// All of these are transient: the transfer and storage counters are left
/// untouched, and the same chunk can be retried later.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    #[error("Unknown transfer: {0}")]
    UnknownTransfer(String),

    #[error("Unknown chunk {index} in transfer {file_id}")]
    UnknownChunk { file_id: String, index: usize },

    #[error("Chunk {index} in transfer {file_id} already completed")]
    AlreadyCompleted { file_id: String, index: usize },

    #[error("No bandwidth route from {0}")]
    NoBandwidthRoute(String),

    #[error("Zero bandwidth on link from {0}")]
    ZeroBandwidth(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuotaError {
    #[error("User already registered: {0}")]
    UserExists(String),

    #[error("Unknown user: {0}")]
    UnknownUser(String),
}
