//! Network Module - Orchestration of transfers across storage nodes
//!
//! Owns the node registry, the user quotas, the table of active transfers
//! and the virtual clock. [`NetworkHandle`] wraps a network for shared use
//! by concurrent request handlers.

mod clock;
mod service;
mod simulator;
mod stats;

pub use clock::VirtualClock;
pub use service::{NetworkHandle, UploadReport, UploadRequest};
pub use simulator::{StepOutcome, StorageNetwork, TransferKey};
pub use stats::NetworkStats;

use crate::storage::{QuotaError, StorageError};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Unknown user: {0}")]
    UnknownUser(String),

    #[error("Quota exceeded for {user_id}: requested {requested} bytes, {available} available")]
    QuotaExceeded {
        user_id: String,
        requested: u64,
        available: u64,
    },

    #[error("Node {node_id} storage full: requested {requested} bytes, {available} available")]
    NodeStorageFull {
        node_id: String,
        requested: u64,
        available: u64,
    },

    #[error("Node already registered: {0}")]
    DuplicateNode(String),

    #[error("User already registered: {0}")]
    DuplicateUser(String),

    #[error("Transfer already registered: {0}")]
    DuplicateTransfer(String),

    #[error("Unknown transfer {file_id} from {source_node}")]
    UnknownTransfer { source_node: String, file_id: String },
}

impl From<StorageError> for NetworkError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::CapacityExceeded {
                node_id,
                requested,
                available,
            } => NetworkError::NodeStorageFull {
                node_id,
                requested,
                available,
            },
            StorageError::DuplicateTransfer(file_id) => NetworkError::DuplicateTransfer(file_id),
        }
    }
}

impl From<QuotaError> for NetworkError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::UserExists(user_id) => NetworkError::DuplicateUser(user_id),
            QuotaError::UnknownUser(user_id) => NetworkError::UnknownUser(user_id),
        }
    }
}

impl NetworkError {
    /// Admission failures the caller can retry with different parameters
    pub fn is_admission_error(&self) -> bool {
        matches!(
            self,
            NetworkError::UnknownNode(_)
                | NetworkError::UnknownUser(_)
                | NetworkError::QuotaExceeded { .. }
                | NetworkError::NodeStorageFull { .. }
        )
    }
}
