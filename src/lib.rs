//! vstore Core - Virtual Storage Network Simulator
//!
//! This crate simulates a small storage network: nodes with finite capacity
//! and bandwidth, users with storage quotas, and chunked file transfers
//! whose duration is computed from link bandwidth on a virtual clock.
//! No real data moves and no real time passes.

pub mod network;
pub mod storage;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use storage::chunking::GIB;
use storage::{NodeCapacity, StorageNode, User};

/// Main error type for simulator operations
#[derive(Error, Debug)]
pub enum SimError {
    #[error("Network error: {0}")]
    Network(#[from] network::NetworkError),

    #[error("Transfer {file_id} failed after {chunks_completed} chunks")]
    TransferFailed {
        file_id: String,
        chunks_completed: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;

/// A node to create at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    pub cpu_cores: u32,
    pub memory_gb: u32,
    pub storage_gb: u64,
    pub bandwidth_mbps: u64,
}

impl NodeConfig {
    pub fn build(&self) -> StorageNode {
        StorageNode::new(
            self.node_id.clone(),
            NodeCapacity::new(
                self.cpu_cores,
                self.memory_gb,
                self.storage_gb,
                self.bandwidth_mbps,
            ),
        )
    }
}

/// A symmetric link between two nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkConfig {
    pub a: String,
    pub b: String,
    pub bandwidth_mbps: u64,
}

/// A user to register at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    pub user_id: String,

    /// Display name, defaults to the user id
    #[serde(default)]
    pub name: Option<String>,

    /// Quota in bytes, defaults to [`SimConfig::default_quota_bytes`]
    #[serde(default)]
    pub quota_bytes: Option<u64>,
}

impl UserConfig {
    pub fn build(&self, default_quota_bytes: u64) -> User {
        User::new(
            self.user_id.clone(),
            self.name.clone().unwrap_or_else(|| self.user_id.clone()),
            self.quota_bytes.unwrap_or(default_quota_bytes),
        )
    }
}

/// Simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub nodes: Vec<NodeConfig>,

    pub links: Vec<LinkConfig>,

    pub users: Vec<UserConfig>,

    /// Quota given to users that don't set one (bytes)
    pub default_quota_bytes: u64,

    /// Chunks the upload driver advances per step
    pub chunks_per_step: usize,

    /// Consecutive failed steps before a transfer is marked failed.
    /// `None` retries forever.
    pub max_consecutive_failures: Option<u32>,

    /// Node uploads are sent from
    pub source_node: String,

    /// Node uploads are stored on
    pub target_node: String,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            nodes: vec![
                NodeConfig {
                    node_id: "node1".to_string(),
                    cpu_cores: 4,
                    memory_gb: 16,
                    storage_gb: 500,
                    bandwidth_mbps: 1000,
                },
                NodeConfig {
                    node_id: "node2".to_string(),
                    cpu_cores: 8,
                    memory_gb: 32,
                    storage_gb: 1000,
                    bandwidth_mbps: 2000,
                },
            ],
            links: vec![LinkConfig {
                a: "node1".to_string(),
                b: "node2".to_string(),
                bandwidth_mbps: 1000,
            }],
            users: vec![],
            default_quota_bytes: 2 * GIB, // 2 GB
            chunks_per_step: 10,
            max_consecutive_failures: Some(8),
            source_node: "node1".to_string(),
            target_node: "node2".to_string(),
        }
    }
}

impl SimConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SimConfig =
            serde_json::from_str(json).map_err(|e| SimError::Serialization(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| SimError::Serialization(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunks_per_step == 0 {
            return Err(SimError::Config("chunks_per_step must be at least 1".into()));
        }
        if self.max_consecutive_failures == Some(0) {
            return Err(SimError::Config(
                "max_consecutive_failures must be at least 1".into(),
            ));
        }
        for id in [&self.source_node, &self.target_node] {
            if !self.nodes.iter().any(|n| &n.node_id == id) {
                return Err(SimError::Config(format!("node {} is not configured", id)));
            }
        }
        Ok(())
    }
}
