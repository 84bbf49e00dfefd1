//! Network-wide statistics

use super::clock::VirtualClock;
use crate::storage::{percent, StorageNode};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Point-in-time aggregate over all nodes and the active transfer table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub node_count: usize,
    pub user_count: usize,

    /// Sum of node interface bandwidths (bits/second)
    pub total_bandwidth_bps: u64,

    /// Instantaneous load; zero between chunk events
    pub used_bandwidth_bps: u64,
    pub bandwidth_utilization_percent: f64,

    pub total_storage_bytes: u64,
    pub used_storage_bytes: u64,
    pub reserved_storage_bytes: u64,
    pub storage_utilization_percent: f64,

    pub active_transfers: usize,
    pub completed_transfers: u64,
    pub failed_transfers: u64,

    /// Chunk attempts that failed, summed over nodes
    pub failed_chunks: u64,

    pub virtual_time_secs: f64,
}

impl NetworkStats {
    pub(super) fn collect<'a>(
        nodes: impl Iterator<Item = &'a StorageNode>,
        user_count: usize,
        active_transfers: usize,
        completed_transfers: u64,
        failed_transfers: u64,
        clock: VirtualClock,
    ) -> Self {
        let mut stats = NetworkStats {
            node_count: 0,
            user_count,
            total_bandwidth_bps: 0,
            used_bandwidth_bps: 0,
            bandwidth_utilization_percent: 0.0,
            total_storage_bytes: 0,
            used_storage_bytes: 0,
            reserved_storage_bytes: 0,
            storage_utilization_percent: 0.0,
            active_transfers,
            completed_transfers,
            failed_transfers,
            failed_chunks: 0,
            virtual_time_secs: clock.as_secs(),
        };

        for node in nodes {
            stats.node_count += 1;
            stats.total_bandwidth_bps += node.bandwidth_bps();
            stats.used_bandwidth_bps += node.current_bandwidth_bps();
            stats.total_storage_bytes += node.total_storage();
            stats.used_storage_bytes += node.used_storage();
            stats.reserved_storage_bytes += node.reserved_storage();
            stats.failed_chunks += node.performance().failed_chunks;
        }

        stats.bandwidth_utilization_percent =
            percent(stats.used_bandwidth_bps, stats.total_bandwidth_bps);
        stats.storage_utilization_percent =
            percent(stats.used_storage_bytes, stats.total_storage_bytes);
        stats
    }
}

impl fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Simulation Time: {:.4}s", self.virtual_time_secs)?;
        writeln!(f, "Total Nodes: {}", self.node_count)?;
        writeln!(f, "Active Transfers: {}", self.active_transfers)?;
        writeln!(f, "Network Utilization: {:.2}%", self.bandwidth_utilization_percent)?;
        write!(f, "Storage Utilization: {:.2}%", self.storage_utilization_percent)
    }
}
