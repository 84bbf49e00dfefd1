//! Shared network handle and the upload driver
//!
//! Request handlers hold a cloned [`NetworkHandle`]. Every call takes the
//! lock for one operation only, so a long upload never blocks others for
//! more than a single step.

use super::simulator::{StepOutcome, StorageNetwork};
use super::stats::NetworkStats;
use super::NetworkError;
use crate::storage::{Transfer, User};
use crate::{SimConfig, SimError};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Parameters of one simulated upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRequest {
    pub source_node: String,
    pub target_node: String,
    pub file_name: String,
    pub file_size: u64,
    pub user_id: String,
    pub chunks_per_step: usize,
}

impl UploadRequest {
    /// Upload between the configured default nodes
    pub fn from_config(
        config: &SimConfig,
        file_name: impl Into<String>,
        file_size: u64,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            source_node: config.source_node.clone(),
            target_node: config.target_node.clone(),
            file_name: file_name.into(),
            file_size,
            user_id: user_id.into(),
            chunks_per_step: config.chunks_per_step,
        }
    }
}

/// Summary of a finished upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadReport {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub chunks: usize,
    pub steps: usize,

    /// Virtual seconds spent on this upload's own chunks
    pub virtual_secs: f64,

    /// Virtual clock reading after the last step
    pub clock_secs: f64,

    /// Simulated throughput in mebibits per second (bits / 2^20 / second),
    /// not the 10^6-based Mbps used for link bandwidth
    pub simulated_speed_mibps: f64,

    pub quota_used: u64,
    pub quota_total: u64,
}

/// Cloneable handle to a network shared between request handlers
#[derive(Clone)]
pub struct NetworkHandle {
    inner: Arc<Mutex<StorageNetwork>>,
}

impl NetworkHandle {
    pub fn new(network: StorageNetwork) -> Self {
        Self {
            inner: Arc::new(Mutex::new(network)),
        }
    }

    pub fn from_config(config: &SimConfig) -> Result<Self, NetworkError> {
        Ok(Self::new(StorageNetwork::from_config(config)?))
    }

    /// Run `f` with the network locked
    pub fn with<R>(&self, f: impl FnOnce(&mut StorageNetwork) -> R) -> R {
        let mut network = self.inner.lock();
        f(&mut network)
    }

    pub fn register_user(&self, user: User) -> Result<(), NetworkError> {
        self.inner.lock().register_user(user)
    }

    pub fn get_user(&self, user_id: &str) -> Option<User> {
        self.inner.lock().get_user(user_id).cloned()
    }

    pub fn connect(&self, node_a: &str, node_b: &str, bandwidth_mbps: u64) -> bool {
        self.inner.lock().connect(node_a, node_b, bandwidth_mbps)
    }

    pub fn initiate(
        &self,
        source_node: &str,
        target_node: &str,
        file_name: &str,
        file_size: u64,
        user_id: &str,
    ) -> Result<Transfer, NetworkError> {
        self.inner
            .lock()
            .initiate(source_node, target_node, file_name, file_size, user_id)
    }

    pub fn step(
        &self,
        source_node: &str,
        target_node: &str,
        file_id: &str,
        max_chunks: usize,
    ) -> StepOutcome {
        self.inner
            .lock()
            .step(source_node, target_node, file_id, max_chunks)
    }

    pub fn statistics(&self) -> NetworkStats {
        self.inner.lock().statistics()
    }

    /// Admit an upload and drive it to completion.
    ///
    /// The lock is released between steps and the task yields so that
    /// concurrent uploads interleave. Stops with an error if the transfer
    /// reaches the failed state.
    pub async fn upload(&self, request: &UploadRequest) -> Result<UploadReport, SimError> {
        let transfer = self.initiate(
            &request.source_node,
            &request.target_node,
            &request.file_name,
            request.file_size,
            &request.user_id,
        )?;

        let chunks = transfer.chunks.len();
        let per_step = request.chunks_per_step.max(1);
        let mut steps = 0;
        let mut virtual_secs = 0.0;
        let mut chunks_done = 0;

        // Empty files are complete from the start
        let mut completed = transfer.status.is_terminal();

        while !completed {
            let outcome = self.step(
                &request.source_node,
                &request.target_node,
                &transfer.file_id,
                per_step,
            );
            steps += 1;
            virtual_secs += outcome.elapsed_secs;
            chunks_done += outcome.chunks_advanced;
            completed = outcome.completed;

            if outcome.failed {
                return Err(SimError::TransferFailed {
                    file_id: transfer.file_id,
                    chunks_completed: chunks_done,
                });
            }
            if let Some(e) = &outcome.error {
                tracing::debug!(file_id = %transfer.file_id, error = %e, "Step made no progress, retrying");
            }

            tokio::task::yield_now().await;
        }

        let (clock_secs, user) = self.with(|network| {
            (
                network.clock().as_secs(),
                network.get_user(&request.user_id).cloned(),
            )
        });
        let (quota_used, quota_total) = user
            .map(|u| (u.used_quota, u.total_quota))
            .unwrap_or_default();

        let simulated_speed_mibps = if virtual_secs > 0.0 {
            request.file_size as f64 * 8.0 / (virtual_secs * 1024.0 * 1024.0)
        } else {
            0.0
        };

        tracing::info!(
            file_id = %transfer.file_id,
            steps,
            virtual_secs,
            simulated_speed_mibps,
            "Upload complete"
        );

        Ok(UploadReport {
            file_id: transfer.file_id,
            file_name: transfer.file_name,
            file_size: request.file_size,
            chunks,
            steps,
            virtual_secs,
            clock_secs,
            simulated_speed_mibps,
            quota_used,
            quota_total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::chunking::MIB;
    use crate::UserConfig;

    fn handle_with_users(users: &[(&str, u64)]) -> (NetworkHandle, SimConfig) {
        let config = SimConfig {
            users: users
                .iter()
                .map(|(id, quota)| UserConfig {
                    user_id: id.to_string(),
                    name: None,
                    quota_bytes: Some(*quota),
                })
                .collect(),
            chunks_per_step: 3,
            ..SimConfig::default()
        };
        (NetworkHandle::from_config(&config).unwrap(), config)
    }

    #[tokio::test]
    async fn test_upload_runs_to_completion() {
        let (handle, config) = handle_with_users(&[("user_max", 200 * MIB)]);
        let request = UploadRequest::from_config(&config, "project.zip", 100 * MIB, "user_max");

        let report = handle.upload(&request).await.unwrap();

        assert_eq!(report.chunks, 10);
        assert_eq!(report.steps, 4);
        assert_eq!(report.quota_used, 100 * MIB);
        assert_eq!(report.quota_total, 200 * MIB);
        assert!((report.virtual_secs - report.clock_secs).abs() < 1e-9);
        // 1000 Mbps link expressed in 2^20-bit megabits
        assert!((report.simulated_speed_mibps - 1_000_000_000.0 / MIB as f64).abs() < 1e-6);
        assert_eq!(handle.statistics().active_transfers, 0);
    }

    #[tokio::test]
    async fn test_upload_quota_rejected() {
        let (handle, config) = handle_with_users(&[("user_guest", 50 * MIB)]);
        let request = UploadRequest::from_config(&config, "big.dat", 100 * MIB, "user_guest");

        let err = handle.upload(&request).await.unwrap_err();
        assert!(matches!(
            err,
            SimError::Network(NetworkError::QuotaExceeded { .. })
        ));
        assert_eq!(handle.get_user("user_guest").unwrap().used_quota, 0);
    }

    #[tokio::test]
    async fn test_upload_fails_on_severed_link() {
        let (handle, config) = handle_with_users(&[("alice", 200 * MIB)]);
        handle.with(|network| network.disconnect("node1", "node2"));
        let request = UploadRequest::from_config(&config, "data.bin", 20 * MIB, "alice");

        let err = handle.upload(&request).await.unwrap_err();
        assert!(matches!(
            err,
            SimError::TransferFailed { chunks_completed: 0, .. }
        ));

        let stats = handle.statistics();
        assert_eq!(stats.failed_transfers, 1);
        assert_eq!(stats.reserved_storage_bytes, 0);
        assert_eq!(handle.get_user("alice").unwrap().reserved_quota, 0);
    }

    #[tokio::test]
    async fn test_concurrent_uploads_share_clock() {
        let (handle, config) = handle_with_users(&[("alice", 200 * MIB), ("bob", 200 * MIB)]);

        let mut tasks = Vec::new();
        for (user, name) in [("alice", "a.bin"), ("bob", "b.bin"), ("alice", "c.bin")] {
            let handle = handle.clone();
            let request = UploadRequest::from_config(&config, name, 60 * MIB, user);
            tasks.push(tokio::spawn(async move { handle.upload(&request).await }));
        }

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }

        // alice asked for 120 MiB of 200: both fit; bob fits too
        let reports: Vec<UploadReport> = results.into_iter().map(|r| r.unwrap()).collect();
        let own_time: f64 = reports.iter().map(|r| r.virtual_secs).sum();

        let stats = handle.statistics();
        assert!((stats.virtual_time_secs - own_time).abs() < 1e-9);
        assert_eq!(stats.completed_transfers, 3);
        assert_eq!(stats.used_storage_bytes, 180 * MIB);
        assert_eq!(handle.get_user("alice").unwrap().used_quota, 120 * MIB);
        assert_eq!(handle.get_user("bob").unwrap().used_quota, 60 * MIB);
    }

    #[tokio::test]
    async fn test_concurrent_uploads_cannot_overcommit_quota() {
        let (handle, config) = handle_with_users(&[("alice", 100 * MIB)]);

        let mut tasks = Vec::new();
        for name in ["a.bin", "b.bin", "c.bin"] {
            let handle = handle.clone();
            let request = UploadRequest::from_config(&config, name, 40 * MIB, "alice");
            tasks.push(tokio::spawn(async move { handle.upload(&request).await }));
        }

        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(e) => assert!(matches!(
                    e,
                    SimError::Network(NetworkError::QuotaExceeded { .. })
                )),
            }
        }

        let alice = handle.get_user("alice").unwrap();
        assert!(alice.used_quota <= alice.total_quota);
        assert_eq!(alice.used_quota, ok as u64 * 40 * MIB);
        assert!(ok <= 2);
    }

    #[test]
    fn test_handle_blocking_calls() {
        let (handle, config) = handle_with_users(&[("alice", 10 * MIB)]);
        let request = UploadRequest::from_config(&config, "empty.txt", 0, "alice");

        let report = tokio_test::block_on(handle.upload(&request)).unwrap();
        assert_eq!(report.chunks, 0);
        assert_eq!(report.steps, 0);
        assert_eq!(report.simulated_speed_mibps, 0.0);

        assert!(!handle.connect("node1", "node5", 10));
        let first = handle.statistics();
        assert_eq!(first, handle.statistics());
    }
}
