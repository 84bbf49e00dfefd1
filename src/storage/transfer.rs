//! File transfer records

use super::chunking::{plan_chunks, Chunk};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }
}

/// A chunked file transfer addressed to one target node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    /// Unique per initiation
    pub file_id: String,

    pub file_name: String,

    /// Total size in bytes
    pub total_size: u64,

    /// Owning user
    pub user_id: String,

    /// Chunks in planned order
    pub chunks: Vec<Chunk>,

    pub status: TransferStatus,

    /// Wall-clock creation time (unix seconds)
    pub created_at: i64,

    /// Wall-clock completion time (unix seconds)
    pub completed_at: Option<i64>,

    /// Virtual clock reading when the transfer completed
    pub completed_virtual_secs: Option<f64>,
}

impl Transfer {
    pub fn new(file_id: String, file_name: String, total_size: u64, user_id: String) -> Self {
        let chunks = plan_chunks(&file_id, total_size);

        Self {
            file_id,
            file_name,
            total_size,
            user_id,
            chunks,
            status: TransferStatus::Pending,
            created_at: chrono::Utc::now().timestamp(),
            completed_at: None,
            completed_virtual_secs: None,
        }
    }

    /// True once every chunk has landed. Vacuously true for empty files.
    pub fn all_chunks_completed(&self) -> bool {
        self.chunks.iter().all(Chunk::is_completed)
    }

    pub fn completed_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_completed()).count()
    }

    pub fn pending_chunks(&self) -> usize {
        self.chunks.len() - self.completed_chunks()
    }

    /// Bytes that have already arrived at the target
    pub fn bytes_completed(&self) -> u64 {
        self.chunks
            .iter()
            .filter(|c| c.is_completed())
            .map(|c| c.size)
            .sum()
    }

    /// Bytes still to arrive
    pub fn bytes_pending(&self) -> u64 {
        self.total_size - self.bytes_completed()
    }

    /// Indices of up to `limit` pending chunks, in ascending order
    pub fn next_pending(&self, limit: usize) -> Vec<usize> {
        self.chunks
            .iter()
            .filter(|c| !c.is_completed())
            .take(limit)
            .map(|c| c.index)
            .collect()
    }

    /// Progress as percentage (0-100)
    pub fn progress_percent(&self) -> f64 {
        if self.total_size == 0 {
            return if self.all_chunks_completed() { 100.0 } else { 0.0 };
        }
        self.bytes_completed() as f64 / self.total_size as f64 * 100.0
    }

    pub(crate) fn mark_completed(&mut self) {
        self.status = TransferStatus::Completed;
        self.completed_at = Some(chrono::Utc::now().timestamp());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::chunking::{ChunkStatus, MIB};

    #[test]
    fn test_new_transfer_is_pending() {
        let transfer = Transfer::new("id".into(), "a.bin".into(), 5 * MIB, "alice".into());

        assert_eq!(transfer.status, TransferStatus::Pending);
        assert_eq!(transfer.chunks.len(), 3);
        assert_eq!(transfer.pending_chunks(), 3);
        assert_eq!(transfer.bytes_pending(), 5 * MIB);
        assert!(transfer.completed_at.is_none());
        assert!(!transfer.all_chunks_completed());
    }

    #[test]
    fn test_next_pending_skips_completed() {
        let mut transfer = Transfer::new("id".into(), "a.bin".into(), 10 * MIB, "alice".into());
        transfer.chunks[0].status = ChunkStatus::Completed;
        transfer.chunks[2].status = ChunkStatus::Completed;

        assert_eq!(transfer.next_pending(2), vec![1, 3]);
        assert_eq!(transfer.next_pending(10), vec![1, 3, 4]);
        assert_eq!(transfer.bytes_completed(), 4 * MIB);
        assert!((transfer.progress_percent() - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_transfer_is_vacuously_complete() {
        let transfer = Transfer::new("id".into(), "empty".into(), 0, "alice".into());

        assert!(transfer.chunks.is_empty());
        assert!(transfer.all_chunks_completed());
        assert_eq!(transfer.progress_percent(), 100.0);
    }
}
