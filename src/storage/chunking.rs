//! Adaptive chunk planning
//!
//! Splits a file of a given size into an ordered list of chunks. The chunk
//! size is picked from three fixed tiers depending on the file size.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;

/// Files up to this size use [`SMALL_CHUNK_SIZE`]
pub const SMALL_FILE_LIMIT: u64 = 2 * MIB;
/// Files up to this size use [`MEDIUM_CHUNK_SIZE`]
pub const MEDIUM_FILE_LIMIT: u64 = 50 * MIB;

pub const SMALL_CHUNK_SIZE: u64 = 512 * KIB;
pub const MEDIUM_CHUNK_SIZE: u64 = 2 * MIB;
pub const LARGE_CHUNK_SIZE: u64 = 10 * MIB;

/// Status of a single chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkStatus {
    Pending,
    Completed,
}

/// Deterministic per-chunk tag derived from the file id and chunk index.
///
/// No content is ever materialized in the simulation, so this only
/// identifies a chunk slot. It says nothing about data integrity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkFingerprint([u8; 16]);

impl ChunkFingerprint {
    pub fn derive(file_id: &str, index: usize) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(file_id.as_bytes());
        hasher.update(b"-");
        hasher.update(&(index as u64).to_le_bytes());

        let mut out = [0u8; 16];
        out.copy_from_slice(&hasher.finalize().as_bytes()[..16]);
        Self(out)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ChunkFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkFingerprint({})", self.to_hex())
    }
}

impl fmt::Display for ChunkFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// One slice of a file, the unit of simulated transfer progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position within the file
    pub index: usize,

    /// Size in bytes
    pub size: u64,

    pub fingerprint: ChunkFingerprint,

    pub status: ChunkStatus,

    /// Node that stored this chunk, once completed
    pub stored_node: Option<String>,
}

impl Chunk {
    pub fn is_completed(&self) -> bool {
        self.status == ChunkStatus::Completed
    }
}

/// Chunk size tier for a file of `file_size` bytes
pub fn chunk_size_for(file_size: u64) -> u64 {
    if file_size <= SMALL_FILE_LIMIT {
        SMALL_CHUNK_SIZE
    } else if file_size <= MEDIUM_FILE_LIMIT {
        MEDIUM_CHUNK_SIZE
    } else {
        LARGE_CHUNK_SIZE
    }
}

/// Plan the chunks of a file.
///
/// Every chunk has the tier size except the last one, which carries the
/// remainder. A zero-byte file yields no chunks.
pub fn plan_chunks(file_id: &str, file_size: u64) -> Vec<Chunk> {
    let chunk_size = chunk_size_for(file_size);
    let count = file_size.div_ceil(chunk_size) as usize;

    (0..count)
        .map(|index| {
            let offset = chunk_size * index as u64;
            Chunk {
                index,
                size: chunk_size.min(file_size - offset),
                fingerprint: ChunkFingerprint::derive(file_id, index),
                status: ChunkStatus::Pending,
                stored_node: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total(chunks: &[Chunk]) -> u64 {
        chunks.iter().map(|c| c.size).sum()
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(chunk_size_for(2 * MIB), SMALL_CHUNK_SIZE);
        assert_eq!(chunk_size_for(2 * MIB + 1), MEDIUM_CHUNK_SIZE);
        assert_eq!(chunk_size_for(50 * MIB), MEDIUM_CHUNK_SIZE);
        assert_eq!(chunk_size_for(50 * MIB + 1), LARGE_CHUNK_SIZE);

        let small = plan_chunks("f", 2 * MIB);
        assert_eq!(small.len(), 4);
        assert!(small.iter().all(|c| c.size == SMALL_CHUNK_SIZE));

        let medium = plan_chunks("f", 2 * MIB + 1);
        assert_eq!(medium.len(), 2);
        assert_eq!(medium[0].size, MEDIUM_CHUNK_SIZE);
        assert_eq!(medium[1].size, 1);

        let large = plan_chunks("f", 50 * MIB + 1);
        assert_eq!(large.len(), 6);
        assert_eq!(large[0].size, LARGE_CHUNK_SIZE);
        assert_eq!(large[5].size, 1);
    }

    #[test]
    fn test_sizes_sum_to_file_size() {
        let sizes = [
            1,
            511 * KIB,
            512 * KIB,
            512 * KIB + 1,
            3 * MIB + 17,
            50 * MIB,
            100 * MIB,
            1234 * MIB + 5,
        ];

        for size in sizes {
            let chunks = plan_chunks("file", size);
            assert_eq!(total(&chunks), size, "size {}", size);

            let tier = chunk_size_for(size);
            let last = chunks.last().unwrap();
            assert!(last.size > 0 && last.size <= tier, "size {}", size);
            assert!(chunks[..chunks.len() - 1].iter().all(|c| c.size == tier));
        }
    }

    #[test]
    fn test_zero_byte_file_has_no_chunks() {
        assert!(plan_chunks("empty", 0).is_empty());
    }

    #[test]
    fn test_chunks_are_ordered_and_pending() {
        let chunks = plan_chunks("file", 100 * MIB);

        assert_eq!(chunks.len(), 10);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.status, ChunkStatus::Pending);
            assert!(chunk.stored_node.is_none());
        }
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = plan_chunks("file-a", 5 * MIB);
        let again = plan_chunks("file-a", 5 * MIB);
        let b = plan_chunks("file-b", 5 * MIB);

        assert_eq!(a[1].fingerprint, again[1].fingerprint);
        assert_ne!(a[0].fingerprint, a[1].fingerprint);
        assert_ne!(a[0].fingerprint, b[0].fingerprint);
        assert_eq!(a[2].fingerprint.to_hex().len(), 32);
    }
}
