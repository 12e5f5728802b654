use std::collections::BTreeSet;
use std::ops::Range;

use sha2::{Digest, Sha256};

use crate::TransferError;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// ChunkPlan
// ---------------------------------------------------------------------------

/// Deterministic split of a payload into fixed-size chunks.
///
/// Chunk `n` (1-based) covers `[(n-1)*chunk_size, min(n*chunk_size, total_bytes))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    chunk_size: u64,
    total_bytes: u64,
    total_chunks: u32,
}

impl ChunkPlan {
    /// Plans `total_bytes` in chunks of `chunk_size`.
    pub fn new(total_bytes: u64, chunk_size: u64) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidChunkSize("chunk size is zero".into()));
        }
        let total_chunks = u32::try_from(total_bytes.div_ceil(chunk_size)).map_err(|_| {
            TransferError::InvalidChunkSize(format!(
                "{total_bytes} bytes at {chunk_size} bytes per chunk exceeds the chunk limit"
            ))
        })?;
        Ok(Self {
            chunk_size,
            total_bytes,
            total_chunks,
        })
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// Byte range of chunk `number`.
    pub fn range(&self, number: u32) -> Result<Range<u64>, TransferError> {
        if number == 0 || number > self.total_chunks {
            return Err(TransferError::ChunkOutOfRange {
                number,
                total: self.total_chunks,
            });
        }
        let start = u64::from(number - 1) * self.chunk_size;
        let end = (start + self.chunk_size).min(self.total_bytes);
        Ok(start..end)
    }

    /// All chunk numbers in ascending order.
    pub fn chunk_numbers(&self) -> impl Iterator<Item = u32> + use<> {
        1..=self.total_chunks
    }

    /// Chunk numbers not yet in `acknowledged`, ascending.
    pub fn remaining<'a>(
        &self,
        acknowledged: &'a BTreeSet<u32>,
    ) -> impl Iterator<Item = u32> + use<'a> {
        self.chunk_numbers()
            .filter(move |number| !acknowledged.contains(number))
    }

    /// Total bytes covered by the acknowledged chunks that belong to this plan.
    pub fn acknowledged_bytes(&self, acknowledged: &BTreeSet<u32>) -> u64 {
        acknowledged
            .iter()
            .filter_map(|&number| self.range(number).ok())
            .map(|range| range.end - range.start)
            .sum()
    }
}
