use crate::TransferError;
use crate::chunked::checksum_bytes;

/// One contiguous slice of a payload, the unit of transfer and acknowledgment.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 1-based chunk number.
    pub number: u32,
    /// Byte offset within the payload.
    pub offset: u64,
    /// Raw chunk data.
    pub data: Vec<u8>,
    /// SHA-256 hex checksum of `data`.
    pub checksum: String,
}

impl Chunk {
    /// Wraps `data` read at `offset`, computing its checksum.
    pub fn new(number: u32, offset: u64, data: Vec<u8>) -> Self {
        let checksum = checksum_bytes(&data);
        Self {
            number,
            offset,
            data,
            checksum,
        }
    }

    /// Size of this chunk in bytes.
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Checks a checksum reported back for this chunk.
    pub fn verify(&self, reported: &str) -> Result<(), TransferError> {
        if reported.eq_ignore_ascii_case(&self.checksum) {
            Ok(())
        } else {
            Err(TransferError::ChecksumMismatch)
        }
    }
}
