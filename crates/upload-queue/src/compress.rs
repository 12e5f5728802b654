//! Optional pre-enqueue payload compression.

use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;

/// Transforms a payload before the queue takes custody of it.
///
/// A failure is never fatal to the enqueue: the queue falls back to the
/// original bytes.
pub trait Compressor: Send + Sync {
    fn compress(&self, payload: &[u8]) -> std::io::Result<Vec<u8>>;
}

/// gzip via `flate2`.
#[derive(Debug, Clone, Copy)]
pub struct GzipCompressor {
    level: Compression,
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self {
            level: Compression::default(),
        }
    }
}

impl GzipCompressor {
    /// `level` is clamped to 0..=9.
    pub fn new(level: u32) -> Self {
        Self {
            level: Compression::new(level.min(9)),
        }
    }
}

impl Compressor for GzipCompressor {
    fn compress(&self, payload: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(payload.len() / 2), self.level);
        encoder.write_all(payload)?;
        encoder.finish()
    }
}
