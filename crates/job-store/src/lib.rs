//! Durable store for upload jobs and chunk acknowledgments.
//!
//! One record per [`UploadJob`] keyed by id, one record per [`ChunkRecord`]
//! keyed by `(job id, chunk number)`, plus the payload bytes each job owns.
//! Every mutation is written through before the call returns, so a process
//! restart sees exactly what callers were told succeeded.

pub mod error;
pub mod file;
pub mod job;
pub mod memory;
pub mod store;

pub use error::StoreError;
pub use file::FileJobStore;
pub use job::{ChunkRecord, InvalidTransition, JobConfig, PauseReason, UploadJob};
pub use memory::MemoryJobStore;
pub use store::JobStore;
