//! The chunk transfer protocol as seen by the executor.

use std::future::Future;
use std::pin::Pin;

use voxlift_protocol::{
    ChunkAck, CompleteRequest, CompleteResponse, CreateSessionRequest, TransferSession,
};
use voxlift_transfer::Chunk;

use crate::error::UploadError;

/// Boxed future returned by [`ChunkTransport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Abstract connection to the upload server.
///
/// [`HttpTransport`](crate::http::HttpTransport) talks to the real endpoints;
/// tests plug in scripted implementations. Every call is safe to repeat:
/// the server treats a duplicate chunk number as an idempotent overwrite.
pub trait ChunkTransport: Send + Sync {
    /// Opens a session for one job attempt.
    fn create_session<'a>(
        &'a self,
        request: &'a CreateSessionRequest,
    ) -> TransportFuture<'a, TransferSession>;

    /// Sends one chunk; `Ok` carries the server's acknowledgment.
    fn upload_chunk<'a>(
        &'a self,
        session: &'a TransferSession,
        chunk: &'a Chunk,
        total_chunks: u32,
    ) -> TransportFuture<'a, ChunkAck>;

    /// Asks the server to assemble the uploaded chunks.
    fn complete<'a>(
        &'a self,
        session: &'a TransferSession,
        request: &'a CompleteRequest,
    ) -> TransportFuture<'a, CompleteResponse>;
}
