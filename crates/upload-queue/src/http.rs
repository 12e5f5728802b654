//! HTTP implementation of [`ChunkTransport`].
//!
//! - `POST {baseUrl}/sessions` with a JSON [`CreateSessionRequest`]
//! - `POST {uploadEndpoint}` with the raw chunk bytes; chunk coordinates ride
//!   in `X-Session-Id`, `X-Chunk-Number`, `X-Total-Chunks`, `X-Chunk-Checksum`
//! - `POST {completeEndpoint}` with a JSON [`CompleteRequest`]

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use voxlift_protocol::messages::CHECKSUM_MISMATCH_CODE;
use voxlift_protocol::{
    ChunkAck, CompleteRequest, CompleteResponse, CreateSessionRequest, ErrorResponse,
    TransferSession, UploadChunkHeader,
};
use voxlift_transfer::Chunk;

use crate::config::EndpointConfig;
use crate::error::UploadError;
use crate::transport::{ChunkTransport, TransportFuture};

pub const HEADER_SESSION_ID: &str = "X-Session-Id";
pub const HEADER_CHUNK_NUMBER: &str = "X-Chunk-Number";
pub const HEADER_TOTAL_CHUNKS: &str = "X-Total-Chunks";
pub const HEADER_CHUNK_CHECKSUM: &str = "X-Chunk-Checksum";

/// Chunk transport over HTTP(S).
pub struct HttpTransport {
    http_client: reqwest::Client,
    endpoint: EndpointConfig,
}

impl HttpTransport {
    /// Creates a transport with the given HTTP client.
    pub fn new(http_client: reqwest::Client, endpoint: EndpointConfig) -> Self {
        Self {
            http_client,
            endpoint,
        }
    }

    /// Resolves a server-provided endpoint; relative paths hang off the base URL.
    fn resolve(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!(
                "{}/{}",
                self.endpoint.base_url.trim_end_matches('/'),
                endpoint.trim_start_matches('/')
            )
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.endpoint.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, UploadError> {
        let response = self.authorize(request).send().await.map_err(map_send_error)?;
        read_response(response).await
    }
}

impl ChunkTransport for HttpTransport {
    fn create_session<'a>(
        &'a self,
        request: &'a CreateSessionRequest,
    ) -> TransportFuture<'a, TransferSession> {
        Box::pin(async move {
            let url = self.resolve("sessions");
            debug!(%url, total_bytes = request.total_bytes, "creating transfer session");
            self.send(self.http_client.post(&url).json(request)).await
        })
    }

    fn upload_chunk<'a>(
        &'a self,
        session: &'a TransferSession,
        chunk: &'a Chunk,
        total_chunks: u32,
    ) -> TransportFuture<'a, ChunkAck> {
        Box::pin(async move {
            let url = self.resolve(&session.upload_endpoint);
            trace!(%url, chunk = chunk.number, bytes = chunk.len(), "sending chunk");
            let header = UploadChunkHeader {
                session_id: session.session_id.clone(),
                chunk_number: chunk.number,
                total_chunks,
                checksum: chunk.checksum.clone(),
            };
            let request = with_chunk_header(self.http_client.post(&url), &header)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(chunk.data.clone());
            self.send(request).await
        })
    }

    fn complete<'a>(
        &'a self,
        session: &'a TransferSession,
        request: &'a CompleteRequest,
    ) -> TransportFuture<'a, CompleteResponse> {
        Box::pin(async move {
            let url = self.resolve(&session.complete_endpoint);
            debug!(%url, session = %session.session_id, "completing transfer session");
            self.send(self.http_client.post(&url).json(request)).await
        })
    }
}

/// Carries the chunk coordinates as `X-*` request headers.
fn with_chunk_header(request: RequestBuilder, header: &UploadChunkHeader) -> RequestBuilder {
    let request = request
        .header(HEADER_SESSION_ID, &header.session_id)
        .header(HEADER_CHUNK_NUMBER, header.chunk_number.to_string())
        .header(HEADER_TOTAL_CHUNKS, header.total_chunks.to_string());
    if header.checksum.is_empty() {
        request
    } else {
        request.header(HEADER_CHUNK_CHECKSUM, &header.checksum)
    }
}

fn map_send_error(e: reqwest::Error) -> UploadError {
    if e.is_timeout() {
        UploadError::Timeout
    } else {
        UploadError::Network(e.to_string())
    }
}

async fn read_response<T: DeserializeOwned>(response: Response) -> Result<T, UploadError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| UploadError::Network(format!("invalid response body: {e}")));
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_for_status(status, &body))
}

/// Maps a non-2xx response onto the upload error taxonomy.
pub fn error_for_status(status: StatusCode, body: &str) -> UploadError {
    let parsed = serde_json::from_str::<ErrorResponse>(body).ok();
    let message = match &parsed {
        Some(err) if !err.message.is_empty() => err.message.clone(),
        _ if body.is_empty() => status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string(),
        _ => body.to_string(),
    };
    let checksum_mismatch = parsed
        .as_ref()
        .is_some_and(|err| err.code == CHECKSUM_MISMATCH_CODE);

    match status.as_u16() {
        _ if checksum_mismatch => UploadError::ChecksumMismatch(message),
        401 | 403 => UploadError::Auth(message),
        400 | 413 | 422 => UploadError::Validation(message),
        404 | 410 => UploadError::SessionExpired,
        code => UploadError::Server {
            status: code,
            message,
        },
    }
}
