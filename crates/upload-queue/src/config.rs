//! Queue configuration.
//!
//! Read from a camelCase JSON file; every field falls back to its default,
//! so an empty object (or no file at all) is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors produced while loading or validating a [`QueueConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Backoff and retry budget settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Default per-job `maxRetries`.
    pub max_retries: u32,
    /// In-attempt re-sends of a single chunk before the attempt fails.
    pub chunk_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_retries: 3,
            chunk_retries: 0,
        }
    }
}

/// Where the HTTP transport talks to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EndpointConfig {
    /// Root of the session endpoint; sessions are created at `{baseUrl}/sessions`.
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api/uploads".into(),
            auth_token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// QueueConfig
// ---------------------------------------------------------------------------

/// Top-level queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueConfig {
    /// Concurrency ceiling: at most this many jobs are `uploading` at once.
    pub max_concurrent: usize,
    pub retry: RetryConfig,
    /// Chunk size used when the session recommends none.
    pub default_chunk_size_bytes: u64,
    /// Timeout applied to each network call.
    pub chunk_timeout_ms: u64,
    /// Completed jobs older than this are deleted by the retention sweep.
    pub retention_days: u32,
    /// Period of the background retention sweep.
    pub sweep_interval_secs: u64,
    /// Capacity of each subscriber's event channel.
    pub event_buffer: usize,
    pub endpoint: EndpointConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 2,
            retry: RetryConfig::default(),
            default_chunk_size_bytes: voxlift_transfer::DEFAULT_CHUNK_SIZE,
            chunk_timeout_ms: 30_000,
            retention_days: 7,
            sweep_interval_secs: 60,
            event_buffer: 256,
            endpoint: EndpointConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Loads the configuration at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };
        let config: QueueConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Rejects settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid("maxConcurrent must be at least 1".into()));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.maxDelayMs ({}) is below retry.baseDelayMs ({})",
                self.retry.max_delay_ms, self.retry.base_delay_ms
            )));
        }
        if self.default_chunk_size_bytes == 0 {
            return Err(ConfigError::Invalid(
                "defaultChunkSizeBytes must be positive".into(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid("eventBuffer must be positive".into()));
        }
        Ok(())
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}
