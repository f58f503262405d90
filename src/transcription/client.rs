//! # Transcription Client
//!
//! [`TranscriptionClient`] wraps exactly one call to a [`Transcriber`] backend per
//! audio chunk. It adds the two bounds the session relies on:
//!
//! - **Concurrency**: a semaphore shared by every connection caps in-flight
//!   upstream calls, so a burst of clients cannot exhaust the backend quota.
//! - **Time**: the permit wait and the call together are wrapped in a timeout, so a
//!   hung upstream can never pin a connection (and its registry slot) open.
//!
//! Nothing is retried here. A caller streaming live audio usually prefers dropping a
//! stale chunk to replaying it out of order.

use crate::audio::format::AudioFormat;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Classified failure of a single transcription call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscriptionError {
    #[error("transcription request failed: {0}")]
    Request(String),
    #[error("transcription backend returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("malformed transcription response: {0}")]
    InvalidResponse(String),
    #[error("transcription timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("transcription service unavailable: {0}")]
    Unavailable(String),
}

/// An external speech-to-text capability.
///
/// Implementations receive the chunk bytes together with their format. Multipart
/// backends derive the filename hint and part content type from it with
/// [`AudioFormat::upload_file_name`] and [`AudioFormat::mime_type`].
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: Vec<u8>, format: AudioFormat) -> Result<String, TranscriptionError>;

    /// Short backend label for logs and the health endpoint.
    fn name(&self) -> &str;
}

/// Recognised text for one chunk, with timing for logs/metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionText {
    pub text: String,
    pub processing_time_ms: u64,
}

#[derive(Clone)]
pub struct TranscriptionClient {
    backend: Arc<dyn Transcriber>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl TranscriptionClient {
    pub fn new(backend: Arc<dyn Transcriber>, max_in_flight: usize, timeout: Duration) -> Self {
        Self {
            backend,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            timeout,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Permits currently free; equals the configured cap when idle.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Transcribe one chunk. Always returns a value; backend faults become errors.
    pub async fn transcribe(&self, audio: Vec<u8>, format: AudioFormat) -> Result<TranscriptionText, TranscriptionError> {
        let started = Instant::now();
        let bytes = audio.len();

        let call = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| TranscriptionError::Unavailable(e.to_string()))?;
            self.backend.transcribe(audio, format).await
        };

        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(TranscriptionError::Timeout(self.timeout)),
        };
        let processing_time_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(text) => {
                debug!(
                    backend = self.backend.name(),
                    bytes,
                    chars = text.len(),
                    processing_time_ms,
                    "Transcription completed"
                );
                Ok(TranscriptionText { text, processing_time_ms })
            }
            Err(err) => {
                warn!(backend = self.backend.name(), bytes, processing_time_ms, error = %err, "Transcription failed");
                Err(err)
            }
        }
    }
}
