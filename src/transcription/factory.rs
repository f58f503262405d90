use super::client::{Transcriber, TranscriptionClient, TranscriptionError};
use super::openai::OpenAiTranscriber;
use super::stub::StaticTranscriber;
use crate::config::{AppConfig, TranscriptionBackend};
use std::sync::Arc;

/// Build the configured backend.
pub fn build_transcriber(config: &AppConfig) -> Result<Arc<dyn Transcriber>, TranscriptionError> {
    let backend = config
        .transcription_backend()
        .map_err(TranscriptionError::Unavailable)?;

    match backend {
        TranscriptionBackend::OpenAi => {
            if config.transcription.api_key.trim().is_empty() {
                return Err(TranscriptionError::Unavailable(
                    "API key required for the openai backend".to_string(),
                ));
            }
            Ok(Arc::new(OpenAiTranscriber::from_config(&config.transcription)?))
        }
        TranscriptionBackend::Static => Ok(Arc::new(StaticTranscriber::new(config.transcription.static_text.clone()))),
    }
}

/// Build the configured backend wrapped with the configured bounds.
pub fn build_client(config: &AppConfig) -> Result<TranscriptionClient, TranscriptionError> {
    let backend = build_transcriber(config)?;
    Ok(with_bounds(backend, config))
}

/// Wrap an already-built backend with the concurrency cap and timeout from `config`.
pub fn with_bounds(backend: Arc<dyn Transcriber>, config: &AppConfig) -> TranscriptionClient {
    TranscriptionClient::new(
        backend,
        config.performance.max_concurrent_transcriptions,
        config.transcription_timeout(),
    )
}
