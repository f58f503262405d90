use super::client::{Transcriber, TranscriptionError};
use crate::audio::format::AudioFormat;
use async_trait::async_trait;

/// Deterministic backend that answers every chunk with the same text.
///
/// Used when no real backend is configured and as the fixed stub in tests.
#[derive(Debug, Clone)]
pub struct StaticTranscriber {
    text: String,
}

impl StaticTranscriber {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl Transcriber for StaticTranscriber {
    async fn transcribe(&self, _audio: Vec<u8>, _format: AudioFormat) -> Result<String, TranscriptionError> {
        Ok(self.text.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}
