//! # Per-Chunk Audio Pipeline
//!
//! Turns one inbound binary frame into the text of exactly one outbound frame:
//!
//! ```text
//! chunk -> size check -> detect -> [transcode to canonical] -> transcribe -> text
//! ```
//!
//! Every failure along the way is a [`ChunkError`]. None of them are fatal to the
//! connection; the session reports them inline with [`reply_frame`] and keeps reading.
//! Transcoding is CPU-bound and runs on the blocking thread pool.

use super::ERROR_MARKER;
use crate::audio::{detect, AudioFormat, TranscodeError, Transcoder, CANONICAL_FORMAT};
use crate::config::{AppConfig, UnknownFormatPolicy};
use crate::transcription::{TranscriptionClient, TranscriptionError, TranscriptionText};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("empty audio chunk, format could not be detected")]
    EmptyChunk,
    #[error("audio chunk of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("unrecognised audio format")]
    UnknownFormat,
    #[error("could not convert {format} audio: {source}")]
    Transcode {
        format: AudioFormat,
        #[source]
        source: TranscodeError,
    },
    #[error("transcoding task failed: {0}")]
    Blocking(String),
    #[error(transparent)]
    Transcription(#[from] TranscriptionError),
}

/// Text for the single outbound frame answering a chunk.
pub fn reply_frame(result: &Result<TranscriptionText, ChunkError>) -> String {
    match result {
        Ok(transcript) => transcript.text.clone(),
        Err(err) => format!("{} {}", ERROR_MARKER, err),
    }
}

/// Shared, stateless chunk processor. One instance serves every connection.
#[derive(Clone)]
pub struct AudioPipeline {
    transcoder: Transcoder,
    client: TranscriptionClient,
    policy: UnknownFormatPolicy,
    max_chunk_bytes: usize,
}

impl AudioPipeline {
    pub fn new(transcoder: Transcoder, client: TranscriptionClient, policy: UnknownFormatPolicy, max_chunk_bytes: usize) -> Self {
        Self {
            transcoder,
            client,
            policy,
            max_chunk_bytes,
        }
    }

    pub fn from_config(config: &AppConfig, client: TranscriptionClient) -> anyhow::Result<Self> {
        let policy = config.unknown_format_policy().map_err(anyhow::Error::msg)?;
        Ok(Self::new(
            Transcoder::new(config.audio.sample_rate),
            client,
            policy,
            config.audio.max_chunk_bytes,
        ))
    }

    pub fn client(&self) -> &TranscriptionClient {
        &self.client
    }

    pub fn policy(&self) -> UnknownFormatPolicy {
        self.policy
    }

    /// Run one chunk through the pipeline.
    pub async fn process(&self, chunk: Vec<u8>) -> Result<TranscriptionText, ChunkError> {
        if chunk.is_empty() {
            return Err(ChunkError::EmptyChunk);
        }
        if chunk.len() > self.max_chunk_bytes {
            return Err(ChunkError::TooLarge {
                size: chunk.len(),
                limit: self.max_chunk_bytes,
            });
        }

        let format = detect(&chunk);
        debug!(format = %format, bytes = chunk.len(), "Detected chunk format");

        let (audio, upload_format) = match format {
            AudioFormat::Unknown => match self.policy {
                UnknownFormatPolicy::Reject => return Err(ChunkError::UnknownFormat),
                UnknownFormatPolicy::Passthrough => {
                    debug!(bytes = chunk.len(), "Forwarding unrecognised chunk untouched");
                    (chunk, AudioFormat::Unknown)
                }
            },
            format if format == CANONICAL_FORMAT => (chunk, CANONICAL_FORMAT),
            format => (self.to_canonical(chunk, format).await?, CANONICAL_FORMAT),
        };

        Ok(self.client.transcribe(audio, upload_format).await?)
    }

    async fn to_canonical(&self, chunk: Vec<u8>, format: AudioFormat) -> Result<Vec<u8>, ChunkError> {
        let transcoder = self.transcoder;
        let converted = actix_web::web::block(move || transcoder.transcode(&chunk, format, CANONICAL_FORMAT))
            .await
            .map_err(|e| ChunkError::Blocking(e.to_string()))?;

        converted.map_err(|source| {
            warn!(format = %format, error = %source, "Failed to transcode chunk");
            ChunkError::Transcode { format, source }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::transcoder::tests::{opus_ogg, sine_wav};
    use crate::transcription::{StaticTranscriber, Transcriber};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    /// Answers with the filename hint and byte count it was given.
    struct HintTranscriber;

    #[async_trait]
    impl Transcriber for HintTranscriber {
        async fn transcribe(&self, audio: Vec<u8>, format: AudioFormat) -> Result<String, TranscriptionError> {
            Ok(format!("{}:{}", format.upload_file_name(), audio.len()))
        }

        fn name(&self) -> &str {
            "hint"
        }
    }

    /// Keeps the last upload it was handed.
    #[derive(Default)]
    struct RecordingTranscriber {
        last: std::sync::Mutex<Option<(AudioFormat, Vec<u8>)>>,
    }

    #[async_trait]
    impl Transcriber for RecordingTranscriber {
        async fn transcribe(&self, audio: Vec<u8>, format: AudioFormat) -> Result<String, TranscriptionError> {
            *self.last.lock().unwrap() = Some((format, audio));
            Ok("T".to_string())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    struct HangingTranscriber;

    #[async_trait]
    impl Transcriber for HangingTranscriber {
        async fn transcribe(&self, _audio: Vec<u8>, _format: AudioFormat) -> Result<String, TranscriptionError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }

        fn name(&self) -> &str {
            "hanging"
        }
    }

    fn pipeline(backend: Arc<dyn Transcriber>, policy: UnknownFormatPolicy) -> AudioPipeline {
        let client = TranscriptionClient::new(backend, 2, Duration::from_millis(200));
        AudioPipeline::new(Transcoder::default(), client, policy, 1024 * 1024)
    }

    #[actix_web::test]
    async fn test_canonical_chunk_yields_stub_text() {
        let pipeline = pipeline(Arc::new(StaticTranscriber::new("T")), UnknownFormatPolicy::Passthrough);
        let result = pipeline.process(sine_wav(16_000, 1, 1600)).await;
        assert_eq!(reply_frame(&result), "T");
    }

    #[actix_web::test]
    async fn test_ogg_opus_chunk_is_uploaded_as_canonical_wav() {
        let backend = Arc::new(RecordingTranscriber::default());
        let pipeline = pipeline(backend.clone(), UnknownFormatPolicy::Reject);

        let result = pipeline.process(opus_ogg(25)).await;
        assert_eq!(reply_frame(&result), "T");

        let (format, audio) = backend.last.lock().unwrap().take().unwrap();
        assert_eq!(format, CANONICAL_FORMAT);
        assert_eq!(format.upload_file_name(), "chunk.wav");
        assert_eq!(detect(&audio), AudioFormat::Wav);

        let (header, data) = wav::read(&mut std::io::Cursor::new(audio)).unwrap();
        assert_eq!(header.sampling_rate, 16_000);
        assert_eq!(header.channel_count, 1);
        assert_eq!(header.bits_per_sample, 16);
        match data {
            wav::BitDepth::Sixteen(samples) => assert!(!samples.is_empty()),
            other => panic!("unexpected bit depth: {:?}", other),
        }
    }

    #[actix_web::test]
    async fn test_canonical_chunk_is_forwarded_untouched() {
        let backend = Arc::new(RecordingTranscriber::default());
        let pipeline = pipeline(backend.clone(), UnknownFormatPolicy::Reject);
        let wav = sine_wav(44_100, 2, 441);

        pipeline.process(wav.clone()).await.unwrap();
        let (format, audio) = backend.last.lock().unwrap().take().unwrap();
        assert_eq!(format, AudioFormat::Wav);
        assert_eq!(audio, wav);
    }

    #[actix_web::test]
    async fn test_empty_chunk_is_error_marked() {
        let pipeline = pipeline(Arc::new(StaticTranscriber::new("T")), UnknownFormatPolicy::Passthrough);
        let result = pipeline.process(Vec::new()).await;
        assert!(matches!(result, Err(ChunkError::EmptyChunk)));
        assert!(reply_frame(&result).starts_with("[ERROR] "));
    }

    #[actix_web::test]
    async fn test_oversized_chunk_is_rejected() {
        let client = TranscriptionClient::new(Arc::new(StaticTranscriber::new("T")), 1, Duration::from_secs(1));
        let pipeline = AudioPipeline::new(Transcoder::default(), client, UnknownFormatPolicy::Passthrough, 8);
        let result = pipeline.process(vec![0; 9]).await;
        assert!(matches!(result, Err(ChunkError::TooLarge { size: 9, limit: 8 })));
    }

    #[actix_web::test]
    async fn test_unknown_format_passthrough_sends_raw_bytes() {
        let pipeline = pipeline(Arc::new(HintTranscriber), UnknownFormatPolicy::Passthrough);
        let result = pipeline.process(b"hello there".to_vec()).await;
        assert_eq!(reply_frame(&result), "chunk.bin:11");
    }

    #[actix_web::test]
    async fn test_unknown_format_reject_skips_backend() {
        let pipeline = pipeline(Arc::new(HangingTranscriber), UnknownFormatPolicy::Reject);
        let result = pipeline.process(b"hello there".to_vec()).await;
        assert!(matches!(result, Err(ChunkError::UnknownFormat)));
    }

    #[actix_web::test]
    async fn test_transcode_failure_then_valid_chunk() {
        let pipeline = pipeline(Arc::new(StaticTranscriber::new("T")), UnknownFormatPolicy::Passthrough);

        let broken = pipeline.process(b"OggS this is not a real ogg page".to_vec()).await;
        assert!(matches!(broken, Err(ChunkError::Transcode { format: AudioFormat::Ogg, .. })));
        assert!(reply_frame(&broken).starts_with("[ERROR] "));

        let ok = pipeline.process(sine_wav(16_000, 1, 800)).await;
        assert_eq!(reply_frame(&ok), "T");
    }

    #[actix_web::test]
    async fn test_backend_timeout_is_error_marked() {
        let pipeline = pipeline(Arc::new(HangingTranscriber), UnknownFormatPolicy::Passthrough);
        let result = pipeline.process(sine_wav(16_000, 1, 160)).await;
        assert!(matches!(result, Err(ChunkError::Transcription(TranscriptionError::Timeout(_)))));
        assert!(reply_frame(&result).contains("timed out"));
    }

    #[test]
    fn test_from_config_rejects_bad_policy() {
        let mut config = AppConfig::default();
        config.audio.unknown_format_policy = "maybe".to_string();
        let client = TranscriptionClient::new(Arc::new(StaticTranscriber::new("")), 1, Duration::from_secs(1));
        assert!(AudioPipeline::from_config(&config, client).is_err());
    }
}
