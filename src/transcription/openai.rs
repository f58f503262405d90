//! OpenAI-compatible `/audio/transcriptions` backend.
//!
//! Works against api.openai.com and self-hosted servers exposing the same
//! multipart contract (faster-whisper-server, LocalAI, ...).

use super::client::{Transcriber, TranscriptionError};
use crate::audio::format::AudioFormat;
use crate::config::TranscriptionConfig;
use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

pub struct OpenAiTranscriber {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    language: Option<String>,
    timeout: Duration,
}

impl OpenAiTranscriber {
    pub fn new(api_key: String, base_url: String, model: String, language: Option<String>, timeout: Duration) -> Result<Self, TranscriptionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TranscriptionError::Unavailable(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            language,
            timeout,
        })
    }

    pub fn from_config(config: &TranscriptionConfig) -> Result<Self, TranscriptionError> {
        let language = Some(config.language.trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string);

        Self::new(
            config.api_key.clone(),
            config.base_url.clone(),
            config.model.clone(),
            language,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/transcriptions", self.base_url)
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, audio: Vec<u8>, format: AudioFormat) -> Result<String, TranscriptionError> {
        let file_name = format.upload_file_name();
        let file_part = multipart::Part::bytes(audio)
            .file_name(file_name.clone())
            .mime_str(format.mime_type())
            .map_err(|e| TranscriptionError::Request(format!("mime: {}", e)))?;

        let mut form = multipart::Form::new()
            .text("model", self.model.clone())
            .text("response_format", "json")
            .part("file", file_part);
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        tracing::debug!(model = %self.model, %file_name, "Sending chunk to transcription backend");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TranscriptionError::Timeout(self.timeout)
                } else {
                    TranscriptionError::Request(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(TranscriptionError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::InvalidResponse(e.to_string()))?;

        Ok(parsed.text.trim().to_string())
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};

    /// Start a fake upstream on an ephemeral port and return its base URL.
    fn fake_upstream(
        handler: fn(HttpRequest, web::Bytes) -> HttpResponse,
    ) -> String {
        let server = HttpServer::new(move || {
            App::new().route("/v1/audio/transcriptions", web::post().to(move |req: HttpRequest, body: web::Bytes| async move { handler(req, body) }))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());
        format!("http://{}/v1", addr)
    }

    fn transcriber(base_url: String, timeout: Duration) -> OpenAiTranscriber {
        OpenAiTranscriber::new("sk-test".to_string(), base_url, "whisper-1".to_string(), Some("en".to_string()), timeout).unwrap()
    }

    #[actix_web::test]
    async fn test_posts_multipart_and_parses_text() {
        let base_url = fake_upstream(|req, body| {
            let authorized = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                == Some("Bearer sk-test");
            let body = String::from_utf8_lossy(&body).to_lowercase();
            if authorized
                && body.contains("filename=\"chunk.wav\"")
                && body.contains("content-type: audio/wav")
                && body.contains("whisper-1")
                && body.contains("riff")
            {
                HttpResponse::Ok().json(serde_json::json!({ "text": "  hello world \n" }))
            } else {
                HttpResponse::BadRequest().body("unexpected request")
            }
        });

        let text = transcriber(base_url, Duration::from_secs(5))
            .transcribe(b"RIFF....WAVE".to_vec(), AudioFormat::Wav)
            .await
            .unwrap();
        assert_eq!(text, "hello world");
    }

    #[actix_web::test]
    async fn test_error_status_is_classified() {
        let base_url = fake_upstream(|_, _| HttpResponse::TooManyRequests().body("quota exceeded"));

        let err = transcriber(base_url, Duration::from_secs(5))
            .transcribe(vec![0; 8], AudioFormat::Wav)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TranscriptionError::Upstream {
                status: 429,
                body: "quota exceeded".to_string()
            }
        );
    }

    #[actix_web::test]
    async fn test_malformed_body_is_classified() {
        let base_url = fake_upstream(|_, _| HttpResponse::Ok().content_type("application/json").body("{\"txt\": 1}"));

        let err = transcriber(base_url, Duration::from_secs(5))
            .transcribe(vec![0; 8], AudioFormat::Wav)
            .await
            .unwrap_err();
        assert!(matches!(err, TranscriptionError::InvalidResponse(_)));
    }

    #[actix_web::test]
    async fn test_unreachable_backend_is_request_error() {
        // nothing listens on port 9 (discard) in the test environment
        let err = transcriber("http://127.0.0.1:9/v1".to_string(), Duration::from_secs(5))
            .transcribe(vec![0; 8], AudioFormat::Wav)
            .await
            .unwrap_err();
        assert!(matches!(err, TranscriptionError::Request(_) | TranscriptionError::Timeout(_)));
    }

    #[actix_web::test]
    async fn test_unknown_format_uploads_as_octet_stream() {
        let base_url = fake_upstream(|_, body| {
            let body = String::from_utf8_lossy(&body).to_lowercase();
            if body.contains("filename=\"chunk.bin\"") && body.contains("content-type: application/octet-stream") {
                HttpResponse::Ok().json(serde_json::json!({ "text": "raw" }))
            } else {
                HttpResponse::BadRequest().body("unexpected part")
            }
        });

        let text = transcriber(base_url, Duration::from_secs(5))
            .transcribe(b"plain bytes".to_vec(), AudioFormat::Unknown)
            .await
            .unwrap();
        assert_eq!(text, "raw");
    }
}
