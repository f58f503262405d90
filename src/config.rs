//! # Configuration Management
//!
//! Loads the relay's configuration from several layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` next to the binary
//! - Environment variables with the `APP_` prefix
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Platform variables: `HOST`, `PORT`, `OPENAI_API_KEY`
//! 2. Prefixed variables, nested keys separated by `__`
//!    (`APP_SERVER__PORT=9000`, `APP_TRANSCRIPTION__TIMEOUT_SECS=10`)
//! 3. Configuration file (`config.toml`)
//! 4. Default values
//!
//! String-typed choices (`audio.unknown_format_policy`, `transcription.backend`) are kept
//! as strings in the file format and parsed into enums by the accessors, so a typo is
//! reported by [`AppConfig::validate`] with a readable message.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Root configuration, grouped by concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub transcription: TranscriptionConfig,
    pub performance: PerformanceConfig,
}

/// Listener and connection-liveness settings.
///
/// ## Fields:
/// - `host` / `port`: bind address (`0.0.0.0` to accept remote clients)
/// - `heartbeat_interval_secs`: how often the server pings each WebSocket client
/// - `client_timeout_secs`: silence after which a client is considered gone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
}

/// Audio pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate of the canonical WAV sent to the backend
    pub sample_rate: u32,
    /// What to do with chunks whose format cannot be detected: "passthrough" or "reject"
    pub unknown_format_policy: String,
    /// Upper bound on a single binary frame; larger chunks are rejected per chunk
    pub max_chunk_bytes: usize,
}

/// Speech-to-text backend settings.
///
/// ## Backends:
/// - `openai`: OpenAI-compatible `/audio/transcriptions` endpoint (needs `api_key`)
/// - `static`: answers every chunk with `static_text` (local runs and tests)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub backend: String,
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// ISO 639-1 hint; empty lets the backend detect the language
    pub language: String,
    pub timeout_secs: u64,
    pub static_text: String,
}

/// Capacity limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Upgrades beyond this many live connections are refused with 503
    pub max_connections: usize,
    /// Process-wide cap on in-flight calls to the transcription backend
    pub max_concurrent_transcriptions: usize,
}

/// Policy applied when the format detector returns `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownFormatPolicy {
    /// Forward the raw bytes to the backend and let it try
    Passthrough,
    /// Answer with an error frame without calling the backend
    Reject,
}

impl FromStr for UnknownFormatPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "passthrough" | "best_effort" => Ok(UnknownFormatPolicy::Passthrough),
            "reject" | "strict" => Ok(UnknownFormatPolicy::Reject),
            _ => Err(format!("Unknown format policy: {}", s)),
        }
    }
}

/// Which [`crate::transcription::Transcriber`] implementation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptionBackend {
    OpenAi,
    Static,
}

impl FromStr for TranscriptionBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(TranscriptionBackend::OpenAi),
            "static" | "mock" => Ok(TranscriptionBackend::Static),
            _ => Err(format!("Unknown transcription backend: {}", s)),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                heartbeat_interval_secs: 5,
                client_timeout_secs: 30,
            },
            audio: AudioConfig {
                sample_rate: 16_000, // what Whisper-family models expect
                unknown_format_policy: "passthrough".to_string(),
                max_chunk_bytes: 10 * 1024 * 1024,
            },
            transcription: TranscriptionConfig {
                backend: "static".to_string(),
                api_key: String::new(),
                base_url: "https://api.openai.com/v1".to_string(),
                model: "whisper-1".to_string(),
                language: String::new(),
                timeout_secs: 30,
                static_text: String::new(),
            },
            performance: PerformanceConfig {
                max_connections: 100,
                max_concurrent_transcriptions: 4,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        // Deployment platforms set these without our prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }
        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }
        if let Ok(api_key) = env::var("OPENAI_API_KEY") {
            settings = settings.set_override("transcription.api_key", api_key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval must be greater than 0"));
        }
        if self.server.client_timeout_secs <= self.server.heartbeat_interval_secs {
            return Err(anyhow::anyhow!("Client timeout must be longer than the heartbeat interval"));
        }
        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate must be greater than 0"));
        }
        if self.audio.max_chunk_bytes == 0 {
            return Err(anyhow::anyhow!("Max chunk size must be greater than 0"));
        }
        if self.transcription.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Transcription timeout must be greater than 0"));
        }
        if self.performance.max_connections == 0 {
            return Err(anyhow::anyhow!("Max connections must be greater than 0"));
        }
        if self.performance.max_concurrent_transcriptions == 0 {
            return Err(anyhow::anyhow!("Max concurrent transcriptions must be greater than 0"));
        }

        self.unknown_format_policy().map_err(|e| anyhow::anyhow!(e))?;
        let backend = self.transcription_backend().map_err(|e| anyhow::anyhow!(e))?;
        if backend == TranscriptionBackend::OpenAi && self.transcription.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "The openai backend needs an API key (OPENAI_API_KEY or APP_TRANSCRIPTION__API_KEY)"
            ));
        }

        Ok(())
    }

    /// Settings that are valid but probably not what an operator wants, one line each.
    pub fn startup_warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.transcription_backend() == Ok(TranscriptionBackend::Static) {
            if self.transcription.static_text.is_empty() {
                warnings.push(
                    "Static transcription backend with empty static_text: every audio chunk will be answered \
                     with an empty frame. Set APP_TRANSCRIPTION__BACKEND=openai for real transcripts"
                        .to_string(),
                );
            } else {
                warnings.push(format!(
                    "Static transcription backend: every audio chunk will be answered with {:?}",
                    self.transcription.static_text
                ));
            }
        }
        warnings
    }

    pub fn unknown_format_policy(&self) -> Result<UnknownFormatPolicy, String> {
        self.audio.unknown_format_policy.parse()
    }

    pub fn transcription_backend(&self) -> Result<TranscriptionBackend, String> {
        self.transcription.backend.parse()
    }

    pub fn transcription_timeout(&self) -> Duration {
        Duration::from_secs(self.transcription.timeout_secs)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Copy of the configuration that is safe to expose over HTTP.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.transcription.api_key.is_empty() {
            config.transcription.api_key = "***".to_string();
        }
        config
    }
}
