//! # Transcription Module
//!
//! Boundary to the external speech-to-text capability.
//!
//! ## Key Components:
//! - **Transcriber** trait: one backend call, canonical audio in, text or error out
//! - **TranscriptionClient**: adds the shared concurrency cap and the call timeout
//! - **Backends**: `openai` (OpenAI-compatible HTTP API) and `static` (fixed text)
//! - **Factory**: picks the backend from configuration

pub mod client;     // Transcriber trait, client wrapper, error taxonomy
pub mod factory;    // Backend selection from AppConfig
pub mod openai;     // OpenAI-compatible HTTP backend
pub mod stub;       // Fixed-text backend

pub use client::{Transcriber, TranscriptionClient, TranscriptionError, TranscriptionText};
pub use factory::{build_client, build_transcriber, with_bounds};
pub use openai::OpenAiTranscriber;
pub use stub::StaticTranscriber;
