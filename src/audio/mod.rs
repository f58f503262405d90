//! # Audio Processing Module
//!
//! Everything the relay does to a chunk before it reaches the transcription backend.
//!
//! ## Key Components:
//! - **Format Detector**: identifies the container from magic bytes
//! - **Transcoder**: decodes, down-mixes, resamples and re-encodes to canonical WAV
//!
//! ## Canonical Format:
//! - **Container**: WAV (RIFF)
//! - **Encoding**: 16-bit signed PCM, little-endian
//! - **Channels**: Mono
//! - **Sample Rate**: 16kHz by default (`audio.sample_rate`)

pub mod format;       // Magic-byte format detection
pub mod transcoder;   // Decode/resample/encode to canonical WAV

pub use format::{detect, AudioFormat};
pub use transcoder::{TranscodeError, Transcoder, CANONICAL_FORMAT};
