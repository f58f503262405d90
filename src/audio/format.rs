//! # Audio Format Detection
//!
//! Identifies the container/codec of an incoming audio chunk from its leading
//! "magic bytes". Only a fixed-size prefix is ever inspected, so detection cost
//! does not grow with the chunk size.
//!
//! ## Recognised Signatures:
//! - **WAV**: `RIFF` at offset 0 and `WAVE` at offset 8
//! - **WebM/Matroska**: EBML header `1A 45 DF A3`
//! - **Ogg**: `OggS`
//! - **FLAC**: `fLaC`
//! - **MP4/M4A**: `ftyp` box at offset 4
//! - **MP3**: `ID3` tag or an MPEG audio frame sync (11 set bits)
//!
//! Anything else (including empty or truncated input) is [`AudioFormat::Unknown`].
//! That is an expected outcome for network input, not an error.

use byteorder::{BigEndian, ByteOrder};
use serde::Serialize;
use std::fmt;

/// Number of leading bytes the detector is allowed to look at.
pub const SIGNATURE_PREFIX_LEN: usize = 12;

const EBML_MAGIC: u32 = 0x1A45_DFA3;

/// Container/codec tag derived from a chunk's binary signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    WebM,
    Ogg,
    Mp3,
    Flac,
    Mp4,
    Unknown,
}

impl AudioFormat {
    /// File extension used for filename hints and decoder probing.
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::WebM => "webm",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Flac => "flac",
            AudioFormat::Mp4 => "m4a",
            AudioFormat::Unknown => "bin",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::WebM => "audio/webm",
            AudioFormat::Ogg => "audio/ogg",
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Mp4 => "audio/mp4",
            AudioFormat::Unknown => "application/octet-stream",
        }
    }

    /// Multipart filename for one uploaded chunk, e.g. `chunk.wav`.
    pub fn upload_file_name(&self) -> String {
        format!("chunk.{}", self.extension())
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, AudioFormat::Unknown)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioFormat::Unknown => write!(f, "unknown"),
            known => write!(f, "{}", known.extension()),
        }
    }
}

/// Detect the format of `buffer` from its signature.
///
/// Pure function: no I/O, no allocation, never panics on short input.
pub fn detect(buffer: &[u8]) -> AudioFormat {
    let prefix = &buffer[..buffer.len().min(SIGNATURE_PREFIX_LEN)];

    if prefix.len() >= 12 && &prefix[0..4] == b"RIFF" && &prefix[8..12] == b"WAVE" {
        return AudioFormat::Wav;
    }
    if prefix.len() >= 4 && BigEndian::read_u32(&prefix[0..4]) == EBML_MAGIC {
        return AudioFormat::WebM;
    }
    if prefix.starts_with(b"OggS") {
        return AudioFormat::Ogg;
    }
    if prefix.starts_with(b"fLaC") {
        return AudioFormat::Flac;
    }
    if prefix.len() >= 8 && &prefix[4..8] == b"ftyp" {
        return AudioFormat::Mp4;
    }
    if prefix.starts_with(b"ID3") || is_mpeg_frame_sync(prefix) {
        return AudioFormat::Mp3;
    }

    AudioFormat::Unknown
}

/// MPEG audio frames start with 11 set bits; layer bits `00` are reserved.
fn is_mpeg_frame_sync(prefix: &[u8]) -> bool {
    prefix.len() >= 2 && prefix[0] == 0xFF && (prefix[1] & 0xE0) == 0xE0 && (prefix[1] & 0x06) != 0
}
