//! # Transcoding to the Canonical Format
//!
//! Converts a whole in-memory chunk from its detected format into the canonical
//! format accepted by the transcription backend: 16-bit PCM WAV, mono, at the
//! configured sample rate (16 kHz by default).
//!
//! ## Pipeline:
//! 1. **Probe + demux** with symphonia (the detected format is passed as a hint)
//! 2. **Decode** every packet of the first audio track into f32 samples
//!    (symphonia codecs, or libopus via `audiopus` for Opus tracks)
//! 3. **Down-mix** interleaved frames to mono
//! 4. **Resample** with rubato when the source rate differs
//! 5. **Encode** the result as a PCM WAV file with the `wav` crate
//!
//! Failures are [`TranscodeError`]s. They are per-chunk problems: the session
//! reports them to the client and keeps the connection open.

use crate::audio::format::AudioFormat;
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions, CODEC_TYPE_NULL, CODEC_TYPE_OPUS};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// The format every chunk is converted to before transcription.
pub const CANONICAL_FORMAT: AudioFormat = AudioFormat::Wav;

const RESAMPLE_CHUNK_SIZE: usize = 1024;
const MAX_RESAMPLE_FLUSHES: usize = 4;

/// libopus always decodes at 48 kHz here.
const OPUS_SAMPLE_RATE: u32 = 48_000;
/// 120 ms at 48 kHz, the longest frame an Opus packet can carry.
const OPUS_MAX_FRAME_SAMPLES: usize = 5760;

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("unrecognised audio container: {0}")]
    Probe(String),
    #[error("no audio track found")]
    NoAudioTrack,
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("corrupt audio data: {0}")]
    Decode(String),
    #[error("no audio samples decoded")]
    Empty,
    #[error("resampling failed: {0}")]
    Resample(String),
    #[error("cannot encode to {0}")]
    UnsupportedTarget(AudioFormat),
    #[error("encoding failed: {0}")]
    Encode(String),
}

/// Decoded, mono audio ready for encoding.
#[derive(Debug, Clone)]
pub struct PcmAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Stateless converter into the canonical format.
#[derive(Debug, Clone, Copy)]
pub struct Transcoder {
    target_sample_rate: u32,
}

impl Default for Transcoder {
    fn default() -> Self {
        Self::new(16_000)
    }
}

impl Transcoder {
    pub fn new(target_sample_rate: u32) -> Self {
        Self { target_sample_rate }
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Convert `buffer` from `from` into `to`.
    ///
    /// Identical formats short-circuit and return the input untouched so that
    /// already-canonical audio is never re-encoded.
    pub fn transcode(&self, buffer: &[u8], from: AudioFormat, to: AudioFormat) -> Result<Vec<u8>, TranscodeError> {
        if from == to {
            return Ok(buffer.to_vec());
        }
        if to != CANONICAL_FORMAT {
            return Err(TranscodeError::UnsupportedTarget(to));
        }

        let decoded = decode(buffer, from)?;
        let source_rate = decoded.sample_rate;
        let samples = if source_rate != self.target_sample_rate {
            resample(&decoded.samples, source_rate, self.target_sample_rate)?
        } else {
            decoded.samples
        };

        debug!(
            from = %from,
            source_rate,
            target_rate = self.target_sample_rate,
            samples = samples.len(),
            "Transcoded chunk to canonical WAV"
        );

        encode_wav(&samples, self.target_sample_rate)
    }
}

/// Decode any container/codec symphonia understands into mono f32 samples.
///
/// Opus tracks (Ogg Opus, WebM/Opus from browser recorders) are demuxed by
/// symphonia and decoded with libopus through `audiopus`.
pub fn decode(buffer: &[u8], format: AudioFormat) -> Result<PcmAudio, TranscodeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(buffer.to_vec())), Default::default());

    let mut hint = Hint::new();
    if format.is_known() {
        hint.with_extension(format.extension());
        hint.mime_type(format.mime_type());
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| TranscodeError::Probe(e.to_string()))?;
    let mut reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(TranscodeError::NoAudioTrack)?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let pcm = if codec_params.codec == CODEC_TYPE_OPUS {
        decode_opus(reader.as_mut(), track_id, &codec_params)?
    } else {
        decode_symphonia(reader.as_mut(), track_id, &codec_params)?
    };

    if pcm.samples.is_empty() {
        return Err(TranscodeError::Empty);
    }

    debug!(
        codec = ?codec_params.codec,
        sample_rate = pcm.sample_rate,
        samples = pcm.samples.len(),
        "Decoded audio chunk"
    );
    Ok(pcm)
}

/// Next packet of `track_id`, or `None` once the container is exhausted.
fn next_track_packet(reader: &mut dyn FormatReader, track_id: u32) -> Result<Option<Packet>, TranscodeError> {
    loop {
        match reader.next_packet() {
            Ok(packet) if packet.track_id() == track_id => return Ok(Some(packet)),
            Ok(_) => continue,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(SymphoniaError::ResetRequired) => return Ok(None),
            Err(e) => return Err(TranscodeError::Decode(e.to_string())),
        }
    }
}

fn decode_symphonia(
    reader: &mut dyn FormatReader,
    track_id: u32,
    codec_params: &CodecParameters,
) -> Result<PcmAudio, TranscodeError> {
    let mut decoder = symphonia::default::get_codecs()
        .make(codec_params, &DecoderOptions::default())
        .map_err(|e| TranscodeError::UnsupportedCodec(e.to_string()))?;

    let mut sample_rate = codec_params.sample_rate;
    let mut samples: Vec<f32> = Vec::new();

    while let Some(packet) = next_track_packet(reader, track_id)? {
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!(error = %e, "Skipping corrupt audio packet");
                continue;
            }
            Err(e) => return Err(TranscodeError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        let frames = decoded.frames();
        if frames == 0 {
            continue;
        }

        let mut sample_buf = SampleBuffer::<f32>::new(frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        let interleaved = sample_buf.samples();
        let frame_channels = spec.channels.count().max(1);

        if frame_channels > 1 {
            samples.extend(
                interleaved
                    .chunks(frame_channels)
                    .map(|frame| frame.iter().sum::<f32>() / frame_channels as f32),
            );
        } else {
            samples.extend_from_slice(interleaved);
        }
    }

    let sample_rate = sample_rate.ok_or_else(|| TranscodeError::Decode("unknown sample rate".to_string()))?;
    Ok(PcmAudio { samples, sample_rate })
}

/// Decode an Opus track at 48 kHz. The decoder is opened mono, so libopus folds
/// stereo streams down itself. The encoder pre-skip is trimmed from the start.
fn decode_opus(
    reader: &mut dyn FormatReader,
    track_id: u32,
    codec_params: &CodecParameters,
) -> Result<PcmAudio, TranscodeError> {
    use audiopus::{coder::Decoder as OpusDecoder, packet::Packet as OpusPacket, Channels, MutSignals, SampleRate};

    let mut decoder = OpusDecoder::new(SampleRate::Hz48000, Channels::Mono)
        .map_err(|e| TranscodeError::UnsupportedCodec(format!("opus: {}", e)))?;
    let mut frame = vec![0i16; OPUS_MAX_FRAME_SAMPLES];
    let mut samples: Vec<f32> = Vec::new();

    while let Some(packet) = next_track_packet(reader, track_id)? {
        let data = packet.buf();
        if data.is_empty() {
            continue;
        }

        let opus_packet = match OpusPacket::try_from(data) {
            Ok(opus_packet) => opus_packet,
            Err(e) => {
                warn!(error = %e, "Skipping corrupt opus packet");
                continue;
            }
        };
        let output = MutSignals::try_from(&mut frame[..]).map_err(|e| TranscodeError::Decode(e.to_string()))?;

        match decoder.decode(Some(opus_packet), output, false) {
            Ok(decoded) => samples.extend(frame[..decoded].iter().map(|&s| f32::from(s) / 32768.0)),
            Err(e) => warn!(error = %e, "Skipping corrupt opus packet"),
        }
    }

    let pre_skip = codec_params.delay.unwrap_or(0) as usize;
    samples.drain(..pre_skip.min(samples.len()));

    Ok(PcmAudio {
        samples,
        sample_rate: OPUS_SAMPLE_RATE,
    })
}

/// Resample mono audio from `from_rate` to `to_rate`.
///
/// Whole input chunks go through `process`; the trailing partial chunk and the
/// filter delay are flushed with `process_partial`. The leading `output_delay()`
/// samples are dropped, so the output is aligned with the input and always holds
/// `round(len * to_rate / from_rate)` samples.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, TranscodeError> {
    use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

    if samples.is_empty() {
        return Ok(Vec::new());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = f64::from(to_rate) / f64::from(from_rate);
    let expected = (samples.len() as f64 * ratio).round() as usize;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK_SIZE, 1)
        .map_err(|e| TranscodeError::Resample(e.to_string()))?;

    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(delay + expected + RESAMPLE_CHUNK_SIZE);
    let mut chunks = samples.chunks_exact(RESAMPLE_CHUNK_SIZE);
    for chunk in &mut chunks {
        let resampled = resampler
            .process(&[chunk], None)
            .map_err(|e| TranscodeError::Resample(e.to_string()))?;
        extend_mono(&mut output, resampled);
    }

    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let resampled = resampler
            .process_partial(Some(&[remainder][..]), None)
            .map_err(|e| TranscodeError::Resample(e.to_string()))?;
        extend_mono(&mut output, resampled);
    }

    // each empty call pushes one chunk of zeros through the filter
    let mut flushes = 0;
    while output.len() < delay + expected && flushes < MAX_RESAMPLE_FLUSHES {
        let resampled = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| TranscodeError::Resample(e.to_string()))?;
        extend_mono(&mut output, resampled);
        flushes += 1;
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);
    Ok(output)
}

fn extend_mono(output: &mut Vec<f32>, resampled: Vec<Vec<f32>>) {
    if let Some(channel) = resampled.first() {
        output.extend_from_slice(channel);
    }
}

/// Encode mono f32 samples as a 16-bit PCM WAV file.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, TranscodeError> {
    let pcm: Vec<i16> = samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)
        .collect();

    let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, sample_rate, 16);
    let mut out = Cursor::new(Vec::with_capacity(44 + pcm.len() * 2));
    wav::write(header, &wav::BitDepth::Sixteen(pcm), &mut out).map_err(|e| TranscodeError::Encode(e.to_string()))?;

    Ok(out.into_inner())
}
