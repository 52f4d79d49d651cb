//! # Audio Decoder Adapter
//!
//! Turns the concatenated session payload into canonical [`Pcm`].
//!
//! ## Decode Strategies:
//! A [`FormatHint`] tells the decoder how to interpret the bytes. The
//! pipeline tries a fixed, ordered list of hints (see
//! [`DecoderConfig::strategies`](crate::config::DecoderConfig::strategies))
//! and keeps the first success:
//! 1. **Container**: probe the ingress container (e.g. `webm`)
//! 2. **Container + codec**: the same container with an explicit codec
//!    parameter in the MIME hint (e.g. `audio/webm;codecs=opus`)
//! 3. **Raw PCM**: interpret the payload as little-endian 16-bit samples
//!
//! Container decoding is done with `symphonia`; it runs synchronously, so
//! callers on the async runtime should move it to the blocking pool.
//!
//! The codec in strategy 2 is only a probe hint. It can help the probe pick a
//! demuxer but adds no codec of its own: a track whose codec symphonia has no
//! decoder for (Opus among them) fails both container strategies the same way.
//! The raw strategy refuses payloads that start with a known container
//! signature, so such a recording ends as a decode failure instead of being
//! read as noise.

use crate::audio::pcm::Pcm;
use crate::error::DecodeError;
use std::fmt;
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// How to interpret an encoded payload.
#[derive(Debug, Clone, PartialEq)]
pub enum FormatHint {
    /// A container file, optionally with a named codec
    Container {
        extension: String,
        codec: Option<String>,
    },
    /// Headerless little-endian 16-bit PCM
    RawPcm { sample_rate: u32, channels: u16 },
}

impl FormatHint {
    /// MIME type used as a probe hint, e.g. `audio/webm;codecs=opus`.
    pub fn mime_type(&self) -> Option<String> {
        match self {
            FormatHint::Container { extension, codec: Some(codec) } => {
                Some(format!("audio/{};codecs={}", extension, codec))
            }
            FormatHint::Container { extension, codec: None } => Some(format!("audio/{}", extension)),
            FormatHint::RawPcm { .. } => None,
        }
    }
}

impl fmt::Display for FormatHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatHint::Container { extension, codec: Some(codec) } => write!(f, "{}/{}", extension, codec),
            FormatHint::Container { extension, codec: None } => f.write_str(extension),
            FormatHint::RawPcm { sample_rate, channels } => {
                write!(f, "raw-s16le/{}Hz/{}ch", sample_rate, channels)
            }
        }
    }
}

/// Decodes encoded audio bytes into canonical PCM.
pub trait AudioDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8], hint: &FormatHint) -> Result<Pcm, DecodeError>;
}

/// Production decoder backed by symphonia's probe and codec registries.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self
    }

    fn decode_container(&self, bytes: &[u8], hint: &FormatHint) -> Result<Pcm, DecodeError> {
        let mut probe_hint = Hint::new();
        if let FormatHint::Container { extension, .. } = hint {
            probe_hint.with_extension(extension);
        }
        if let Some(mime) = hint.mime_type() {
            probe_hint.mime_type(&mime);
        }

        let source = Cursor::new(bytes.to_vec());
        let mss = MediaSourceStream::new(Box::new(source), MediaSourceStreamOptions::default());

        let probed = symphonia::default::get_probe()
            .format(&probe_hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| DecodeError::Probe(e.to_string()))?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::MissingTrack)?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let mut decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| DecodeError::UnsupportedCodec(e.to_string()))?;

        let mut interleaved: Vec<i16> = Vec::new();
        let mut sample_buf: Option<SampleBuffer<i16>> = None;
        let mut channels = params.channels.map(|c| c.count()).unwrap_or(1);
        let mut sample_rate = params.sample_rate.unwrap_or(0);

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) if !interleaved.is_empty() => {
                    // Recorder output is often cut mid-cluster; keep what decoded
                    warn!(error = %e, samples = interleaved.len(), "stream ended early");
                    break;
                }
                Err(e) => return Err(DecodeError::Read(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(audio_buf) => {
                    let spec = *audio_buf.spec();
                    let needed = audio_buf.capacity() * spec.channels.count();
                    if sample_buf.as_ref().map_or(true, |buf| buf.capacity() < needed) {
                        sample_buf = Some(SampleBuffer::<i16>::new(audio_buf.capacity() as u64, spec));
                    }

                    if let Some(buf) = sample_buf.as_mut() {
                        buf.copy_interleaved_ref(audio_buf);
                        interleaved.extend_from_slice(buf.samples());
                    }

                    channels = spec.channels.count();
                    sample_rate = spec.rate;
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    debug!(error = %e, "skipping undecodable packet");
                    continue;
                }
                Err(e) => return Err(DecodeError::Read(e.to_string())),
            }
        }

        if interleaved.is_empty() || sample_rate == 0 {
            return Err(DecodeError::NoSamples);
        }

        Ok(Pcm::from_interleaved(&interleaved, channels, sample_rate))
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, bytes: &[u8], hint: &FormatHint) -> Result<Pcm, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        match hint {
            FormatHint::Container { .. } => self.decode_container(bytes, hint),
            FormatHint::RawPcm { sample_rate, channels } => {
                if let Some(container) = container_signature(bytes) {
                    return Err(DecodeError::ContainerPayload(container));
                }
                Pcm::from_le_bytes(bytes, *channels as usize, *sample_rate)
                    .ok_or(DecodeError::MisalignedPcm(bytes.len()))
            }
        }
    }
}

/// Name of the container whose magic bytes open `bytes`, if any.
pub fn container_signature(bytes: &[u8]) -> Option<&'static str> {
    const SIGNATURES: [(&[u8], &str); 5] = [
        (&[0x1A, 0x45, 0xDF, 0xA3], "webm"),
        (b"RIFF", "wav"),
        (b"OggS", "ogg"),
        (b"fLaC", "flac"),
        (b"ID3", "mp3"),
    ];

    SIGNATURES
        .iter()
        .find(|(magic, _)| bytes.starts_with(magic))
        .map(|(_, name)| *name)
}

/// Try each strategy in order and return the first successful decode.
///
/// ## Errors:
/// [`DecodeError::Exhausted`] when every strategy failed; each individual
/// failure is logged.
pub fn decode_with_fallback(
    decoder: &dyn AudioDecoder,
    bytes: &[u8],
    strategies: &[FormatHint],
) -> Result<Pcm, DecodeError> {
    for (attempt, hint) in strategies.iter().enumerate() {
        match decoder.decode(bytes, hint) {
            Ok(pcm) => {
                debug!(
                    strategy = %hint,
                    attempt = attempt + 1,
                    samples = pcm.samples.len(),
                    sample_rate = pcm.sample_rate,
                    "decoded session audio"
                );
                return Ok(pcm);
            }
            Err(e) => {
                warn!(strategy = %hint, attempt = attempt + 1, error = %e, "decode strategy failed");
            }
        }
    }

    Err(DecodeError::Exhausted {
        attempts: strategies.len(),
    })
}
