//! # Canonical PCM
//!
//! Every decoder produces, and every speech collaborator consumes, the same
//! codec-independent waveform: mono, 16-bit signed samples at a known sample
//! rate. This module owns that type and the conversions around it.
//!
//! ## Key Functions:
//! - **Down-mixing**: interleaved multi-channel audio to mono
//! - **Format conversion**: between `f32` in [-1.0, 1.0] and `i16`
//! - **Raw parsing**: little-endian 16-bit PCM bytes to samples
//! - **WAV I/O**: in-memory WAV encode/decode for the wire and for storage

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// Canonical decoded waveform.
#[derive(Debug, Clone, PartialEq)]
pub struct Pcm {
    /// Mono samples, 16-bit signed
    pub samples: Vec<i16>,

    /// Samples per second
    pub sample_rate: u32,
}

impl Pcm {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Build canonical PCM from interleaved samples of any channel count.
    pub fn from_interleaved(interleaved: &[i16], channels: usize, sample_rate: u32) -> Self {
        Self::new(downmix_to_mono(interleaved, channels), sample_rate)
    }

    /// Parse raw little-endian 16-bit PCM bytes.
    ///
    /// ## Returns:
    /// - **None**: the byte count is odd, so the data cannot be 16-bit samples
    pub fn from_le_bytes(data: &[u8], channels: usize, sample_rate: u32) -> Option<Self> {
        if data.len() % 2 != 0 {
            return None;
        }

        let mut cursor = Cursor::new(data);
        let mut interleaved = Vec::with_capacity(data.len() / 2);
        while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
            interleaved.push(sample);
        }

        Some(Self::from_interleaved(&interleaved, channels, sample_rate))
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Root-mean-square level in [0.0, 1.0]; near zero means silence.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let floats = pcm_to_float(&self.samples);
        let energy: f32 = floats.iter().map(|s| s * s).sum();
        (energy / floats.len() as f32).sqrt()
    }

    /// Duration = number_of_samples / sample_rate
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Encode as a 16-bit mono WAV file held in memory.
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>, hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
            for &sample in &self.samples {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
        }

        Ok(cursor.into_inner())
    }

    /// Decode a WAV file held in memory, down-mixing to mono.
    ///
    /// Integer WAVs of any other depth are rescaled to 16 bits; float WAVs
    /// are converted with [`float_to_pcm`].
    pub fn from_wav_bytes(data: &[u8]) -> Result<Self, hound::Error> {
        let reader = hound::WavReader::new(Cursor::new(data))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<i16> = match spec.sample_format {
            hound::SampleFormat::Int if spec.bits_per_sample == 16 => reader
                .into_samples::<i16>()
                .collect::<Result<Vec<_>, _>>()?,
            hound::SampleFormat::Int => {
                let bits = spec.bits_per_sample as u32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| scale_to_i16(v, bits)))
                    .collect::<Result<Vec<_>, _>>()?
            }
            hound::SampleFormat::Float => {
                let floats = reader
                    .into_samples::<f32>()
                    .collect::<Result<Vec<_>, _>>()?;
                float_to_pcm(&floats)
            }
        };

        Ok(Self::from_interleaved(&interleaved, channels, spec.sample_rate))
    }
}

/// Rescale an integer sample of `bits` depth to the 16-bit range.
fn scale_to_i16(sample: i32, bits: u32) -> i16 {
    if bits >= 16 {
        (sample >> (bits - 16)) as i16
    } else {
        (sample << (16 - bits)) as i16
    }
}

/// Average interleaved channels into one.
pub fn downmix_to_mono(interleaved: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

/// Scale from 16-bit integer range [-32768, 32767] to float range [-1.0, 1.0].
pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// Convert 32-bit float samples back to 16-bit PCM, clamping out-of-range values.
pub fn float_to_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let scaled = sample * 32768.0;
            scaled.clamp(-32768.0, 32767.0) as i16
        })
        .collect()
}
