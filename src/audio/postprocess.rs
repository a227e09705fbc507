//! Raw waveform → encoded audio payload.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use super::{WavEncoding, encode_ogg, encode_wav, resample};
use crate::pipeline::RawWaveform;
use crate::{Error, Result};

/// Output sample rates a caller may request.
pub const SAMPLE_RATE_RANGE: RangeInclusive<u32> = 8000..=48000;

/// Container and sample encoding of the returned audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// WAV, signed 16-bit PCM.
    #[default]
    Wav,
    /// WAV, 32-bit float.
    WavF32,
    /// OGG/Vorbis.
    Ogg,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 3] = [AudioFormat::Wav, AudioFormat::WavF32, AudioFormat::Ogg];

    /// Parse a format name (`wav`, `wav_f32`, `ogg`).
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == s)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::WavF32 => "wav_f32",
            AudioFormat::Ogg => "ogg",
        }
    }

    /// File extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav | AudioFormat::WavF32 => "wav",
            AudioFormat::Ogg => "ogg",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller wants back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputOptions {
    pub format: AudioFormat,
    /// Target sample rate. `None` keeps the vocoder's native rate.
    pub sample_rate: Option<u32>,
}

impl OutputOptions {
    pub fn validate(&self) -> Result<()> {
        match self.sample_rate {
            Some(sr) if !SAMPLE_RATE_RANGE.contains(&sr) => Err(Error::InvalidInput(format!(
                "'sample_rate' must be between {} and {}, got {sr}",
                SAMPLE_RATE_RANGE.start(),
                SAMPLE_RATE_RANGE.end()
            ))),
            _ => Ok(()),
        }
    }
}

/// Encoded, transport-ready audio.
#[derive(Debug, Clone)]
pub struct EncodedAudio {
    pub bytes: Vec<u8>,
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u16,
    pub num_samples: usize,
    pub duration_s: f32,
}

/// Validate, resample, clip and encode a waveform.
///
/// Non-finite samples are an [`Error::Encoding`]; they are never zeroed.
pub fn finalize(waveform: &RawWaveform, options: &OutputOptions) -> Result<EncodedAudio> {
    if let Some((index, value)) = waveform
        .samples
        .iter()
        .enumerate()
        .find(|(_, s)| !s.is_finite())
    {
        return Err(Error::Encoding(format!(
            "waveform contains non-finite sample {value} at index {index} of {}",
            waveform.samples.len()
        )));
    }
    options.validate()?;

    let sample_rate = options.sample_rate.unwrap_or(waveform.sample_rate);
    let mut samples = resample(&waveform.samples, waveform.sample_rate, sample_rate)?;

    let mut clipped = 0usize;
    for s in samples.iter_mut() {
        if s.abs() > 1.0 {
            clipped += 1;
            *s = s.clamp(-1.0, 1.0);
        }
    }
    if clipped > 0 {
        tracing::debug!(clipped, "clipped samples to [-1, 1]");
    }

    let channels = 1;
    let bytes = match options.format {
        AudioFormat::Wav => encode_wav(&samples, sample_rate, channels, WavEncoding::Pcm16)?,
        AudioFormat::WavF32 => encode_wav(&samples, sample_rate, channels, WavEncoding::Float32)?,
        AudioFormat::Ogg => encode_ogg(&samples, sample_rate, channels)?,
    };

    Ok(EncodedAudio {
        bytes,
        format: options.format,
        sample_rate,
        channels,
        num_samples: samples.len(),
        duration_s: samples.len() as f32 / sample_rate as f32,
    })
}
