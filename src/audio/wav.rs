//! In-memory WAV encoding and decoding.

use std::io::Cursor;

use crate::Result;

/// Sample encoding inside the WAV container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavEncoding {
    /// Signed 16-bit PCM.
    Pcm16,
    /// IEEE 32-bit float.
    Float32,
}

/// Encode mono or interleaved f32 samples in [-1, 1] as a WAV byte buffer.
pub fn encode_wav(
    samples: &[f32],
    sample_rate: u32,
    num_channels: u16,
    encoding: WavEncoding,
) -> Result<Vec<u8>> {
    let spec = match encoding {
        WavEncoding::Pcm16 => hound::WavSpec {
            channels: num_channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        },
        WavEncoding::Float32 => hound::WavSpec {
            channels: num_channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        },
    };

    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    match encoding {
        WavEncoding::Pcm16 => {
            for &s in samples {
                writer.write_sample((s * i16::MAX as f32).round() as i16)?;
            }
        }
        WavEncoding::Float32 => {
            for &s in samples {
                writer.write_sample(s)?;
            }
        }
    }
    writer.finalize()?;
    Ok(cursor.into_inner())
}

/// Decode a WAV byte buffer, return (samples, sample_rate, num_channels).
///
/// Samples are interleaved f32 in [-1, 1].
pub fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32, u16)> {
    let reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = (1u32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    Ok((samples, spec.sample_rate, spec.channels))
}
