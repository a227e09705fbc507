//! OGG/Vorbis audio encoding.

use std::num::{NonZeroU8, NonZeroU32};

use crate::{Error, Result};

/// Encode interleaved f32 samples as an in-memory OGG/Vorbis stream.
pub fn encode_ogg(samples: &[f32], sample_rate: u32, num_channels: u16) -> Result<Vec<u8>> {
    let rate = NonZeroU32::new(sample_rate)
        .ok_or_else(|| Error::Audio("vorbis: sample rate must be non-zero".into()))?;
    let channels = u8::try_from(num_channels)
        .ok()
        .and_then(NonZeroU8::new)
        .ok_or_else(|| Error::Audio(format!("vorbis: unsupported channel count {num_channels}")))?;

    let mut encoder = vorbis_rs::VorbisEncoderBuilder::new(rate, channels, Vec::new())
        .map_err(|e| Error::Audio(format!("vorbis init: {e}")))?
        .build()
        .map_err(|e| Error::Audio(format!("vorbis build: {e}")))?;

    // Convert interleaved to channel-separated
    let planar: Vec<Vec<f32>> = (0..num_channels as usize)
        .map(|ch| {
            samples
                .iter()
                .skip(ch)
                .step_by(num_channels as usize)
                .copied()
                .collect()
        })
        .collect();

    if !samples.is_empty() {
        encoder
            .encode_audio_block(&planar)
            .map_err(|e| Error::Audio(format!("vorbis encode: {e}")))?;
    }

    encoder
        .finish()
        .map_err(|e| Error::Audio(format!("vorbis finish: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ogg_stream_header() {
        let samples: Vec<f32> = (0..4800)
            .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / 24000.0).sin() * 0.5)
            .collect();
        let bytes = encode_ogg(&samples, 24000, 1).unwrap();
        assert_eq!(&bytes[..4], b"OggS");
    }

    #[test]
    fn test_zero_rate_rejected() {
        assert!(matches!(encode_ogg(&[0.0], 0, 1), Err(Error::Audio(_))));
    }
}
