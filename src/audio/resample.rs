//! Sample-rate conversion with rubato.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    calculate_cutoff,
};

use crate::{Error, Result};

const SINC_LEN: usize = 256;

/// Resample mono audio from `from_sr` to `to_sr` in a single pass.
///
/// The output holds `round(len * to_sr / from_sr)` samples, aligned with the
/// input (the filter delay is removed).
pub fn resample(samples: &[f32], from_sr: u32, to_sr: u32) -> Result<Vec<f32>> {
    if from_sr == to_sr || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    if from_sr == 0 || to_sr == 0 {
        return Err(Error::Audio(format!("cannot resample {from_sr} Hz -> {to_sr} Hz")));
    }

    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: calculate_cutoff(SINC_LEN, window),
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window,
    };

    let ratio = to_sr as f64 / from_sr as f64;
    let mut input = samples.to_vec();
    input.resize(samples.len() + SINC_LEN, 0.0);

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, input.len(), 1)
        .map_err(|e| Error::Audio(format!("resampler init: {e}")))?;
    let delay = resampler.output_delay();
    let wanted = delay + (samples.len() as f64 * ratio).round() as usize;

    let mut resampled = resampler
        .process(&[input], None)
        .map_err(|e| Error::Audio(format!("resampling failed: {e}")))?
        .swap_remove(0);
    // feed silence until the delayed tail of the input has come out
    while resampled.len() < wanted {
        let flushed = resampler
            .process_partial::<Vec<f32>>(None, None)
            .map_err(|e| Error::Audio(format!("resampler flush failed: {e}")))?
            .swap_remove(0);
        if flushed.is_empty() {
            return Err(Error::Audio(format!(
                "resampler stalled at {} of {wanted} samples",
                resampled.len()
            )));
        }
        resampled.extend(flushed);
    }

    resampled.truncate(wanted);
    resampled.drain(..delay);
    Ok(resampled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sr: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (i as f32 * freq * std::f32::consts::TAU / sr as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_same_rate_is_identity() {
        let input = sine(440.0, 16000, 100);
        assert_eq!(resample(&input, 16000, 16000).unwrap(), input);
    }

    #[test]
    fn test_downsample_length_and_level() {
        let input = sine(440.0, 44100, 4410);
        let output = resample(&input, 44100, 22050).unwrap();
        assert_eq!(output.len(), 2205);
        let peak = output[500..1700].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((0.4..0.6).contains(&peak), "peak = {peak}");
    }

    #[test]
    fn test_lengths_follow_rate_ratio() {
        let cases = [
            (16000, 8000, 1600),
            (16000, 24000, 1600),
            (44100, 22050, 44100),
            (24000, 44100, 7),
        ];
        for (from, to, len) in cases {
            let input = sine(300.0, from, len);
            let output = resample(&input, from, to).unwrap();
            let want = (len as f64 * to as f64 / from as f64).round() as usize;
            assert_eq!(output.len(), want, "{from} -> {to}, {len} samples");
        }
    }

    #[test]
    fn test_tail_is_kept() {
        // constant signal: the last output samples must still carry it
        let input = vec![0.5f32; 1600];
        let output = resample(&input, 16000, 8000).unwrap();
        assert_eq!(output.len(), 800);
        let tail = output[700..780].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(tail > 0.4, "tail = {tail}");
    }

    #[test]
    fn test_upsample_length() {
        let input = sine(200.0, 16000, 1600);
        let output = resample(&input, 16000, 24000).unwrap();
        assert_eq!(output.len(), 2400);
    }
}
