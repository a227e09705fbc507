//! Initial latent noise and sequence masks.

use candle_core::{Device, Tensor};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::{Error, Result, Stage};

/// Largest latent the predictor will allocate (256 MiB of f32).
pub const MAX_LATENT_VALUES: usize = 1 << 26;

/// Standard-normal latent `[1, channels, frames]` from a seeded `ChaCha8Rng`.
///
/// The same seed always yields the same tensor. Oversized requests are a
/// predictor failure rather than an allocation.
pub fn sample_latent(channels: usize, frames: usize, seed: u64) -> Result<Tensor> {
    let len = channels
        .checked_mul(frames)
        .filter(|&len| len <= MAX_LATENT_VALUES)
        .ok_or_else(|| {
            Error::stage(
                Stage::Predictor,
                format!("latent of {channels} x {frames} exceeds {MAX_LATENT_VALUES} values"),
            )
        })?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let data: Vec<f32> = (0..len)
        .map(|_| rng.sample::<f32, _>(StandardNormal))
        .collect();
    Ok(Tensor::from_vec(data, (1, channels, frames), &Device::Cpu)?)
}

/// `[1, 1, max_len]` f32 mask with ones over the first `len` positions.
pub fn length_mask(len: usize, max_len: usize) -> Result<Tensor> {
    let data: Vec<f32> = (0..max_len)
        .map(|i| if i < len { 1.0 } else { 0.0 })
        .collect();
    Ok(Tensor::from_vec(data, (1, 1, max_len), &Device::Cpu)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latent_is_reproducible() {
        let a = sample_latent(4, 8, 42).unwrap();
        let b = sample_latent(4, 8, 42).unwrap();
        let c = sample_latent(4, 8, 43).unwrap();
        let a = a.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let b = b.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let c = c.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn latent_shape_and_spread() {
        let latent = sample_latent(16, 64, 7).unwrap();
        assert_eq!(latent.dims(), &[1, 16, 64]);
        let values = latent.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let mean = values.iter().sum::<f32>() / values.len() as f32;
        assert!(mean.abs() < 0.2, "mean = {mean}");
        assert!(values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn oversized_latent_is_predictor_failure() {
        for (channels, frames) in [(usize::MAX, 2), (8, MAX_LATENT_VALUES)] {
            let err = sample_latent(channels, frames, 0).unwrap_err();
            assert!(matches!(
                err,
                Error::PipelineExecution {
                    stage: Stage::Predictor,
                    ..
                }
            ));
        }
    }

    #[test]
    fn mask_marks_prefix() {
        let mask = length_mask(2, 4).unwrap();
        assert_eq!(mask.dims(), &[1, 1, 4]);
        let values = mask.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(values, vec![1.0, 1.0, 0.0, 0.0]);
    }
}
