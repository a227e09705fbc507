//! Model stages and the tensors passed between them.
//!
//! ```text
//! TokenBatch ──TextEncoder──▶ EncodedFeatures
//!            ──AcousticPredictor──▶ AcousticFrames (latent + duration)
//!            ──Vocoder──▶ waveform [1, N]
//! ```
//!
//! Stages are traits so the orchestrator never sees a concrete runtime. The
//! Supertonic implementations in [`supertonic`] are in turn written against
//! [`Backend`], a single-output `run(tensors) -> tensor` capability whose
//! production variant is [`onnx::OnnxBackend`].
//!
//! All tensors live on the CPU; accelerator placement is the backend's job.

pub mod noise;
pub mod onnx;
pub mod supertonic;

use candle_core::{DType, Device, Tensor};

use crate::assets::VoiceStyle;
use crate::Result;

pub use crate::error::Stage;

/// A loaded graph that maps positional inputs to its first output.
pub trait Backend: Send + Sync {
    fn run(&self, inputs: &[Tensor]) -> Result<Tensor>;
}

/// Stage 1: text ids → linguistic features.
pub trait TextEncoder: Send + Sync {
    fn encode(&self, tokens: &TokenBatch, style: &VoiceStyle) -> Result<EncodedFeatures>;
}

/// Stage 2: features + style → duration-aligned latent frames.
pub trait AcousticPredictor: Send + Sync {
    fn predict(
        &self,
        tokens: &TokenBatch,
        features: &EncodedFeatures,
        style: &VoiceStyle,
        params: &PredictorParams,
    ) -> Result<AcousticFrames>;
}

/// Stage 3: latent frames → waveform `[1, N]` at [`Vocoder::sample_rate`].
pub trait Vocoder: Send + Sync {
    fn vocode(&self, frames: &AcousticFrames) -> Result<Tensor>;

    fn sample_rate(&self) -> u32;
}

/// Token ids `[1, L]` (i64) and their mask `[1, 1, L]` (f32).
#[derive(Debug, Clone)]
pub struct TokenBatch {
    pub ids: Tensor,
    pub mask: Tensor,
}

impl TokenBatch {
    pub fn from_ids(ids: &[i64]) -> Result<Self> {
        let len = ids.len();
        let device = Device::Cpu;
        Ok(Self {
            ids: Tensor::from_vec(ids.to_vec(), (1, len), &device)?,
            mask: noise::length_mask(len, len)?,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.dims().last().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encoder output, `[1, E, L]` f32.
#[derive(Debug, Clone)]
pub struct EncodedFeatures {
    pub embedding: Tensor,
}

/// Predictor output: latent `[1, D, T]` f32 and the predicted speech duration.
///
/// The duration is authoritative for the final audio length.
#[derive(Debug, Clone)]
pub struct AcousticFrames {
    pub latent: Tensor,
    pub duration_s: f32,
}

/// Per-segment predictor settings, already validated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictorParams {
    /// Speaking-rate scale; predicted durations are divided by it.
    pub speed: f32,
    /// Flow-matching denoising steps.
    pub total_step: usize,
    /// Seed for the initial latent noise.
    pub seed: u64,
}

/// Waveform samples covered by `duration_s` at `sample_rate`.
pub fn samples_for(duration_s: f32, sample_rate: u32) -> usize {
    (duration_s * sample_rate as f32) as usize
}

/// Latent frames needed to cover `duration_s`.
pub fn frames_for(duration_s: f32, sample_rate: u32, samples_per_frame: usize) -> usize {
    samples_for(duration_s, sample_rate).div_ceil(samples_per_frame)
}

pub(crate) fn expect_dtype(tensor: &Tensor, dtype: DType, what: &str) -> std::result::Result<(), String> {
    if tensor.dtype() == dtype {
        Ok(())
    } else {
        Err(format!("{what} has dtype {:?}, expected {dtype:?}", tensor.dtype()))
    }
}
