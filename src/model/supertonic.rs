//! Supertonic stage implementations.
//!
//! Supertonic ships four graphs. The encoder and vocoder map one-to-one onto
//! pipeline stages; the predictor stage combines the duration predictor with
//! the flow-matching vector estimator:
//!
//! ```text
//! duration = duration_predictor(ids, style_dp, text_mask) / speed
//! T        = ceil(duration * sample_rate / samples_per_frame)
//! x_0      ~ N(0, I)                      [1, D, T]
//! x_{k+1}  = vector_estimator(x_k, text_emb, style_ttl, latent_mask,
//!                             text_mask, k, total_step)
//! ```
//!
//! Graph inputs are positional, in the order the exported models declare them.

use std::time::Instant;

use candle_core::{Device, Tensor};

use super::{
    AcousticFrames, AcousticPredictor, Backend, EncodedFeatures, PredictorParams, TextEncoder,
    TokenBatch, Vocoder, frames_for, noise,
};
use crate::assets::VoiceStyle;
use crate::config::TtsConfig;
use crate::{Error, Result, Stage};

/// Upper bound on predicted speech per input token, after speed scaling.
pub const MAX_SECONDS_PER_TOKEN: f32 = 2.0;

/// `text_encoder.onnx`: `(text_ids, style_ttl, text_mask) → text_emb`.
pub struct SupertonicEncoder {
    model: Box<dyn Backend>,
}

impl SupertonicEncoder {
    pub fn new(model: Box<dyn Backend>) -> Self {
        Self { model }
    }
}

impl TextEncoder for SupertonicEncoder {
    fn encode(&self, tokens: &TokenBatch, style: &VoiceStyle) -> Result<EncodedFeatures> {
        let embedding = self.model.run(&[
            tokens.ids.clone(),
            style.ttl.clone(),
            tokens.mask.clone(),
        ])?;
        Ok(EncodedFeatures { embedding })
    }
}

/// `duration_predictor.onnx` followed by `total_step` passes of
/// `vector_estimator.onnx`.
pub struct SupertonicPredictor {
    duration_model: Box<dyn Backend>,
    estimator: Box<dyn Backend>,
    config: TtsConfig,
}

impl SupertonicPredictor {
    pub fn new(duration_model: Box<dyn Backend>, estimator: Box<dyn Backend>, config: TtsConfig) -> Self {
        Self {
            duration_model,
            estimator,
            config,
        }
    }

    fn predict_duration(&self, tokens: &TokenBatch, style: &VoiceStyle, speed: f32) -> Result<f32> {
        let raw = self
            .duration_model
            .run(&[tokens.ids.clone(), style.dp.clone(), tokens.mask.clone()])?;
        let values = raw.flatten_all()?.to_vec1::<f32>()?;
        let duration = values
            .first()
            .copied()
            .ok_or_else(|| Error::stage(Stage::Predictor, "duration predictor returned no values"))?
            / speed;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(Error::stage(
                Stage::Predictor,
                format!("duration predictor returned {duration}s"),
            ));
        }
        let limit = tokens.len().max(1) as f32 * MAX_SECONDS_PER_TOKEN;
        if duration > limit {
            return Err(Error::stage(
                Stage::Predictor,
                format!(
                    "duration predictor returned {duration}s for {} tokens (limit {limit}s)",
                    tokens.len()
                ),
            ));
        }
        Ok(duration)
    }
}

impl AcousticPredictor for SupertonicPredictor {
    fn predict(
        &self,
        tokens: &TokenBatch,
        features: &EncodedFeatures,
        style: &VoiceStyle,
        params: &PredictorParams,
    ) -> Result<AcousticFrames> {
        let duration_s = self.predict_duration(tokens, style, params.speed)?;
        let frames = frames_for(
            duration_s,
            self.config.ae.sample_rate,
            self.config.samples_per_frame(),
        )
        .max(1);

        let device = Device::Cpu;
        let mut latent = noise::sample_latent(self.config.latent_channels(), frames, params.seed)?;
        let latent_mask = noise::length_mask(frames, frames)?;
        let total_step = Tensor::new(&[params.total_step as f32], &device)?;

        let start = Instant::now();
        for step in 0..params.total_step {
            let current_step = Tensor::new(&[step as f32], &device)?;
            latent = self.estimator.run(&[
                latent,
                features.embedding.clone(),
                style.ttl.clone(),
                latent_mask.clone(),
                tokens.mask.clone(),
                current_step,
                total_step.clone(),
            ])?;
        }
        tracing::debug!(
            frames,
            steps = params.total_step,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "denoising loop done"
        );

        Ok(AcousticFrames { latent, duration_s })
    }
}

/// `vocoder.onnx`: `latent → wav [1, N]`.
pub struct SupertonicVocoder {
    model: Box<dyn Backend>,
    sample_rate: u32,
}

impl SupertonicVocoder {
    pub fn new(model: Box<dyn Backend>, sample_rate: u32) -> Self {
        Self { model, sample_rate }
    }
}

impl Vocoder for SupertonicVocoder {
    fn vocode(&self, frames: &AcousticFrames) -> Result<Tensor> {
        self.model.run(std::slice::from_ref(&frames.latent))
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use candle_core::DType;

    use super::*;
    use crate::testing::{test_style, test_tts_config};

    type Shapes = Arc<Mutex<Vec<Vec<Vec<usize>>>>>;

    /// Backend double that records input shapes and answers via a closure.
    struct ScriptedBackend {
        calls: Shapes,
        respond: Box<dyn Fn(&[Tensor]) -> Result<Tensor> + Send + Sync>,
    }

    impl ScriptedBackend {
        fn new(
            calls: Shapes,
            respond: impl Fn(&[Tensor]) -> Result<Tensor> + Send + Sync + 'static,
        ) -> Box<Self> {
            Box::new(Self {
                calls,
                respond: Box::new(respond),
            })
        }
    }

    impl Backend for ScriptedBackend {
        fn run(&self, inputs: &[Tensor]) -> Result<Tensor> {
            self.calls
                .lock()
                .unwrap()
                .push(inputs.iter().map(|t| t.dims().to_vec()).collect());
            (self.respond)(inputs)
        }
    }

    fn duration_backend(seconds: f32) -> Box<ScriptedBackend> {
        ScriptedBackend::new(Shapes::default(), move |_| {
            Ok(Tensor::new(&[seconds], &Device::Cpu)?)
        })
    }

    #[test]
    fn encoder_passes_ids_style_and_mask() {
        let calls = Shapes::default();
        let encoder = SupertonicEncoder::new(ScriptedBackend::new(calls.clone(), |inputs| {
            let len = inputs[0].dims()[1];
            Ok(Tensor::zeros((1, 16, len), DType::F32, &Device::Cpu)?)
        }));
        let tokens = TokenBatch::from_ids(&[5, 6, 7, 8]).unwrap();
        let features = encoder.encode(&tokens, &test_style("M1")).unwrap();
        assert_eq!(features.embedding.dims(), &[1, 16, 4]);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0], vec![1, 4]);
        assert_eq!(calls[0][2], vec![1, 1, 4]);
    }

    #[test]
    fn predictor_runs_estimator_total_step_times() {
        let config = test_tts_config();
        let estimator_calls = Shapes::default();
        let predictor = SupertonicPredictor::new(
            duration_backend(1.0),
            ScriptedBackend::new(estimator_calls.clone(), |inputs| Ok(inputs[0].clone())),
            config.clone(),
        );
        let tokens = TokenBatch::from_ids(&[1, 2, 3]).unwrap();
        let features = EncodedFeatures {
            embedding: Tensor::zeros((1, 16, 3), DType::F32, &Device::Cpu).unwrap(),
        };
        let params = PredictorParams {
            speed: 1.0,
            total_step: 4,
            seed: 1,
        };
        let frames = predictor
            .predict(&tokens, &features, &test_style("M1"), &params)
            .unwrap();

        // 1.0s at 16 kHz / 128 samples per frame = 125 frames
        assert_eq!(frames.latent.dims(), &[1, config.latent_channels(), 125]);
        assert!((frames.duration_s - 1.0).abs() < 1e-6);

        let calls = estimator_calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
        // x, text_emb, style_ttl, latent_mask, text_mask, current_step, total_step
        assert_eq!(calls[0].len(), 7);
        assert_eq!(calls[0][3], vec![1, 1, 125]);
        assert_eq!(calls[0][5], vec![1]);
    }

    #[test]
    fn speed_shortens_duration() {
        let predictor = SupertonicPredictor::new(
            duration_backend(2.0),
            ScriptedBackend::new(Shapes::default(), |inputs| Ok(inputs[0].clone())),
            test_tts_config(),
        );
        let tokens = TokenBatch::from_ids(&[1]).unwrap();
        let features = EncodedFeatures {
            embedding: Tensor::zeros((1, 16, 1), DType::F32, &Device::Cpu).unwrap(),
        };
        let params = PredictorParams {
            speed: 2.0,
            total_step: 1,
            seed: 0,
        };
        let frames = predictor
            .predict(&tokens, &features, &test_style("M1"), &params)
            .unwrap();
        assert!((frames.duration_s - 1.0).abs() < 1e-6);
    }

    #[test]
    fn non_positive_duration_is_predictor_failure() {
        let predictor = SupertonicPredictor::new(
            duration_backend(0.0),
            ScriptedBackend::new(Shapes::default(), |inputs| Ok(inputs[0].clone())),
            test_tts_config(),
        );
        let tokens = TokenBatch::from_ids(&[1]).unwrap();
        let features = EncodedFeatures {
            embedding: Tensor::zeros((1, 16, 1), DType::F32, &Device::Cpu).unwrap(),
        };
        let params = PredictorParams {
            speed: 1.0,
            total_step: 1,
            seed: 0,
        };
        let err = predictor
            .predict(&tokens, &features, &test_style("M1"), &params)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::PipelineExecution {
                stage: Stage::Predictor,
                ..
            }
        ));
    }

    #[test]
    fn runaway_duration_is_predictor_failure() {
        let estimator_calls = Shapes::default();
        let predictor = SupertonicPredictor::new(
            duration_backend(1.0e30),
            ScriptedBackend::new(estimator_calls.clone(), |inputs| Ok(inputs[0].clone())),
            test_tts_config(),
        );
        let tokens = TokenBatch::from_ids(&[1, 2, 3]).unwrap();
        let features = EncodedFeatures {
            embedding: Tensor::zeros((1, 16, 3), DType::F32, &Device::Cpu).unwrap(),
        };
        let params = PredictorParams {
            speed: 1.0,
            total_step: 1,
            seed: 0,
        };
        let err = predictor
            .predict(&tokens, &features, &test_style("M1"), &params)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::PipelineExecution {
                stage: Stage::Predictor,
                ..
            }
        ));
        assert!(estimator_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn vocoder_forwards_latent() {
        let calls = Shapes::default();
        let vocoder = SupertonicVocoder::new(
            ScriptedBackend::new(calls.clone(), |inputs| {
                let frames = inputs[0].dims()[2];
                Ok(Tensor::zeros((1, frames * 128), DType::F32, &Device::Cpu)?)
            }),
            16000,
        );
        let frames = AcousticFrames {
            latent: Tensor::zeros((1, 8, 10), DType::F32, &Device::Cpu).unwrap(),
            duration_s: 0.08,
        };
        let wav = vocoder.vocode(&frames).unwrap();
        assert_eq!(wav.dims(), &[1, 1280]);
        assert_eq!(vocoder.sample_rate(), 16000);
        assert_eq!(calls.lock().unwrap()[0], vec![vec![1, 8, 10]]);
    }
}
