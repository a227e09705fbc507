//! Pipeline orchestrator.
//!
//! Drives each text segment through the three stages in fixed order:
//!
//! ```text
//! segment ids ─▶ Encoder ─▶ Predictor ─▶ Vocoder ─▶ trim to predicted duration
//! ```
//!
//! and joins the segments with a short silence. Every stage boundary is
//! checked against the [`StageContract`] derived from `tts.json`; a stage that
//! fails or hands over a malformed tensor aborts the job with
//! [`Error::PipelineExecution`] naming that stage. Nothing is retried and no
//! stage output outlives the call.

use std::fmt::Display;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Instant;

use candle_core::{DType, Tensor};

use crate::assets::{StageModels, VoiceStyle};
use crate::config::TtsConfig;
use crate::model::{
    AcousticFrames, AcousticPredictor, EncodedFeatures, PredictorParams, TextEncoder, TokenBatch,
    Vocoder, expect_dtype, samples_for,
};
use crate::text::{NormalizedText, TextSegment};
use crate::{Error, Result, Stage};

pub const SPEED_RANGE: RangeInclusive<f32> = 0.5..=2.0;
pub const TOTAL_STEP_RANGE: RangeInclusive<usize> = 1..=50;
pub const SILENCE_RANGE: RangeInclusive<f32> = 0.0..=2.0;

/// Per-job synthesis parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisParams {
    /// Speaking-rate scale. Higher is faster.
    pub speed: f32,
    /// Denoising steps in the predictor. More steps trade latency for quality.
    pub total_step: usize,
    /// Noise seed. `None` draws a random one.
    pub seed: Option<u64>,
    /// Silence inserted between text segments, in seconds.
    pub silence_s: f32,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            speed: 1.05,
            total_step: 5,
            seed: None,
            silence_s: 0.3,
        }
    }
}

impl SynthesisParams {
    pub fn validate(&self) -> Result<()> {
        if !SPEED_RANGE.contains(&self.speed) {
            return Err(out_of_range("speed", self.speed, &SPEED_RANGE));
        }
        if !TOTAL_STEP_RANGE.contains(&self.total_step) {
            return Err(out_of_range("total_step", self.total_step, &TOTAL_STEP_RANGE));
        }
        if !SILENCE_RANGE.contains(&self.silence_s) {
            return Err(out_of_range("silence_s", self.silence_s, &SILENCE_RANGE));
        }
        Ok(())
    }
}

fn out_of_range<T: Display>(field: &str, value: T, range: &RangeInclusive<T>) -> Error {
    Error::InvalidInput(format!(
        "'{field}' must be between {} and {}, got {value}",
        range.start(),
        range.end()
    ))
}

/// Shapes every stage must honour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageContract {
    pub sample_rate: u32,
    pub latent_channels: usize,
    pub samples_per_frame: usize,
}

impl From<&TtsConfig> for StageContract {
    fn from(config: &TtsConfig) -> Self {
        Self {
            sample_rate: config.ae.sample_rate,
            latent_channels: config.latent_channels(),
            samples_per_frame: config.samples_per_frame(),
        }
    }
}

/// Mono f32 samples straight from the vocoder, before post-processing.
#[derive(Debug, Clone)]
pub struct RawWaveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub duration_s: f32,
}

/// The Encoder → Predictor → Vocoder chain.
#[derive(Clone)]
pub struct SynthesisPipeline {
    encoder: Arc<dyn TextEncoder>,
    predictor: Arc<dyn AcousticPredictor>,
    vocoder: Arc<dyn Vocoder>,
    contract: StageContract,
}

impl SynthesisPipeline {
    /// Fails with [`Error::AssetLoad`] if the vocoder disagrees with the contract.
    pub fn new(models: &StageModels, contract: StageContract) -> Result<Self> {
        let vocoder_rate = models.vocoder.sample_rate();
        if vocoder_rate != contract.sample_rate {
            return Err(Error::AssetLoad(format!(
                "vocoder produces {vocoder_rate} Hz but tts.json declares {} Hz",
                contract.sample_rate
            )));
        }
        Ok(Self {
            encoder: models.encoder.clone(),
            predictor: models.predictor.clone(),
            vocoder: models.vocoder.clone(),
            contract,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.contract.sample_rate
    }

    /// Synthesize every segment of `text` and join them.
    pub fn synthesize(
        &self,
        text: &NormalizedText,
        style: &VoiceStyle,
        params: &SynthesisParams,
    ) -> Result<RawWaveform> {
        params.validate()?;
        if text.segments.is_empty() {
            return Err(Error::InvalidInput("no text segments to synthesize".into()));
        }

        let seed = params.seed.unwrap_or_else(rand::random);
        let sample_rate = self.contract.sample_rate;
        let gap = samples_for(params.silence_s, sample_rate);
        let start = Instant::now();
        tracing::debug!(
            segments = text.segments.len(),
            seed,
            voice = %style.key,
            "synthesizing"
        );

        let mut samples = Vec::new();
        for (index, segment) in text.segments.iter().enumerate() {
            if index > 0 {
                samples.resize(samples.len() + gap, 0.0);
            }
            let segment_params = PredictorParams {
                speed: params.speed,
                total_step: params.total_step,
                seed: seed.wrapping_add(index as u64),
            };
            samples.extend(self.synthesize_segment(segment, style, &segment_params)?);
        }

        let duration_s = samples.len() as f32 / sample_rate as f32;
        tracing::info!(
            segments = text.segments.len(),
            tokens = text.num_tokens(),
            duration_s,
            seed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "synthesis done"
        );
        Ok(RawWaveform {
            samples,
            sample_rate,
            duration_s,
        })
    }

    fn synthesize_segment(
        &self,
        segment: &TextSegment,
        style: &VoiceStyle,
        params: &PredictorParams,
    ) -> Result<Vec<f32>> {
        if segment.is_empty() {
            return Err(Error::InvalidInput("empty text segment".into()));
        }

        let tokens = TokenBatch::from_ids(&segment.ids)?;
        let features = run_stage(Stage::Encoder, || self.encoder.encode(&tokens, style))?;
        self.check_features(&features, tokens.len())?;

        let frames = run_stage(Stage::Predictor, || {
            self.predictor.predict(&tokens, &features, style, params)
        })?;
        let needed = self.check_frames(&frames)?;

        let waveform = run_stage(Stage::Vocoder, || self.vocoder.vocode(&frames))?;
        let mut samples = self.check_waveform(&waveform, needed)?;
        samples.truncate(needed);
        Ok(samples)
    }

    fn check_features(&self, features: &EncodedFeatures, num_tokens: usize) -> Result<()> {
        let embedding = &features.embedding;
        expect_dtype(embedding, DType::F32, "encoder output")
            .map_err(|m| violation(Stage::Encoder, m))?;
        match embedding.dims() {
            [1, dim, len] if *dim > 0 && *len == num_tokens => Ok(()),
            dims => Err(violation(
                Stage::Encoder,
                format!("encoder output shape {dims:?}, expected [1, E, {num_tokens}]"),
            )),
        }
    }

    /// Returns the number of samples the predicted duration covers.
    fn check_frames(&self, frames: &AcousticFrames) -> Result<usize> {
        let contract = &self.contract;
        if !frames.duration_s.is_finite() || frames.duration_s <= 0.0 {
            return Err(violation(
                Stage::Predictor,
                format!("predicted duration {}s", frames.duration_s),
            ));
        }
        expect_dtype(&frames.latent, DType::F32, "latent")
            .map_err(|m| violation(Stage::Predictor, m))?;
        let num_frames = match frames.latent.dims() {
            [1, channels, t] if *channels == contract.latent_channels && *t >= 1 => *t,
            dims => {
                return Err(violation(
                    Stage::Predictor,
                    format!(
                        "latent shape {dims:?}, expected [1, {}, T >= 1]",
                        contract.latent_channels
                    ),
                ));
            }
        };
        let needed = samples_for(frames.duration_s, contract.sample_rate);
        if num_frames * contract.samples_per_frame < needed {
            return Err(violation(
                Stage::Predictor,
                format!(
                    "{num_frames} frames cannot cover {}s ({needed} samples)",
                    frames.duration_s
                ),
            ));
        }
        Ok(needed)
    }

    fn check_waveform(&self, waveform: &Tensor, needed: usize) -> Result<Vec<f32>> {
        expect_dtype(waveform, DType::F32, "waveform").map_err(|m| violation(Stage::Vocoder, m))?;
        match waveform.dims() {
            [1, n] if *n > 0 && *n >= needed => {}
            dims => {
                return Err(violation(
                    Stage::Vocoder,
                    format!("waveform shape {dims:?}, expected [1, N >= {needed}]"),
                ));
            }
        }
        waveform
            .flatten_all()
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| Error::stage(Stage::Vocoder, e.to_string()))
    }
}

fn violation(stage: Stage, message: impl Display) -> Error {
    Error::stage(stage, format!("contract violation: {message}"))
}

/// Run one stage, attributing any failure to it.
fn run_stage<T>(stage: Stage, run: impl FnOnce() -> Result<T>) -> Result<T> {
    let start = Instant::now();
    let result = run().map_err(|error| match error {
        error @ Error::PipelineExecution { .. } => error,
        other => Error::stage(stage, other.to_string()),
    });
    tracing::debug!(
        %stage,
        ok = result.is_ok(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "stage finished"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        CallLog, Faults, SECONDS_PER_TOKEN, ascii_indexer, fake_models, test_style,
        test_tts_config,
    };
    use crate::text::{Language, TextNormalizer};

    fn pipeline(log: &CallLog, faults: Faults) -> SynthesisPipeline {
        let contract = StageContract::from(&test_tts_config());
        SynthesisPipeline::new(&fake_models(log.clone(), faults), contract).unwrap()
    }

    fn hello() -> NormalizedText {
        TextNormalizer::new(Arc::new(ascii_indexer()), 5000)
            .normalize("Hello world", Language::En)
            .unwrap()
    }

    fn two_segments() -> NormalizedText {
        let segment = |text: &str| TextSegment {
            text: text.to_string(),
            ids: text.chars().map(|c| c as i64).collect(),
        };
        NormalizedText {
            language: Language::En,
            segments: vec![segment("<en>One.</en>"), segment("<en>Two two.</en>")],
        }
    }

    fn params() -> SynthesisParams {
        SynthesisParams {
            speed: 1.0,
            seed: Some(7),
            ..SynthesisParams::default()
        }
    }

    /// Samples the fake stages produce for a segment of `tokens` ids at speed 1.0.
    fn expected_samples(tokens: usize) -> usize {
        samples_for(tokens as f32 * SECONDS_PER_TOKEN / 1.0, 16000)
    }

    #[test]
    fn test_default_params_are_valid() {
        let p = SynthesisParams::default();
        assert_eq!(p.speed, 1.05);
        assert_eq!(p.total_step, 5);
        p.validate().unwrap();
    }

    #[test]
    fn test_params_out_of_range() {
        let cases = [
            SynthesisParams { speed: 0.1, ..SynthesisParams::default() },
            SynthesisParams { speed: f32::NAN, ..SynthesisParams::default() },
            SynthesisParams { total_step: 0, ..SynthesisParams::default() },
            SynthesisParams { total_step: 51, ..SynthesisParams::default() },
            SynthesisParams { silence_s: -0.1, ..SynthesisParams::default() },
        ];
        for p in cases {
            assert!(matches!(p.validate(), Err(Error::InvalidInput(_))), "{p:?}");
        }
    }

    #[test]
    fn test_stages_run_in_order_once() {
        let log = CallLog::default();
        let text = hello();
        let wav = pipeline(&log, Faults::default())
            .synthesize(&text, &test_style("M1"), &params())
            .unwrap();

        assert_eq!(log.calls(), vec![Stage::Encoder, Stage::Predictor, Stage::Vocoder]);
        assert_eq!(wav.sample_rate, 16000);
        assert_eq!(wav.samples.len(), expected_samples(text.num_tokens()));
        assert!(wav.duration_s > 0.0);
    }

    #[test]
    fn test_segments_joined_with_silence() {
        let log = CallLog::default();
        let text = two_segments();
        let wav = pipeline(&log, Faults::default())
            .synthesize(&text, &test_style("M1"), &params())
            .unwrap();

        let first = expected_samples(text.segments[0].len());
        let second = expected_samples(text.segments[1].len());
        let gap = samples_for(0.3, 16000);
        assert_eq!(wav.samples.len(), first + gap + second);
        assert!(wav.samples[first..first + gap].iter().all(|&s| s == 0.0));
        assert_eq!(log.calls().len(), 6);
        assert_eq!(
            log.calls()[3..],
            [Stage::Encoder, Stage::Predictor, Stage::Vocoder]
        );
    }

    #[test]
    fn test_seed_reproducibility() {
        let log = CallLog::default();
        let p = pipeline(&log, Faults::default());
        let style = test_style("M1");
        let a = p.synthesize(&hello(), &style, &params()).unwrap();
        let b = p.synthesize(&hello(), &style, &params()).unwrap();
        let c = p
            .synthesize(&hello(), &style, &SynthesisParams { seed: Some(8), ..params() })
            .unwrap();
        assert_eq!(a.samples, b.samples);
        assert_ne!(a.samples, c.samples);
        assert_eq!(a.samples.len(), c.samples.len());
    }

    #[test]
    fn test_stage_failure_names_stage_and_stops() {
        let log = CallLog::default();
        let faults = Faults {
            fail_at: Some(Stage::Predictor),
            ..Faults::default()
        };
        let err = pipeline(&log, faults)
            .synthesize(&hello(), &test_style("M1"), &params())
            .unwrap_err();
        match err {
            Error::PipelineExecution { stage, message } => {
                assert_eq!(stage, Stage::Predictor);
                assert!(message.contains("simulated"), "{message}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(log.calls(), vec![Stage::Encoder, Stage::Predictor]);
    }

    #[test]
    fn test_contract_violations() {
        for stage in [Stage::Encoder, Stage::Predictor, Stage::Vocoder] {
            let log = CallLog::default();
            let faults = Faults {
                bad_shape_at: Some(stage),
                ..Faults::default()
            };
            let err = pipeline(&log, faults)
                .synthesize(&hello(), &test_style("M1"), &params())
                .unwrap_err();
            match err {
                Error::PipelineExecution { stage: failed, message } => {
                    assert_eq!(failed, stage);
                    assert!(message.contains("contract violation"), "{message}");
                }
                other => panic!("unexpected error {other:?}"),
            }
            assert_eq!(log.calls().last(), Some(&stage));
        }
    }

    #[test]
    fn test_invalid_params_touch_no_stage() {
        let log = CallLog::default();
        let err = pipeline(&log, Faults::default())
            .synthesize(
                &hello(),
                &test_style("M1"),
                &SynthesisParams { speed: 3.0, ..params() },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(log.calls().is_empty());
    }

    #[test]
    fn test_nan_is_passed_through() {
        let log = CallLog::default();
        let faults = Faults {
            nan_output: true,
            ..Faults::default()
        };
        let wav = pipeline(&log, faults)
            .synthesize(&hello(), &test_style("M1"), &params())
            .unwrap();
        assert!(wav.samples[0].is_nan());
    }

    #[test]
    fn test_sample_rate_mismatch_is_asset_error() {
        let mut config = test_tts_config();
        config.ae.sample_rate = 22050;
        let models = fake_models(CallLog::default(), Faults::default());
        let err = SynthesisPipeline::new(&models, StageContract::from(&config))
            .err()
            .unwrap();
        assert!(matches!(err, Error::AssetLoad(_)));
    }
}
