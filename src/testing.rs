//! Test fixtures: tiny configs, voice styles and recording stage doubles.

use std::path::Path;
use std::sync::{Arc, Mutex};

use candle_core::{DType, Device, Tensor};

use crate::assets::{LoadedAssets, StageModels, VoiceCatalog, VoiceStyle};
use crate::config::{AeConfig, TtlConfig, TtsConfig};
use crate::model::{
    AcousticFrames, AcousticPredictor, EncodedFeatures, PredictorParams, TextEncoder, TokenBatch,
    Vocoder, frames_for, noise,
};
use crate::text::UnicodeIndexer;
use crate::{Result, Stage};

pub const EMBEDDING_DIM: usize = 16;
/// Seconds of speech the fake predictor assigns to each token.
pub const SECONDS_PER_TOKEN: f32 = 0.01;

/// Indexer mapping every ASCII code point to itself.
pub fn ascii_indexer() -> UnicodeIndexer {
    UnicodeIndexer::from_table((0..128).collect())
}

/// 16 kHz, 128 samples per latent frame, 8 latent channels.
pub fn test_tts_config() -> TtsConfig {
    TtsConfig {
        ae: AeConfig {
            sample_rate: 16000,
            base_chunk_size: 64,
        },
        ttl: TtlConfig {
            chunk_compress_factor: 2,
            latent_dim: 4,
        },
    }
}

/// Voice style with `ttl [1, 4, 8]` and `dp [1, 2, 4]`.
pub fn test_style(key: &str) -> VoiceStyle {
    let ttl: Vec<f32> = (0..32).map(|i| i as f32 / 32.0).collect();
    let dp: Vec<f32> = (0..8).map(|i| i as f32 / 8.0).collect();
    VoiceStyle {
        key: key.to_string(),
        ttl: Tensor::from_vec(ttl, (1, 4, 8), &Device::Cpu).unwrap(),
        dp: Tensor::from_vec(dp, (1, 2, 4), &Device::Cpu).unwrap(),
    }
}

/// Write a small but well-formed voice-style JSON file.
pub fn write_style_json(path: &Path) {
    let json = serde_json::json!({
        "style_ttl": {"data": [[[0.1, 0.2], [0.3, 0.4]]], "dims": [1, 2, 2], "type": "float32"},
        "style_dp": {"data": [[[0.5], [0.6]]], "dims": [1, 2, 1], "type": "float32"},
    });
    std::fs::write(path, json.to_string()).unwrap();
}

/// Shared record of which stages ran, in order.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Stage>>>);

impl CallLog {
    fn record(&self, stage: Stage) {
        self.0.lock().unwrap().push(stage);
    }

    pub fn calls(&self) -> Vec<Stage> {
        self.0.lock().unwrap().clone()
    }
}

/// Ways a fake stage can misbehave.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// This stage returns a runtime error.
    pub fail_at: Option<Stage>,
    /// This stage returns a tensor with the wrong shape.
    pub bad_shape_at: Option<Stage>,
    /// This stage panics.
    pub panic_at: Option<Stage>,
    /// The vocoder writes NaN into its output.
    pub nan_output: bool,
}

impl Faults {
    fn check(&self, stage: Stage) -> Result<()> {
        if self.panic_at == Some(stage) {
            panic!("simulated {stage} panic");
        }
        if self.fail_at == Some(stage) {
            return Err(candle_core::Error::Msg(format!("simulated {stage} fault")).into());
        }
        Ok(())
    }

    fn bad_shape(&self, stage: Stage) -> usize {
        usize::from(self.bad_shape_at == Some(stage))
    }
}

struct FakeEncoder {
    log: CallLog,
    faults: Faults,
}

impl TextEncoder for FakeEncoder {
    fn encode(&self, tokens: &TokenBatch, _style: &VoiceStyle) -> Result<EncodedFeatures> {
        self.log.record(Stage::Encoder);
        self.faults.check(Stage::Encoder)?;
        let len = tokens.len() + self.faults.bad_shape(Stage::Encoder);
        Ok(EncodedFeatures {
            embedding: Tensor::zeros((1, EMBEDDING_DIM, len), DType::F32, &Device::Cpu)?,
        })
    }
}

struct FakePredictor {
    log: CallLog,
    faults: Faults,
    config: TtsConfig,
}

impl AcousticPredictor for FakePredictor {
    fn predict(
        &self,
        tokens: &TokenBatch,
        _features: &EncodedFeatures,
        _style: &VoiceStyle,
        params: &PredictorParams,
    ) -> Result<AcousticFrames> {
        self.log.record(Stage::Predictor);
        self.faults.check(Stage::Predictor)?;
        let duration_s = tokens.len() as f32 * SECONDS_PER_TOKEN / params.speed;
        let frames = frames_for(
            duration_s,
            self.config.ae.sample_rate,
            self.config.samples_per_frame(),
        )
        .max(1);
        let channels = self.config.latent_channels() + self.faults.bad_shape(Stage::Predictor);
        Ok(AcousticFrames {
            latent: noise::sample_latent(channels, frames, params.seed)?,
            duration_s,
        })
    }
}

struct FakeVocoder {
    log: CallLog,
    faults: Faults,
    config: TtsConfig,
}

impl Vocoder for FakeVocoder {
    fn vocode(&self, frames: &AcousticFrames) -> Result<Tensor> {
        self.log.record(Stage::Vocoder);
        self.faults.check(Stage::Vocoder)?;
        let (_, _, num_frames) = frames.latent.dims3()?;
        // first latent channel, one value per frame, held for a frame's worth of samples
        let first_channel: Vec<f32> = frames.latent.flatten_all()?.to_vec1::<f32>()?[..num_frames].to_vec();
        let spf = self.config.samples_per_frame();
        let mut samples: Vec<f32> = first_channel
            .iter()
            .flat_map(|&v| std::iter::repeat_n(v * 0.1, spf))
            .collect();
        if self.faults.bad_shape_at == Some(Stage::Vocoder) {
            samples.truncate(1);
        }
        if self.faults.nan_output {
            samples[0] = f32::NAN;
        }
        let len = samples.len();
        Ok(Tensor::from_vec(samples, (1, len), &Device::Cpu)?)
    }

    fn sample_rate(&self) -> u32 {
        self.config.ae.sample_rate
    }
}

/// Fake stage set recording into `log`.
pub fn fake_models(log: CallLog, faults: Faults) -> StageModels {
    let config = test_tts_config();
    StageModels {
        encoder: Arc::new(FakeEncoder {
            log: log.clone(),
            faults,
        }),
        predictor: Arc::new(FakePredictor {
            log: log.clone(),
            faults,
            config: config.clone(),
        }),
        vocoder: Arc::new(FakeVocoder {
            log,
            faults,
            config,
        }),
    }
}

/// Assets with voices `default` and `M1`, ASCII tokenizer and fake stages.
pub fn test_assets(log: CallLog) -> LoadedAssets {
    test_assets_with(log, Faults::default())
}

pub fn test_assets_with(log: CallLog, faults: Faults) -> LoadedAssets {
    LoadedAssets {
        config: test_tts_config(),
        models: fake_models(log, faults),
        indexer: Arc::new(ascii_indexer()),
        voices: VoiceCatalog::from_styles([test_style("default"), test_style("M1")]).unwrap(),
    }
}

