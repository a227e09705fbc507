//! Request handler: one job in, one well-formed result out.
//!
//! [`Handler::handle`] validates the request, resolves the voice, normalizes
//! the text, runs the pipeline and encodes the audio. Every failure along the
//! way becomes an [`ErrorResult`]; nothing a job does can take the worker
//! down. Jobs share only the immutable [`LoadedAssets`].

use std::sync::Arc;
use std::time::Instant;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::{Deserialize, Serialize};

use crate::assets::LoadedAssets;
use crate::audio::{self, AudioFormat, OutputOptions};
use crate::config::WorkerConfig;
use crate::pipeline::{StageContract, SynthesisParams, SynthesisPipeline};
use crate::text::{Language, TextNormalizer};
use crate::{Error, ErrorKind, Result};

/// Job input.
///
/// Everything except `text` is optional and falls back to the worker's
/// defaults. Unknown fields are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SynthesisRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_step: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silence_s: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Successful job output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisResult {
    /// Base64-encoded audio container.
    pub audio: String,
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u16,
    /// Seconds of audio.
    pub duration: f32,
    pub num_samples: usize,
    pub voice: String,
    pub language: Language,
    /// Noise seed actually used; pass it back to reproduce the audio.
    pub seed: u64,
}

impl SynthesisResult {
    pub fn audio_bytes(&self) -> Result<Vec<u8>> {
        BASE64_STANDARD
            .decode(&self.audio)
            .map_err(|e| Error::Encoding(format!("invalid base64 audio: {e}")))
    }
}

/// Failed job output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResult {
    pub error_kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for ErrorResult {
    fn from(error: &Error) -> Self {
        Self {
            error_kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// What a job returns to the hosting runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutput {
    Ok(SynthesisResult),
    Err(ErrorResult),
}

impl JobOutput {
    pub fn is_ok(&self) -> bool {
        matches!(self, JobOutput::Ok(_))
    }

    /// The error kind, if the job failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            JobOutput::Ok(_) => None,
            JobOutput::Err(e) => Some(e.error_kind),
        }
    }
}

impl From<&Error> for JobOutput {
    fn from(error: &Error) -> Self {
        JobOutput::Err(ErrorResult::from(error))
    }
}

/// Serves synthesis jobs against a loaded asset set.
pub struct Handler {
    assets: Arc<LoadedAssets>,
    pipeline: SynthesisPipeline,
    normalizer: TextNormalizer,
    default_voice: String,
}

impl Handler {
    /// Fails with [`Error::AssetLoad`] if the configured default voice is not
    /// in the catalog or the stages disagree with `tts.json`.
    pub fn new(assets: Arc<LoadedAssets>, config: &WorkerConfig) -> Result<Self> {
        if !assets.voices.contains(&config.default_voice) {
            return Err(Error::AssetLoad(format!(
                "default voice '{}' not found. Available: {:?}",
                config.default_voice,
                assets.voices.keys()
            )));
        }
        let pipeline = SynthesisPipeline::new(&assets.models, StageContract::from(&assets.config))?;
        let normalizer = TextNormalizer::new(assets.indexer.clone(), config.max_text_chars);
        Ok(Self {
            assets,
            pipeline,
            normalizer,
            default_voice: config.default_voice.clone(),
        })
    }

    pub fn voices(&self) -> Vec<&str> {
        self.assets.voices.keys()
    }

    pub fn default_voice(&self) -> &str {
        &self.default_voice
    }

    /// Native output sample rate of the vocoder.
    pub fn sample_rate(&self) -> u32 {
        self.pipeline.sample_rate()
    }

    /// Run one job. Never panics on bad input and never returns a raw error.
    pub fn handle(&self, request: &SynthesisRequest) -> JobOutput {
        let start = Instant::now();
        match self.try_handle(request) {
            Ok(result) => {
                tracing::info!(
                    voice = %result.voice,
                    language = %result.language,
                    duration_s = result.duration,
                    sample_rate = result.sample_rate,
                    format = %result.format,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "job done"
                );
                JobOutput::Ok(result)
            }
            Err(error) => {
                tracing::warn!(
                    error_kind = %error.kind(),
                    %error,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "job failed"
                );
                JobOutput::from(&error)
            }
        }
    }

    /// Run a raw JSON job: either `{"input": {...}}` or the bare input object.
    pub fn handle_job(&self, job: &serde_json::Value) -> JobOutput {
        match parse_job(job) {
            Ok(request) => self.handle(&request),
            Err(error) => {
                tracing::warn!(error_kind = %error.kind(), %error, "rejected job");
                JobOutput::from(&error)
            }
        }
    }

    fn try_handle(&self, request: &SynthesisRequest) -> Result<SynthesisResult> {
        if request.text.trim().is_empty() {
            return Err(Error::InvalidInput("'text' must not be empty".into()));
        }

        let defaults = SynthesisParams::default();
        let params = SynthesisParams {
            speed: request.speed.unwrap_or(defaults.speed),
            total_step: request.total_step.unwrap_or(defaults.total_step),
            seed: Some(request.seed.unwrap_or_else(rand::random)),
            silence_s: request.silence_s.unwrap_or(defaults.silence_s),
        };
        params.validate()?;

        let language = match request.language.as_deref() {
            Some(lang) => lang.parse::<Language>()?,
            None => Language::default(),
        };

        let voice = request.voice.as_deref().unwrap_or(&self.default_voice);
        let style = self.assets.voices.get(voice).ok_or_else(|| {
            Error::InvalidInput(format!(
                "unknown voice '{voice}'. Available: {:?}",
                self.assets.voices.keys()
            ))
        })?;

        let format = match request.format.as_deref() {
            Some(name) => AudioFormat::parse(name).ok_or_else(|| {
                let available: Vec<&str> = AudioFormat::ALL.iter().map(AudioFormat::as_str).collect();
                Error::InvalidInput(format!("unsupported format '{name}'. Available: {available:?}"))
            })?,
            None => AudioFormat::default(),
        };
        let output = OutputOptions {
            format,
            sample_rate: request.sample_rate,
        };
        output.validate()?;

        let text = self.normalizer.normalize(&request.text, language)?;
        tracing::debug!(
            voice,
            %language,
            segments = text.segments.len(),
            tokens = text.num_tokens(),
            "normalized"
        );

        let waveform = self.pipeline.synthesize(&text, &style, &params)?;
        let encoded = audio::finalize(&waveform, &output)?;

        Ok(SynthesisResult {
            audio: BASE64_STANDARD.encode(&encoded.bytes),
            format: encoded.format,
            sample_rate: encoded.sample_rate,
            channels: encoded.channels,
            duration: encoded.duration_s,
            num_samples: encoded.num_samples,
            voice: style.key.clone(),
            language,
            seed: params.seed.unwrap_or_default(),
        })
    }
}

fn parse_job(job: &serde_json::Value) -> Result<SynthesisRequest> {
    let input = job.get("input").unwrap_or(job);
    SynthesisRequest::deserialize(input)
        .map_err(|e| Error::InvalidInput(format!("malformed job input: {e}")))
}
