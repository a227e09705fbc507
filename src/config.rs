//! Configuration for the Supertonic worker.
//!
//! [`TtsConfig`] mirrors the `tts.json` shipped next to the ONNX graphs.
//! [`WorkerConfig`] holds the process-level settings the binaries fill in
//! from CLI flags and environment variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Autoencoder section of `tts.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AeConfig {
    /// Vocoder output sample rate in Hz.
    pub sample_rate: u32,
    /// Waveform samples per latent frame before compression.
    pub base_chunk_size: usize,
}

/// Text-to-latent section of `tts.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlConfig {
    pub chunk_compress_factor: usize,
    pub latent_dim: usize,
}

/// Model configuration loaded from `tts.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    pub ae: AeConfig,
    pub ttl: TtlConfig,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            ae: AeConfig {
                sample_rate: 44100,
                base_chunk_size: 512,
            },
            ttl: TtlConfig {
                chunk_compress_factor: 6,
                latent_dim: 24,
            },
        }
    }
}

impl TtsConfig {
    /// Read and validate `tts.json`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| Error::AssetLoad(format!("cannot read {}: {e}", path.display())))?;
        let config: TtsConfig = serde_json::from_slice(&bytes)
            .map_err(|e| Error::AssetLoad(format!("malformed {}: {e}", path.display())))?;
        config.verify()?;
        Ok(config)
    }

    /// Reject zero-sized dimensions; every derived shape depends on them.
    pub fn verify(&self) -> Result<()> {
        if self.ae.sample_rate == 0
            || self.ae.base_chunk_size == 0
            || self.ttl.chunk_compress_factor == 0
            || self.ttl.latent_dim == 0
        {
            return Err(Error::AssetLoad(format!(
                "tts.json contains a zero dimension: {self:?}"
            )));
        }
        Ok(())
    }

    /// Waveform samples covered by one compressed latent frame.
    pub fn samples_per_frame(&self) -> usize {
        self.ae.base_chunk_size * self.ttl.chunk_compress_factor
    }

    /// Channel count of the compressed latent.
    pub fn latent_channels(&self) -> usize {
        self.ttl.latent_dim * self.ttl.chunk_compress_factor
    }
}

/// Process-level worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Asset root containing `onnx/` and `voice_styles/`.
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,

    /// Voice used when a request does not name one.
    #[serde(default = "default_voice")]
    pub default_voice: String,

    /// Upper bound on raw input text, in characters.
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,

    /// ONNX Runtime intra-op threads per session. 0 = runtime default.
    #[serde(default)]
    pub intra_threads: usize,

    /// CUDA device ordinal. Ignored unless built with the `cuda` feature.
    #[serde(default)]
    pub cuda_device: i32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            assets_dir: default_assets_dir(),
            default_voice: default_voice(),
            max_text_chars: default_max_text_chars(),
            intra_threads: 0,
            cuda_device: 0,
        }
    }
}

impl WorkerConfig {
    pub fn onnx_dir(&self) -> PathBuf {
        self.assets_dir.join("onnx")
    }

    pub fn voice_styles_dir(&self) -> PathBuf {
        self.assets_dir.join("voice_styles")
    }
}

/// Worker settings as command-line flags, shared by the binaries.
#[derive(Debug, Clone, clap::Args)]
pub struct WorkerArgs {
    /// Asset directory containing `onnx/` and `voice_styles/`.
    #[arg(long, env = "SUPERTONIC_ASSETS", default_value = "assets")]
    pub assets: PathBuf,

    /// Voice used when a request does not name one.
    #[arg(long, env = "SUPERTONIC_DEFAULT_VOICE", default_value = "M1")]
    pub default_voice: String,

    /// Maximum input text length in characters.
    #[arg(long, env = "SUPERTONIC_MAX_TEXT_CHARS", default_value_t = 5000)]
    pub max_text_chars: usize,

    /// ONNX Runtime intra-op threads per graph (0 = runtime default).
    #[arg(long, env = "SUPERTONIC_THREADS", default_value_t = 0)]
    pub threads: usize,

    /// CUDA device ordinal (needs the `cuda` feature).
    #[arg(long, env = "SUPERTONIC_CUDA_DEVICE", default_value_t = 0)]
    pub device: i32,
}

impl From<WorkerArgs> for WorkerConfig {
    fn from(args: WorkerArgs) -> Self {
        Self {
            assets_dir: args.assets,
            default_voice: args.default_voice,
            max_text_chars: args.max_text_chars,
            intra_threads: args.threads,
            cuda_device: args.device,
        }
    }
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("assets")
}

fn default_voice() -> String {
    "M1".to_string()
}

fn default_max_text_chars() -> usize {
    5000
}
