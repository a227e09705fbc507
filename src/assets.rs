//! Asset store: model graphs, tokenizer table and voice styles.
//!
//! Everything is loaded once, at cold start, from a directory laid out as
//!
//! ```text
//! <assets>/onnx/{duration_predictor,text_encoder,vector_estimator,vocoder}.onnx
//! <assets>/onnx/tts.json
//! <assets>/onnx/unicode_indexer.json
//! <assets>/voice_styles/<KEY>.json
//! ```
//!
//! Loading is all-or-nothing: any missing or malformed file is an
//! [`Error::AssetLoad`] and no [`LoadedAssets`] is produced. After load the
//! assets are immutable and shared read-only by every job.

pub mod hub;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use candle_core::{Device, Tensor};
use once_cell::sync::OnceCell;
use serde::Deserialize;

use crate::config::{TtsConfig, WorkerConfig};
use crate::model::onnx::{OnnxBackend, SessionOptions};
use crate::model::supertonic::{SupertonicEncoder, SupertonicPredictor, SupertonicVocoder};
use crate::model::{AcousticPredictor, TextEncoder, Vocoder};
use crate::text::UnicodeIndexer;
use crate::{Error, Result};

/// Files that must exist under `onnx/` before the worker may start.
pub const REQUIRED_MODEL_FILES: [&str; 6] = [
    "duration_predictor.onnx",
    "text_encoder.onnx",
    "vector_estimator.onnx",
    "vocoder.onnx",
    "tts.json",
    "unicode_indexer.json",
];

/// A named voice: the two conditioning tensors Supertonic consumes.
#[derive(Debug, Clone)]
pub struct VoiceStyle {
    pub key: String,
    /// Text-to-latent conditioning, `[1, S, C]`.
    pub ttl: Tensor,
    /// Duration-predictor conditioning, `[1, P, Q]`.
    pub dp: Tensor,
}

#[derive(Debug, Deserialize)]
struct StyleFile {
    style_ttl: StyleComponent,
    style_dp: StyleComponent,
}

#[derive(Debug, Deserialize)]
struct StyleComponent {
    data: Vec<Vec<Vec<f32>>>,
    dims: Vec<usize>,
    #[serde(rename = "type", default)]
    dtype: Option<String>,
}

impl StyleComponent {
    fn into_tensor(self, what: &str) -> std::result::Result<Tensor, String> {
        if let Some(dtype) = self.dtype.as_deref() {
            if dtype != "float32" {
                return Err(format!("{what} has type '{dtype}', expected 'float32'"));
            }
        }
        let [batch, rows, cols] = self.dims[..] else {
            return Err(format!("{what} dims {:?} are not rank 3", self.dims));
        };
        if batch != 1 {
            return Err(format!("{what} batch dimension is {batch}, expected 1"));
        }
        let flat: Vec<f32> = self.data.into_iter().flatten().flatten().collect();
        if flat.len() != rows * cols {
            return Err(format!(
                "{what} holds {} values but dims {:?} need {}",
                flat.len(),
                self.dims,
                rows * cols
            ));
        }
        if flat.iter().any(|v| !v.is_finite()) {
            return Err(format!("{what} contains non-finite values"));
        }
        Tensor::from_vec(flat, (1, rows, cols), &Device::Cpu).map_err(|e| e.to_string())
    }
}

impl VoiceStyle {
    /// Parse a voice-style JSON document.
    pub fn from_json(key: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let key = key.into();
        let file: StyleFile = serde_json::from_slice(bytes)
            .map_err(|e| Error::AssetLoad(format!("voice style '{key}': {e}")))?;
        let invalid = |msg: String| Error::AssetLoad(format!("voice style '{key}': {msg}"));
        let ttl = file.style_ttl.into_tensor("style_ttl").map_err(invalid)?;
        let dp = file.style_dp.into_tensor("style_dp").map_err(invalid)?;
        Ok(Self { key, ttl, dp })
    }

    /// Load `<dir>/<KEY>.json`; the key is the file stem.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let key = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::AssetLoad(format!("bad voice style path {}", path.display())))?;
        let bytes = std::fs::read(path)
            .map_err(|e| Error::AssetLoad(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(key, &bytes)
    }
}

/// All voice styles, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct VoiceCatalog {
    styles: HashMap<String, Arc<VoiceStyle>>,
}

impl VoiceCatalog {
    /// Build a catalog, requiring every style to share the same tensor shapes.
    pub fn from_styles(styles: impl IntoIterator<Item = VoiceStyle>) -> Result<Self> {
        let mut catalog = Self::default();
        let mut shapes: Option<(Vec<usize>, Vec<usize>)> = None;
        for style in styles {
            let shape = (style.ttl.dims().to_vec(), style.dp.dims().to_vec());
            match &shapes {
                Some(expected) if *expected != shape => {
                    return Err(Error::AssetLoad(format!(
                        "voice style '{}' has shapes {shape:?}, others have {expected:?}",
                        style.key
                    )));
                }
                Some(_) => {}
                None => shapes = Some(shape),
            }
            catalog.styles.insert(style.key.clone(), Arc::new(style));
        }
        Ok(catalog)
    }

    /// Load every `*.json` in `dir`. An empty directory is an error.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| styles_dir_error(dir, e))?;

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| styles_dir_error(dir, e))?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        if paths.is_empty() {
            return Err(Error::AssetLoad(format!(
                "no voice styles found in {}",
                dir.display()
            )));
        }

        let styles = paths
            .iter()
            .map(VoiceStyle::from_file)
            .collect::<Result<Vec<_>>>()?;
        Self::from_styles(styles)
    }

    pub fn get(&self, key: &str) -> Option<Arc<VoiceStyle>> {
        self.styles.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.styles.contains_key(key)
    }

    /// Sorted voice keys.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.styles.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }
}

fn styles_dir_error(dir: &Path, error: std::io::Error) -> Error {
    Error::AssetLoad(format!("voice styles directory {}: {error}", dir.display()))
}

/// The three pipeline stages, ready to run.
#[derive(Clone)]
pub struct StageModels {
    pub encoder: Arc<dyn TextEncoder>,
    pub predictor: Arc<dyn AcousticPredictor>,
    pub vocoder: Arc<dyn Vocoder>,
}

/// Everything a worker needs to serve jobs.
#[derive(Clone)]
pub struct LoadedAssets {
    pub config: TtsConfig,
    pub models: StageModels,
    pub indexer: Arc<UnicodeIndexer>,
    pub voices: VoiceCatalog,
}

/// Load all assets described by `config`.
pub fn load_assets(config: &WorkerConfig) -> Result<LoadedAssets> {
    let onnx_dir = config.onnx_dir();
    let missing: Vec<&str> = REQUIRED_MODEL_FILES
        .iter()
        .copied()
        .filter(|file| !onnx_dir.join(file).is_file())
        .collect();
    if !missing.is_empty() {
        return Err(Error::AssetLoad(format!(
            "missing required model files in {}: {missing:?}",
            onnx_dir.display()
        )));
    }

    let start = Instant::now();
    tracing::info!(assets = %config.assets_dir.display(), "loading Supertonic assets");

    let tts_config = TtsConfig::from_file(onnx_dir.join("tts.json"))?;
    let indexer = UnicodeIndexer::from_file(onnx_dir.join("unicode_indexer.json"))?;

    let options = SessionOptions {
        intra_threads: config.intra_threads,
        cuda_device: config.cuda_device,
    };
    let load = |file: &str| -> Result<Box<OnnxBackend>> {
        Ok(Box::new(OnnxBackend::load(onnx_dir.join(file), &options)?))
    };
    let models = StageModels {
        encoder: Arc::new(SupertonicEncoder::new(load("text_encoder.onnx")?)),
        predictor: Arc::new(SupertonicPredictor::new(
            load("duration_predictor.onnx")?,
            load("vector_estimator.onnx")?,
            tts_config.clone(),
        )),
        vocoder: Arc::new(SupertonicVocoder::new(
            load("vocoder.onnx")?,
            tts_config.ae.sample_rate,
        )),
    };

    let voices = VoiceCatalog::load_dir(config.voice_styles_dir())?;

    tracing::info!(
        voices = ?voices.keys(),
        indexer_len = indexer.len(),
        sample_rate = tts_config.ae.sample_rate,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "assets loaded"
    );

    Ok(LoadedAssets {
        config: tts_config,
        models,
        indexer: Arc::new(indexer),
        voices,
    })
}

type Loader = Box<dyn Fn() -> Result<LoadedAssets> + Send + Sync>;

/// Single-initialization holder for [`LoadedAssets`].
///
/// The first successful [`AssetStore::load`] runs the loader; every later
/// call returns the same `Arc` without touching disk. A failed load leaves
/// the store empty.
pub struct AssetStore {
    loader: Loader,
    loaded: OnceCell<Arc<LoadedAssets>>,
}

impl AssetStore {
    pub fn new(config: WorkerConfig) -> Self {
        Self::from_loader(move || load_assets(&config))
    }

    pub fn from_loader(loader: impl Fn() -> Result<LoadedAssets> + Send + Sync + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            loaded: OnceCell::new(),
        }
    }

    pub fn load(&self) -> Result<Arc<LoadedAssets>> {
        self.loaded
            .get_or_try_init(|| (self.loader)().map(Arc::new))
            .cloned()
    }
}
