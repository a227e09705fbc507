//! Fetch the asset directory from the Hugging Face Hub.
//!
//! Files land in the local hub cache; the returned path is the snapshot
//! root, laid out exactly as [`super::load_assets`] expects.

use std::path::{Path, PathBuf};

use hf_hub::api::sync::Api;

use super::REQUIRED_MODEL_FILES;
use crate::{Error, Result};

pub const DEFAULT_REPO: &str = "Supertone/supertonic";
pub const DEFAULT_VOICES: [&str; 4] = ["M1", "M2", "F1", "F2"];

/// Download the model graphs, config and the named voice styles.
///
/// Returns the directory to use as `assets_dir`.
pub fn fetch_assets(repo_id: &str, voices: &[&str]) -> Result<PathBuf> {
    if voices.is_empty() {
        return Err(Error::Config("at least one voice style is required".into()));
    }
    let api = Api::new()?;
    let repo = api.model(repo_id.to_string());

    let mut first = None;
    for file in REQUIRED_MODEL_FILES {
        let path = repo.get(&format!("onnx/{file}"))?;
        tracing::debug!(file, path = %path.display(), "fetched");
        first.get_or_insert(path);
    }
    for voice in voices {
        repo.get(&format!("voice_styles/{voice}.json"))?;
    }

    let root = first
        .as_deref()
        .and_then(Path::parent)
        .and_then(Path::parent)
        .ok_or_else(|| Error::HfHub(format!("unexpected cache layout for {repo_id}")))?
        .to_path_buf();
    tracing::info!(repo = repo_id, assets = %root.display(), "assets available");
    Ok(root)
}
