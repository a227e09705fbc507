//! Error types for supertonic-worker.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage identity, carried by [`Error::PipelineExecution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Encoder,
    Predictor,
    Vocoder,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Encoder => "encoder",
            Stage::Predictor => "predictor",
            Stage::Vocoder => "vocoder",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required weight file, config or voice style is missing or corrupt.
    /// Only raised during cold start; the worker must not become ready.
    #[error("asset load: {0}")]
    AssetLoad(String),

    /// Malformed or out-of-range request field, unknown voice, bad text.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A model stage failed while running, or violated its output contract.
    #[error("pipeline stage {stage} failed: {message}")]
    PipelineExecution { stage: Stage, message: String },

    /// Post-processing found output it cannot encode (NaN/Inf samples).
    #[error("encoding: {0}")]
    Encoding(String),

    /// Candle tensor error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// ONNX Runtime error.
    #[error("onnx runtime: {0}")]
    Ort(#[from] ort::Error),

    /// Audio processing error (resampling, WAV/OGG encoding).
    #[error("audio: {0}")]
    Audio(String),

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(String),

    /// Job loop failure (shut down, dropped reply).
    #[error("manager: {0}")]
    Manager(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// HuggingFace Hub error.
    #[error("hf-hub: {0}")]
    HfHub(String),
}

impl Error {
    /// Shorthand for a stage failure.
    pub fn stage(stage: Stage, message: impl Into<String>) -> Self {
        Error::PipelineExecution {
            stage,
            message: message.into(),
        }
    }

    /// Job-facing classification of this error.
    ///
    /// Only the four kinds in [`ErrorKind`] are ever reported to callers;
    /// internal variants are folded into the closest one.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AssetLoad(_) | Error::HfHub(_) => ErrorKind::AssetLoad,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Encoding(_) | Error::Audio(_) | Error::Json(_) => ErrorKind::Encoding,
            Error::PipelineExecution { .. }
            | Error::Candle(_)
            | Error::Ort(_)
            | Error::Config(_)
            | Error::Manager(_)
            | Error::Io(_) => ErrorKind::PipelineExecution,
        }
    }
}

/// The error kinds a job result can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AssetLoad,
    InvalidInput,
    PipelineExecution,
    Encoding,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::AssetLoad => "asset_load",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::PipelineExecution => "pipeline_execution",
            ErrorKind::Encoding => "encoding",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<hound::Error> for Error {
    fn from(error: hound::Error) -> Self {
        Error::Audio(error.to_string())
    }
}

impl From<hf_hub::api::sync::ApiError> for Error {
    fn from(error: hf_hub::api::sync::ApiError) -> Self {
        Error::HfHub(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_message_names_stage() {
        let err = Error::stage(Stage::Vocoder, "device fault");
        assert_eq!(err.to_string(), "pipeline stage vocoder failed: device fault");
        assert_eq!(err.kind(), ErrorKind::PipelineExecution);
    }

    #[test]
    fn kinds_serialize_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InvalidInput).unwrap();
        assert_eq!(json, "\"invalid_input\"");
        assert_eq!(ErrorKind::AssetLoad.as_str(), "asset_load");
    }

    #[test]
    fn internal_errors_fold_into_job_kinds() {
        assert_eq!(Error::Audio("x".into()).kind(), ErrorKind::Encoding);
        assert_eq!(Error::Manager("x".into()).kind(), ErrorKind::PipelineExecution);
        assert_eq!(Error::HfHub("x".into()).kind(), ErrorKind::AssetLoad);
    }
}
