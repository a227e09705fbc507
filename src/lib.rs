//! Serverless Supertonic text-to-speech worker.
//!
//! Loads the Supertonic ONNX graphs and voice styles once, then turns JSON
//! synthesis jobs into encoded audio. Every per-job failure comes back as a
//! structured error result; the worker itself keeps running.
//!
//! ## Architecture
//!
//! ```text
//! job JSON ──▶ handler ──validate──▶ text normalizer ──▶ token segments
//!                                                          ↓
//!              Encoder (text_encoder.onnx)
//!                 ↓
//!              Predictor (duration_predictor.onnx + vector_estimator.onnx)
//!                 ↓
//!              Vocoder (vocoder.onnx)
//!                 ↓
//!              post-processor (resample, clip, WAV/OGG) ──▶ base64 result
//! ```
//!
//! ## Modules
//!
//! - [`assets`]: asset directory loading, voice-style catalog, hub download
//! - [`text`]: normalization, segmentation, unicode indexer
//! - [`model`]: stage traits, ONNX Runtime backend, Supertonic stages
//! - [`pipeline`]: stage orchestration and boundary checks
//! - [`audio`]: resampling, clipping, WAV and OGG encoding
//! - [`handler`]: request validation and job results
//! - [`manager`]: resident worker with a serial job loop

pub mod assets;
pub mod audio;
pub mod config;
pub mod handler;
pub mod manager;
pub mod model;
pub mod pipeline;
pub mod text;

mod error;
#[cfg(test)]
mod testing;

pub use error::{Error, ErrorKind, Result, Stage};
