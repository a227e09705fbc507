//! ONNX Runtime backend.
//!
//! Wraps an `ort` session behind [`Backend`]. Sessions need `&mut` to run, so
//! each one sits in a `Mutex`; the worker processes one job at a time, and
//! concurrent callers on the same graph simply queue on the lock. A panic in
//! one job leaves the native session untouched, so a poisoned lock is
//! recovered rather than failing every later job.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue, SessionInputs};

use super::Backend;
use crate::{Error, Result};

/// Session construction settings.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Intra-op threads. 0 = ONNX Runtime default.
    pub intra_threads: usize,
    /// CUDA device ordinal, used only with the `cuda` feature.
    pub cuda_device: i32,
}

/// One loaded ONNX graph.
pub struct OnnxBackend {
    name: String,
    session: Mutex<Session>,
}

impl std::fmt::Debug for OnnxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxBackend").field("name", &self.name).finish()
    }
}

impl OnnxBackend {
    /// Load a graph from disk. Any failure is an [`Error::AssetLoad`].
    pub fn load(path: impl AsRef<Path>, options: &SessionOptions) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("model")
            .to_string();
        if !path.is_file() {
            return Err(Error::AssetLoad(format!(
                "model file not found: {}",
                path.display()
            )));
        }

        let start = Instant::now();
        let mut builder = Session::builder()
            .map_err(|e| load_error(path, e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_error(path, e))?;
        if options.intra_threads > 0 {
            builder = builder
                .with_intra_threads(options.intra_threads)
                .map_err(|e| load_error(path, e))?;
        }
        #[cfg(feature = "cuda")]
        {
            use ort::execution_providers::CUDAExecutionProvider;
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(options.cuda_device)
                    .build()])
                .map_err(|e| load_error(path, e))?;
        }
        let session = builder.commit_from_file(path).map_err(|e| load_error(path, e))?;

        tracing::info!(
            model = %name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "loaded ONNX graph"
        );

        Ok(Self {
            name,
            session: Mutex::new(session),
        })
    }
}

impl Backend for OnnxBackend {
    fn run(&self, inputs: &[Tensor]) -> Result<Tensor> {
        let values = inputs
            .iter()
            .map(to_session_value)
            .collect::<Result<Vec<_>>>()?;

        let mut session = lock_recovering(&self.session, &self.name);
        let outputs = session.run(SessionInputs::<0>::ValueSlice(&values))?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        Ok(Tensor::from_vec(data.to_vec(), dims, &Device::Cpu)?)
    }
}

fn lock_recovering<'a, T>(mutex: &'a Mutex<T>, name: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(model = name, "session lock poisoned by an earlier job, recovering");
        mutex.clear_poison();
        PoisonError::into_inner(poisoned)
    })
}

fn load_error(path: &Path, error: impl std::fmt::Display) -> Error {
    Error::AssetLoad(format!("failed to load {}: {error}", path.display()))
}

fn onnx_shape(tensor: &Tensor) -> Vec<i64> {
    tensor.dims().iter().map(|&d| d as i64).collect()
}

fn to_session_value(tensor: &Tensor) -> Result<SessionInputValue<'static>> {
    let shape = onnx_shape(tensor);
    let flat = tensor.flatten_all()?;
    let value = match tensor.dtype() {
        DType::F32 => {
            SessionInputValue::from(ort::value::Tensor::from_array((shape, flat.to_vec1::<f32>()?))?)
        }
        DType::I64 => {
            SessionInputValue::from(ort::value::Tensor::from_array((shape, flat.to_vec1::<i64>()?))?)
        }
        other => {
            return Err(Error::Config(format!(
                "unsupported ONNX input dtype {other:?}"
            )));
        }
    };
    Ok(value)
}
