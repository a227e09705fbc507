//! Worker manager: keeps the assets resident and serves jobs one at a time.
//!
//! [`WorkerManager::start`] performs the cold start on a blocking thread and
//! only returns once every asset is loaded. Jobs are then queued on a bounded
//! channel and handled sequentially by a dedicated loop. A job that panics is
//! answered with a `pipeline_execution` error and the loop carries on.
//!
//! # Example
//!
//! ```no_run
//! use supertonic_worker::config::WorkerConfig;
//! use supertonic_worker::handler::SynthesisRequest;
//! use supertonic_worker::manager::WorkerManager;
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = WorkerManager::start(WorkerConfig::default()).await.unwrap();
//!     let _output = manager.submit(SynthesisRequest::new("Hello world")).await.unwrap();
//! }
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::assets::AssetStore;
use crate::config::WorkerConfig;
use crate::handler::{Handler, JobOutput, SynthesisRequest};
use crate::{Error, Result};

const QUEUE_DEPTH: usize = 64;

/// Static facts about a running worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerInfo {
    pub voices: Vec<String>,
    pub default_voice: String,
    pub sample_rate: u32,
}

enum Job {
    Request(SynthesisRequest),
    Raw(serde_json::Value),
}

/// A submitted job.
struct PendingJob {
    job: Job,
    reply: oneshot::Sender<JobOutput>,
}

/// Handle for submitting jobs to a running worker.
#[derive(Clone)]
pub struct WorkerManager {
    tx: mpsc::Sender<PendingJob>,
    info: Arc<WorkerInfo>,
}

impl WorkerManager {
    /// Load assets from `config.assets_dir` and start the job loop.
    ///
    /// Returns an error if the cold start fails; no jobs are accepted then.
    pub async fn start(config: WorkerConfig) -> Result<Self> {
        Self::start_with(AssetStore::new(config.clone()), config).await
    }

    /// Start the job loop over an existing asset store.
    pub async fn start_with(store: AssetStore, config: WorkerConfig) -> Result<Self> {
        // Asset loading does synchronous I/O and builds runtime sessions.
        let handler = tokio::task::spawn_blocking(move || -> Result<Handler> {
            tracing::info!(assets = %config.assets_dir.display(), "cold start");
            let assets = store.load()?;
            Handler::new(assets, &config)
        })
        .await
        .map_err(|join_error| Error::Manager(format!("asset load task panicked: {join_error}")))??;

        let info = Arc::new(WorkerInfo {
            voices: handler.voices().into_iter().map(str::to_string).collect(),
            default_voice: handler.default_voice().to_string(),
            sample_rate: handler.sample_rate(),
        });
        tracing::info!(
            voices = ?info.voices,
            default_voice = %info.default_voice,
            sample_rate = info.sample_rate,
            "worker ready"
        );

        let (tx, rx) = mpsc::channel::<PendingJob>(QUEUE_DEPTH);
        tokio::task::spawn_blocking(move || run_manager(handler, rx));

        Ok(Self { tx, info })
    }

    pub fn info(&self) -> &WorkerInfo {
        &self.info
    }

    /// Submit a typed request and wait for its result.
    ///
    /// Per-job failures come back as [`JobOutput::Err`]. An `Err` here means
    /// the job loop is gone and the worker should be restarted.
    pub async fn submit(&self, request: SynthesisRequest) -> Result<JobOutput> {
        self.dispatch(Job::Request(request)).await
    }

    /// Submit a raw JSON job (`{"input": {...}}` or the bare input).
    pub async fn submit_job(&self, job: serde_json::Value) -> Result<JobOutput> {
        self.dispatch(Job::Raw(job)).await
    }

    async fn dispatch(&self, job: Job) -> Result<JobOutput> {
        let (reply_tx, reply_rx) = oneshot::channel::<JobOutput>();
        self.tx
            .send(PendingJob {
                job,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::Manager("manager has shut down".into()))?;

        reply_rx
            .await
            .map_err(|_| Error::Manager("manager dropped reply channel".into()))
    }
}

/// The job loop; runs in a dedicated blocking thread.
fn run_manager(handler: Handler, mut rx: mpsc::Receiver<PendingJob>) {
    while let Some(pending) = rx.blocking_recv() {
        let output = panic::catch_unwind(AssertUnwindSafe(|| match &pending.job {
            Job::Request(request) => handler.handle(request),
            Job::Raw(job) => handler.handle_job(job),
        }))
        .unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            tracing::error!(%message, "job panicked");
            JobOutput::from(&Error::Manager(format!("job panicked: {message}")))
        });
        // Ignore send errors; the caller may have gone away.
        let _ = pending.reply.send(output);
    }
    tracing::info!("worker manager shut down");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
