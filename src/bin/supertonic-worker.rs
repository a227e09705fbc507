//! Resident Supertonic worker: Unix socket, one JSON job per connection.
//!
//! Loads every asset at startup and keeps them in memory. Each connection
//! sends one JSON line, either a bare request or a serverless envelope, and
//! receives one JSON line back.
//!
//! # Protocol
//!
//! Request:
//! ```json
//! {"input": {"text": "Hello world", "voice": "M1", "speed": 1.05, "format": "ogg"}}
//! ```
//!
//! Response (success):
//! ```json
//! {"audio": "<base64>", "format": "ogg", "sample_rate": 44100, "channels": 1,
//!  "duration": 1.2, "num_samples": 52920, "voice": "M1", "language": "en", "seed": 42}
//! ```
//!
//! Response (error):
//! ```json
//! {"error_kind": "invalid_input", "message": "invalid input: unknown voice 'X'. Available: [...]"}
//! ```
//!
//! # Usage
//!
//! ```sh
//! supertonic-worker --assets /models/supertonic &
//! echo '{"text":"Hello world"}' | socat - UNIX-CONNECT:/tmp/supertonic-worker.sock
//! ```

use std::path::PathBuf;

use clap::Parser;
use supertonic_worker::{
    Error, ErrorKind,
    config::{WorkerArgs, WorkerConfig},
    handler::{ErrorResult, JobOutput},
    manager::WorkerManager,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{UnixListener, UnixStream},
};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "supertonic-worker",
    about = "Supertonic TTS worker with resident models and a Unix socket JSON interface"
)]
struct Args {
    /// Unix socket path to listen on.
    #[arg(long, env = "SUPERTONIC_SOCKET", default_value = "/tmp/supertonic-worker.sock")]
    socket: PathBuf,

    #[command(flatten)]
    worker: WorkerArgs,
}

// ── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = WorkerConfig::from(args.worker);

    // Load before binding: a worker that cannot load must never accept jobs.
    let manager = WorkerManager::start(config).await?;

    // Remove stale socket file if present.
    if args.socket.exists() {
        std::fs::remove_file(&args.socket)?;
    }
    let listener = UnixListener::bind(&args.socket)?;
    tracing::info!("Listening on {:?}", args.socket);

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let manager = manager.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, manager).await {
                        tracing::warn!("connection error: {e}");
                    }
                });
            }
            Err(e) => {
                tracing::error!("accept error: {e}");
            }
        }
    }
}

// ── Connection handler ────────────────────────────────────────────────────────

async fn handle_connection(stream: UnixStream, manager: WorkerManager) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    // Read exactly one line (the JSON job).
    let line = match lines.next_line().await? {
        Some(l) if !l.trim().is_empty() => l,
        _ => {
            send_output(&mut writer, &invalid("empty request")).await?;
            return Ok(());
        }
    };

    let output = process_job(&line, &manager).await;
    send_output(&mut writer, &output).await?;
    Ok(())
}

async fn process_job(line: &str, manager: &WorkerManager) -> JobOutput {
    let job: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return invalid(format!("invalid JSON job: {e}")),
    };

    match manager.submit_job(job).await {
        Ok(output) => output,
        Err(Error::Manager(e)) => {
            // The job loop is gone. Exit so the host restarts the worker.
            tracing::error!("worker manager has shut down ({e}), exiting for restart");
            std::process::exit(1);
        }
        Err(e) => JobOutput::from(&e),
    }
}

fn invalid(message: impl Into<String>) -> JobOutput {
    JobOutput::Err(ErrorResult {
        error_kind: ErrorKind::InvalidInput,
        message: message.into(),
    })
}

async fn send_output(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    output: &JobOutput,
) -> anyhow::Result<()> {
    let mut json = serde_json::to_string(output)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    Ok(())
}
