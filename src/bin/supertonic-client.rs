//! Simple command-line client for the Supertonic worker.
//!
//! Connects to the Unix socket, sends one synthesis job, waits for the
//! result, writes the decoded audio to --output and exits 0 on success or 1
//! on error.
//!
//! # Usage
//!
//! ```sh
//! supertonic-client --text "Hello world" --voice F1 --output /tmp/hello.wav
//!
//! # Korean, slower, as OGG:
//! supertonic-client --text "안녕하세요" --language ko --speed 0.9 --output /tmp/hi.ogg
//! ```

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, bail};
use clap::Parser;
use supertonic_worker::{
    audio::AudioFormat,
    handler::{JobOutput, SynthesisRequest},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixStream,
    time::timeout,
};

#[derive(Parser)]
#[command(name = "supertonic-client", about = "Send a synthesis job to the Supertonic worker")]
struct Args {
    /// Text to speak
    #[arg(long)]
    text: String,

    /// Output file path (.wav or .ogg)
    #[arg(long)]
    output: PathBuf,

    /// Voice style key (omit for the worker's default)
    #[arg(long)]
    voice: Option<String>,

    /// Text language: en, ko, es, pt, fr
    #[arg(long)]
    language: Option<String>,

    /// Speaking-rate scale 0.5–2.0
    #[arg(long)]
    speed: Option<f32>,

    /// Denoising steps 1–50
    #[arg(long)]
    total_step: Option<usize>,

    /// Fixed seed for reproducibility (omit for random)
    #[arg(long)]
    seed: Option<u64>,

    /// Output sample rate (omit for the model's native rate)
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Socket path
    #[arg(long, default_value = "/tmp/supertonic-worker.sock")]
    socket: PathBuf,

    /// Timeout in seconds to wait for synthesis
    #[arg(long, default_value = "120")]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let format = match args.output.extension().and_then(|e| e.to_str()) {
        Some("wav") | None => AudioFormat::Wav,
        Some("ogg") => AudioFormat::Ogg,
        Some(other) => bail!("unsupported output format '{other}'. Use .wav or .ogg"),
    };

    let request = SynthesisRequest {
        text: args.text,
        voice: args.voice,
        language: args.language,
        speed: args.speed,
        total_step: args.total_step,
        seed: args.seed,
        silence_s: None,
        format: Some(format.as_str().to_string()),
        sample_rate: args.sample_rate,
    };
    let request_line = serde_json::to_string(&serde_json::json!({ "input": request }))? + "\n";

    let stream = timeout(Duration::from_secs(10), UnixStream::connect(&args.socket))
        .await
        .context("timed out connecting to worker socket")?
        .with_context(|| format!("failed to connect to {}", args.socket.display()))?;

    let (reader, mut writer) = stream.into_split();

    writer
        .write_all(request_line.as_bytes())
        .await
        .context("failed to send request")?;
    writer.flush().await?;
    // Signal EOF so the worker knows we're done writing.
    drop(writer);

    let mut reader = BufReader::new(reader);
    let mut response_line = String::new();

    timeout(Duration::from_secs(args.timeout_secs), reader.read_line(&mut response_line))
        .await
        .context("timed out waiting for worker response")?
        .context("failed to read response")?;

    if response_line.is_empty() {
        bail!("worker closed connection without sending a response");
    }

    let output: JobOutput =
        serde_json::from_str(response_line.trim()).context("failed to parse worker response")?;

    match output {
        JobOutput::Ok(result) => {
            std::fs::write(&args.output, result.audio_bytes()?)
                .with_context(|| format!("failed to write {}", args.output.display()))?;
            eprintln!(
                "synthesized {:.1}s of audio ({}, {} Hz) → {}",
                result.duration,
                result.voice,
                result.sample_rate,
                args.output.display()
            );
            println!("{}", args.output.display());
            Ok(())
        }
        JobOutput::Err(e) => {
            bail!("synthesis failed ({}): {}", e.error_kind, e.message);
        }
    }
}
