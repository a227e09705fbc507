//! Supertonic CLI: one-shot text-to-speech.
//!
//! Loads the asset directory (optionally fetching it from the Hugging Face
//! Hub first), synthesizes one utterance and writes it to --output.
//! Also prints a one-line JSON summary to stdout on success:
//!
//! ```json
//! {"path":"/tmp/hello.wav","duration_s":1.2,"sample_rate":44100,"channels":1,"voice":"M1","seed":42}
//! ```
//!
//! Exit code 0 on success, non-zero on error.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Parser;
use supertonic_worker::{
    assets::{AssetStore, hub},
    audio::AudioFormat,
    config::{WorkerArgs, WorkerConfig},
    handler::{Handler, JobOutput, SynthesisRequest},
};

#[derive(Parser, Debug)]
#[command(
    name = "supertonic",
    about = "Supertonic text-to-speech",
    long_about = "Synthesize speech from text with the Supertonic ONNX models.\n\
                  Output is written to --output; a JSON summary line is printed to stdout."
)]
struct Args {
    /// Text to speak.
    #[arg(long, short = 't')]
    text: String,

    /// Voice style key (e.g. M1, F1). Defaults to --default-voice.
    #[arg(long, short = 'v')]
    voice: Option<String>,

    /// Text language: en, ko, es, pt, fr.
    #[arg(long, default_value = "en")]
    language: String,

    /// Speaking-rate scale (0.5–2.0).
    #[arg(long, default_value_t = 1.05)]
    speed: f32,

    /// Denoising steps (1–50). More steps, higher quality, slower.
    #[arg(long, default_value_t = 5)]
    total_step: usize,

    /// Random seed. Omit for a random seed each run.
    #[arg(long, short = 's')]
    seed: Option<u64>,

    /// Silence between text segments, in seconds.
    #[arg(long, default_value_t = 0.3)]
    silence: f32,

    /// Output sample rate. Omit for the model's native rate.
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Output file path. Format determined by extension (.wav or .ogg).
    #[arg(long, short = 'o')]
    output: PathBuf,

    /// Write 32-bit float WAV instead of 16-bit PCM.
    #[arg(long)]
    float: bool,

    /// Download the asset directory from the Hugging Face Hub first.
    #[arg(long)]
    from_hub: bool,

    /// Hub repository to download from.
    #[arg(long, default_value = hub::DEFAULT_REPO)]
    repo: String,

    #[command(flatten)]
    worker: WorkerArgs,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Validate output path has a supported extension
    let ext = args
        .output
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("wav");
    let format = match (ext, args.float) {
        ("wav", false) => AudioFormat::Wav,
        ("wav", true) => AudioFormat::WavF32,
        ("ogg", false) => AudioFormat::Ogg,
        ("ogg", true) => bail!("--float only applies to .wav output"),
        _ => bail!("unsupported output format '{ext}'. Use .wav or .ogg"),
    };

    // Ensure output directory exists
    if let Some(parent) = args.output.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let mut config = WorkerConfig::from(args.worker);
    if args.from_hub {
        let mut voices: Vec<&str> = hub::DEFAULT_VOICES.to_vec();
        for voice in [Some(config.default_voice.as_str()), args.voice.as_deref()]
            .into_iter()
            .flatten()
        {
            if !voices.contains(&voice) {
                voices.push(voice);
            }
        }
        tracing::info!(repo = %args.repo, "fetching assets from the hub");
        config.assets_dir = hub::fetch_assets(&args.repo, &voices)
            .with_context(|| format!("failed to fetch assets from {}", args.repo))?;
    }

    tracing::info!("Loading Supertonic assets from {:?}...", config.assets_dir);
    let assets = AssetStore::new(config.clone())
        .load()
        .context("failed to load assets")?;
    let handler = Handler::new(assets, &config)?;

    let request = SynthesisRequest {
        text: args.text,
        voice: args.voice,
        language: Some(args.language),
        speed: Some(args.speed),
        total_step: Some(args.total_step),
        seed: args.seed,
        silence_s: Some(args.silence),
        format: Some(format.as_str().to_string()),
        sample_rate: args.sample_rate,
    };

    let result = match handler.handle(&request) {
        JobOutput::Ok(result) => result,
        JobOutput::Err(e) => bail!("{}: {}", e.error_kind, e.message),
    };

    std::fs::write(&args.output, result.audio_bytes()?)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    // Print machine-readable summary to stdout for the caller
    let summary = serde_json::json!({
        "path": args.output,
        "duration_s": result.duration,
        "sample_rate": result.sample_rate,
        "channels": result.channels,
        "voice": result.voice,
        "seed": result.seed,
    });
    println!("{summary}");

    Ok(())
}
