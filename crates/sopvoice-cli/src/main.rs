//! sopvoice CLI: voice engine for the SOP Assistant.
//!
//! ```text
//! sopvoice serve [--port 2004] [--host 127.0.0.1]
//! sopvoice speak "Close the bypass valve." [--voice nova] [--speed 1.2]
//! sopvoice transcribe recording.wav
//! sopvoice record [--seconds 5]
//! sopvoice voices
//! ```
//!
//! Every command accepts `--config <file.json>`, `--backend-url` and
//! `--espeak`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use sopvoice_lib::VoiceError;
use sopvoice_lib::manager::{Capabilities, VoiceManager};
use sopvoice_lib::server::{self, DEFAULT_PORT};
use sopvoice_lib::sopvoice_core::types::{AudioClip, Transcription, VoiceConfig};

/// sopvoice: record, transcribe and speak for the SOP Assistant
#[derive(Parser)]
#[command(name = "sopvoice", version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct CommonArgs {
    /// JSON config file; missing keys take their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Backend base URL (overrides the config file)
    #[arg(long, global = true)]
    backend_url: Option<String>,
    /// eSpeak executable used for local voices
    #[arg(long, global = true, default_value = "espeak")]
    espeak: String,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the voice control API
    Serve {
        /// Listen port
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Listen host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Speak text (chat markup is cleaned first)
    Speak {
        /// Text to speak
        text: String,
        /// Voice preset id
        #[arg(long)]
        voice: Option<String>,
        /// Speech speed, clamped to 0.5..=2.0
        #[arg(long)]
        speed: Option<f32>,
    },
    /// Transcribe an existing audio file
    Transcribe {
        /// .mp3 .mp4 .mpeg .mpga .m4a .wav .webm or .ogg
        file: PathBuf,
    },
    /// Record from the microphone, then transcribe
    Record {
        /// Recording length
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
    /// List preset bindings and backend voices
    Voices,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sopvoice_cli=info,sopvoice_lib=info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = load_config(&cli.common)?;
    let caps = Capabilities::system(&cli.common.espeak).map_err(|e| e.to_string())?;
    let manager = VoiceManager::new(config, caps).map_err(|e| e.to_string())?;

    match cli.command {
        Command::Serve { port, host } => {
            let app = server::router(manager.clone());
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .map_err(|e| format!("failed to bind {addr}: {e}"))?;
            info!("sopvoice listening on {addr}");

            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await
                .map_err(|e| format!("server error: {e}"))?;
            manager.exit_voice_mode().await;
        }

        Command::Speak { text, voice, speed } => {
            let spoken = manager
                .speak(&text, voice.as_deref(), speed)
                .await
                .map_err(|e| e.to_string())?;
            if !spoken {
                eprintln!("nothing to speak");
            }
        }

        Command::Transcribe { file } => {
            let clip = read_clip(&file).await?;
            print_transcription(manager.transcribe(&clip).await)?;
        }

        Command::Record { seconds } => {
            let seconds = seconds.clamp(1, 60);
            manager.enter_voice_mode().await.map_err(|e| e.to_string())?;
            manager.start_recording().await.map_err(|e| e.to_string())?;
            eprintln!("recording for {seconds}s...");
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            let result = manager.stop_and_transcribe().await;
            manager.exit_voice_mode().await;
            print_transcription(result)?;
        }

        Command::Voices => {
            let resolved = manager.resolved_voices().await;
            let support = manager.support();
            let remote = match manager.remote_voices().await {
                Ok(list) => serde_json::to_value(list).unwrap_or_default(),
                Err(e) => serde_json::json!({ "error": e.to_string() }),
            };
            let out = serde_json::json!({
                "support": support,
                "resolved": resolved.as_ref(),
                "remote": remote,
            });
            println!(
                "{}",
                serde_json::to_string_pretty(&out).map_err(|e| e.to_string())?
            );
        }
    }
    Ok(())
}

fn load_config(args: &CommonArgs) -> Result<VoiceConfig, String> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
            VoiceConfig::from_json(&json)?
        }
        None => VoiceConfig::default(),
    };
    if let Some(url) = &args.backend_url {
        config.backend_url = url.clone();
    }
    Ok(config)
}

async fn read_clip(path: &Path) -> Result<AudioClip, String> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    AudioClip::from_file(&name, bytes).map_err(|e| VoiceError::UnsupportedAudio(e).to_string())
}

fn print_transcription(result: sopvoice_lib::Result<Transcription>) -> Result<(), String> {
    match result.map_err(|e| e.to_string())? {
        Transcription::Text(text) => println!("{text}"),
        Transcription::Rejected(reason) => eprintln!("backend: {reason}"),
    }
    Ok(())
}
