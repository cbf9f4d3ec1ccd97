//! CLI binary for tomo.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use tomo::audio::playback::CpalPlayer;
use tomo::pipeline::sequencer::SpeechSequencer;
use tomo::{
    ChatOrchestrator, CompanionConfig, CompanionError, HttpReplySource, HttpSynthesizer, NullAvatar,
};

/// Tomo: streaming virtual-companion chat with lip-synced speech.
#[derive(Parser)]
#[command(name = "tomo", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Chat from the terminal; replies are spoken as they stream in.
    Chat,

    /// List available audio output devices.
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tomo=info")),
        )
        .init();

    let cli = Cli::parse();

    let config = if let Some(ref path) = cli.config {
        CompanionConfig::load(path)?
    } else {
        CompanionConfig::default()
    };

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(config).await,
        Command::Devices => list_devices(),
    }
}

async fn run_chat(config: CompanionConfig) -> anyhow::Result<()> {
    println!("Tomo v{}", env!("CARGO_PKG_VERSION"));

    let (runtime_tx, _) = broadcast::channel(256);

    let player = CpalPlayer::new(&config.audio, Some(runtime_tx.clone()))?;
    let source = Arc::new(HttpReplySource::new(&config.chat, &config.character));
    let synthesizer = Arc::new(HttpSynthesizer::new(&config.tts));
    let sequencer = Arc::new(SpeechSequencer::new(
        synthesizer,
        Arc::new(player),
        Arc::new(NullAvatar),
        config.tts.clone(),
        Some(runtime_tx.clone()),
    ));
    let orchestrator = ChatOrchestrator::new(config.clone(), source, sequencer, runtime_tx);

    println!(
        "\nChatting with {}. Type a message and press Enter; Ctrl+D to quit.\n",
        config.character.character_name
    );

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("{}> ", config.character.your_name);
        std::io::stdout().flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }

        match orchestrator.start_turn(&line) {
            Ok(handle) => handle.await?,
            Err(CompanionError::EmptyInput) => continue,
            Err(e) => warn!("turn rejected: {e}"),
        }

        if let Some(entry) = orchestrator.transcript_snapshot().last() {
            println!("{}> {}", entry.speaker_name, entry.content);
        }
    }

    orchestrator.shutdown();
    Ok(())
}

fn list_devices() -> anyhow::Result<()> {
    let devices = CpalPlayer::list_output_devices()?;
    if devices.is_empty() {
        println!("No audio output devices found.");
        return Ok(());
    }
    println!("Audio output devices:");
    for name in devices {
        println!("  {name}");
    }
    Ok(())
}
