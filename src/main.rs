use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use cadence::voice::PCM_SAMPLE_RATE;
use cadence::{
    ChatClient, Config, Emotion, Renderer, SpeechAudio, SpeechToText, Synthesizer, TextToSpeech,
    TurnEvent, TurnOrchestrator, TurnState,
};

/// Cadence - Real-time spoken dialogue orchestrator
#[derive(Parser)]
#[command(name = "cadence", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/cadence/config.toml)
    #[arg(short, long, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chat by typing; replies are synthesized sentence by sentence
    Chat,
    /// Synthesize one sentence
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
        /// Write the audio to a WAV file
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Voice to use instead of the configured one
        #[arg(long)]
        voice: Option<String>,
    },
    /// Transcribe a WAV file
    Transcribe {
        /// Path to a WAV file
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,cadence=info",
        1 => "info,cadence=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Chat => chat(&config).await,
        Command::Say { text, out, voice } => {
            say(&config, &text, out.as_deref(), voice).await
        }
        Command::Transcribe { path } => transcribe(&config, &path).await,
    }
}

/// Prints what an avatar would play
struct ConsoleRenderer;

impl Renderer for ConsoleRenderer {
    fn speak(&self, audio: SpeechAudio) {
        let words: Vec<&str> = audio.words.iter().map(|w| w.word.as_str()).collect();
        println!("  [audio {} ms] {}", audio.duration_ms(), words.join(" "));
    }

    fn stop_speaking(&self) {
        println!("  [stopped]");
    }

    fn set_mood(&self, mood: Emotion) {
        println!("  [mood: {mood}]");
    }
}

async fn chat(config: &Config) -> anyhow::Result<()> {
    let (orchestrator, mut events) = TurnOrchestrator::from_config(config)
        .model(Arc::new(ChatClient::new(&config.llm)))
        .synthesizer(Arc::new(TextToSpeech::new(&config.tts)))
        .renderer(Arc::new(ConsoleRenderer))
        .spawn()?;

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TurnEvent::StateChanged(change) if change.current == TurnState::Idle => {
                    println!("> ");
                }
                TurnEvent::AssistantSentence(sentence) => println!("ava: {sentence}"),
                TurnEvent::Error(message) => println!("error: {message}"),
                _ => {}
            }
        }
    });

    println!("Type a message. /stop interrupts, /clear forgets, /quit exits.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" => break,
            "/stop" => orchestrator.cancel_turn()?,
            "/clear" => {
                orchestrator.clear_conversation()?;
                println!("(conversation cleared)");
            }
            text => orchestrator.accept_user_text(text)?,
        }
    }

    orchestrator.shutdown()?;
    printer.abort();
    Ok(())
}

async fn say(
    config: &Config,
    text: &str,
    out: Option<&std::path::Path>,
    voice: Option<String>,
) -> anyhow::Result<()> {
    println!("Synthesizing: \"{text}\"");

    let mut tts = TextToSpeech::new(&config.tts);
    if let Some(voice) = voice {
        tts.set_voice(voice);
    }
    let audio = tts.synthesize(text).await?;
    println!(
        "Got {} bytes of PCM ({} ms), {} word timings",
        audio.pcm.len(),
        audio.duration_ms(),
        audio.words.len()
    );
    for word in &audio.words {
        println!("  {:>8.0} ms  {}", word.start_ms, word.word);
    }

    if let Some(path) = out {
        write_pcm_wav(path, &audio.pcm)?;
        println!("Wrote {}", path.display());
    }

    Ok(())
}

fn write_pcm_wav(path: &std::path::Path, pcm: &[u8]) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: PCM_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    for pair in pcm.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([pair[0], pair[1]]))?;
    }
    writer.finalize()?;
    Ok(())
}

async fn transcribe(config: &Config, path: &std::path::Path) -> anyhow::Result<()> {
    let audio = tokio::fs::read(path).await?;
    println!("Transcribing {} ({} bytes)...", path.display(), audio.len());

    let stt = SpeechToText::new(&config.stt);
    match stt.transcribe(&audio).await? {
        Some(text) => println!("{text}"),
        None => println!("(no speech detected)"),
    }

    Ok(())
}
