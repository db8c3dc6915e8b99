use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;
use voice_chat::native::{CpalMicrophone, CpalSpeaker};
use voice_chat::types::ServerEvent;
use voice_chat::{Config, Mode, VoiceChat};

/// Talk to the voice pipeline from a terminal.
///
/// Press Enter to start and stop a recording, `h` + Enter to toggle hands-free
/// listening, `q` + Enter to quit.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Pipeline endpoint, overrides VOICE_CHAT_URL
    #[arg(long)]
    url: Option<String>,

    /// Model to request, must be in VOICE_CHAT_MODELS
    #[arg(long)]
    model: Option<String>,

    /// Input device name (see the `devices` example)
    #[arg(long)]
    input: Option<String>,

    /// Output device name
    #[arg(long)]
    output: Option<String>,

    /// Start in hands-free mode
    #[arg(long)]
    hands_free: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut builder = Config::from_env().context("invalid configuration")?.into_builder();
    if let Some(url) = &args.url {
        builder = builder.with_url(url);
    }
    let config = builder.build()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.log_level().as_str())),
        )
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let url = config.url().to_string();
    let chat = VoiceChat::new(
        config,
        Arc::new(CpalMicrophone::new(args.input.clone())),
        Arc::new(CpalSpeaker::new(args.output.clone())),
    );
    if let Some(model) = &args.model {
        chat.select_model(model)?;
    }
    println!("models: {}", chat.models().join(", "));

    chat.connect()
        .await
        .with_context(|| format!("failed to connect to {}", url))?;
    println!("Connected to {}", url);

    let mut server_events = chat.client().server_events();
    tokio::spawn(async move {
        while let Ok(e) = server_events.recv().await {
            match e {
                ServerEvent::SttDone(done) => println!("You: {}", done.full_transcript()),
                ServerEvent::LlmDone(done) => {
                    if let Some(response) = done.full_response() {
                        println!("AI: {}", response);
                    }
                }
                ServerEvent::TtsChunk(chunk) => println!("  [{}] {}", chunk.index(), chunk.sentence()),
                ServerEvent::Error(error) => eprintln!("Error: {}", error.message()),
                _ => {}
            }
        }
    });

    if args.hands_free {
        chat.enable_hands_free().context("failed to start hands-free mode")?;
        println!("Listening...");
    } else {
        println!("Press Enter to record, or type >message to chat");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match line.trim() {
                    "q" => break,
                    "h" => {
                        if chat.session().mode() == Mode::HandsFree {
                            chat.disable_hands_free();
                            println!("Hands-free off, press Enter to record");
                        } else if let Err(e) = chat.enable_hands_free() {
                            eprintln!("{}", e);
                        } else {
                            println!("Listening...");
                        }
                    }
                    text if text.starts_with('>') => match chat.send_text(&text[1..]).await {
                        Ok(outcome) => println!("{}", outcome.response()),
                        Err(e) => eprintln!("{}", e),
                    },
                    _ if chat.is_recording() => match chat.stop_recording().await {
                        Ok(Some(outcome)) => println!(
                            "({} chunks, {}ms)",
                            outcome.chunks(),
                            outcome.round_trip().as_millis()
                        ),
                        Ok(None) => println!("Recording too short, discarded"),
                        Err(e) => eprintln!("{}", e),
                    },
                    _ => match chat.start_recording() {
                        Ok(()) => println!("Recording... press Enter to stop"),
                        Err(e) => eprintln!("{}", e),
                    },
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Received Ctrl-C, shutting down...");
                break;
            }
        }
    }

    chat.clear();
    chat.client().disconnect();
    println!("stats: {:?}", chat.client().stats());
    Ok(())
}
