use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;
use voice_chat::native::CpalSpeaker;
use voice_chat::{CaptureMode, CapturedUtterance, Client, Config, Pipeline, PlaybackQueue, Session};

/// Sends a recorded WAV file through the pipeline and plays the answer.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Audio file to send
    path: PathBuf,

    /// Pipeline endpoint, overrides VOICE_CHAT_URL
    #[arg(long)]
    url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let mut builder = Config::from_env()?.into_builder();
    if let Some(url) = &args.url {
        builder = builder.with_url(url);
    }
    let config = builder.build()?;

    let session = Session::new();
    let playback = PlaybackQueue::new(Arc::new(CpalSpeaker::default()));
    let client = Client::new(&config, session.clone(), playback.clone());
    let pipeline = Pipeline::new(client.clone(), config.model());

    let audio = std::fs::read(&args.path).with_context(|| format!("failed to read {}", args.path.display()))?;
    let utterance = CapturedUtterance::new(audio, Duration::ZERO, CaptureMode::Manual);
    let outcome = pipeline.run(utterance).await?;
    println!("You: {}", outcome.transcript());
    println!("AI: {}", outcome.response());

    let mut playing = playback.subscribe();
    playing.wait_for(|playing| !*playing).await?;
    client.disconnect();
    println!("{:?}", client.stats());
    Ok(())
}
