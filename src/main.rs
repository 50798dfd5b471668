use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use oai_rt_voice::{AskOutcome, ClientBuilder, Mode};

/// Talk to a realtime model from the terminal.
#[derive(Parser, Debug)]
#[command(name = "rt-voice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Text-only REPL instead of a voice session
    #[arg(long)]
    text: bool,

    /// Seconds to wait for each answer in text mode
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Override OPENAI_MODEL
    #[arg(long)]
    model: Option<String>,

    /// Override VOICE
    #[arg(long)]
    voice: Option<String>,

    /// Let the model run shell commands on this machine
    #[arg(long)]
    function_calling: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut builder = ClientBuilder::from_env().context("Failed to load configuration")?;
    if let Some(model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(voice) = cli.voice {
        builder = builder.voice(voice);
    }
    if cli.function_calling {
        builder = builder.function_calling(true);
    }

    if cli.text {
        run_text(builder, Duration::from_secs(cli.timeout)).await
    } else {
        run_voice(builder).await
    }
}

async fn run_text(builder: ClientBuilder, timeout: Duration) -> anyhow::Result<()> {
    let mut session = builder
        .mode(Mode::Text)
        .on_error(|err| tracing::error!("{err}"))
        .build();
    session.start()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match session.ask(line, timeout).await {
            Ok(AskOutcome::Answer(text)) => println!("{text}"),
            Ok(AskOutcome::TimedOut) => eprintln!("(no answer within {}s)", timeout.as_secs()),
            Err(err) => {
                eprintln!("{err}");
                break;
            }
        }
    }

    session.stop().await;
    Ok(())
}

async fn run_voice(builder: ClientBuilder) -> anyhow::Result<()> {
    let mut session = builder
        .mode(Mode::Realtime)
        .on_text(|text| async move {
            println!("{text}");
            Ok(())
        })
        .on_error(|err| tracing::error!("{err}"))
        .build();
    session.start()?;
    tracing::info!("Listening. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl-C")?;
    session.stop().await;
    Ok(())
}
