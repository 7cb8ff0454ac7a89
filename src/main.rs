use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voicechat_gateway::api::ApiServerBuilder;
use voicechat_gateway::{Config, ConversationStore, DiscardSink, Orchestrator};

/// Voicechat - talk to a chat model and hear it answer
#[derive(Parser)]
#[command(name = "voicechat", version, about)]
struct Cli {
    /// Port to listen on (overrides config and `VOICECHAT_PORT`)
    #[arg(long)]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Synthesize a phrase into the output directory
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Print the stored conversation
    ShowHistory,
    /// Forget the stored conversation
    ResetHistory,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voicechat_gateway=info",
        1 => "info,voicechat_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
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
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::TestTts { text } => test_tts(&config, &text).await,
        Command::ShowHistory => show_history(&config),
        Command::ResetHistory => reset_history(&config),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    config.validate()?;

    tracing::info!(
        port = config.server.port,
        chat_provider = ?config.chat.provider,
        chat_model = %config.chat.model,
        synthesis_host = %config.synthesis.host,
        "starting voicechat gateway"
    );

    let orchestrator = Arc::new(Orchestrator::from_config(&config)?);

    ApiServerBuilder::new(orchestrator, config.server.port)
        .static_dir(config.server.static_dir.clone())
        .default_language(config.transcription.language.clone())
        .build()
        .run()
        .await?;

    Ok(())
}

async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    config.validate()?;
    println!("Testing TTS with text: \"{text}\"\n");

    let orchestrator = Orchestrator::from_config(config)?;

    println!("Synthesizing speech...");
    let narration = orchestrator.narrate(text, &mut DiscardSink).await?;
    println!(
        "Got {} bytes of audio in {} chunks",
        narration.bytes, narration.chunks
    );
    println!("Saved to {}", narration.path.display());

    Ok(())
}

fn show_history(config: &Config) -> anyhow::Result<()> {
    let store = ConversationStore::new(config.storage.history_file.clone());

    match store.load()? {
        None => println!("No conversation stored at {}", store.path().display()),
        Some(turns) => {
            for turn in turns {
                println!("[{}] {}", turn.role.as_str(), turn.content);
            }
        }
    }

    Ok(())
}

fn reset_history(config: &Config) -> anyhow::Result<()> {
    let store = ConversationStore::new(config.storage.history_file.clone());

    if store.clear()? {
        println!("Conversation cleared ({})", store.path().display());
    } else {
        println!("No conversation stored at {}", store.path().display());
    }

    Ok(())
}
