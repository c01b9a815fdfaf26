//! Main entry point for the hearth CLI.

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;
use tracing_subscriber::{
    EnvFilter, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

mod commands;

/// Hearth CLI
#[derive(Parser)]
#[command(name = "hearth")]
#[command(about = "Command-line client for Campfire-style group chat", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Subcommands for the hearth CLI
#[derive(Subcommand)]
enum Commands {
    /// List rooms visible to the account
    Rooms {
        /// Show only rooms the account is currently present in
        #[arg(
            long,
            short,
            help = "Show only rooms the account is currently present in"
        )]
        joined: bool,
    },
    /// Stream a room's messages to stdout until interrupted
    Watch {
        /// Name of the room to watch
        room: String,

        /// Poll the transcript instead of holding a live connection
        #[arg(
            long,
            short,
            help = "Poll the transcript instead of holding a live connection (useful behind proxies that buffer streams)"
        )]
        poll: bool,
    },
    /// Post a message to a room
    Say {
        /// Name of the room to post to
        room: String,

        /// Message body; multi-line bodies are posted as pastes
        message: String,
    },
    /// Upload a file to a room
    Send {
        /// Name of the room to upload to
        room: String,

        /// Path of the file to upload
        file: PathBuf,
    },
    /// Generate shell completion scripts for the CLI
    Completion {
        /// The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)
        #[arg(
            long,
            short,
            help = "The shell type for which to generate the completion script (e.g., bash, zsh, fish, powershell)"
        )]
        shell: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr)) // Keep stdout for message output
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy()
        }))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Rooms { joined } => commands::rooms::list(joined).await?,
        Commands::Watch { room, poll } => commands::watch::watch(&room, poll).await?,
        Commands::Say { room, message } => commands::say::say(&room, &message).await?,
        Commands::Send { room, file } => commands::send::send(&room, &file).await?,
        Commands::Completion { shell } => {
            let shell = shell
                .parse::<clap_complete::Shell>()
                .map_err(|err| anyhow::anyhow!("invalid shell type: {err}"))?;
            commands::completion::generate_completion(shell);
        }
    }

    Ok(())
}
