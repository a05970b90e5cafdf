//! PulseChat CLI: the main entry point.
//!
//! Commands:
//! - `serve`    : Start the HTTP gateway
//! - `chat`     : Interactive chat or single-message mode
//! - `status`   : Show configuration and database summary
//! - `db init`  : Create the database schema
//! - `db stats` : Row counts per table

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "pulsechat",
    about = "PulseChat — conversational assistant grounded on wearable biosignals",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Chat with PulseChat
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Conversation id to continue (a fresh one is generated otherwise)
        #[arg(short, long)]
        session: Option<String>,

        /// Ground the conversation on the latest snapshot of this monitoring session
        #[arg(long)]
        monitoring_session: Option<String>,
    },

    /// Show configuration and database summary
    Status,

    /// Database maintenance
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Subcommand)]
enum DbAction {
    /// Create every table and index (idempotent)
    Init,
    /// Print row counts per table
    Stats {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Chat {
            message,
            session,
            monitoring_session,
        } => commands::chat::run(message, session, monitoring_session).await?,
        Commands::Status => commands::status::run().await?,
        Commands::Db { action } => match action {
            DbAction::Init => commands::db::init().await?,
            DbAction::Stats { json } => commands::db::stats(json).await?,
        },
    }

    Ok(())
}
