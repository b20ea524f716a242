//! Kiln CLI: the main entry point.
//!
//! Commands:
//! - `serve`   : Run the agent server on the Unix socket
//! - `chat`    : Ask a question (no tools)
//! - `edit`    : Ask with tools enabled (read, list, write files)
//! - `add`     : Add text to the knowledge base
//! - `index`   : Index a directory into the knowledge base
//! - `stats`   : Count stored documents
//! - `clear`   : Empty the knowledge base
//! - `sources` : List indexed sources
//! - `config`  : Show the effective configuration
//! - `doctor`  : Diagnose setup problems

use clap::{Parser, Subcommand};
use kiln_server::RequestKind;
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "kiln",
    about = "Kiln: a local tool-augmented LLM agent with a knowledge base",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.kiln/config.toml
    #[arg(long, global = true, env = "KILN_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent server
    Serve,

    /// Ask a question, answered from the model and the knowledge base
    Chat {
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Ask with file tools enabled
    Edit {
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Add text to the knowledge base
    Add {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Index a directory (or single file) into the knowledge base
    Index { path: PathBuf },

    /// Show how many documents the knowledge base holds
    Stats,

    /// Remove every document from the knowledge base
    Clear,

    /// List the sources in the knowledge base
    Sources,

    /// Show configuration
    Config {
        /// Print the built-in defaults instead of the effective config
        #[arg(long)]
        default: bool,

        /// Print the config file path only
        #[arg(long, conflicts_with = "default")]
        path: bool,
    },

    /// Diagnose setup problems
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Serve => commands::serve::run(commands::load_config(config_path)?).await?,
        Commands::Chat { message, timeout } => {
            let config = commands::load_config(config_path)?;
            commands::ask::run(&config, RequestKind::Chat, message.join(" "), timeout).await?
        }
        Commands::Edit { message, timeout } => {
            let config = commands::load_config(config_path)?;
            commands::ask::run(&config, RequestKind::Edit, message.join(" "), timeout).await?
        }
        Commands::Add { text } => {
            let config = commands::load_config(config_path)?;
            commands::knowledge::run(&config, RequestKind::Add, text.join(" ")).await?
        }
        Commands::Index { path } => {
            let config = commands::load_config(config_path)?;
            commands::knowledge::run(&config, RequestKind::Index, path.display().to_string()).await?
        }
        Commands::Stats => {
            let config = commands::load_config(config_path)?;
            commands::knowledge::run(&config, RequestKind::Stats, String::new()).await?
        }
        Commands::Clear => {
            let config = commands::load_config(config_path)?;
            commands::knowledge::run(&config, RequestKind::Clear, String::new()).await?
        }
        Commands::Sources => {
            let config = commands::load_config(config_path)?;
            commands::knowledge::run(&config, RequestKind::Sources, String::new()).await?
        }
        Commands::Config { default, path } => {
            if path {
                commands::config_cmd::path(config_path)
            } else if default {
                commands::config_cmd::show_default()
            } else {
                commands::config_cmd::show(&commands::load_config(config_path)?)?
            }
        }
        Commands::Doctor => commands::doctor::run(config_path).await?,
    }

    Ok(())
}
