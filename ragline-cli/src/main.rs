//! Ragline CLI: conversational question answering over an indexed corpus.
//!
//! Provides an interactive chat loop, one-shot questions, corpus indexing,
//! and a Telegram bot runner.

mod repl;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Ragline: retrieval-augmented answers from your own documents
#[derive(Parser, Debug)]
#[command(name = "ragline", version, about, long_about = None)]
struct Cli {
    /// Override the configured LLM model
    #[arg(short, long)]
    model: Option<String>,

    /// Workspace directory (config, index, and corpus paths resolve against it)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only errors on stderr
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand (interactive chat if omitted)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Chat with the indexed corpus interactively
    Chat,
    /// Ask a single question and exit
    Ask {
        /// The question to answer
        question: String,
    },
    /// Build the vector index from the configured corpus file
    Index {
        /// Discard any existing index and rebuild from scratch
        #[arg(long)]
        force: bool,
    },
    /// Run the Telegram bot
    Telegram,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
pub(crate) enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

/// Install the tracing subscriber: a human-readable stderr layer at the
/// level the verbosity flags select, plus a JSON file layer that always
/// records at debug into the user data directory.
///
/// The returned guard flushes the file writer on drop and must stay alive
/// for the duration of the program.
fn init_tracing(cli: &Cli) -> tracing_appender::non_blocking::WorkerGuard {
    let stderr_level = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(stderr_level));

    let log_dir = directories::ProjectDirs::from("dev", "ragline", "ragline")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "ragline.log"));
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Environment first so GEMINI_/RAGLINE_ vars from .env reach figment.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(&cli);

    let workspace = match cli.workspace.canonicalize() {
        Ok(dir) => dir,
        Err(_) => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };

    // `config init` must work before any config file exists.
    if let Some(Commands::Config { action }) = &cli.command {
        return repl::handle_config(action, &workspace);
    }

    let mut config = ragline_core::load_config(Some(&workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if !ragline_core::config_exists(Some(&workspace)) {
        tracing::debug!("no configuration file found, using defaults");
    }

    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }

    // Corpus and index paths in the config are workspace-relative.
    if config.index.db_path.is_relative() {
        config.index.db_path = workspace.join(&config.index.db_path);
    }
    if config.ingest.corpus_path.is_relative() {
        config.ingest.corpus_path = workspace.join(&config.ingest.corpus_path);
    }

    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    match cli.command {
        Some(Commands::Ask { question }) => repl::run_ask(&question, config).await,
        Some(Commands::Index { force }) => repl::run_index(config, force).await,
        Some(Commands::Telegram) => repl::run_telegram(config).await,
        // Config returned above; no subcommand means interactive chat.
        _ => repl::run_chat(config, workspace).await,
    }
}
