//! Command handlers for the ragline binary: the interactive chat loop,
//! one-shot questions, index builds, and the Telegram bot runner.

use crate::ConfigAction;
use ragline_core::{
    Embedder, MockLlmProvider, RagChain, RagConfig, SessionStore, TelegramBot, VectorIndex,
    VectorRetriever, build_index, create_embedder, create_provider, ensure_index, load_config,
};
use ragline_core::types::Message;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Session key used by the interactive chat loop. The CLI is a single
/// conversation; per-chat keying only matters for the Telegram channel.
const SESSION_ID: &str = "cli";

/// Assemble the pipeline shared by chat, ask, and the Telegram runner.
///
/// Provider or index failures degrade rather than abort: a failed provider
/// is replaced by the mock, a missing index leaves the chain running
/// generation-only.
async fn build_chain(config: &RagConfig) -> RagChain {
    let provider = match create_provider(&config.llm) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("LLM provider init failed: {}. Using mock.", e);
            Arc::new(MockLlmProvider::new())
        }
    };

    let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding));
    let chain = RagChain::with_config(provider, config);

    match ensure_index(&config.index, &config.ingest, embedder.as_ref()).await {
        Ok(index) => chain.with_retriever(Arc::new(VectorRetriever::new(index, embedder))),
        Err(e) => {
            tracing::warn!("Vector index unavailable: {}. Answering without retrieval.", e);
            chain
        }
    }
}

/// Run the interactive chat loop.
pub async fn run_chat(config: RagConfig, workspace: PathBuf) -> anyhow::Result<()> {
    println!("\x1b[1;32m");
    println!(r#"  ██████╗  █████╗  ██████╗ ██╗     ██╗███╗   ██╗███████╗"#);
    println!(r#"  ██╔══██╗██╔══██╗██╔════╝ ██║     ██║████╗  ██║██╔════╝"#);
    println!(r#"  ██████╔╝███████║██║  ███╗██║     ██║██╔██╗ ██║█████╗  "#);
    println!(r#"  ██╔══██╗██╔══██║██║   ██║██║     ██║██║╚██╗██║██╔══╝  "#);
    println!(r#"  ██║  ██║██║  ██║╚██████╔╝███████╗██║██║ ╚████║███████╗"#);
    println!(r#"  ╚═╝  ╚═╝╚═╝  ╚═╝ ╚═════╝ ╚══════╝╚═╝╚═╝  ╚═══╝╚══════╝"#);
    println!("\x1b[0m");
    println!(
        "  Model: {} | Corpus: {} | Workspace: {}",
        config.llm.model,
        config.ingest.corpus_path.display(),
        workspace.display()
    );
    println!("  Ask a question. /reset clears the conversation, /quit exits.\n");

    let chain = build_chain(&config).await;
    let sessions = SessionStore::new();

    let stdin = io::stdin();
    loop {
        print!("\x1b[1;34m> \x1b[0m");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input).is_err() || input.is_empty() {
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "exit" | "/quit" | "/exit" | "/q" => {
                println!("Goodbye!");
                break;
            }
            "/reset" => {
                sessions.reset(SESSION_ID).await;
                println!("Conversation cleared.");
                continue;
            }
            _ => {}
        }

        // The pipeline sees only prior turns; the current question rides
        // separately and is appended afterwards.
        let history = sessions.history(SESSION_ID).await;
        sessions.append(SESSION_ID, Message::user(input)).await;
        let answer = chain.ask(input, history).await;
        sessions
            .append(SESSION_ID, Message::assistant(&answer))
            .await;

        println!("\n\x1b[32mRagline:\x1b[0m {}\n", answer);
    }

    Ok(())
}

/// Answer a single question with no conversation history and exit.
pub async fn run_ask(question: &str, config: RagConfig) -> anyhow::Result<()> {
    let chain = build_chain(&config).await;
    let answer = chain.ask(question, Vec::new()).await;
    println!("{}", answer);
    Ok(())
}

/// Build the vector index from the configured corpus file.
pub async fn run_index(config: RagConfig, force: bool) -> anyhow::Result<()> {
    let embedder = create_embedder(&config.embedding);

    if force && config.index.db_path.exists() {
        std::fs::remove_file(&config.index.db_path)?;
        println!("Removed existing index at {}", config.index.db_path.display());
    }

    let mut index = VectorIndex::open(&config.index.db_path, embedder.dimensions())?;
    let existing = index.len()?;
    if existing > 0 {
        println!(
            "Index at {} already contains {} chunks. Use --force to rebuild.",
            config.index.db_path.display(),
            existing
        );
        return Ok(());
    }

    println!(
        "Indexing {} with '{}' embeddings...",
        config.ingest.corpus_path.display(),
        embedder.provider_name()
    );
    let stats = build_index(&mut index, embedder.as_ref(), &config.ingest).await?;
    println!(
        "Indexed {} chunks in {} batches.",
        stats.chunks_indexed, stats.batches
    );
    Ok(())
}

/// Run the Telegram bot until interrupted.
pub async fn run_telegram(config: RagConfig) -> anyhow::Result<()> {
    let Some(telegram) = config.telegram.clone() else {
        anyhow::bail!(
            "Telegram is not configured. Add a [telegram] section with bot_token to your config file."
        );
    };

    let chain = Arc::new(build_chain(&config).await);
    let sessions = Arc::new(SessionStore::new());
    let mut bot = TelegramBot::new(telegram, chain, sessions)?;

    tokio::select! {
        _ = bot.run() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
    }
    Ok(())
}

/// Handle `config init` and `config show`.
pub fn handle_config(action: &ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".ragline");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let default_config = RagConfig::default();
            let toml_str = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
