//! Layered configuration for ragline.
//!
//! Settings merge through `figment` in priority order: built-in defaults,
//! the user config file (`~/.config/ragline/config.toml`), the workspace
//! config file (`.ragline/config.toml`), `RAGLINE_`-prefixed environment
//! variables, then explicit overrides from the CLI.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::channels::telegram::TelegramConfig;
use crate::embeddings::EmbeddingConfig;

/// Root configuration for the ragline engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    pub ingest: IngestConfig,
    pub chain: ChainConfig,
    /// Optional Telegram channel configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<TelegramConfig>,
}

impl RagConfig {
    /// Collect human-readable warnings for suspect values, prefixed with
    /// the section they came from. Warnings never abort startup.
    pub fn validate(&self) -> Vec<String> {
        let sections = [
            ("llm", self.llm.validate()),
            ("ingest", self.ingest.validate()),
            ("chain", self.chain.validate()),
        ];
        sections
            .into_iter()
            .flat_map(|(name, warnings)| {
                warnings.into_iter().map(move |w| format!("[{name}] {w}"))
            })
            .collect()
    }
}

/// Settings for the generative model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Which backend answers completions: "gemini" or "mock".
    pub provider: String,
    /// Model identifier, e.g. "gemini-2.5-flash".
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    /// Alternate API endpoint, for proxies and self-hosted gateways.
    pub base_url: Option<String>,
    /// Upper bound on generated tokens per completion.
    pub max_tokens: usize,
    /// Sampling temperature applied unless a stage overrides it.
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

impl LlmConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.max_tokens == 0 {
            warnings.push("max_tokens is 0; every completion will be empty".to_string());
        }
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the typical range 0.0 to 2.0",
                self.temperature
            ));
        }
        warnings
    }
}

/// Settings for the vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Path of the SQLite database file. Opening a missing path creates a
    /// fresh index; an existing file is loaded as-is.
    pub db_path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(".ragline/index.db"),
        }
    }
}

/// Settings for corpus ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Path of the markdown corpus file to index.
    pub corpus_path: PathBuf,
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in characters.
    pub chunk_overlap: usize,
    /// Number of chunks embedded and inserted per batch.
    pub batch_size: usize,
    /// Pause between batches in seconds, to stay under hosted-API rate
    /// limits. 0 disables the pause.
    pub batch_pause_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            corpus_path: PathBuf::from("docs/corpus.md"),
            chunk_size: 1000,
            chunk_overlap: 200,
            batch_size: 90,
            batch_pause_secs: 60,
        }
    }
}

impl IngestConfig {
    /// Warn about chunking parameters that cannot work.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.chunk_overlap >= self.chunk_size {
            warnings.push(format!(
                "chunk_overlap ({}) >= chunk_size ({}); splitting cannot make progress",
                self.chunk_overlap, self.chunk_size
            ));
        }
        if self.batch_size == 0 {
            warnings.push("batch_size is 0; ingestion will index nothing".to_string());
        }
        warnings
    }
}

/// Settings for the conversational pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Number of chunks fetched per retrieval.
    pub top_k: usize,
    /// Maximum number of stage transitions per run.
    pub step_budget: usize,
    /// Answer returned by `ask` when the pipeline fails or produces nothing.
    pub fallback_answer: String,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            step_budget: 5,
            fallback_answer: "Không có câu trả lời được tạo ra.".to_string(),
        }
    }
}

impl ChainConfig {
    /// Warn about budgets that would break every run.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.step_budget < 4 {
            warnings.push(format!(
                "step_budget ({}) is below the 4 stages of the pipeline; every run will abort",
                self.step_budget
            ));
        }
        if self.top_k == 0 {
            warnings.push("top_k is 0; answers will never be grounded in the corpus".to_string());
        }
        warnings
    }
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "ragline", "ragline")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".ragline").join("config.toml")
}

/// Load configuration from all sources in priority order.
///
/// Priority (lowest to highest): built-in defaults, user-level config file,
/// workspace-level config file, environment variables, explicit overrides.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&RagConfig>,
) -> Result<RagConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(RagConfig::default()));

    let files = [user_config_path(), workspace.map(workspace_config_path)];
    for file in files.into_iter().flatten().filter(|f| f.exists()) {
        figment = figment.merge(Toml::file(&file));
    }

    // RAGLINE_LLM__MODEL, RAGLINE_CHAIN__TOP_K, and so on.
    figment = figment.merge(Env::prefixed("RAGLINE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Whether a ragline config file exists at either standard location.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    user_config_path().is_some_and(|p| p.exists())
        || workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}
