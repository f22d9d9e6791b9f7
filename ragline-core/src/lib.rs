//! # Ragline Core
//!
//! Everything behind the ragline question-answering surfaces: the
//! retrieval-augmented answer pipeline, the vector index and corpus
//! ingestion, embedding and LLM providers, session storage, and the
//! configuration that wires them together.

pub mod chain;
pub mod channels;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod index;
pub mod ingest;
pub mod llm;
pub mod providers;
pub mod retriever;
pub mod session;
pub mod splitter;
pub mod types;

// Flat re-exports so callers rarely need the module paths.
pub use chain::{ChainState, FALLBACK_ANSWER, RagChain};
pub use channels::{TelegramBot, TelegramConfig};
pub use config::{
    ChainConfig, IndexConfig, IngestConfig, LlmConfig, RagConfig, config_exists, load_config,
};
pub use embeddings::{Embedder, EmbeddingConfig, GeminiEmbedder, HashEmbedder, create_embedder};
pub use error::{RaglineError, Result};
pub use index::{ScoredDocument, VectorIndex};
pub use ingest::{IngestStats, build_index, ensure_index};
pub use llm::{LlmProvider, MockLlmProvider, TokenCounter};
pub use providers::{GeminiProvider, create_provider};
pub use retriever::{MockRetriever, Retriever, VectorRetriever};
pub use session::SessionStore;
pub use splitter::{Chunk, TextSplitter};
pub use types::{
    CompletionRequest, CompletionResponse, Document, Message, Role, TokenUsage,
};
