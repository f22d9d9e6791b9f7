//! Document retrieval over the vector index.
//!
//! The `Retriever` trait is the seam between the answer pipeline and the
//! storage layer: the pipeline asks for relevant documents by query string
//! and never sees embeddings or SQL.

use crate::embeddings::Embedder;
use crate::error::RetrievalError;
use crate::index::VectorIndex;
use crate::types::Document;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Trait for retrieval backends.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Return up to `k` documents relevant to `query`, most relevant first.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Document>, RetrievalError>;
}

/// Retriever backed by the SQLite vector index.
///
/// Embeds the query with the same embedder the corpus was indexed with,
/// then ranks stored chunks by cosine similarity.
pub struct VectorRetriever {
    index: Arc<Mutex<VectorIndex>>,
    embedder: Arc<dyn Embedder>,
}

impl VectorRetriever {
    pub fn new(index: VectorIndex, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index: Arc::new(Mutex::new(index)),
            embedder,
        }
    }
}

#[async_trait]
impl Retriever for VectorRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Document>, RetrievalError> {
        let embedding = self.embedder.embed(query).await?;
        let index = self.index.lock().await;
        let hits = index.search(&embedding, k)?;
        debug!(query, hits = hits.len(), "vector search");
        Ok(hits.into_iter().map(|hit| hit.document).collect())
    }
}

/// Scripted retriever for tests.
///
/// Returns a fixed document list (truncated to `k`) and records every
/// query it was asked, so tests can assert on what the pipeline searched.
pub struct MockRetriever {
    documents: Vec<Document>,
    queries: std::sync::Mutex<Vec<String>>,
}

impl MockRetriever {
    pub fn new() -> Self {
        Self::with_documents(Vec::new())
    }

    pub fn with_documents(documents: Vec<Document>) -> Self {
        Self {
            documents,
            queries: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// All queries seen so far, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

impl Default for MockRetriever {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Retriever for MockRetriever {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Document>, RetrievalError> {
        self.queries.lock().unwrap().push(query.to_string());
        Ok(self.documents.iter().take(k).cloned().collect())
    }
}
