//! Corpus ingestion: split, embed, and store document chunks.
//!
//! Reads the configured markdown corpus, splits it into overlapping chunks,
//! embeds each chunk, and writes the results into the vector index in
//! batches. Hosted embedding APIs meter requests per minute, so batches are
//! separated by a configurable pause.

use crate::config::{IndexConfig, IngestConfig};
use crate::embeddings::Embedder;
use crate::error::{ConfigError, Result};
use crate::index::VectorIndex;
use crate::splitter::TextSplitter;
use crate::types::Document;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

/// Result of an ingestion pass.
#[derive(Debug, Clone, Copy)]
pub struct IngestStats {
    /// Number of chunks embedded and stored.
    pub chunks_indexed: usize,
    /// Number of embedding batches issued.
    pub batches: usize,
}

/// Open the index at the configured path, building it from the corpus
/// when it holds no chunks yet.
///
/// An existing non-empty index is reused as-is; edit or delete the database
/// file to force a rebuild.
pub async fn ensure_index(
    index_config: &IndexConfig,
    ingest_config: &IngestConfig,
    embedder: &dyn Embedder,
) -> Result<VectorIndex> {
    let mut index = VectorIndex::open(&index_config.db_path, embedder.dimensions())?;
    let existing = index.len()?;
    if existing > 0 {
        info!(chunks = existing, path = %index_config.db_path.display(), "loaded existing vector index");
        return Ok(index);
    }
    let stats = build_index(&mut index, embedder, ingest_config).await?;
    info!(
        chunks = stats.chunks_indexed,
        batches = stats.batches,
        "built vector index from corpus"
    );
    Ok(index)
}

/// Run a full ingestion pass of the corpus into `index`.
///
/// Chunks are embedded `batch_size` at a time; between batches the task
/// sleeps for `batch_pause_secs` to stay under per-minute API quotas. No
/// pause follows the final batch.
pub async fn build_index(
    index: &mut VectorIndex,
    embedder: &dyn Embedder,
    config: &IngestConfig,
) -> Result<IngestStats> {
    if !config.corpus_path.exists() {
        return Err(ConfigError::FileNotFound {
            path: config.corpus_path.clone(),
        }
        .into());
    }
    let text = std::fs::read_to_string(&config.corpus_path)?;

    let splitter = TextSplitter::new(config.chunk_size, config.chunk_overlap);
    let chunks = splitter.split(&text);
    if chunks.is_empty() {
        info!(path = %config.corpus_path.display(), "corpus is empty, nothing to index");
        return Ok(IngestStats {
            chunks_indexed: 0,
            batches: 0,
        });
    }

    let source = config.corpus_path.display().to_string();
    let documents: Vec<Document> = chunks
        .into_iter()
        .map(|chunk| {
            Document::new(chunk.content)
                .with_metadata("source", json!(source))
                .with_metadata("start_index", json!(chunk.start_index))
        })
        .collect();

    let batch_size = config.batch_size.max(1);
    let total_batches = documents.len().div_ceil(batch_size);
    info!(
        chunks = documents.len(),
        batches = total_batches,
        provider = embedder.provider_name(),
        "ingesting corpus"
    );

    for (i, batch) in documents.chunks(batch_size).enumerate() {
        let texts: Vec<&str> = batch.iter().map(|d| d.content.as_str()).collect();
        let embeddings = embedder.embed_batch(&texts).await?;
        index.add_batch(batch, &embeddings)?;
        debug!(batch = i + 1, total = total_batches, size = batch.len(), "indexed batch");

        if i + 1 < total_batches && config.batch_pause_secs > 0 {
            debug!(seconds = config.batch_pause_secs, "pausing for embedding quota");
            tokio::time::sleep(Duration::from_secs(config.batch_pause_secs)).await;
        }
    }

    Ok(IngestStats {
        chunks_indexed: documents.len(),
        batches: total_batches,
    })
}
