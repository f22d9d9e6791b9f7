//! SQLite-backed vector index with brute-force cosine search.
//!
//! Chunk embeddings are stored as little-endian f32 BLOBs alongside their
//! text and JSON metadata in a single `chunks` table. Search scans every
//! stored row and ranks by cosine similarity, which stays comfortably fast
//! for corpora up to a few tens of thousands of chunks.

use crate::error::IndexError;
use crate::types::Document;
use rusqlite::{Connection, params};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Serialize an embedding to a little-endian byte blob for storage.
fn embedding_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize a stored blob back into an embedding.
fn blob_to_embedding(blob: &[u8]) -> Result<Vec<f32>, IndexError> {
    if blob.len() % 4 != 0 {
        return Err(IndexError::Corrupted {
            message: format!("embedding blob length {} is not a multiple of 4", blob.len()),
        });
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Cosine similarity between two vectors of equal length.
///
/// Returns 0.0 when either vector has zero norm.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// A search hit with its similarity score (higher is closer).
#[derive(Debug, Clone)]
pub struct ScoredDocument {
    pub document: Document,
    pub score: f32,
}

/// Persistent vector index over document chunks.
///
/// The index is keyed to a fixed embedding dimension; inserts and queries
/// with a different dimension are rejected rather than silently truncated.
pub struct VectorIndex {
    conn: Connection,
    dims: usize,
}

impl VectorIndex {
    /// Open (or create) an index database at `path`.
    ///
    /// Parent directories are created as needed. Opening an existing file
    /// keeps its contents; the schema is applied only if missing.
    pub fn open(path: &Path, dims: usize) -> Result<Self, IndexError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| IndexError::Storage {
                    message: format!(
                        "failed to create index directory {}: {e}",
                        parent.display()
                    ),
                })?;
            }
        }
        let conn = Connection::open(path)?;
        let index = Self { conn, dims };
        index.ensure_table()?;
        debug!(path = %path.display(), dims, "opened vector index");
        Ok(index)
    }

    /// Open an in-memory index. Contents are lost on drop.
    pub fn open_in_memory(dims: usize) -> Result<Self, IndexError> {
        let conn = Connection::open_in_memory()?;
        let index = Self { conn, dims };
        index.ensure_table()?;
        Ok(index)
    }

    fn ensure_table(&self) -> Result<(), IndexError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL
            )",
        )?;
        Ok(())
    }

    /// Expected embedding dimension.
    pub fn dimensions(&self) -> usize {
        self.dims
    }

    /// Number of stored chunks.
    pub fn len(&self) -> Result<usize, IndexError> {
        let count: i64 = self
            .conn
            .query_row("SELECT count(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len()? == 0)
    }

    /// Store a single chunk with its embedding.
    pub fn add(&self, document: &Document, embedding: &[f32]) -> Result<(), IndexError> {
        insert_chunk(&self.conn, self.dims, document, embedding)
    }

    /// Store a batch of chunks inside one transaction.
    ///
    /// `documents` and `embeddings` are matched by position; a length
    /// mismatch rejects the whole batch before anything is written.
    pub fn add_batch(
        &mut self,
        documents: &[Document],
        embeddings: &[Vec<f32>],
    ) -> Result<(), IndexError> {
        if documents.len() != embeddings.len() {
            return Err(IndexError::Storage {
                message: format!(
                    "batch mismatch: {} documents but {} embeddings",
                    documents.len(),
                    embeddings.len()
                ),
            });
        }
        let tx = self.conn.transaction()?;
        for (document, embedding) in documents.iter().zip(embeddings) {
            insert_chunk(&tx, self.dims, document, embedding)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Find the `k` chunks most similar to the query embedding.
    ///
    /// Results are ordered by descending cosine similarity. Fewer than `k`
    /// results are returned when the index holds fewer chunks.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredDocument>, IndexError> {
        if query.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: query.len(),
            });
        }

        let mut stmt = self
            .conn
            .prepare("SELECT id, content, metadata, embedding FROM chunks")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        })?;

        let mut scored = Vec::new();
        for row in rows {
            let (id, content, metadata_json, blob) = row?;
            let embedding = blob_to_embedding(&blob)?;
            if embedding.len() != self.dims {
                return Err(IndexError::Corrupted {
                    message: format!(
                        "chunk {id} has {} dimensions, index expects {}",
                        embedding.len(),
                        self.dims
                    ),
                });
            }
            let metadata: HashMap<String, serde_json::Value> = serde_json::from_str(
                &metadata_json,
            )
            .map_err(|e| IndexError::Corrupted {
                message: format!("chunk {id} metadata is not valid JSON: {e}"),
            })?;
            let score = cosine_similarity(query, &embedding);
            scored.push(ScoredDocument {
                document: Document { content, metadata },
                score,
            });
        }

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

fn insert_chunk(
    conn: &Connection,
    dims: usize,
    document: &Document,
    embedding: &[f32],
) -> Result<(), IndexError> {
    if embedding.len() != dims {
        return Err(IndexError::DimensionMismatch {
            expected: dims,
            actual: embedding.len(),
        });
    }
    let metadata = serde_json::to_string(&document.metadata).map_err(|e| IndexError::Storage {
        message: format!("chunk metadata is not serializable: {e}"),
    })?;
    conn.execute(
        "INSERT INTO chunks (content, metadata, embedding) VALUES (?1, ?2, ?3)",
        params![document.content, metadata, embedding_to_blob(embedding)],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_index(dims: usize) -> VectorIndex {
        VectorIndex::open_in_memory(dims).unwrap()
    }

    fn unit_vector(dims: usize, seed: u8) -> Vec<f32> {
        let mut v: Vec<f32> = (0..dims)
            .map(|i| (i as f32 + f32::from(seed) * 7.3).sin())
            .collect();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        for x in &mut v {
            *x /= norm;
        }
        v
    }

    #[test]
    fn test_open_in_memory_starts_empty() {
        let index = make_index(4);
        assert_eq!(index.len().unwrap(), 0);
        assert!(index.is_empty().unwrap());
        assert_eq!(index.dimensions(), 4);
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("index.db");
        let index = VectorIndex::open(&path, 4).unwrap();
        assert!(path.exists());
        assert_eq!(index.len().unwrap(), 0);
    }

    #[test]
    fn test_open_existing_keeps_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let index = VectorIndex::open(&path, 4).unwrap();
            index
                .add(&Document::new("persisted chunk"), &unit_vector(4, 1))
                .unwrap();
        }
        let reopened = VectorIndex::open(&path, 4).unwrap();
        assert_eq!(reopened.len().unwrap(), 1);
        let hits = reopened.search(&unit_vector(4, 1), 1).unwrap();
        assert_eq!(hits[0].document.content, "persisted chunk");
    }

    #[test]
    fn test_add_and_len() {
        let index = make_index(4);
        index
            .add(&Document::new("first"), &unit_vector(4, 1))
            .unwrap();
        index
            .add(&Document::new("second"), &unit_vector(4, 2))
            .unwrap();
        assert_eq!(index.len().unwrap(), 2);
    }

    #[test]
    fn test_add_rejects_wrong_dimensions() {
        let index = make_index(4);
        let err = index
            .add(&Document::new("bad"), &[1.0, 2.0])
            .unwrap_err();
        match err {
            IndexError::DimensionMismatch { expected, actual } => {
                assert_eq!(expected, 4);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_add_batch_inserts_all() {
        let mut index = make_index(4);
        let documents = vec![
            Document::new("one"),
            Document::new("two"),
            Document::new("three"),
        ];
        let embeddings = vec![unit_vector(4, 1), unit_vector(4, 2), unit_vector(4, 3)];
        index.add_batch(&documents, &embeddings).unwrap();
        assert_eq!(index.len().unwrap(), 3);
    }

    #[test]
    fn test_add_batch_length_mismatch_writes_nothing() {
        let mut index = make_index(4);
        let documents = vec![Document::new("one"), Document::new("two")];
        let embeddings = vec![unit_vector(4, 1)];
        assert!(index.add_batch(&documents, &embeddings).is_err());
        assert_eq!(index.len().unwrap(), 0);
    }

    #[test]
    fn test_add_batch_bad_embedding_rolls_back() {
        let mut index = make_index(4);
        let documents = vec![Document::new("good"), Document::new("bad")];
        let embeddings = vec![unit_vector(4, 1), vec![1.0, 2.0]];
        assert!(index.add_batch(&documents, &embeddings).is_err());
        assert_eq!(index.len().unwrap(), 0);
    }

    #[test]
    fn test_search_empty_index() {
        let index = make_index(4);
        let hits = index.search(&unit_vector(4, 0), 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_search_exact_match_scores_one() {
        let index = make_index(4);
        let v = unit_vector(4, 1);
        index.add(&Document::new("target"), &v).unwrap();
        let hits = index.search(&v, 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.content, "target");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let index = make_index(4);
        let query = unit_vector(4, 0);
        index.add(&Document::new("exact"), &query).unwrap();
        index
            .add(&Document::new("different"), &unit_vector(4, 100))
            .unwrap();
        let hits = index.search(&query, 5).unwrap();
        assert_eq!(hits[0].document.content, "exact");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_search_respects_k() {
        let index = make_index(4);
        for i in 0_u8..6 {
            index
                .add(&Document::new(format!("chunk {i}")), &unit_vector(4, i))
                .unwrap();
        }
        let hits = index.search(&unit_vector(4, 0), 2).unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_search_fewer_than_k() {
        let index = make_index(4);
        index
            .add(&Document::new("only"), &unit_vector(4, 1))
            .unwrap();
        let hits = index.search(&unit_vector(4, 0), 5).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_search_rejects_wrong_query_dimensions() {
        let index = make_index(4);
        let err = index.search(&[1.0, 2.0], 5).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_search_preserves_metadata() {
        let index = make_index(4);
        let doc = Document::new("with meta")
            .with_metadata("source", json!("corpus.md"))
            .with_metadata("start_index", json!(120));
        index.add(&doc, &unit_vector(4, 1)).unwrap();
        let hits = index.search(&unit_vector(4, 1), 1).unwrap();
        assert_eq!(hits[0].document.metadata["source"], json!("corpus.md"));
        assert_eq!(hits[0].document.metadata["start_index"], json!(120));
    }

    #[test]
    fn test_search_detects_truncated_blob() {
        let index = make_index(4);
        index
            .conn
            .execute(
                "INSERT INTO chunks (content, metadata, embedding) VALUES (?1, ?2, ?3)",
                params!["broken", "{}", vec![0_u8; 7]],
            )
            .unwrap();
        let err = index.search(&unit_vector(4, 0), 5).unwrap_err();
        assert!(matches!(err, IndexError::Corrupted { .. }));
    }

    #[test]
    fn test_search_detects_foreign_dimensions() {
        let index = make_index(4);
        index
            .conn
            .execute(
                "INSERT INTO chunks (content, metadata, embedding) VALUES (?1, ?2, ?3)",
                params!["wrong dims", "{}", embedding_to_blob(&[1.0, 2.0])],
            )
            .unwrap();
        let err = index.search(&unit_vector(4, 0), 5).unwrap_err();
        assert!(matches!(err, IndexError::Corrupted { .. }));
    }

    #[test]
    fn test_blob_roundtrip() {
        let original = vec![1.0_f32, -2.5, 3.125, 0.0];
        let blob = embedding_to_blob(&original);
        let recovered = blob_to_embedding(&blob).unwrap();
        assert_eq!(original, recovered);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let v = unit_vector(8, 3);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let v = unit_vector(4, 1);
        let zero = vec![0.0; 4];
        assert_eq!(cosine_similarity(&v, &zero), 0.0);
    }

    #[test]
    fn test_many_chunks_search_completes() {
        let mut index = make_index(16);
        let documents: Vec<Document> = (0..500).map(|i| Document::new(format!("c{i}"))).collect();
        let embeddings: Vec<Vec<f32>> =
            (0..500_u16).map(|i| unit_vector(16, (i % 256) as u8)).collect();
        index.add_batch(&documents, &embeddings).unwrap();
        assert_eq!(index.len().unwrap(), 500);

        let hits = index.search(&unit_vector(16, 0), 5).unwrap();
        assert_eq!(hits.len(), 5);
    }
}
