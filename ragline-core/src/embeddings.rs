//! Embedding providers for semantic retrieval.
//!
//! The [`Embedder`] trait abstracts over embedding backends. Two live here:
//! a client for the Gemini embeddings API and a local term-frequency hashing
//! embedder that needs no network or key.

use crate::error::EmbeddingError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Turns text into fixed-dimension vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch of texts. The default embeds one at a time; backends
    /// with a bulk endpoint override this.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Dimensionality of the vectors this backend produces.
    fn dimensions(&self) -> usize;

    /// Short backend identifier for logs.
    fn provider_name(&self) -> &str;
}

/// Embedding backend selection and tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Which backend to use: "gemini" (default) or "hash".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Backend-specific model name; Gemini defaults to "embedding-001".
    #[serde(default)]
    pub model: Option<String>,
    /// Vector dimensionality; 0 means use the backend's default.
    #[serde(default)]
    pub dimensions: usize,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_provider() -> String {
    "gemini".into()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".into()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".into(),
            model: None,
            dimensions: 0,
            api_key_env: "GEMINI_API_KEY".into(),
        }
    }
}

/// Local term-frequency hashing embedder.
///
/// Quality is far below a real embedding model; it exists so the pipeline
/// can run offline and in tests.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

/// djb2-style string hash used to map terms onto dimensions.
fn simple_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let lowered = text.to_lowercase();
        let mut term_counts: HashMap<&str, f32> = HashMap::new();
        for term in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            *term_counts.entry(term).or_insert(0.0) += 1.0;
        }

        let mut vector = vec![0.0f32; self.dimensions];
        for (term, count) in term_counts {
            vector[simple_hash(term) % self.dimensions] += count;
        }

        // L2 normalize so dot products behave like cosine similarity.
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn provider_name(&self) -> &str {
        "hash"
    }
}

/// The default Gemini embeddings API base URL.
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Client for the Gemini embeddings API.
pub struct GeminiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl GeminiEmbedder {
    /// Create a new Gemini embedder from configuration.
    ///
    /// Reads the API key from the environment variable named in
    /// `config.api_key_env`. Returns `EmbeddingError::AuthFailed` if the
    /// variable is not set.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key =
            std::env::var(&config.api_key_env).map_err(|_| EmbeddingError::AuthFailed {
                provider: format!("Gemini (env var '{}' not set)", config.api_key_env),
            })?;

        // Accept both "embedding-001" and the wire-form "models/embedding-001".
        let model = config
            .model
            .as_deref()
            .map(|m| m.strip_prefix("models/").unwrap_or(m))
            .unwrap_or("embedding-001")
            .to_string();

        let dims = match config.dimensions {
            0 => 768,
            d => d,
        };

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: GEMINI_BASE_URL.to_string(),
            api_key,
            model,
            dims,
        })
    }

    fn values_to_vec(values: &[Value]) -> Vec<f32> {
        values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect()
    }

    /// Parse a single `embedContent` response body.
    fn parse_embedding(body: &Value) -> Result<Vec<f32>, EmbeddingError> {
        body["embedding"]["values"]
            .as_array()
            .map(|values| Self::values_to_vec(values))
            .ok_or_else(|| EmbeddingError::ResponseParse {
                message: "response has no 'embedding.values' array".to_string(),
            })
    }

    /// Parse a `batchEmbedContents` response body.
    fn parse_batch(body: &Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let embeddings = body["embeddings"]
            .as_array()
            .ok_or_else(|| EmbeddingError::ResponseParse {
                message: "response has no 'embeddings' array".to_string(),
            })?;

        embeddings
            .iter()
            .map(|entry| {
                entry["values"]
                    .as_array()
                    .map(|values| Self::values_to_vec(values))
                    .ok_or_else(|| EmbeddingError::ResponseParse {
                        message: "batch entry has no 'values' array".to_string(),
                    })
            })
            .collect()
    }

    fn content_body(&self, text: &str) -> Value {
        serde_json::json!({
            "model": format!("models/{}", self.model),
            "content": {"parts": [{"text": text}]},
        })
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, EmbeddingError> {
        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| EmbeddingError::ApiRequest {
                message: format!("Gemini embeddings request failed: {e}"),
            })?;

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| EmbeddingError::ResponseParse {
                message: format!("failed to read response body: {e}"),
            })?;

        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => EmbeddingError::AuthFailed {
                    provider: "Gemini".to_string(),
                },
                _ => EmbeddingError::ApiRequest {
                    message: format!("Gemini embeddings API returned {status}: {body_text}"),
                },
            });
        }

        serde_json::from_str(&body_text).map_err(|e| EmbeddingError::ResponseParse {
            message: format!("response body is not valid JSON: {e}"),
        })
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!(
            "{}/models/{}:embedContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let response = self.post_json(&url, &self.content_body(text)).await?;
        Self::parse_embedding(&response)
    }

    /// Batch embedding via `batchEmbedContents` (one HTTP call per batch).
    ///
    /// The API accepts at most 100 entries per call; callers batch below that.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/models/{}:batchEmbedContents?key={}",
            self.base_url, self.model, self.api_key
        );
        let requests: Vec<Value> = texts.iter().map(|text| self.content_body(text)).collect();
        let body = serde_json::json!({ "requests": requests });

        let response = self.post_json(&url, &body).await?;
        Self::parse_batch(&response)
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn provider_name(&self) -> &str {
        "gemini"
    }
}

/// Build the configured embedder.
///
/// Falls back to the local hashing embedder (with a warning) when the
/// configured backend cannot be initialized.
pub fn create_embedder(config: &EmbeddingConfig) -> Box<dyn Embedder> {
    if config.provider == "gemini" {
        match GeminiEmbedder::new(config) {
            Ok(embedder) => return Box::new(embedder),
            Err(e) => {
                tracing::warn!("Gemini embedder unavailable ({e}), using hash embedder");
            }
        }
    }

    let dims = match config.dimensions {
        0 => 128,
        d => d,
    };
    Box::new(HashEmbedder::new(dims))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_embedder_dimensions() {
        let embedder = HashEmbedder::new(128);
        assert_eq!(embedder.dimensions(), 128);

        let v = embedder.embed("hello world").await.unwrap();
        assert_eq!(v.len(), 128);
    }

    #[tokio::test]
    async fn test_hash_embedder_normalized() {
        let embedder = HashEmbedder::new(128);
        let v = embedder
            .embed("test input text for normalization")
            .await
            .unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01, "norm was {norm}, wanted ~1.0");
    }

    #[tokio::test]
    async fn test_hash_embedder_empty_text_is_zero_vector() {
        let embedder = HashEmbedder::new(128);
        let v = embedder.embed("").await.unwrap();
        assert_eq!(v.len(), 128);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[tokio::test]
    async fn test_hash_embedder_deterministic() {
        let embedder = HashEmbedder::new(128);
        let v1 = embedder.embed("same text").await.unwrap();
        let v2 = embedder.embed("same text").await.unwrap();
        assert_eq!(v1, v2);

        let v3 = embedder.embed("different text entirely").await.unwrap();
        assert_ne!(v1, v3);
    }

    #[tokio::test]
    async fn test_embed_batch_default_impl() {
        let embedder = HashEmbedder::new(64);
        let embeddings = embedder
            .embed_batch(&["hello", "world", "test"])
            .await
            .unwrap();
        assert_eq!(embeddings.len(), 3);
        assert!(embeddings.iter().all(|e| e.len() == 64));
    }

    #[tokio::test]
    async fn test_embedder_as_trait_object() {
        let embedder: Box<dyn Embedder> = Box::new(HashEmbedder::new(128));
        assert_eq!(embedder.provider_name(), "hash");

        let v = embedder.embed("test").await.unwrap();
        assert_eq!(v.len(), embedder.dimensions());
    }

    #[test]
    fn test_embedding_config_defaults() {
        let config = EmbeddingConfig::default();
        assert_eq!(config.provider, "gemini");
        assert!(config.model.is_none());
        assert_eq!(config.dimensions, 0);
        assert_eq!(config.api_key_env, "GEMINI_API_KEY");
    }

    #[test]
    fn test_embedding_config_toml_roundtrip() {
        let config = EmbeddingConfig {
            provider: "hash".into(),
            model: Some("models/embedding-001".into()),
            dimensions: 768,
            api_key_env: "OTHER_KEY".into(),
        };
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: EmbeddingConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(deserialized.provider, "hash");
        assert_eq!(deserialized.dimensions, 768);
    }

    #[test]
    fn test_gemini_embedder_strips_model_prefix() {
        // SAFETY: test-scoped env mutation
        unsafe { std::env::set_var("RAGLINE_TEST_EMBED_KEY", "k") };
        let config = EmbeddingConfig {
            model: Some("models/embedding-001".into()),
            api_key_env: "RAGLINE_TEST_EMBED_KEY".into(),
            ..Default::default()
        };
        let embedder = GeminiEmbedder::new(&config).unwrap();
        assert_eq!(embedder.model, "embedding-001");
        assert_eq!(embedder.dimensions(), 768);
        // SAFETY: test-scoped env mutation
        unsafe { std::env::remove_var("RAGLINE_TEST_EMBED_KEY") };
    }

    #[test]
    fn test_parse_embedding() {
        let body = serde_json::json!({
            "embedding": {"values": [0.1, 0.2, 0.3]}
        });
        let v = GeminiEmbedder::parse_embedding(&body).unwrap();
        assert_eq!(v.len(), 3);
        assert!((v[0] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_parse_embedding_missing_values() {
        let body = serde_json::json!({"error": "nope"});
        let err = GeminiEmbedder::parse_embedding(&body).unwrap_err();
        assert!(matches!(err, EmbeddingError::ResponseParse { .. }));
    }

    #[test]
    fn test_parse_batch() {
        let body = serde_json::json!({
            "embeddings": [
                {"values": [0.1, 0.2]},
                {"values": [0.3, 0.4]}
            ]
        });
        let batch = GeminiEmbedder::parse_batch(&body).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[1].len(), 2);
    }

    #[test]
    fn test_create_embedder_falls_back_without_key() {
        let config = EmbeddingConfig {
            api_key_env: "RAGLINE_EMBED_KEY_THAT_IS_NOT_SET".into(),
            dimensions: 64,
            ..Default::default()
        };
        let embedder = create_embedder(&config);
        assert_eq!(embedder.provider_name(), "hash");
        assert_eq!(embedder.dimensions(), 64);
    }
}
