//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`LocalEmbedder`]**: runs sentence-transformer models locally via fastembed;
//!   no network calls after the first model download.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`OpenAIEmbedder`]**: calls the OpenAI embeddings API.
//! - **[`HashEmbedder`]**: deterministic feature-hashing embedder with no model
//!   at all; useful offline and in smoke tests.
//!
//! Also provides vector utilities shared with the store:
//! - [`cosine_similarity`]: similarity between two embedding vectors
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` encoding for SQLite BLOBs
//!
//! # Failures
//!
//! A provider makes exactly one attempt per call. Failures are classified
//! so the caller's [`RetryPolicy`](crate::retry::RetryPolicy) knows what to
//! retry:
//! - HTTP 429 (rate limited), 5xx, network errors, model load errors → transient
//! - other HTTP 4xx, malformed responses → permanent

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};

/// Model used by the `local` provider when none is configured.
pub const DEFAULT_LOCAL_MODEL: &str = "paraphrase-multilingual-mpnet-base-v2";

/// Dimensionality used by the `hash` provider when none is configured.
pub const DEFAULT_HASH_DIMS: usize = 256;

/// Maps text to fixed-dimensional dense vectors.
///
/// Implementations must be deterministic for a fixed model version and
/// return exactly one vector per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `768`).
    fn dims(&self) -> usize;
    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| RagError::embedding_permanent("empty embedding response"))
}

/// Create the [`Embedder`] selected by `[embedding] provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"local"` | [`LocalEmbedder`] (requires the `local-embeddings` feature) |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"hash"` | [`HashEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => Err(RagError::configuration(
            "local embedding provider requires --features local-embeddings",
        )),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "hash" => Ok(Arc::new(HashEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        other => Err(RagError::configuration(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| RagError::configuration(format!("failed to build HTTP client: {}", e)))
}

fn required_model(config: &EmbeddingConfig, provider: &str) -> Result<String> {
    config.model.clone().ok_or_else(|| {
        RagError::configuration(format!("embedding.model required for {} provider", provider))
    })
}

fn required_dims(config: &EmbeddingConfig, provider: &str) -> Result<usize> {
    config.dims.ok_or_else(|| {
        RagError::configuration(format!("embedding.dims required for {} provider", provider))
    })
}

/// Classify an HTTP response status from an embedding API.
async fn status_error(provider: &str, response: reqwest::Response) -> RagError {
    let status = response.status();
    let body_text = response.text().await.unwrap_or_default();
    let message = format!("{} API error {}: {}", provider, status, body_text);
    if status.as_u16() == 429 || status.is_server_error() {
        RagError::embedding_transient(message)
    } else {
        RagError::embedding_permanent(message)
    }
}

fn check_count(provider: &str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(RagError::embedding_permanent(format!(
            "{} returned {} embeddings for {} inputs",
            provider, got, expected
        )));
    }
    Ok(())
}

fn json_vector(value: &serde_json::Value, provider: &str) -> Result<Vec<f32>> {
    let array = value.as_array().ok_or_else(|| {
        RagError::embedding_permanent(format!("invalid {} response: embedding is not an array", provider))
    })?;
    Ok(array
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

// ============ OpenAI ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = required_model(config, "OpenAI")?;
        let dims = required_dims(config, "OpenAI")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| RagError::configuration("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            model,
            dims,
            api_key,
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::embedding_transient(format!("OpenAI request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(status_error("OpenAI", response).await);
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RagError::embedding_transient(format!("OpenAI response unreadable: {}", e)))?;
        let vectors = parse_openai_response(&json)?;
        check_count("OpenAI", texts.len(), vectors.len())?;
        Ok(vectors)
    }
}

/// Extracts `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::embedding_permanent("invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item.get("embedding").ok_or_else(|| {
            RagError::embedding_permanent("invalid OpenAI response: missing embedding")
        })?;
        indexed.push((index, json_vector(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = required_model(config, "Ollama")?;
        let dims = required_dims(config, "Ollama")?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            client: http_client(config)?,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                RagError::embedding_transient(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;

        if !response.status().is_success() {
            return Err(status_error("Ollama", response).await);
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RagError::embedding_transient(format!("Ollama response unreadable: {}", e)))?;
        let vectors = parse_ollama_response(&json)?;
        check_count("Ollama", texts.len(), vectors.len())?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            RagError::embedding_permanent("invalid Ollama response: missing embeddings array")
        })?
        .iter()
        .map(|embedding| json_vector(embedding, "Ollama"))
        .collect()
}

// ============ Local (fastembed) ============

/// Embedding provider for local inference through fastembed.
///
/// The model is downloaded from Hugging Face on first use and cached.
/// Instances are loaded lazily, up to `[embedding] local_workers` of them,
/// so that many embeds run concurrently; a failed load is retried like any
/// other transient failure.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    batch_size: usize,
    pool: Arc<ModelPool<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_LOCAL_MODEL.to_string());
        let (model, known_dims) = local_model(&model_name)?;
        if let Some(dims) = config.dims {
            if dims != known_dims {
                return Err(RagError::configuration(format!(
                    "embedding.dims = {} but {} produces {}-dimensional vectors",
                    dims, model_name, known_dims
                )));
            }
        }

        Ok(Self {
            model_name,
            model,
            dims: known_dims,
            batch_size: config.batch_size,
            pool: Arc::new(ModelPool::new(config.local_workers)),
        })
    }
}

/// Idle model instances plus a permit per instance slot.
///
/// A caller holds a permit for as long as it uses an instance, so at most
/// `size` instances ever exist and none is shared between callers.
#[cfg(feature = "local-embeddings")]
struct ModelPool<T> {
    idle: std::sync::Mutex<Vec<T>>,
    permits: Arc<tokio::sync::Semaphore>,
}

#[cfg(feature = "local-embeddings")]
impl<T> ModelPool<T> {
    fn new(size: usize) -> Self {
        Self {
            idle: std::sync::Mutex::new(Vec::with_capacity(size)),
            permits: Arc::new(tokio::sync::Semaphore::new(size.max(1))),
        }
    }

    async fn acquire(&self) -> Result<tokio::sync::OwnedSemaphorePermit> {
        Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| RagError::embedding_permanent("local embedding pool closed"))
    }

    /// An idle instance, if any. Only call while holding a permit.
    fn take(&self) -> Option<T> {
        self.idle.lock().ok().and_then(|mut idle| idle.pop())
    }

    fn put(&self, instance: T) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(instance);
        }
    }
}

#[cfg(feature = "local-embeddings")]
fn local_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel;

    match name {
        "paraphrase-multilingual-mpnet-base-v2" => Ok((EmbeddingModel::ParaphraseMLMpnetBaseV2, 768)),
        "all-minilm-l6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
        "bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
        "bge-large-en-v1.5" => Ok((EmbeddingModel::BGELargeENV15, 1024)),
        "nomic-embed-text-v1.5" => Ok((EmbeddingModel::NomicEmbedTextV15, 768)),
        "multilingual-e5-small" => Ok((EmbeddingModel::MultilingualE5Small, 384)),
        "multilingual-e5-base" => Ok((EmbeddingModel::MultilingualE5Base, 768)),
        "multilingual-e5-large" => Ok((EmbeddingModel::MultilingualE5Large, 1024)),
        other => Err(RagError::configuration(format!(
            "unknown local embedding model: '{}'. Supported models: \
             paraphrase-multilingual-mpnet-base-v2, all-minilm-l6-v2, bge-small-en-v1.5, \
             bge-base-en-v1.5, bge-large-en-v1.5, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let permit = self.pool.acquire().await?;
        let pool = Arc::clone(&self.pool);
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let mut instance = match pool.take() {
                Some(instance) => instance,
                None => {
                    tracing::info!("loading local embedding model");
                    fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(model).with_show_download_progress(false),
                    )
                    .map_err(|e| {
                        RagError::embedding_transient(format!(
                            "failed to initialize local embedding model: {}",
                            e
                        ))
                    })?
                }
            };
            let result = instance
                .embed(texts, Some(batch_size))
                .map_err(|e| RagError::embedding_transient(format!("local embedding failed: {}", e)));
            pool.put(instance);
            result
        })
        .await
        .map_err(|e| RagError::embedding_transient(format!("embedding task failed: {}", e)))?
    }
}

// ============ Hash ============

/// Deterministic bag-of-words embedder.
///
/// Each lower-cased alphanumeric token is hashed (FNV-1a) into one of `dims`
/// buckets with a hash-derived sign, and the result is L2-normalized. Texts
/// sharing vocabulary get high cosine similarity; there is no semantics
/// beyond token overlap.
pub struct HashEmbedder {
    dims: usize,
    name: String,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            name: format!("hash-{}", dims),
        }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(&token.to_lowercase());
            let bucket = (hash % self.dims as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

fn fnv1a(token: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in token.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use pdf_harness::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Reverses [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, and zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
