//! TOML configuration.
//!
//! ```toml
//! [source]
//! root = "./data"
//!
//! [chunking]
//! chunk_size = 1000
//! overlap = 100
//!
//! [embedding]
//! provider = "local"
//! model = "paraphrase-multilingual-mpnet-base-v2"
//!
//! [index]
//! state_dir = "./index_data"
//!
//! [server]
//! bind = "127.0.0.1:5000"
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunk;
use crate::error::{RagError, Result};
use crate::retry::{Backoff, RetryPolicy};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
    #[serde(default)]
    pub startup: StartupConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_exclude_globs() -> Vec<String> {
    vec!["**/.git/**".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Model instances kept by the `local` provider; this many embeds run
    /// at once.
    #[serde(default = "default_local_workers")]
    pub local_workers: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            local_workers: default_local_workers(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_local_workers() -> usize {
    2
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy applied to each embedding batch during ingestion.
    pub fn batch_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries + 1,
            Backoff::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(32),
            },
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    pub state_dir: PathBuf,
    /// Max graph neighbors per node per layer.
    #[serde(default = "default_m")]
    pub m: usize,
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
}

fn default_m() -> usize {
    32
}
fn default_ef_construction() -> usize {
    200
}
fn default_ef_search() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct StartupConfig {
    #[serde(default = "default_store_attempts")]
    pub store_attempts: u32,
    #[serde(default = "default_store_backoff_ms")]
    pub store_backoff_ms: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            store_attempts: default_store_attempts(),
            store_backoff_ms: default_store_backoff_ms(),
        }
    }
}

fn default_store_attempts() -> u32 {
    3
}
fn default_store_backoff_ms() -> u64 {
    2000
}

impl StartupConfig {
    /// Retry policy for creating the metadata store during a rebuild.
    pub fn store_retry(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.store_attempts,
            Backoff::Fixed(Duration::from_millis(self.store_backoff_ms)),
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

impl ServerConfig {
    /// Replace the port of `bind`, keeping its host.
    pub fn with_port(&self, port: u16) -> ServerConfig {
        let host = self
            .bind
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or("127.0.0.1");
        ServerConfig {
            bind: format!("{}:{}", host, port),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        RagError::configuration(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| RagError::configuration(format!("failed to parse config: {}", e)))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    chunk::validate(config.chunking.chunk_size, config.chunking.overlap)?;

    if config.embedding.batch_size == 0 {
        return Err(RagError::configuration("embedding.batch_size must be > 0"));
    }
    if config.embedding.local_workers == 0 {
        return Err(RagError::configuration("embedding.local_workers must be >= 1"));
    }
    if config.embedding.dims == Some(0) {
        return Err(RagError::configuration("embedding.dims must be > 0"));
    }
    match config.embedding.provider.as_str() {
        "local" | "ollama" | "openai" | "hash" => {}
        other => {
            return Err(RagError::configuration(format!(
                "unknown embedding provider: '{}'. Must be local, ollama, openai, or hash.",
                other
            )))
        }
    }
    if matches!(config.embedding.provider.as_str(), "ollama" | "openai") {
        if config.embedding.model.is_none() {
            return Err(RagError::configuration(format!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            )));
        }
        if config.embedding.dims.is_none() {
            return Err(RagError::configuration(format!(
                "embedding.dims must be specified when provider is '{}'",
                config.embedding.provider
            )));
        }
    }

    if config.index.m < 2 {
        return Err(RagError::configuration("index.m must be >= 2"));
    }
    if config.index.ef_construction == 0 || config.index.ef_search == 0 {
        return Err(RagError::configuration(
            "index.ef_construction and index.ef_search must be > 0",
        ));
    }
    if config.startup.store_attempts == 0 {
        return Err(RagError::configuration("startup.store_attempts must be >= 1"));
    }
    if config.retrieval.top_k == 0 {
        return Err(RagError::configuration("retrieval.top_k must be >= 1"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[source]
root = "./data"

[index]
state_dir = "./index_data"
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let cfg = parse_config(MINIMAL).unwrap();
        assert_eq!(cfg.chunking.chunk_size, 1000);
        assert_eq!(cfg.chunking.overlap, 100);
        assert_eq!(cfg.embedding.provider, "local");
        assert_eq!(cfg.index.m, 32);
        assert_eq!(cfg.startup.store_attempts, 3);
        assert_eq!(cfg.retrieval.top_k, 3);
        assert_eq!(cfg.server.bind, "127.0.0.1:5000");
        assert_eq!(cfg.source.exclude_globs, vec!["**/.git/**".to_string()]);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let content = format!("{}\n[chunking]\nchunk_size = 100\noverlap = 100\n", MINIMAL);
        let err = parse_config(&content).unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn test_local_workers_default_and_minimum() {
        assert_eq!(parse_config(MINIMAL).unwrap().embedding.local_workers, 2);
        let content = format!("{}\n[embedding]\nlocal_workers = 0\n", MINIMAL);
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("local_workers"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let content = format!("{}\n[embedding]\nprovider = \"magic\"\n", MINIMAL);
        let err = parse_config(&content).unwrap_err();
        assert!(err.to_string().contains("unknown embedding provider"));
    }

    #[test]
    fn test_remote_provider_requires_model_and_dims() {
        let content = format!("{}\n[embedding]\nprovider = \"openai\"\n", MINIMAL);
        assert!(parse_config(&content).is_err());

        let content = format!(
            "{}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n",
            MINIMAL
        );
        assert!(parse_config(&content).is_ok());
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[test]
    fn test_with_port_keeps_host() {
        let server = ServerConfig {
            bind: "0.0.0.0:5000".to_string(),
        };
        assert_eq!(server.with_port(8080).bind, "0.0.0.0:8080");
    }
}
