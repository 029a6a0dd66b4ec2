//! Persisted vector index: SQLite metadata plus an HNSW graph file.
//!
//! A store lives in one state directory:
//!
//! | File | Contents |
//! |------|----------|
//! | `metadata.sqlite` | `store_meta` (dims, model, chunking) and `chunks` rows with nullable vectors |
//! | `index.hnsw` | binary graph over every embedded row (see [`crate::hnsw`]) |
//! | `index.json` | human-readable summary of the build |
//!
//! The three files only form a valid state when every row has a vector and
//! the graph holds exactly those rows. Rows are written first (vectors
//! null), then embedded batch by batch, then the graph is persisted;
//! [`VectorIndexStore::load`] rejects anything in between with
//! [`RagError::CorruptState`] unless the only gap is rows still awaiting an
//! embedding, which [`VectorIndexStore::update_embeddings`] can fill in.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::embedding::{blob_to_vec, vec_to_blob, Embedder};
use crate::error::{RagError, Result};
use crate::hnsw::{Hnsw, HnswParams};
use crate::models::{Chunk, ChunkRecord};
use crate::retry::{self, RetryPolicy};

pub const METADATA_FILE: &str = "metadata.sqlite";
pub const INDEX_FILE: &str = "index.hnsw";
pub const CONFIG_FILE: &str = "index.json";

const CONFIG_FORMAT_VERSION: u32 = 1;

/// Locations of the persisted files inside one state directory.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedPaths {
    pub dir: PathBuf,
    pub metadata: PathBuf,
    pub index: PathBuf,
    pub config: PathBuf,
}

impl PersistedPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            metadata: dir.join(METADATA_FILE),
            index: dir.join(INDEX_FILE),
            config: dir.join(CONFIG_FILE),
            dir,
        }
    }

    /// Whether any persisted file is present, valid or not.
    pub fn any_exist(&self) -> bool {
        self.metadata.exists() || self.index.exists() || self.config.exists()
    }

    /// SQLite side files that may be left behind by a crash.
    pub fn sidecars(&self) -> Vec<PathBuf> {
        ["-journal", "-wal", "-shm"]
            .iter()
            .map(|suffix| {
                let mut name = self.metadata.as_os_str().to_owned();
                name.push(suffix);
                PathBuf::from(name)
            })
            .collect()
    }
}

/// What a store is built from. Recorded at creation and compared on load.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub model: String,
    pub dims: usize,
    pub hnsw: HnswParams,
    pub chunk_size: usize,
    pub overlap: usize,
}

/// Contents of `index.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexConfigFile {
    pub format_version: u32,
    pub model: String,
    pub dims: usize,
    pub metric: String,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub chunk_size: usize,
    pub overlap: usize,
    pub record_count: usize,
    pub built_at: String,
}

/// Result of one [`VectorIndexStore::update_embeddings`] pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmbedReport {
    pub embedded_now: usize,
    pub embedded_total: usize,
    pub records: usize,
}

pub struct VectorIndexStore {
    pool: SqlitePool,
    paths: PersistedPaths,
    spec: IndexSpec,
    /// Indexed by `seq`.
    records: Vec<ChunkRecord>,
    graph: Hnsw,
    /// Time of the last change to records or vectors, RFC 3339.
    built_at: String,
}

impl std::fmt::Debug for VectorIndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndexStore")
            .field("dir", &self.paths.dir)
            .field("model", &self.spec.model)
            .field("dims", &self.spec.dims)
            .field("records", &self.records.len())
            .field("embedded", &self.graph.len())
            .finish()
    }
}

async fn open_pool(path: &Path, create: bool) -> Result<SqlitePool> {
    // Rollback journal keeps the database a single file, so a staged store
    // can be promoted with one rename.
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(create)
        .journal_mode(SqliteJournalMode::Delete);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

impl VectorIndexStore {
    /// Create an empty store in `paths.dir`, replacing any database already
    /// at that path.
    pub async fn create(paths: &PersistedPaths, spec: &IndexSpec) -> Result<Self> {
        if spec.dims == 0 {
            return Err(RagError::configuration("index dimension must be > 0"));
        }
        std::fs::create_dir_all(&paths.dir)?;
        for path in std::iter::once(paths.metadata.clone()).chain(paths.sidecars()) {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }

        let pool = open_pool(&paths.metadata, true).await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS store_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS chunks (
                seq INTEGER PRIMARY KEY,
                id TEXT NOT NULL UNIQUE,
                source TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                hash TEXT NOT NULL,
                vector BLOB
            )",
        )
        .execute(&pool)
        .await?;

        let meta = [
            ("dims", spec.dims.to_string()),
            ("model", spec.model.clone()),
            ("chunk_size", spec.chunk_size.to_string()),
            ("overlap", spec.overlap.to_string()),
        ];
        let mut tx = pool.begin().await?;
        for (key, value) in meta {
            sqlx::query("INSERT OR REPLACE INTO store_meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        tracing::debug!(path = %paths.metadata.display(), dims = spec.dims, "created metadata store");

        Ok(Self {
            pool,
            paths: paths.clone(),
            spec: spec.clone(),
            records: Vec::new(),
            graph: Hnsw::new(spec.dims, spec.hnsw),
            built_at: Utc::now().to_rfc3339(),
        })
    }

    /// Open a previously persisted store and verify that metadata, graph,
    /// and index config agree. Never creates files.
    pub async fn load(paths: &PersistedPaths, ef_search: usize) -> Result<Self> {
        if !paths.metadata.is_file() {
            return Err(RagError::corrupt(format!(
                "missing metadata store {}",
                paths.metadata.display()
            )));
        }
        if !paths.index.is_file() {
            return Err(RagError::corrupt(format!(
                "missing index file {}",
                paths.index.display()
            )));
        }

        let pool = open_pool(&paths.metadata, false).await?;
        match Self::read_state(pool.clone(), paths, ef_search).await {
            Ok(store) => Ok(store),
            Err(e) => {
                pool.close().await;
                Err(e)
            }
        }
    }

    async fn read_state(pool: SqlitePool, paths: &PersistedPaths, ef_search: usize) -> Result<Self> {
        let unreadable = |e: sqlx::Error| RagError::corrupt(format!("unreadable metadata store: {}", e));

        let meta: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM store_meta")
            .fetch_all(&pool)
            .await
            .map_err(unreadable)?;
        let lookup = |key: &str| {
            meta.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        let dims: usize = lookup("dims")
            .and_then(|v| v.parse().ok())
            .filter(|d| *d > 0)
            .ok_or_else(|| RagError::corrupt("store_meta has no valid dims"))?;
        let model = lookup("model")
            .ok_or_else(|| RagError::corrupt("store_meta has no model"))?
            .to_string();
        let chunk_size = lookup("chunk_size").and_then(|v| v.parse().ok()).unwrap_or(0);
        let overlap = lookup("overlap").and_then(|v| v.parse().ok()).unwrap_or(0);

        let rows: Vec<(i64, String, String, i64, String, String, Option<Vec<u8>>)> = sqlx::query_as(
            "SELECT seq, id, source, chunk_index, content, hash, vector FROM chunks ORDER BY seq",
        )
        .fetch_all(&pool)
        .await
        .map_err(unreadable)?;

        let mut records = Vec::with_capacity(rows.len());
        for (position, (seq, id, source, chunk_index, content, hash, blob)) in rows.into_iter().enumerate() {
            if seq != position as i64 {
                return Err(RagError::corrupt(format!(
                    "chunk sequence gap: expected {}, found {}",
                    position, seq
                )));
            }
            let vector = match blob {
                Some(blob) => {
                    if blob.len() != dims * 4 {
                        return Err(RagError::corrupt(format!(
                            "record {} has a {}-byte vector, expected {}",
                            seq,
                            blob.len(),
                            dims * 4
                        )));
                    }
                    Some(blob_to_vec(&blob))
                }
                None => None,
            };
            records.push(ChunkRecord {
                seq: position as u32,
                id,
                chunk: Chunk {
                    content,
                    source: PathBuf::from(source),
                    chunk_index,
                },
                hash,
                vector,
            });
        }

        let bytes = std::fs::read(&paths.index)
            .map_err(|e| RagError::corrupt(format!("cannot read {}: {}", paths.index.display(), e)))?;
        let mut graph = Hnsw::from_bytes(&bytes)
            .map_err(|e| RagError::corrupt(format!("{}: {}", paths.index.display(), e)))?;
        if graph.dims() != dims {
            return Err(RagError::corrupt(format!(
                "index dimension {} disagrees with metadata dimension {}",
                graph.dims(),
                dims
            )));
        }
        graph.set_ef_search(ef_search);

        let embedded: HashSet<u32> = records
            .iter()
            .filter(|r| r.vector.is_some())
            .map(|r| r.seq)
            .collect();
        if embedded.len() != graph.len() {
            return Err(RagError::corrupt(format!(
                "metadata has {} embedded records but index has {} vectors",
                embedded.len(),
                graph.len()
            )));
        }
        if let Some(missing) = embedded.iter().find(|seq| !graph.contains(**seq)) {
            return Err(RagError::corrupt(format!(
                "embedded record {} has no index node",
                missing
            )));
        }
        if let Some(orphan) = graph.ids().into_iter().find(|id| !embedded.contains(id)) {
            return Err(RagError::corrupt(format!(
                "index node {} has no embedded record",
                orphan
            )));
        }

        let mut built_at = None;
        if paths.config.is_file() {
            let config = read_config_file(&paths.config)?;
            if config.dims != dims || config.record_count != graph.len() {
                return Err(RagError::corrupt(format!(
                    "{} describes {} records of dimension {}, found {} of dimension {}",
                    paths.config.display(),
                    config.record_count,
                    config.dims,
                    graph.len(),
                    dims
                )));
            }
            built_at = Some(config.built_at);
        }

        let spec = IndexSpec {
            model,
            dims,
            hnsw: graph.params(),
            chunk_size,
            overlap,
        };

        tracing::debug!(
            records = records.len(),
            embedded = graph.len(),
            "loaded index from {}",
            paths.dir.display()
        );

        Ok(Self {
            pool,
            paths: paths.clone(),
            spec,
            records,
            graph,
            built_at: built_at.unwrap_or_else(|| Utc::now().to_rfc3339()),
        })
    }

    /// Append chunks as records without vectors, in one transaction.
    /// Returns the number of records written.
    pub async fn insert_chunks(&mut self, chunks: &[Chunk]) -> Result<usize> {
        if self.spec.dims == 0 {
            return Err(RagError::store("store has no recorded dimension"));
        }

        let first_seq = self.records.len() as u32;
        let mut staged = Vec::with_capacity(chunks.len());
        let mut tx = self.pool.begin().await?;
        for (offset, chunk) in chunks.iter().enumerate() {
            let record = ChunkRecord {
                seq: first_seq + offset as u32,
                id: uuid::Uuid::new_v4().to_string(),
                chunk: chunk.clone(),
                hash: format!("{:x}", Sha256::digest(chunk.content.as_bytes())),
                vector: None,
            };
            sqlx::query(
                "INSERT INTO chunks (seq, id, source, chunk_index, content, hash, vector)
                 VALUES (?, ?, ?, ?, ?, ?, NULL)",
            )
            .bind(record.seq as i64)
            .bind(&record.id)
            .bind(record.chunk.source.to_string_lossy().to_string())
            .bind(record.chunk.chunk_index)
            .bind(&record.chunk.content)
            .bind(&record.hash)
            .execute(&mut *tx)
            .await?;
            staged.push(record);
        }
        tx.commit().await?;

        self.records.extend(staged);
        if !chunks.is_empty() {
            self.built_at = Utc::now().to_rfc3339();
        }
        Ok(chunks.len())
    }

    /// Embed every record that has no vector yet.
    ///
    /// Each batch goes through `retry`; a batch that still fails ends the
    /// pass with that error. Completed batches stay committed, so a later
    /// call picks up where this one stopped.
    pub async fn update_embeddings(
        &mut self,
        embedder: &dyn Embedder,
        batch_size: usize,
        retry: &RetryPolicy,
    ) -> Result<EmbedReport> {
        if embedder.dims() != self.spec.dims {
            return Err(RagError::configuration(format!(
                "embedder produces {}-dimensional vectors but the store holds {}",
                embedder.dims(),
                self.spec.dims
            )));
        }

        let pending: Vec<u32> = self
            .records
            .iter()
            .filter(|r| r.vector.is_none())
            .map(|r| r.seq)
            .collect();

        let mut embedded_now = 0;
        for batch in pending.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch
                .iter()
                .map(|seq| self.records[*seq as usize].chunk.content.clone())
                .collect();

            let texts_ref = &texts;
            let vectors = retry
                .run("embedding batch", move || embedder.embed(texts_ref))
                .await
                .map_err(|e| retry::exhausted("embedding batch", e))?;

            if vectors.len() != batch.len() {
                return Err(RagError::embedding_permanent(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != self.spec.dims) {
                return Err(RagError::configuration(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.spec.dims,
                    bad.len()
                )));
            }

            let mut tx = self.pool.begin().await?;
            for (seq, vector) in batch.iter().zip(&vectors) {
                sqlx::query("UPDATE chunks SET vector = ? WHERE seq = ?")
                    .bind(vec_to_blob(vector))
                    .bind(*seq as i64)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;

            for (seq, vector) in batch.iter().zip(vectors) {
                self.graph
                    .insert(*seq, vector.clone())
                    .map_err(|e| RagError::store(format!("index insert failed: {}", e)))?;
                self.records[*seq as usize].vector = Some(vector);
            }
            embedded_now += batch.len();
            self.built_at = Utc::now().to_rfc3339();

            tracing::debug!(
                batch = batch.len(),
                done = embedded_now,
                pending = pending.len(),
                "embedded batch"
            );
        }

        Ok(EmbedReport {
            embedded_now,
            embedded_total: self.graph.len(),
            records: self.records.len(),
        })
    }

    /// Write `index.hnsw` and `index.json`. Refused while any record lacks
    /// a vector.
    pub async fn persist(&self) -> Result<()> {
        if self.embedded_count() != self.record_count() {
            return Err(RagError::store(format!(
                "refusing to persist: {} of {} records embedded",
                self.embedded_count(),
                self.record_count()
            )));
        }

        std::fs::create_dir_all(&self.paths.dir)?;
        write_atomic(&self.paths.index, &self.graph.to_bytes())?;

        let params = self.graph.params();
        let config = IndexConfigFile {
            format_version: CONFIG_FORMAT_VERSION,
            model: self.spec.model.clone(),
            dims: self.spec.dims,
            metric: "cosine".to_string(),
            m: params.m,
            ef_construction: params.ef_construction,
            ef_search: params.ef_search,
            chunk_size: self.spec.chunk_size,
            overlap: self.spec.overlap,
            record_count: self.graph.len(),
            built_at: self.built_at.clone(),
        };
        let json = serde_json::to_vec_pretty(&config)
            .map_err(|e| RagError::store(format!("failed to encode index config: {}", e)))?;
        write_atomic(&self.paths.config, &json)?;

        tracing::debug!(records = self.graph.len(), "persisted index to {}", self.paths.dir.display());
        Ok(())
    }

    /// Nearest records to `query`, best first, at most `top_k` and never
    /// more than the number of embedded records.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(Chunk, f32)>> {
        if top_k == 0 {
            return Err(RagError::configuration("top_k must be >= 1"));
        }
        if query.len() != self.spec.dims {
            return Err(RagError::configuration(format!(
                "query vector has dimension {}, index has {}",
                query.len(),
                self.spec.dims
            )));
        }

        let k = top_k.min(self.graph.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        Ok(self
            .graph
            .search(query, k)
            .into_iter()
            .filter_map(|(seq, score)| {
                self.records
                    .get(seq as usize)
                    .map(|record| (record.chunk.clone(), score))
            })
            .collect())
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn embedded_count(&self) -> usize {
        self.graph.len()
    }

    pub fn dims(&self) -> usize {
        self.spec.dims
    }

    pub fn model(&self) -> &str {
        &self.spec.model
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub fn paths(&self) -> &PersistedPaths {
        &self.paths
    }

    /// When records or vectors last changed; persisting again keeps it.
    pub fn built_at(&self) -> &str {
        &self.built_at
    }

    pub fn records(&self) -> &[ChunkRecord] {
        &self.records
    }

    /// Release the SQLite pool. The store must not be used afterwards.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub fn read_config_file(path: &Path) -> Result<IndexConfigFile> {
    let bytes = std::fs::read(path)
        .map_err(|e| RagError::corrupt(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| RagError::corrupt(format!("{}: {}", path.display(), e)))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use tempfile::TempDir;

    fn spec(dims: usize) -> IndexSpec {
        IndexSpec {
            model: format!("hash-{}", dims),
            dims,
            hnsw: HnswParams {
                m: 8,
                ef_construction: 64,
                ef_search: 32,
            },
            chunk_size: 1000,
            overlap: 100,
        }
    }

    fn chunk(content: &str, index: i64) -> Chunk {
        Chunk {
            content: content.to_string(),
            source: PathBuf::from("/docs/a.pdf"),
            chunk_index: index,
        }
    }

    fn corpus() -> Vec<Chunk> {
        vec![
            chunk("rust ownership and borrowing rules", 0),
            chunk("sqlite write ahead logging and journals", 1),
            chunk("tokio async runtime scheduling tasks", 2),
        ]
    }

    async fn built_store(dir: &Path) -> VectorIndexStore {
        let embedder = HashEmbedder::new(64);
        let mut store = VectorIndexStore::create(&PersistedPaths::new(dir), &spec(64))
            .await
            .unwrap();
        store.insert_chunks(&corpus()).await.unwrap();
        store
            .update_embeddings(&embedder, 2, &RetryPolicy::none())
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_insert_then_embed_counts() {
        let tmp = TempDir::new().unwrap();
        let embedder = HashEmbedder::new(64);
        let mut store = VectorIndexStore::create(&PersistedPaths::new(tmp.path()), &spec(64))
            .await
            .unwrap();

        assert_eq!(store.insert_chunks(&corpus()).await.unwrap(), 3);
        assert_eq!(store.record_count(), 3);
        assert_eq!(store.embedded_count(), 0);

        let report = store
            .update_embeddings(&embedder, 2, &RetryPolicy::none())
            .await
            .unwrap();
        assert_eq!(
            report,
            EmbedReport {
                embedded_now: 3,
                embedded_total: 3,
                records: 3
            }
        );
        store.close().await;
    }

    #[tokio::test]
    async fn test_update_embeddings_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mut store = built_store(tmp.path()).await;
        let before: Vec<Option<Vec<f32>>> = store.records().iter().map(|r| r.vector.clone()).collect();

        let report = store
            .update_embeddings(&HashEmbedder::new(64), 2, &RetryPolicy::none())
            .await
            .unwrap();
        assert_eq!(report.embedded_now, 0);
        assert_eq!(store.embedded_count(), 3);

        let after: Vec<Option<Vec<f32>>> = store.records().iter().map(|r| r.vector.clone()).collect();
        assert_eq!(before, after);
        store.close().await;
    }

    #[tokio::test]
    async fn test_wrong_embedder_dimension_rejected() {
        let tmp = TempDir::new().unwrap();
        let mut store = VectorIndexStore::create(&PersistedPaths::new(tmp.path()), &spec(64))
            .await
            .unwrap();
        store.insert_chunks(&corpus()).await.unwrap();
        let err = store
            .update_embeddings(&HashEmbedder::new(32), 2, &RetryPolicy::none())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
        store.close().await;
    }

    #[tokio::test]
    async fn test_search_ranks_and_clips() {
        let tmp = TempDir::new().unwrap();
        let store = built_store(tmp.path()).await;
        let query = HashEmbedder::new(64).embed_one("tokio async runtime");

        let hits = store.search(&query, 10).unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].0.chunk_index, 2);
        assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));

        assert!(matches!(store.search(&query, 0), Err(RagError::Configuration(_))));
        assert!(matches!(store.search(&[1.0, 0.0], 1), Err(RagError::Configuration(_))));
        store.close().await;
    }

    #[tokio::test]
    async fn test_persist_refused_while_partial() {
        let tmp = TempDir::new().unwrap();
        let mut store = VectorIndexStore::create(&PersistedPaths::new(tmp.path()), &spec(64))
            .await
            .unwrap();
        store.insert_chunks(&corpus()).await.unwrap();
        assert!(matches!(store.persist().await, Err(RagError::Store(_))));
        assert!(!tmp.path().join(INDEX_FILE).exists());
        store.close().await;
    }

    #[tokio::test]
    async fn test_persist_then_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = built_store(tmp.path()).await;
        store.persist().await.unwrap();
        let query = HashEmbedder::new(64).embed_one("sqlite journals");
        let expected = store.search(&query, 3).unwrap();
        store.close().await;

        let loaded = VectorIndexStore::load(&PersistedPaths::new(tmp.path()), 32)
            .await
            .unwrap();
        assert_eq!(loaded.record_count(), 3);
        assert_eq!(loaded.embedded_count(), 3);
        assert_eq!(loaded.model(), "hash-64");
        assert_eq!(loaded.spec().chunk_size, 1000);
        assert_eq!(loaded.search(&query, 3).unwrap(), expected);

        let config = read_config_file(&tmp.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.record_count, 3);
        assert_eq!(config.metric, "cosine");
        loaded.close().await;
    }

    #[tokio::test]
    async fn test_repersist_keeps_build_time() {
        let tmp = TempDir::new().unwrap();
        let store = built_store(tmp.path()).await;
        store.persist().await.unwrap();
        let built_at = read_config_file(&tmp.path().join(CONFIG_FILE)).unwrap().built_at;
        store.close().await;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let loaded = VectorIndexStore::load(&PersistedPaths::new(tmp.path()), 32)
            .await
            .unwrap();
        assert_eq!(loaded.built_at(), built_at);
        loaded.persist().await.unwrap();
        let config = read_config_file(&tmp.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.built_at, built_at);
        loaded.close().await;
    }

    #[tokio::test]
    async fn test_load_missing_index_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = built_store(tmp.path()).await;
        store.close().await;
        let err = VectorIndexStore::load(&PersistedPaths::new(tmp.path()), 32)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::CorruptState(_)));
    }

    #[tokio::test]
    async fn test_load_count_mismatch_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = built_store(tmp.path()).await;
        store.persist().await.unwrap();
        store.close().await;

        // Replace the graph with one holding a single vector.
        let mut graph = Hnsw::new(64, spec(64).hnsw);
        graph
            .insert(0, HashEmbedder::new(64).embed_one("rust ownership"))
            .unwrap();
        std::fs::write(tmp.path().join(INDEX_FILE), graph.to_bytes()).unwrap();

        let err = VectorIndexStore::load(&PersistedPaths::new(tmp.path()), 32)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::CorruptState(_)));
    }

    #[tokio::test]
    async fn test_load_garbage_index_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let store = built_store(tmp.path()).await;
        store.persist().await.unwrap();
        store.close().await;
        std::fs::write(tmp.path().join(INDEX_FILE), b"garbage").unwrap();

        let err = VectorIndexStore::load(&PersistedPaths::new(tmp.path()), 32)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::CorruptState(_)));
    }

    #[tokio::test]
    async fn test_resume_partial_store() {
        let tmp = TempDir::new().unwrap();
        let paths = PersistedPaths::new(tmp.path());
        let mut store = built_store(tmp.path()).await;
        store.persist().await.unwrap();
        store
            .insert_chunks(&[chunk("late arrival about vector indexes", 3)])
            .await
            .unwrap();
        store.close().await;

        let mut loaded = VectorIndexStore::load(&paths, 32).await.unwrap();
        assert_eq!(loaded.record_count(), 4);
        assert_eq!(loaded.embedded_count(), 3);

        let report = loaded
            .update_embeddings(&HashEmbedder::new(64), 8, &RetryPolicy::none())
            .await
            .unwrap();
        assert_eq!(report.embedded_now, 1);
        loaded.persist().await.unwrap();
        loaded.close().await;

        let reloaded = VectorIndexStore::load(&paths, 32).await.unwrap();
        assert_eq!(reloaded.embedded_count(), 4);
        reloaded.close().await;
    }

    #[tokio::test]
    async fn test_records_carry_id_and_hash() {
        let tmp = TempDir::new().unwrap();
        let store = built_store(tmp.path()).await;
        let record = &store.records()[0];
        assert_eq!(record.id.len(), 36);
        assert_eq!(record.hash.len(), 64);
        assert_ne!(store.records()[0].id, store.records()[1].id);
        store.close().await;
    }
}
