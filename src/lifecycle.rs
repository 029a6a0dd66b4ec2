//! Startup decision: load the persisted index or rebuild it from sources.
//!
//! ```text
//! FreshStart ──no files──────────────────────────────▶ Rebuild
//! FreshStart ──files present─▶ AttemptLoad
//! AttemptLoad ──ok, fully embedded───────────────────▶ Ready (Loaded)
//! AttemptLoad ──ok, records awaiting vectors──▶ embed + persist ▶ Ready (Resumed)
//! AttemptLoad ──ok, built by another model/chunking──▶ Rebuild
//! AttemptLoad ──error─▶ LoadFailed ──────────────────▶ Rebuild
//! Rebuild ──ok───────────────────────────────────────▶ Ready (Rebuilt)
//! Rebuild ──error────────────────────────────────────▶ fatal (Err)
//! ```
//!
//! A rebuild writes a complete store into a staging directory inside the
//! state directory, then swaps it in by rename: index files first, metadata
//! last. A crash part-way leaves a state that the next `AttemptLoad`
//! rejects, never a silently truncated index.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chunk;
use crate::config::{Config, SourceConfig};
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::extract::{PdfExtractor, TextExtractor};
use crate::hnsw::HnswParams;
use crate::models::Chunk;
use crate::retry::RetryPolicy;
use crate::sources;
use crate::store::{IndexSpec, PersistedPaths, VectorIndexStore};

const STAGING_DIR: &str = ".staging";

/// Creates the empty metadata store a rebuild writes into.
#[async_trait]
pub trait StoreFactory: Send + Sync {
    async fn create(&self, paths: &PersistedPaths, spec: &IndexSpec) -> Result<VectorIndexStore>;
}

/// [`VectorIndexStore::create`] on the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteStores;

#[async_trait]
impl StoreFactory for SqliteStores {
    async fn create(&self, paths: &PersistedPaths, spec: &IndexSpec) -> Result<VectorIndexStore> {
        VectorIndexStore::create(paths, spec).await
    }
}

/// Why the index was rebuilt instead of loaded.
#[derive(Debug, Clone, PartialEq)]
pub enum RebuildReason {
    NoPersistedState,
    Forced,
    LoadFailed(String),
    Stale(String),
}

impl std::fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RebuildReason::NoPersistedState => write!(f, "no persisted index"),
            RebuildReason::Forced => write!(f, "rebuild requested"),
            RebuildReason::LoadFailed(e) => write!(f, "load failed: {}", e),
            RebuildReason::Stale(why) => write!(f, "stale index: {}", why),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartupOutcome {
    /// Persisted state loaded as-is.
    Loaded,
    /// Persisted state loaded and its missing embeddings filled in.
    Resumed { embedded: usize },
    Rebuilt { reason: RebuildReason },
}

enum State {
    FreshStart,
    AttemptLoad,
    LoadFailed(RagError),
    Rebuild(RebuildReason),
    Ready(VectorIndexStore, StartupOutcome),
}

/// Settings the lifecycle needs, lifted out of [`Config`].
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub source: SourceConfig,
    pub state_dir: PathBuf,
    pub hnsw: HnswParams,
    pub chunk_size: usize,
    pub overlap: usize,
    pub batch_size: usize,
    pub batch_retry: RetryPolicy,
    pub store_retry: RetryPolicy,
}

impl LifecycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source: config.source.clone(),
            state_dir: config.index.state_dir.clone(),
            hnsw: HnswParams {
                m: config.index.m,
                ef_construction: config.index.ef_construction,
                ef_search: config.index.ef_search,
            },
            chunk_size: config.chunking.chunk_size,
            overlap: config.chunking.overlap,
            batch_size: config.embedding.batch_size,
            batch_retry: config.embedding.batch_retry(),
            store_retry: config.startup.store_retry(),
        }
    }
}

pub struct IndexLifecycleManager {
    settings: LifecycleSettings,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn TextExtractor>,
    stores: Arc<dyn StoreFactory>,
    force_rebuild: bool,
}

impl IndexLifecycleManager {
    pub fn new(
        settings: LifecycleSettings,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        Self {
            settings,
            embedder,
            extractor,
            stores: Arc::new(SqliteStores),
            force_rebuild: false,
        }
    }

    /// Manager for `config`, reading sources with [`PdfExtractor`].
    pub fn from_config(config: &Config, embedder: Arc<dyn Embedder>) -> Self {
        Self::new(
            LifecycleSettings::from_config(config),
            embedder,
            Arc::new(PdfExtractor),
        )
    }

    /// Skip loading and always rebuild from sources.
    pub fn force_rebuild(mut self, force: bool) -> Self {
        self.force_rebuild = force;
        self
    }

    /// Replace how rebuilds create their metadata store.
    pub fn store_factory(mut self, stores: Arc<dyn StoreFactory>) -> Self {
        self.stores = stores;
        self
    }

    pub fn paths(&self) -> PersistedPaths {
        PersistedPaths::new(&self.settings.state_dir)
    }

    fn index_spec(&self) -> IndexSpec {
        IndexSpec {
            model: self.embedder.model_name().to_string(),
            dims: self.embedder.dims(),
            hnsw: self.settings.hnsw,
            chunk_size: self.settings.chunk_size,
            overlap: self.settings.overlap,
        }
    }

    /// Run the state machine to completion. An `Err` is fatal.
    pub async fn start(&self) -> Result<(VectorIndexStore, StartupOutcome)> {
        let paths = self.paths();
        let mut state = if self.force_rebuild {
            State::Rebuild(RebuildReason::Forced)
        } else {
            State::FreshStart
        };

        loop {
            state = match state {
                State::FreshStart => {
                    if paths.any_exist() {
                        State::AttemptLoad
                    } else {
                        State::Rebuild(RebuildReason::NoPersistedState)
                    }
                }
                State::AttemptLoad => {
                    match VectorIndexStore::load(&paths, self.settings.hnsw.ef_search).await {
                        Ok(store) => self.after_load(store).await?,
                        Err(e) => State::LoadFailed(e),
                    }
                }
                State::LoadFailed(err) => {
                    tracing::warn!(class = err.class(), error = %err, "persisted index unusable, rebuilding");
                    State::Rebuild(RebuildReason::LoadFailed(err.to_string()))
                }
                State::Rebuild(reason) => {
                    tracing::info!(%reason, "rebuilding index from {}", self.settings.source.root.display());
                    let store = self.rebuild(&paths).await?;
                    State::Ready(store, StartupOutcome::Rebuilt { reason })
                }
                State::Ready(store, outcome) => {
                    tracing::info!(
                        records = store.record_count(),
                        model = store.model(),
                        outcome = ?outcome,
                        "index ready"
                    );
                    return Ok((store, outcome));
                }
            };
        }
    }

    async fn after_load(&self, mut store: VectorIndexStore) -> Result<State> {
        if let Some(why) = self.stale_reason(&store) {
            store.close().await;
            return Ok(State::Rebuild(RebuildReason::Stale(why)));
        }

        if store.embedded_count() == store.record_count() {
            return Ok(State::Ready(store, StartupOutcome::Loaded));
        }

        tracing::info!(
            pending = store.record_count() - store.embedded_count(),
            "resuming embeddings for persisted records"
        );
        let outcome = async {
            let report = store
                .update_embeddings(
                    self.embedder.as_ref(),
                    self.settings.batch_size,
                    &self.settings.batch_retry,
                )
                .await?;
            store.persist().await?;
            Ok::<_, RagError>(report)
        }
        .await;

        match outcome {
            Ok(report) => Ok(State::Ready(
                store,
                StartupOutcome::Resumed {
                    embedded: report.embedded_now,
                },
            )),
            Err(e) => {
                store.close().await;
                Err(e)
            }
        }
    }

    fn stale_reason(&self, store: &VectorIndexStore) -> Option<String> {
        let expected = self.index_spec();
        let found = store.spec();
        if found.model != expected.model {
            return Some(format!(
                "built with model '{}', configured '{}'",
                found.model, expected.model
            ));
        }
        if found.dims != expected.dims {
            return Some(format!(
                "built with dimension {}, configured {}",
                found.dims, expected.dims
            ));
        }
        if (found.chunk_size, found.overlap) != (expected.chunk_size, expected.overlap) {
            return Some(format!(
                "built with chunking {}/{}, configured {}/{}",
                found.chunk_size, found.overlap, expected.chunk_size, expected.overlap
            ));
        }
        None
    }

    async fn rebuild(&self, paths: &PersistedPaths) -> Result<VectorIndexStore> {
        let source = self.settings.source.clone();
        let extractor = Arc::clone(&self.extractor);
        let documents = tokio::task::spawn_blocking(move || {
            sources::collect_documents(&source, extractor.as_ref())
        })
        .await
        .map_err(|e| RagError::store(format!("source walk task failed: {}", e)))??;

        let chunks = chunk::split(&documents, self.settings.chunk_size, self.settings.overlap)?;
        tracing::info!(documents = documents.len(), chunks = chunks.len(), "chunked sources");

        let staging_dir = self.settings.state_dir.join(STAGING_DIR);
        if staging_dir.exists() {
            std::fs::remove_dir_all(&staging_dir)?;
        }
        std::fs::create_dir_all(&staging_dir)?;
        let staged = PersistedPaths::new(&staging_dir);

        if let Err(e) = self.build_staged(&staged, &chunks).await {
            discard_dir(&staging_dir);
            return Err(e);
        }

        promote(&staged, paths)?;
        discard_dir(&staging_dir);

        VectorIndexStore::load(paths, self.settings.hnsw.ef_search).await
    }

    async fn build_staged(&self, staged: &PersistedPaths, chunks: &[Chunk]) -> Result<()> {
        let spec = self.index_spec();
        let spec_ref = &spec;
        let stores = self.stores.as_ref();
        let mut store = self
            .settings
            .store_retry
            .run("metadata store creation", move || stores.create(staged, spec_ref))
            .await?;

        let result = async {
            store.insert_chunks(chunks).await?;
            let report = store
                .update_embeddings(
                    self.embedder.as_ref(),
                    self.settings.batch_size,
                    &self.settings.batch_retry,
                )
                .await?;
            tracing::info!(embedded = report.embedded_total, "embedded all chunks");
            store.persist().await
        }
        .await;

        store.close().await;
        result
    }
}

/// Rename a staged store over the live one: index files first, metadata
/// last. Each rename replaces its target, so nothing live is deleted first.
fn promote(staged: &PersistedPaths, live: &PersistedPaths) -> Result<()> {
    for path in live.sidecars() {
        discard_file(&path);
    }

    for (from, to) in [
        (&staged.index, &live.index),
        (&staged.config, &live.config),
        (&staged.metadata, &live.metadata),
    ] {
        std::fs::rename(from, to).map_err(|e| {
            RagError::store(format!(
                "failed to move {} to {}: {}",
                from.display(),
                to.display(),
                e
            ))
        })?;
    }
    Ok(())
}

fn discard_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "could not remove old index file"),
    }
}

fn discard_dir(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "could not remove staging directory");
        }
    }
}
