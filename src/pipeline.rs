//! Query-time retrieval: embed the question, search the index, map hits.
//!
//! The pipeline starts empty and answers [`RagError::NotReady`] until the
//! lifecycle manager installs a store with [`RetrievalPipeline::install`].
//! After that the context never changes, so queries run concurrently with
//! no locking.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::embedding::{embed_query, Embedder};
use crate::error::{RagError, Result};
use crate::models::QueryHit;
use crate::store::VectorIndexStore;

struct Retriever {
    store: Arc<VectorIndexStore>,
    embedder: Arc<dyn Embedder>,
}

pub struct RetrievalPipeline {
    context: OnceLock<Retriever>,
    default_top_k: usize,
    embed_timeout: Duration,
}

impl RetrievalPipeline {
    pub fn new(default_top_k: usize, embed_timeout: Duration) -> Self {
        Self {
            context: OnceLock::new(),
            default_top_k,
            embed_timeout,
        }
    }

    /// Install the ready store. Only the first call has any effect.
    pub fn install(&self, store: Arc<VectorIndexStore>, embedder: Arc<dyn Embedder>) -> Result<()> {
        self.context
            .set(Retriever { store, embedder })
            .map_err(|_| RagError::configuration("retrieval pipeline already initialized"))
    }

    pub fn is_ready(&self) -> bool {
        self.context.get().is_some()
    }

    pub fn store(&self) -> Option<Arc<VectorIndexStore>> {
        self.context.get().map(|ctx| Arc::clone(&ctx.store))
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// Rank stored chunks against `text`. `top_k` falls back to the
    /// configured default.
    pub async fn query(&self, text: &str, top_k: Option<usize>) -> Result<Vec<QueryHit>> {
        let ctx = self.context.get().ok_or(RagError::NotReady)?;
        let top_k = top_k.unwrap_or(self.default_top_k);

        let vector = tokio::time::timeout(self.embed_timeout, embed_query(ctx.embedder.as_ref(), text))
            .await
            .map_err(|_| {
                RagError::embedding_transient(format!(
                    "query embedding timed out after {:?}",
                    self.embed_timeout
                ))
            })??;

        let hits = ctx.store.search(&vector, top_k)?;
        Ok(hits
            .into_iter()
            .map(|(chunk, score)| QueryHit {
                text: chunk.content,
                source: chunk.source.display().to_string(),
                score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[tokio::test]
    async fn test_query_before_ready_is_not_ready() {
        let pipeline = RetrievalPipeline::new(3, Duration::from_secs(1));
        assert!(!pipeline.is_ready());
        assert!(pipeline.store().is_none());
        let err = pipeline.query("anything", None).await.unwrap_err();
        assert!(matches!(err, RagError::NotReady));
    }

    struct Stalled;

    #[async_trait]
    impl Embedder for Stalled {
        fn model_name(&self) -> &str {
            "stalled"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![vec![0.0; 4]])
        }
    }

    #[tokio::test]
    async fn test_slow_embedding_times_out() {
        use crate::hnsw::HnswParams;
        use crate::store::{IndexSpec, PersistedPaths};

        let tmp = tempfile::TempDir::new().unwrap();
        let store = VectorIndexStore::create(
            &PersistedPaths::new(tmp.path()),
            &IndexSpec {
                model: "stalled".to_string(),
                dims: 4,
                hnsw: HnswParams::default(),
                chunk_size: 10,
                overlap: 0,
            },
        )
        .await
        .unwrap();

        let pipeline = RetrievalPipeline::new(3, Duration::from_millis(20));
        pipeline.install(Arc::new(store), Arc::new(Stalled)).unwrap();

        let err = pipeline.query("question", None).await.unwrap_err();
        assert!(matches!(err, RagError::Embedding { retryable: true, .. }));
        assert!(pipeline.install(pipeline.store().unwrap(), Arc::new(Stalled)).is_err());
    }
}
